use std::cmp::Ordering;
use std::collections::HashMap;

use crate::cancel::Cancel;
use crate::error::Result;
use crate::hash::Hash;
use crate::noder::{Node, TreeNoder};
use crate::object::Database;
use crate::types::{subtree_cmp, FileMode};

/// one side of a change
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEntry {
    pub path: String,
    pub mode: FileMode,
    pub hash: Hash,
    pub size: u64,
}

/// a single difference between two trees; either side may be absent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    pub from: Option<ChangeEntry>,
    pub to: Option<ChangeEntry>,
}

impl Change {
    /// path of the change, preferring the destination side
    pub fn path(&self) -> &str {
        self.to
            .as_ref()
            .or(self.from.as_ref())
            .map(|e| e.path.as_str())
            .expect("change has at least one side")
    }

    pub fn is_insert(&self) -> bool {
        self.from.is_none() && self.to.is_some()
    }

    pub fn is_delete(&self) -> bool {
        self.from.is_some() && self.to.is_none()
    }

    pub fn is_modify(&self) -> bool {
        self.from.is_some() && self.to.is_some()
    }
}

/// diff two noder roots by synchronized descent over their sorted
/// children; only non-directory entries are emitted
pub fn diff_nodes(from: &dyn Node, to: &dyn Node, ctx: &Cancel) -> Result<Vec<Change>> {
    let mut changes = Vec::new();
    diff_dir(from, to, "", ctx, &mut changes)?;
    Ok(changes)
}

/// diff two stored trees; `None` stands for the empty tree
pub fn diff_trees(
    db: &Database,
    from: Option<Hash>,
    to: Option<Hash>,
    ctx: &Cancel,
) -> Result<Vec<Change>> {
    if from == to {
        return Ok(vec![]);
    }
    diff_nodes(&TreeNoder::root(db, from), &TreeNoder::root(db, to), ctx)
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

fn entry_of(node: &dyn Node, path: String) -> Result<ChangeEntry> {
    Ok(ChangeEntry {
        path,
        mode: node.mode(),
        hash: node.hash()?,
        size: node.size(),
    })
}

fn diff_dir(
    from: &dyn Node,
    to: &dyn Node,
    prefix: &str,
    ctx: &Cancel,
    changes: &mut Vec<Change>,
) -> Result<()> {
    ctx.check()?;

    let from_children = from.children(ctx)?;
    let to_children = to.children(ctx)?;

    let mut i = 0;
    let mut j = 0;
    while i < from_children.len() || j < to_children.len() {
        ctx.check()?;

        let order = match (from_children.get(i), to_children.get(j)) {
            (Some(a), Some(b)) => subtree_cmp(a.name(), a.is_dir(), b.name(), b.is_dir()),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };

        match order {
            Ordering::Less => {
                emit_side(from_children[i].as_ref(), prefix, ctx, changes, false)?;
                i += 1;
            }
            Ordering::Greater => {
                emit_side(to_children[j].as_ref(), prefix, ctx, changes, true)?;
                j += 1;
            }
            Ordering::Equal => {
                diff_pair(
                    from_children[i].as_ref(),
                    to_children[j].as_ref(),
                    prefix,
                    ctx,
                    changes,
                )?;
                i += 1;
                j += 1;
            }
        }
    }
    Ok(())
}

fn diff_pair(
    a: &dyn Node,
    b: &dyn Node,
    prefix: &str,
    ctx: &Cancel,
    changes: &mut Vec<Change>,
) -> Result<()> {
    let path = join(prefix, a.name());

    match (a.is_dir(), b.is_dir()) {
        (true, true) => {
            // merkle shortcut when both sides carry a real tree hash
            let ha = a.hash()?;
            let hb = b.hash()?;
            if !ha.is_zero() && ha == hb {
                return Ok(());
            }
            diff_dir(a, b, &path, ctx, changes)
        }
        (true, false) | (false, true) => {
            // type flip: one whole side vanishes, the other appears
            emit_side(a, prefix, ctx, changes, false)?;
            emit_side(b, prefix, ctx, changes, true)?;
            Ok(())
        }
        (false, false) => {
            // fragments carriers and everything else compare by the
            // hash the entry carries; shards are never read
            let equal = a.mode() == b.mode() && a.size() == b.size() && a.hash()? == b.hash()?;
            if !equal {
                changes.push(Change {
                    from: Some(entry_of(a, path.clone())?),
                    to: Some(entry_of(b, path)?),
                });
            }
            Ok(())
        }
    }
}

/// emit a whole subtree (or single entry) as inserts or deletes
fn emit_side(
    node: &dyn Node,
    prefix: &str,
    ctx: &Cancel,
    changes: &mut Vec<Change>,
    insert: bool,
) -> Result<()> {
    ctx.check()?;
    let path = join(prefix, node.name());

    if node.is_dir() {
        for child in node.children(ctx)? {
            emit_side(child.as_ref(), &path, ctx, changes, insert)?;
        }
        return Ok(());
    }

    let entry = entry_of(node, path)?;
    changes.push(if insert {
        Change {
            from: None,
            to: Some(entry),
        }
    } else {
        Change {
            from: Some(entry),
            to: None,
        }
    });
    Ok(())
}

/// pair inserts with deletes whose hashes match exactly; no similarity
/// scoring
pub fn detect_exact_renames(changes: Vec<Change>) -> Vec<Change> {
    let mut deletes: HashMap<Hash, Vec<ChangeEntry>> = HashMap::new();
    let mut rest = Vec::with_capacity(changes.len());

    for change in changes {
        match (&change.from, &change.to) {
            (Some(from), None) if !from.hash.is_zero() && from.hash != Hash::EMPTY_BLOB => {
                deletes.entry(from.hash).or_default().push(from.clone());
            }
            _ => rest.push(change),
        }
    }

    let mut out = Vec::with_capacity(rest.len());
    for change in rest {
        if let Change {
            from: None,
            to: Some(to),
        } = &change
        {
            if let Some(candidates) = deletes.get_mut(&to.hash) {
                if let Some(from) = candidates.pop() {
                    out.push(Change {
                        from: Some(from),
                        to: Some(to.clone()),
                    });
                    continue;
                }
            }
        }
        out.push(change);
    }

    // unpaired deletes stay deletes, in path order
    let mut leftover: Vec<ChangeEntry> = deletes.into_values().flatten().collect();
    leftover.sort_by(|a, b| a.path.cmp(&b.path));
    for from in leftover {
        out.push(Change {
            from: Some(from),
            to: None,
        });
    }
    out
}

/// default name canonicalization for case-insensitive filesystems
pub fn fold_ascii(name: &str) -> String {
    name.chars().map(|c| c.to_ascii_lowercase()).collect()
}

/// group destination paths that collide after canonicalization; each
/// returned group holds at least two distinct paths
pub fn case_conflicts(changes: &[Change], fold: Option<&dyn Fn(&str) -> String>) -> Vec<Vec<String>> {
    let default_fold = fold_ascii;
    let fold: &dyn Fn(&str) -> String = match fold {
        Some(f) => f,
        None => &default_fold,
    };

    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    for change in changes {
        if let Some(to) = &change.to {
            let folded = fold(&to.path);
            let group = groups.entry(folded).or_default();
            if !group.contains(&to.path) {
                group.push(to.path.clone());
            }
        }
    }

    let mut conflicts: Vec<Vec<String>> = groups
        .into_values()
        .filter(|g| g.len() > 1)
        .collect();
    conflicts.sort();
    conflicts
}
