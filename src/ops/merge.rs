use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::cancel::Cancel;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::object::frame::sniff_is_text;
use crate::object::Database;
use crate::ops::diff::{diff_trees, Change, ChangeEntry};
use crate::traverse::{BfsWalk, Walker};
use crate::types::{FileMode, Tree, TreeEntry};

/// conflict marker style
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictStyle {
    Merge,
    Diff3,
    Zdiff3,
}

impl ConflictStyle {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "merge" => Some(ConflictStyle::Merge),
            "diff3" => Some(ConflictStyle::Diff3),
            "zdiff3" => Some(ConflictStyle::Zdiff3),
            _ => None,
        }
    }
}

/// result of a textual three-way merge
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergedText {
    pub content: String,
    /// false when conflict markers were emitted
    pub clean: bool,
}

/// a replaced region of the base
#[derive(Clone, Debug)]
struct Hunk<'a> {
    base_start: usize,
    base_end: usize,
    replacement: Vec<&'a str>,
}

/// line-level diff as replacement hunks over the base
fn line_diff<'a>(base: &[&'a str], side: &[&'a str]) -> Vec<Hunk<'a>> {
    // common prefix and suffix shrink the problem
    let mut prefix = 0;
    while prefix < base.len() && prefix < side.len() && base[prefix] == side[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < base.len() - prefix
        && suffix < side.len() - prefix
        && base[base.len() - 1 - suffix] == side[side.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let a = &base[prefix..base.len() - suffix];
    let b = &side[prefix..side.len() - suffix];
    if a.is_empty() && b.is_empty() {
        return vec![];
    }

    // quadratic LCS is fine for ordinary files; degrade to a single
    // replacement hunk for pathological inputs
    const LCS_CAP: usize = 1_000_000;
    if a.is_empty() || b.is_empty() || a.len() * b.len() > LCS_CAP {
        return vec![Hunk {
            base_start: prefix,
            base_end: prefix + a.len(),
            replacement: b.to_vec(),
        }];
    }

    let matches = lcs_pairs(a, b);

    let mut hunks = Vec::new();
    let mut ai = 0;
    let mut bi = 0;
    for (ma, mb) in matches.into_iter().chain(std::iter::once((a.len(), b.len()))) {
        if ai != ma || bi != mb {
            hunks.push(Hunk {
                base_start: prefix + ai,
                base_end: prefix + ma,
                replacement: b[bi..mb].to_vec(),
            });
        }
        ai = ma + 1;
        bi = mb + 1;
    }
    hunks
}

/// matched line pairs of an LCS, in order
fn lcs_pairs(a: &[&str], b: &[&str]) -> Vec<(usize, usize)> {
    let n = a.len();
    let m = b.len();
    let mut table = vec![0u32; (n + 1) * (m + 1)];
    let at = |i: usize, j: usize| i * (m + 1) + j;

    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[at(i, j)] = if a[i] == b[j] {
                table[at(i + 1, j + 1)] + 1
            } else {
                table[at(i + 1, j)].max(table[at(i, j + 1)])
            };
        }
    }

    let mut pairs = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[at(i + 1, j)] >= table[at(i, j + 1)] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

/// apply a side's hunks to a base region, yielding that side's view
fn side_view<'a>(base: &[&'a str], hunks: &[&Hunk<'a>], lo: usize, hi: usize) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut pos = lo;
    for hunk in hunks {
        out.extend_from_slice(&base[pos..hunk.base_start]);
        out.extend_from_slice(&hunk.replacement);
        pos = hunk.base_end;
    }
    out.extend_from_slice(&base[pos..hi]);
    out
}

/// do two base intervals belong to the same merge region
fn regions_collide(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    if a_start == a_end && b_start == b_end {
        // two pure insertions collide only at the same anchor
        return a_start == b_start;
    }
    if a_start == a_end {
        return a_start > b_start && a_start < b_end;
    }
    if b_start == b_end {
        return b_start > a_start && b_start < a_end;
    }
    a_start < b_end && b_start < a_end
}

fn push_lines(out: &mut String, lines: &[&str]) {
    for line in lines {
        out.push_str(line);
    }
}

fn push_marker(out: &mut String, marker: &str) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(marker);
    out.push('\n');
}

/// three-way merge of text content
pub fn merge_text(
    base: &str,
    ours: &str,
    theirs: &str,
    style: ConflictStyle,
    ours_label: &str,
    theirs_label: &str,
) -> MergedText {
    let base_lines: Vec<&str> = base.split_inclusive('\n').collect();
    let ours_lines: Vec<&str> = ours.split_inclusive('\n').collect();
    let theirs_lines: Vec<&str> = theirs.split_inclusive('\n').collect();

    let ours_hunks = line_diff(&base_lines, &ours_lines);
    let theirs_hunks = line_diff(&base_lines, &theirs_lines);

    let mut out = String::new();
    let mut clean = true;
    let mut pos = 0usize;

    let mut oi = 0;
    let mut ti = 0;
    while oi < ours_hunks.len() || ti < theirs_hunks.len() {
        // seed the region with the earliest pending hunk
        let seed_from_ours = match (ours_hunks.get(oi), theirs_hunks.get(ti)) {
            (Some(a), Some(b)) => (a.base_start, a.base_end) <= (b.base_start, b.base_end),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => unreachable!(),
        };

        let mut ours_in: Vec<&Hunk> = Vec::new();
        let mut theirs_in: Vec<&Hunk> = Vec::new();
        let (mut lo, mut hi);
        if seed_from_ours {
            let h = &ours_hunks[oi];
            (lo, hi) = (h.base_start, h.base_end);
            ours_in.push(h);
            oi += 1;
        } else {
            let h = &theirs_hunks[ti];
            (lo, hi) = (h.base_start, h.base_end);
            theirs_in.push(h);
            ti += 1;
        }

        // absorb every further hunk that collides with the region
        loop {
            let mut grew = false;
            if let Some(h) = ours_hunks.get(oi) {
                if regions_collide(lo, hi, h.base_start, h.base_end) {
                    lo = lo.min(h.base_start);
                    hi = hi.max(h.base_end);
                    ours_in.push(h);
                    oi += 1;
                    grew = true;
                }
            }
            if let Some(h) = theirs_hunks.get(ti) {
                if regions_collide(lo, hi, h.base_start, h.base_end) {
                    lo = lo.min(h.base_start);
                    hi = hi.max(h.base_end);
                    theirs_in.push(h);
                    ti += 1;
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        push_lines(&mut out, &base_lines[pos..lo]);

        let ours_view = side_view(&base_lines, &ours_in, lo, hi);
        let theirs_view = side_view(&base_lines, &theirs_in, lo, hi);

        if theirs_in.is_empty() || ours_view == theirs_view {
            push_lines(&mut out, &ours_view);
        } else if ours_in.is_empty() {
            push_lines(&mut out, &theirs_view);
        } else {
            clean = false;
            emit_conflict(
                &mut out,
                &ours_view,
                &base_lines[lo..hi],
                &theirs_view,
                style,
                ours_label,
                theirs_label,
            );
        }

        pos = hi;
    }

    push_lines(&mut out, &base_lines[pos..]);
    MergedText {
        content: out,
        clean,
    }
}

fn emit_conflict(
    out: &mut String,
    ours: &[&str],
    base: &[&str],
    theirs: &[&str],
    style: ConflictStyle,
    ours_label: &str,
    theirs_label: &str,
) {
    let (prefix, ours, base, theirs, suffix) = if style == ConflictStyle::Zdiff3 {
        // zealous: hoist common head/tail lines out of the block
        let mut head = 0;
        while head < ours.len() && head < theirs.len() && ours[head] == theirs[head] {
            head += 1;
        }
        let mut tail = 0;
        while tail < ours.len() - head
            && tail < theirs.len() - head
            && ours[ours.len() - 1 - tail] == theirs[theirs.len() - 1 - tail]
        {
            tail += 1;
        }
        (
            &ours[..head],
            &ours[head..ours.len() - tail],
            base,
            &theirs[head..theirs.len() - tail],
            &ours[ours.len() - tail..],
        )
    } else {
        (&ours[..0], ours, base, theirs, &ours[..0])
    };

    push_lines(out, prefix);
    push_marker(out, &format!("<<<<<<< {}", ours_label));
    push_lines(out, ours);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    if style != ConflictStyle::Merge {
        push_marker(out, "||||||| base");
        push_lines(out, base);
        if !out.ends_with('\n') {
            out.push('\n');
        }
    }
    push_marker(out, "=======");
    push_lines(out, theirs);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    push_marker(out, &format!(">>>>>>> {}", theirs_label));
    push_lines(out, suffix);
}

/// how a path failed to merge
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConflictKind {
    /// both sides edited text, edits overlap
    Content,
    /// both sides changed binary content
    Binary,
    /// one side modified, the other deleted
    ModifyDelete,
    /// entry kinds diverged (file vs symlink, fragments vs plain)
    Type,
}

#[derive(Clone, Debug)]
pub struct MergeConflict {
    pub path: String,
    pub kind: ConflictKind,
}

/// outcome of a three-way merge of commits
#[derive(Debug)]
pub struct MergeOutcome {
    /// the merged tree, conflict markers included where unresolved
    pub tree: Hash,
    /// common ancestor used as the base, if any
    pub base: Option<Hash>,
    pub conflicts: Vec<MergeConflict>,
}

impl MergeOutcome {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// options for [`merge_commits`]
pub struct MergeOptions {
    pub style: ConflictStyle,
    /// merge even when the histories share no common ancestor
    pub allow_unrelated: bool,
    pub ours_label: String,
    pub theirs_label: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            style: ConflictStyle::Merge,
            allow_unrelated: false,
            ours_label: "ours".to_string(),
            theirs_label: "theirs".to_string(),
        }
    }
}

/// first common ancestor of two commits, by breadth-first search
pub fn merge_base(db: &Database, a: Hash, b: Hash, ctx: &Cancel) -> Result<Option<Hash>> {
    let mut ancestors_of_a = HashSet::new();
    let mut walk = BfsWalk::new(db, a, Default::default(), &[]);
    while let Some(c) = walk.next(ctx)? {
        ancestors_of_a.insert(c.hash);
    }

    let mut walk = BfsWalk::new(db, b, Default::default(), &[]);
    while let Some(c) = walk.next(ctx)? {
        if ancestors_of_a.contains(&c.hash) {
            return Ok(Some(c.hash));
        }
    }
    Ok(None)
}

/// three-way merge of two commits over their common ancestor
pub fn merge_commits(
    db: &Database,
    ours: Hash,
    theirs: Hash,
    opts: &MergeOptions,
    ctx: &Cancel,
) -> Result<MergeOutcome> {
    let base = merge_base(db, ours, theirs, ctx)?;
    if base.is_none() && !opts.allow_unrelated {
        return Err(Error::UnrelatedHistories);
    }

    let base_tree = match base {
        Some(h) => Some(db.commit(&h)?.tree),
        None => None,
    };
    let ours_tree = db.commit(&ours)?.tree;
    let theirs_tree = db.commit(&theirs)?.tree;

    let outcome = merge_trees(db, base_tree, ours_tree, theirs_tree, opts, ctx)?;
    debug!(base = ?base, conflicts = outcome.conflicts.len(), "merged commits");
    Ok(MergeOutcome {
        base,
        ..outcome
    })
}

/// three-way merge at the tree level
pub fn merge_trees(
    db: &Database,
    base: Option<Hash>,
    ours: Hash,
    theirs: Hash,
    opts: &MergeOptions,
    ctx: &Cancel,
) -> Result<MergeOutcome> {
    let ours_changes = change_map(db, base, Some(ours), ctx)?;
    let theirs_changes = change_map(db, base, Some(theirs), ctx)?;

    // start from the base listing and fold both change sets in
    let mut result = flatten_tree(db, base, ctx)?;
    let mut conflicts = Vec::new();

    let mut paths: Vec<&String> = ours_changes.keys().chain(theirs_changes.keys()).collect();
    paths.sort();
    paths.dedup();

    for path in paths {
        ctx.check()?;
        let co = ours_changes.get(path);
        let ct = theirs_changes.get(path);

        match (co, ct) {
            (Some(c), None) | (None, Some(c)) => apply_change(&mut result, c),
            (Some(a), Some(b)) => {
                if a.to == b.to {
                    // identical change on both sides, take it once
                    apply_change(&mut result, a);
                    continue;
                }
                match (&a.to, &b.to) {
                    (None, None) => apply_change(&mut result, a),
                    (Some(_), None) => {
                        apply_change(&mut result, a);
                        conflicts.push(MergeConflict {
                            path: path.clone(),
                            kind: ConflictKind::ModifyDelete,
                        });
                    }
                    (None, Some(_)) => {
                        apply_change(&mut result, b);
                        conflicts.push(MergeConflict {
                            path: path.clone(),
                            kind: ConflictKind::ModifyDelete,
                        });
                    }
                    (Some(to_a), Some(to_b)) => merge_both_changed(
                        db, path, a, to_a, to_b, opts, &mut result, &mut conflicts,
                    )?,
                }
            }
            (None, None) => unreachable!(),
        }
    }

    let tree = write_tree_from_paths(db, &result)?;
    Ok(MergeOutcome {
        tree,
        base,
        conflicts,
    })
}

fn merge_both_changed(
    db: &Database,
    path: &str,
    ours_change: &Change,
    to_a: &ChangeEntry,
    to_b: &ChangeEntry,
    opts: &MergeOptions,
    result: &mut BTreeMap<String, PathEntry>,
    conflicts: &mut Vec<MergeConflict>,
) -> Result<()> {
    let mergeable_kind = |e: &ChangeEntry| e.mode.is_regular() && !e.mode.is_fragments();

    if !mergeable_kind(to_a) || !mergeable_kind(to_b) || to_a.mode.base() != to_b.mode.base() {
        // symlinks, submodules, fragments and kind flips never go
        // through the text merge; ours wins the tree slot
        result.insert(path.to_string(), PathEntry::from(to_a));
        conflicts.push(MergeConflict {
            path: path.to_string(),
            kind: if to_a.mode.base() == to_b.mode.base() {
                ConflictKind::Binary
            } else {
                ConflictKind::Type
            },
        });
        return Ok(());
    }

    let ours_bytes = db.blobs().read_all(&to_a.hash)?;
    let theirs_bytes = db.blobs().read_all(&to_b.hash)?;
    let base_bytes = match &ours_change.from {
        Some(from) => db.blobs().read_all(&from.hash)?,
        None => Vec::new(),
    };

    let textual = sniff_is_text(&ours_bytes[..ours_bytes.len().min(4096)])
        && sniff_is_text(&theirs_bytes[..theirs_bytes.len().min(4096)])
        && (base_bytes.is_empty() || sniff_is_text(&base_bytes[..base_bytes.len().min(4096)]));

    if !textual {
        result.insert(path.to_string(), PathEntry::from(to_a));
        conflicts.push(MergeConflict {
            path: path.to_string(),
            kind: ConflictKind::Binary,
        });
        return Ok(());
    }

    let merged = merge_text(
        std::str::from_utf8(&base_bytes).unwrap_or(""),
        std::str::from_utf8(&ours_bytes).unwrap_or(""),
        std::str::from_utf8(&theirs_bytes).unwrap_or(""),
        opts.style,
        &opts.ours_label,
        &opts.theirs_label,
    );

    let (hash, size) = db
        .blobs()
        .hash_to(&mut merged.content.as_bytes(), merged.content.len() as i64)?;
    result.insert(
        path.to_string(),
        PathEntry {
            mode: to_a.mode,
            hash,
            size,
        },
    );
    if !merged.clean {
        conflicts.push(MergeConflict {
            path: path.to_string(),
            kind: ConflictKind::Content,
        });
    }
    Ok(())
}

/// per-path change set between two trees
fn change_map(
    db: &Database,
    from: Option<Hash>,
    to: Option<Hash>,
    ctx: &Cancel,
) -> Result<BTreeMap<String, Change>> {
    let mut map = BTreeMap::new();
    for change in diff_trees(db, from, to, ctx)? {
        map.insert(change.path().to_string(), change);
    }
    Ok(map)
}

/// flat path → entry listing of a stored tree
pub(crate) fn flatten_tree(
    db: &Database,
    tree: Option<Hash>,
    ctx: &Cancel,
) -> Result<BTreeMap<String, PathEntry>> {
    let mut map = BTreeMap::new();
    for change in diff_trees(db, None, tree, ctx)? {
        if let Some(to) = change.to {
            map.insert(
                to.path.clone(),
                PathEntry {
                    mode: to.mode,
                    hash: to.hash,
                    size: to.size,
                },
            );
        }
    }
    Ok(map)
}

fn apply_change(result: &mut BTreeMap<String, PathEntry>, change: &Change) {
    match &change.to {
        Some(to) => {
            result.insert(to.path.clone(), PathEntry::from(to));
        }
        None => {
            if let Some(from) = &change.from {
                result.remove(&from.path);
            }
        }
    }
}

/// a leaf entry in a flattened tree
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PathEntry {
    pub mode: FileMode,
    pub hash: Hash,
    pub size: u64,
}

impl From<&ChangeEntry> for PathEntry {
    fn from(e: &ChangeEntry) -> Self {
        Self {
            mode: e.mode,
            hash: e.hash,
            size: e.size,
        }
    }
}

/// build nested tree objects from a flat path listing, returning the
/// root hash
pub(crate) fn write_tree_from_paths(
    db: &Database,
    entries: &BTreeMap<String, PathEntry>,
) -> Result<Hash> {
    let paths: Vec<(&str, &PathEntry)> = entries.iter().map(|(k, v)| (k.as_str(), v)).collect();
    write_level(db, &paths)
}

fn write_level(db: &Database, paths: &[(&str, &PathEntry)]) -> Result<Hash> {
    let mut entries = Vec::new();
    let mut i = 0;
    while i < paths.len() {
        let (path, entry) = paths[i];
        match path.split_once('/') {
            None => {
                entries.push(TreeEntry::new(path, entry.mode, entry.hash, entry.size));
                i += 1;
            }
            Some((dir, _)) => {
                // collect the whole directory span
                let prefix = format!("{}/", dir);
                let start = i;
                while i < paths.len() && paths[i].0.starts_with(&prefix) {
                    i += 1;
                }
                let children: Vec<(&str, &PathEntry)> = paths[start..i]
                    .iter()
                    .map(|(p, e)| (&p[prefix.len()..], *e))
                    .collect();
                let subtree = write_level(db, &children)?;
                entries.push(TreeEntry::new(dir, FileMode::DIR, subtree, 0));
            }
        }
    }
    db.write_tree(&Tree::new(entries)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::{Commit, Signature};
    use tempfile::tempdir;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempdir().unwrap();
        let db = Database::new(
            dir.path().join("objects"),
            dir.path().join("metadata"),
            dir.path().join("incoming"),
            &Config::default(),
        );
        (dir, db)
    }

    fn sig(when: i64) -> Signature {
        Signature::new("m", "m@example.com", when)
    }

    fn blob(db: &Database, content: &str) -> (Hash, u64) {
        db.blobs()
            .hash_to(&mut content.as_bytes(), content.len() as i64)
            .unwrap()
    }

    fn commit_tree(db: &Database, parents: Vec<Hash>, files: &[(&str, &str)]) -> Hash {
        let mut map = BTreeMap::new();
        for (path, content) in files {
            let (hash, size) = blob(db, content);
            map.insert(
                path.to_string(),
                PathEntry {
                    mode: FileMode::REGULAR,
                    hash,
                    size,
                },
            );
        }
        let tree = write_tree_from_paths(db, &map).unwrap();
        db.write_commit(&Commit::new(tree, parents, sig(1), sig(1), "c"))
            .unwrap()
    }

    fn read_path(db: &Database, commit_or_tree: Hash, path: &str) -> String {
        let map = flatten_tree(db, Some(tree_of(db, commit_or_tree)), &Cancel::new()).unwrap();
        let entry = map.get(path).unwrap();
        String::from_utf8(db.blobs().read_all(&entry.hash).unwrap()).unwrap()
    }

    fn tree_of(db: &Database, hash: Hash) -> Hash {
        // accept either a commit or a tree hash
        match db.object(&hash) {
            Ok(crate::types::Object::Commit(c)) => c.tree,
            _ => hash,
        }
    }

    #[test]
    fn test_merge_text_clean_distinct_regions() {
        let base = "one\ntwo\nthree\nfour\nfive\n";
        let ours = "ONE\ntwo\nthree\nfour\nfive\n";
        let theirs = "one\ntwo\nthree\nfour\nFIVE\n";

        let merged = merge_text(base, ours, theirs, ConflictStyle::Merge, "ours", "theirs");
        assert!(merged.clean);
        assert_eq!(merged.content, "ONE\ntwo\nthree\nfour\nFIVE\n");
    }

    #[test]
    fn test_merge_text_identical_change() {
        let base = "a\nb\nc\n";
        let both = "a\nX\nc\n";

        let merged = merge_text(base, both, both, ConflictStyle::Merge, "o", "t");
        assert!(merged.clean);
        assert_eq!(merged.content, both);
    }

    #[test]
    fn test_merge_text_conflict_markers() {
        let base = "shared\nline\n";
        let ours = "shared\nours version\n";
        let theirs = "shared\ntheirs version\n";

        let merged = merge_text(base, ours, theirs, ConflictStyle::Merge, "ours", "theirs");
        assert!(!merged.clean);
        assert!(merged.content.contains("<<<<<<< ours\n"));
        assert!(merged.content.contains("ours version\n"));
        assert!(merged.content.contains("=======\n"));
        assert!(merged.content.contains("theirs version\n"));
        assert!(merged.content.contains(">>>>>>> theirs\n"));
        assert!(!merged.content.contains("|||||||"));
        assert!(merged.content.starts_with("shared\n"));
    }

    #[test]
    fn test_merge_text_diff3_includes_base() {
        let base = "x\nold\ny\n";
        let ours = "x\nmine\ny\n";
        let theirs = "x\nyours\ny\n";

        let merged = merge_text(base, ours, theirs, ConflictStyle::Diff3, "ours", "theirs");
        assert!(!merged.clean);
        assert!(merged.content.contains("||||||| base\nold\n"));
    }

    #[test]
    fn test_merge_text_one_side_only() {
        let base = "a\nb\n";
        let ours = "a\nb\nc\n";

        let merged = merge_text(base, ours, base, ConflictStyle::Merge, "o", "t");
        assert!(merged.clean);
        assert_eq!(merged.content, ours);
    }

    #[test]
    fn test_merge_text_both_empty_base() {
        let merged = merge_text("", "mine\n", "yours\n", ConflictStyle::Merge, "o", "t");
        assert!(!merged.clean);
        assert!(merged.content.contains("mine\n"));
        assert!(merged.content.contains("yours\n"));
    }

    #[test]
    fn test_merge_commits_clean() {
        let (_dir, db) = test_db();
        let ctx = Cancel::new();

        let base = commit_tree(&db, vec![], &[("a.txt", "a\n"), ("b.txt", "b\n")]);
        let ours = commit_tree(&db, vec![base], &[("a.txt", "a changed\n"), ("b.txt", "b\n")]);
        let theirs = commit_tree(&db, vec![base], &[("a.txt", "a\n"), ("b.txt", "b changed\n")]);

        let outcome =
            merge_commits(&db, ours, theirs, &MergeOptions::default(), &ctx).unwrap();
        assert!(outcome.is_clean());
        assert_eq!(outcome.base, Some(base));

        assert_eq!(read_path(&db, outcome.tree, "a.txt"), "a changed\n");
        assert_eq!(read_path(&db, outcome.tree, "b.txt"), "b changed\n");
    }

    #[test]
    fn test_merge_commits_content_conflict() {
        let (_dir, db) = test_db();
        let ctx = Cancel::new();

        let base = commit_tree(&db, vec![], &[("f.txt", "base\n")]);
        let ours = commit_tree(&db, vec![base], &[("f.txt", "ours\n")]);
        let theirs = commit_tree(&db, vec![base], &[("f.txt", "theirs\n")]);

        let outcome =
            merge_commits(&db, ours, theirs, &MergeOptions::default(), &ctx).unwrap();
        assert!(!outcome.is_clean());
        assert_eq!(outcome.conflicts[0].kind, ConflictKind::Content);

        let merged = read_path(&db, outcome.tree, "f.txt");
        assert!(merged.contains("<<<<<<<"));
        assert!(merged.contains(">>>>>>>"));
    }

    #[test]
    fn test_merge_commits_modify_delete() {
        let (_dir, db) = test_db();
        let ctx = Cancel::new();

        let base = commit_tree(&db, vec![], &[("f.txt", "base\n"), ("keep", "k\n")]);
        let ours = commit_tree(&db, vec![base], &[("f.txt", "edited\n"), ("keep", "k\n")]);
        let theirs = commit_tree(&db, vec![base], &[("keep", "k\n")]);

        let outcome =
            merge_commits(&db, ours, theirs, &MergeOptions::default(), &ctx).unwrap();
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].kind, ConflictKind::ModifyDelete);
        // the modified side survives in the tree
        assert_eq!(read_path(&db, outcome.tree, "f.txt"), "edited\n");
    }

    #[test]
    fn test_merge_commits_binary_conflict() {
        let (_dir, db) = test_db();
        let ctx = Cancel::new();

        let bin_base = "\u{0}\u{1}base";
        let base = commit_tree(&db, vec![], &[("blob.bin", bin_base)]);
        let ours = commit_tree(&db, vec![base], &[("blob.bin", "\u{0}\u{1}ours")]);
        let theirs = commit_tree(&db, vec![base], &[("blob.bin", "\u{0}\u{1}theirs")]);

        let outcome =
            merge_commits(&db, ours, theirs, &MergeOptions::default(), &ctx).unwrap();
        assert_eq!(outcome.conflicts[0].kind, ConflictKind::Binary);
        // ours wins the tree slot, no markers injected into binaries
        assert_eq!(read_path(&db, outcome.tree, "blob.bin"), "\u{0}\u{1}ours");
    }

    #[test]
    fn test_merge_unrelated_histories() {
        let (_dir, db) = test_db();
        let ctx = Cancel::new();

        let ours = commit_tree(&db, vec![], &[("a", "a\n")]);
        let theirs = commit_tree(&db, vec![], &[("b", "b\n")]);

        let err = merge_commits(&db, ours, theirs, &MergeOptions::default(), &ctx).unwrap_err();
        assert!(matches!(err, Error::UnrelatedHistories));

        let opts = MergeOptions {
            allow_unrelated: true,
            ..Default::default()
        };
        let outcome = merge_commits(&db, ours, theirs, &opts, &ctx).unwrap();
        assert!(outcome.is_clean());
        assert_eq!(outcome.base, None);
        let map = flatten_tree(&db, Some(tree_of(&db, outcome.tree)), &ctx).unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_merge_base_diamond() {
        let (_dir, db) = test_db();
        let ctx = Cancel::new();

        let root = commit_tree(&db, vec![], &[("f", "1\n")]);
        let left = commit_tree(&db, vec![root], &[("f", "2\n")]);
        let right = commit_tree(&db, vec![root], &[("f", "3\n")]);

        assert_eq!(merge_base(&db, left, right, &ctx).unwrap(), Some(root));
        // fast-forward shape: base of ancestor/descendant is the ancestor
        assert_eq!(merge_base(&db, root, left, &ctx).unwrap(), Some(root));
    }

    #[test]
    fn test_write_tree_from_paths_nested() {
        let (_dir, db) = test_db();
        let (h1, s1) = blob(&db, "top\n");
        let (h2, s2) = blob(&db, "nested\n");

        let mut map = BTreeMap::new();
        map.insert(
            "top.txt".to_string(),
            PathEntry {
                mode: FileMode::REGULAR,
                hash: h1,
                size: s1,
            },
        );
        map.insert(
            "dir/sub/nested.txt".to_string(),
            PathEntry {
                mode: FileMode::REGULAR,
                hash: h2,
                size: s2,
            },
        );

        let root = write_tree_from_paths(&db, &map).unwrap();
        let back = flatten_tree(&db, Some(root), &Cancel::new()).unwrap();
        assert_eq!(back.len(), 2);
        assert!(back.contains_key("top.txt"));
        assert!(back.contains_key("dir/sub/nested.txt"));
    }

    #[test]
    fn test_conflict_style_names() {
        assert_eq!(ConflictStyle::from_name("merge"), Some(ConflictStyle::Merge));
        assert_eq!(ConflictStyle::from_name("diff3"), Some(ConflictStyle::Diff3));
        assert_eq!(
            ConflictStyle::from_name("zdiff3"),
            Some(ConflictStyle::Zdiff3)
        );
        assert_eq!(ConflictStyle::from_name("bogus"), None);
    }
}
