use std::collections::HashSet;

use crate::cancel::Cancel;
use crate::error::Result;
use crate::hash::Hash;
use crate::object::Database;
use crate::traverse::{initial_seen, load_commit, WalkCommit, Walker};

/// pre-order depth-first walk: a commit is always yielded before its
/// (unseen) parents
pub struct PreorderWalk<'db> {
    db: &'db Database,
    /// stack of sub-iterators over parent lists
    stack: Vec<std::vec::IntoIter<Hash>>,
    seen: HashSet<Hash>,
}

impl<'db> PreorderWalk<'db> {
    pub fn new(db: &'db Database, start: Hash, seen: HashSet<Hash>, ignore: &[Hash]) -> Self {
        Self {
            db,
            stack: vec![vec![start].into_iter()],
            seen: initial_seen(seen, ignore),
        }
    }

    /// hand back the seen set for composing with another walker
    pub fn into_seen(self) -> HashSet<Hash> {
        self.seen
    }
}

impl Walker for PreorderWalk<'_> {
    fn next(&mut self, ctx: &Cancel) -> Result<Option<WalkCommit>> {
        loop {
            ctx.check()?;

            let hash = match self.stack.last_mut() {
                Some(iter) => match iter.next() {
                    Some(h) => h,
                    None => {
                        self.stack.pop();
                        continue;
                    }
                },
                None => return Ok(None),
            };

            if !self.seen.insert(hash) {
                continue;
            }

            // shallow repositories legitimately miss parents
            let commit = match load_commit(self.db, &hash)? {
                Some(c) => c,
                None => continue,
            };

            let unseen: Vec<Hash> = commit
                .parents
                .iter()
                .copied()
                .filter(|p| !self.seen.contains(p))
                .collect();
            if !unseen.is_empty() {
                self.stack.push(unseen.into_iter());
            }

            return Ok(Some(WalkCommit { hash, commit }));
        }
    }
}
