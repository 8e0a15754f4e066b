use std::collections::{HashSet, VecDeque};

use crate::cancel::Cancel;
use crate::error::Result;
use crate::hash::Hash;
use crate::object::Database;
use crate::traverse::{initial_seen, load_commit, WalkCommit, Walker};

/// breadth-first walk: level-by-level visitation from the start commit
pub struct BfsWalk<'db> {
    db: &'db Database,
    queue: VecDeque<Hash>,
    seen: HashSet<Hash>,
}

impl<'db> BfsWalk<'db> {
    pub fn new(db: &'db Database, start: Hash, seen: HashSet<Hash>, ignore: &[Hash]) -> Self {
        Self {
            db,
            queue: VecDeque::from([start]),
            seen: initial_seen(seen, ignore),
        }
    }

    pub fn into_seen(self) -> HashSet<Hash> {
        self.seen
    }
}

impl Walker for BfsWalk<'_> {
    fn next(&mut self, ctx: &Cancel) -> Result<Option<WalkCommit>> {
        loop {
            ctx.check()?;

            let hash = match self.queue.pop_front() {
                Some(h) => h,
                None => return Ok(None),
            };

            if !self.seen.insert(hash) {
                continue;
            }

            let commit = match load_commit(self.db, &hash)? {
                Some(c) => c,
                None => continue,
            };

            for parent in &commit.parents {
                if !self.seen.contains(parent) {
                    self.queue.push_back(*parent);
                }
            }

            return Ok(Some(WalkCommit { hash, commit }));
        }
    }
}
