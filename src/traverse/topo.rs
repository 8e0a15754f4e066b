use std::collections::{HashMap, HashSet};

use crate::cancel::Cancel;
use crate::error::Result;
use crate::hash::Hash;
use crate::object::Database;
use crate::traverse::{initial_seen, TimeWalk, WalkCommit, Walker};
use crate::types::Commit;

/// topological walk: a commit is never yielded before one of its
/// children
///
/// two structures work in parallel: an explorer (committer-time heap)
/// discovers the reachable graph and counts incoming edges, and a
/// visit stack holds commits whose in-count has dropped to zero.
pub struct TopoWalk<'db> {
    db: &'db Database,
    start: Hash,
    suppressed: HashSet<Hash>,
    explored: bool,
    in_count: HashMap<Hash, usize>,
    commits: HashMap<Hash, Commit>,
    visit_stack: Vec<Hash>,
}

impl<'db> TopoWalk<'db> {
    pub fn new(db: &'db Database, start: Hash, seen: HashSet<Hash>, ignore: &[Hash]) -> Self {
        Self {
            db,
            start,
            suppressed: initial_seen(seen, ignore),
            explored: false,
            in_count: HashMap::new(),
            commits: HashMap::new(),
            visit_stack: Vec::new(),
        }
    }

    /// drain the explorer, recording every commit and the in-count of
    /// each parent edge
    fn explore(&mut self, ctx: &Cancel) -> Result<()> {
        let mut explorer =
            TimeWalk::committer_time(self.db, self.start, self.suppressed.clone(), &[]);
        while let Some(found) = explorer.next(ctx)? {
            for parent in &found.commit.parents {
                if !self.suppressed.contains(parent) {
                    *self.in_count.entry(*parent).or_insert(0) += 1;
                }
            }
            self.commits.insert(found.hash, found.commit);
        }

        if self.commits.contains_key(&self.start) {
            self.visit_stack.push(self.start);
        }
        Ok(())
    }
}

impl Walker for TopoWalk<'_> {
    fn next(&mut self, ctx: &Cancel) -> Result<Option<WalkCommit>> {
        if !self.explored {
            self.explore(ctx)?;
            self.explored = true;
        }

        loop {
            ctx.check()?;

            let hash = match self.visit_stack.pop() {
                Some(h) => h,
                None => return Ok(None),
            };

            // shallow-missing parents reach the stack with an in-count
            // but no commit
            let commit = match self.commits.remove(&hash) {
                Some(c) => c,
                None => continue,
            };

            for parent in &commit.parents {
                if let Some(count) = self.in_count.get_mut(parent) {
                    *count -= 1;
                    if *count == 0 {
                        self.visit_stack.push(*parent);
                    }
                }
            }

            return Ok(Some(WalkCommit { hash, commit }));
        }
    }
}
