use std::collections::HashSet;

use crate::cancel::Cancel;
use crate::error::Result;
use crate::hash::Hash;
use crate::object::Database;
use crate::traverse::{initial_seen, load_commit, WalkCommit, Walker};

/// commit predicate used by [`FilterWalk`]
pub type Predicate = Box<dyn Fn(&WalkCommit) -> bool>;

/// pre-order walk with a validity predicate and a limit predicate
///
/// limited commits are still yielded when valid, but their parents are
/// not explored; the defaults are "always valid, never limit".
pub struct FilterWalk<'db> {
    db: &'db Database,
    stack: Vec<Hash>,
    seen: HashSet<Hash>,
    valid: Predicate,
    limit: Predicate,
}

impl<'db> FilterWalk<'db> {
    pub fn new(
        db: &'db Database,
        start: Hash,
        valid: Option<Predicate>,
        limit: Option<Predicate>,
        seen: HashSet<Hash>,
        ignore: &[Hash],
    ) -> Self {
        Self {
            db,
            stack: vec![start],
            seen: initial_seen(seen, ignore),
            valid: valid.unwrap_or_else(|| Box::new(|_| true)),
            limit: limit.unwrap_or_else(|| Box::new(|_| false)),
        }
    }

    pub fn into_seen(self) -> HashSet<Hash> {
        self.seen
    }
}

impl Walker for FilterWalk<'_> {
    fn next(&mut self, ctx: &Cancel) -> Result<Option<WalkCommit>> {
        loop {
            ctx.check()?;

            let hash = match self.stack.pop() {
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
            let item = WalkCommit { hash, commit };

            let limited = (self.limit)(&item);
            if !limited {
                for parent in item.commit.parents.iter().rev() {
                    if !self.seen.contains(parent) {
                        self.stack.push(*parent);
                    }
                }
            }

            if (self.valid)(&item) {
                return Ok(Some(item));
            }
        }
    }
}

/// wrapper bounding any walker by committer time
pub struct TimeLimitWalk<W: Walker> {
    inner: W,
    since: Option<i64>,
    until: Option<i64>,
}

impl<W: Walker> TimeLimitWalk<W> {
    pub fn new(inner: W, since: Option<i64>, until: Option<i64>) -> Self {
        Self {
            inner,
            since,
            until,
        }
    }
}

impl<W: Walker> Walker for TimeLimitWalk<W> {
    fn next(&mut self, ctx: &Cancel) -> Result<Option<WalkCommit>> {
        while let Some(item) = self.inner.next(ctx)? {
            let when = item.commit.committer.when;
            if self.since.is_some_and(|s| when < s) {
                continue;
            }
            if self.until.is_some_and(|u| when > u) {
                continue;
            }
            return Ok(Some(item));
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
