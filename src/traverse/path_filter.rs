use crate::cancel::Cancel;
use crate::error::Result;
use crate::object::Database;
use crate::ops::diff::diff_trees;
use crate::traverse::{WalkCommit, Walker};

/// path predicate used by [`PathFilterWalk`]
pub type PathPredicate = Box<dyn Fn(&str) -> bool>;

/// wrapper yielding only commits that touched at least one matching
/// path, judged by diffing each commit against its immediate
/// predecessor in the underlying walk
pub struct PathFilterWalk<'db, W: Walker> {
    db: &'db Database,
    inner: W,
    matches: PathPredicate,
    /// require the walk predecessor to be one of the commit's parents
    strict: bool,
    pending: Option<WalkCommit>,
    started: bool,
}

impl<'db, W: Walker> PathFilterWalk<'db, W> {
    pub fn new(db: &'db Database, inner: W, matches: PathPredicate, strict: bool) -> Self {
        Self {
            db,
            inner,
            matches,
            strict,
            pending: None,
            started: false,
        }
    }
}

impl<W: Walker> Walker for PathFilterWalk<'_, W> {
    fn next(&mut self, ctx: &Cancel) -> Result<Option<WalkCommit>> {
        loop {
            ctx.check()?;

            let current = match self.pending.take() {
                Some(c) => c,
                None => {
                    if self.started {
                        return Ok(None);
                    }
                    match self.inner.next(ctx)? {
                        Some(c) => c,
                        None => return Ok(None),
                    }
                }
            };
            self.started = true;
            self.pending = self.inner.next(ctx)?;

            let predecessor = self.pending.as_ref();
            if self.strict {
                match predecessor {
                    Some(p) if current.commit.parents.contains(&p.hash) => {}
                    Some(_) => continue,
                    None if current.commit.is_root() => {}
                    None => continue,
                }
            }

            let base = predecessor.map(|p| p.commit.tree);
            let changes = diff_trees(self.db, base, Some(current.commit.tree), ctx)?;
            if changes.iter().any(|c| (self.matches)(c.path())) {
                return Ok(Some(current));
            }
        }
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
