//! commit-graph traversal: five orderings plus filter adapters
//!
//! all iterators share one contract: `next(ctx)` yields each reachable
//! commit at most once, missing parents (shallow repositories) are
//! silently skipped, and callbacks end a walk early by returning the
//! [`crate::Error::Stop`] sentinel.

mod bfs;
mod filter;
mod path_filter;
mod preorder;
mod times;
mod topo;

pub use bfs::BfsWalk;
pub use filter::{FilterWalk, Predicate, TimeLimitWalk};
pub use path_filter::{PathFilterWalk, PathPredicate};
pub use preorder::PreorderWalk;
pub use times::TimeWalk;
pub use topo::TopoWalk;

use std::collections::HashSet;

use crate::cancel::Cancel;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::object::Database;
use crate::types::Commit;

/// a commit paired with its hash, as yielded by walkers
#[derive(Clone, Debug)]
pub struct WalkCommit {
    pub hash: Hash,
    pub commit: Commit,
}

/// common iterator contract over commit history
pub trait Walker {
    /// next commit, or None at end-of-sequence
    fn next(&mut self, ctx: &Cancel) -> Result<Option<WalkCommit>>;

    /// drive a callback over the remaining commits; a callback
    /// returning [`Error::Stop`] terminates without reporting failure
    fn for_each<F>(&mut self, ctx: &Cancel, mut f: F) -> Result<()>
    where
        F: FnMut(&WalkCommit) -> Result<()>,
        Self: Sized,
    {
        while let Some(commit) = self.next(ctx)? {
            match f(&commit) {
                Ok(()) => {}
                Err(Error::Stop) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// release upstream resources; a no-op for every walker except the
    /// path filter, which cascades
    fn close(&mut self) {}
}

/// load a commit, mapping shallow-missing parents to None
pub(crate) fn load_commit(db: &Database, hash: &Hash) -> Result<Option<Commit>> {
    match db.commit(hash) {
        Ok(snapshot) => Ok(Some(snapshot.into_inner())),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// merge the caller's seen set with the ignore list
pub(crate) fn initial_seen(seen: HashSet<Hash>, ignore: &[Hash]) -> HashSet<Hash> {
    let mut seen = seen;
    seen.extend(ignore.iter().copied());
    seen
}
