//! lazy directory-tree views consumed by the diff engine
//!
//! three implementations exist: trees from the object store, entries
//! from the index, and entries from the filesystem. children are
//! always handed out sorted in subtree order so the diff can descend
//! both sides in lockstep.

pub(crate) mod fs;
mod index;
mod tree;

pub use fs::{hash_symlink, hash_worktree_file, FsNoder, WorktreeHash};
pub use index::IndexNoder;
pub use tree::TreeNoder;

use crate::cancel::Cancel;
use crate::error::Result;
use crate::hash::Hash;
use crate::types::FileMode;

/// one node of a lazy directory tree
pub trait Node {
    fn name(&self) -> &str;
    fn mode(&self) -> FileMode;
    /// logical size; 0 for directories
    fn size(&self) -> u64;
    /// content identity; lazily computed by the filesystem noder.
    /// fragments carriers answer with their manifest hash, so
    /// comparisons never read the underlying shards.
    fn hash(&self) -> Result<Hash>;
    /// child nodes in subtree order; empty for non-directories
    fn children(&self, ctx: &Cancel) -> Result<Vec<Box<dyn Node + '_>>>;

    fn is_dir(&self) -> bool {
        self.mode().is_dir()
    }
}

/// sort a freshly built child list into subtree order
pub(crate) fn sort_children(children: &mut [Box<dyn Node + '_>]) {
    children.sort_by(|a, b| {
        crate::types::subtree_cmp(a.name(), a.is_dir(), b.name(), b.is_dir())
    });
}

/// an empty root, used as the absent side of a diff
pub struct EmptyNoder;

impl Node for EmptyNoder {
    fn name(&self) -> &str {
        ""
    }

    fn mode(&self) -> FileMode {
        FileMode::DIR
    }

    fn size(&self) -> u64 {
        0
    }

    fn hash(&self) -> Result<Hash> {
        Ok(Hash::ZERO)
    }

    fn children(&self, _ctx: &Cancel) -> Result<Vec<Box<dyn Node + '_>>> {
        Ok(vec![])
    }
}
