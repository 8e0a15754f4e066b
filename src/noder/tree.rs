use crate::cancel::Cancel;
use crate::error::Result;
use crate::hash::Hash;
use crate::noder::{sort_children, Node};
use crate::object::Database;
use crate::types::{FileMode, TreeEntry};

/// noder over trees stored in the object database
pub struct TreeNoder<'db> {
    db: &'db Database,
    name: String,
    mode: FileMode,
    hash: Hash,
    size: u64,
}

impl<'db> TreeNoder<'db> {
    /// root node for a tree hash; `None` stands for the empty tree
    pub fn root(db: &'db Database, tree: Option<Hash>) -> Self {
        Self {
            db,
            name: String::new(),
            mode: FileMode::DIR,
            hash: tree.unwrap_or(Hash::ZERO),
            size: 0,
        }
    }

    fn from_entry(db: &'db Database, entry: &TreeEntry) -> Self {
        Self {
            db,
            name: entry.name.clone(),
            mode: entry.mode,
            hash: entry.hash,
            size: entry.size,
        }
    }
}

impl Node for TreeNoder<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> FileMode {
        self.mode
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn hash(&self) -> Result<Hash> {
        Ok(self.hash)
    }

    fn children(&self, ctx: &Cancel) -> Result<Vec<Box<dyn Node + '_>>> {
        ctx.check()?;
        if !self.mode.is_dir() || self.hash.is_zero() {
            return Ok(vec![]);
        }
        let tree = self.db.tree(&self.hash)?;
        let mut children: Vec<Box<dyn Node + '_>> = tree
            .entries()
            .iter()
            .map(|e| Box::new(TreeNoder::from_entry(self.db, e)) as Box<dyn Node + '_>)
            .collect();
        // tree entries are already in subtree order, but keep the
        // contract explicit
        sort_children(&mut children);
        Ok(children)
    }
}
