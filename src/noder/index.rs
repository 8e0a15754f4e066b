use std::collections::HashSet;

use crate::cancel::Cancel;
use crate::error::Result;
use crate::hash::Hash;
use crate::index::{Index, IndexEntry};
use crate::noder::{sort_children, Node};
use crate::types::FileMode;

/// noder over the flat index, presenting its slash-separated paths as
/// a directory tree
pub struct IndexNoder<'idx> {
    entries: &'idx [IndexEntry],
    /// path prefix of this directory, "" for the root or "a/b/"
    prefix: String,
    name: String,
    file: Option<&'idx IndexEntry>,
}

impl<'idx> IndexNoder<'idx> {
    pub fn root(index: &'idx Index) -> Self {
        Self {
            entries: index.entries(),
            prefix: String::new(),
            name: String::new(),
            file: None,
        }
    }
}

impl Node for IndexNoder<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> FileMode {
        match self.file {
            Some(entry) => entry.mode,
            None => FileMode::DIR,
        }
    }

    fn size(&self) -> u64 {
        self.file.map_or(0, |e| e.size)
    }

    fn hash(&self) -> Result<Hash> {
        // synthesized directories have no merkle identity
        Ok(self.file.map_or(Hash::ZERO, |e| e.hash))
    }

    fn children(&self, ctx: &Cancel) -> Result<Vec<Box<dyn Node + '_>>> {
        ctx.check()?;
        if self.file.is_some() {
            return Ok(vec![]);
        }

        let mut children: Vec<Box<dyn Node + '_>> = Vec::new();
        let mut dirs_seen: HashSet<&str> = HashSet::new();

        for entry in self.entries {
            let rest = match entry.name.strip_prefix(self.prefix.as_str()) {
                Some(r) => r,
                None => continue,
            };
            match rest.split_once('/') {
                None => {
                    children.push(Box::new(IndexNoder {
                        entries: self.entries,
                        prefix: String::new(),
                        name: rest.to_string(),
                        file: Some(entry),
                    }));
                }
                Some((dir, _)) => {
                    if dirs_seen.insert(dir) {
                        children.push(Box::new(IndexNoder {
                            entries: self.entries,
                            prefix: format!("{}{}/", self.prefix, dir),
                            name: dir.to_string(),
                            file: None,
                        }));
                    }
                }
            }
        }

        sort_children(&mut children);
        Ok(children)
    }
}
