//! the working-set index: an ordered mapping from path to staged
//! entry, serialized as CBOR and rewritten atomically

use std::fs::{self, File};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::types::FileMode;

impl Serialize for FileMode {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u16(self.bits())
    }
}

impl<'de> Deserialize<'de> for FileMode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bits = u16::deserialize(deserializer)?;
        FileMode::from_bits(bits)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown file mode: {:o}", bits)))
    }
}

/// one tracked path
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub mode: FileMode,
    pub hash: Hash,
    pub size: u64,
    #[serde(default)]
    pub skip_worktree: bool,
}

impl IndexEntry {
    pub fn new(name: impl Into<String>, mode: FileMode, hash: Hash, size: u64) -> Self {
        Self {
            name: name.into(),
            mode,
            hash,
            size,
            skip_worktree: false,
        }
    }
}

/// ordered sequence of entries with unique names, sorted lexically
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Index {
    entries: Vec<IndexEntry>,
}

impl Index {
    /// load from disk; a missing file is an empty index
    pub fn load(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Error::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        let mut entries: Vec<IndexEntry> = ciborium::from_reader(file)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { entries })
    }

    /// atomic rewrite: temp file in the same directory, then rename
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = dir.join(format!("index-{}", uuid::Uuid::new_v4()));
        {
            let mut file = File::create(&tmp).with_path(&tmp)?;
            ciborium::into_writer(&self.entries, &mut file)?;
            file.sync_all().with_path(&tmp)?;
        }
        fs::rename(&tmp, path).with_path(path)?;
        Ok(())
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&IndexEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// insert or replace by path
    pub fn upsert(&mut self, entry: IndexEntry) {
        match self
            .entries
            .binary_search_by(|e| e.name.as_str().cmp(entry.name.as_str()))
        {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
    }

    /// remove one path; true if it was tracked
    pub fn remove(&mut self, name: &str) -> bool {
        match self.entries.binary_search_by(|e| e.name.as_str().cmp(name)) {
            Ok(i) => {
                self.entries.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// remove every path at or below a directory prefix; returns the
    /// removed entries
    pub fn remove_dir(&mut self, dir: &str) -> Vec<IndexEntry> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut removed = Vec::new();
        self.entries.retain(|e| {
            if e.name.starts_with(&prefix) {
                removed.push(e.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn set_skip_worktree(&mut self, name: &str, skip: bool) -> Result<()> {
        match self.entries.binary_search_by(|e| e.name.as_str().cmp(name)) {
            Ok(i) => {
                self.entries[i].skip_worktree = skip;
                Ok(())
            }
            Err(_) => Err(Error::PathNotTracked(name.to_string())),
        }
    }

    /// names flagged skip-worktree
    pub fn skip_worktree_set(&self) -> std::collections::HashSet<String> {
        self.entries
            .iter()
            .filter(|e| e.skip_worktree)
            .map(|e| e.name.clone())
            .collect()
    }
}
