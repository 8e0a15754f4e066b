use std::io::Write;
use std::path::Path;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;

/// header line of the packed-refs file
pub const PACKED_HEADER: &str = "# pack-refs with: sorted";

/// in-memory view of the packed-refs file: hash references only,
/// sorted by name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackedRefs {
    entries: Vec<(String, Hash)>,
}

impl PackedRefs {
    /// load from disk; a missing file is an empty listing
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Error::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let mut entries = Vec::new();
        for line in content.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (hex, name) = line.split_once(' ').ok_or_else(|| Error::InvalidRefName {
                name: line.to_string(),
                reason: "unparseable packed-refs line",
            })?;
            entries.push((name.to_string(), Hash::from_hex(hex)?));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<Hash> {
        self.entries
            .binary_search_by(|(n, _)| n.as_str().cmp(name))
            .ok()
            .map(|i| self.entries[i].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Hash)> {
        self.entries.iter().map(|(n, h)| (n.as_str(), *h))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// insert or replace an entry, keeping the listing sorted
    pub fn upsert(&mut self, name: &str, hash: Hash) {
        match self.entries.binary_search_by(|(n, _)| n.as_str().cmp(name)) {
            Ok(i) => self.entries[i].1 = hash,
            Err(i) => self.entries.insert(i, (name.to_string(), hash)),
        }
    }

    /// remove an entry; true if it was present
    pub fn remove(&mut self, name: &str) -> bool {
        match self.entries.binary_search_by(|(n, _)| n.as_str().cmp(name)) {
            Ok(i) => {
                self.entries.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// serialize: header line, then `<hex> <name>` per entry
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "{}", PACKED_HEADER).with_path("<packed-refs>")?;
        for (name, hash) in &self.entries {
            writeln!(w, "{} {}", hash.to_hex(), name).with_path("<packed-refs>")?;
        }
        Ok(())
    }
}
