use std::cmp::Ordering;
use std::fmt;
use std::io::{Read, Write};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::types::{ObjectKind, TypedReader};

/// inline tree payloads are bounded
pub const INLINE_PAYLOAD_LIMIT: usize = 4096;

const TYPE_MASK: u16 = 0o170000;
const FRAGMENTS_BIT: u16 = 0o1000;

/// 16-bit entry mode: one of the five base kinds, optionally OR'd with
/// the fragments flag (the entry hash then names a Fragments manifest
/// whose origin is the true blob hash)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileMode(u16);

impl FileMode {
    pub const REGULAR: FileMode = FileMode(0o100644);
    pub const EXECUTABLE: FileMode = FileMode(0o100755);
    pub const DIR: FileMode = FileMode(0o40000);
    pub const SYMLINK: FileMode = FileMode(0o120000);
    pub const SUBMODULE: FileMode = FileMode(0o160000);

    /// validate wire bits; the fragments flag may decorate any
    /// non-directory kind
    pub fn from_bits(bits: u16) -> Option<FileMode> {
        let base = bits & !FRAGMENTS_BIT;
        match FileMode(base) {
            FileMode::REGULAR
            | FileMode::EXECUTABLE
            | FileMode::SYMLINK
            | FileMode::SUBMODULE => Some(FileMode(bits)),
            FileMode::DIR if bits & FRAGMENTS_BIT == 0 => Some(FileMode(bits)),
            _ => None,
        }
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    /// mode with the fragments flag cleared
    pub fn base(self) -> FileMode {
        FileMode(self.0 & !FRAGMENTS_BIT)
    }

    pub fn with_fragments(self) -> FileMode {
        FileMode(self.0 | FRAGMENTS_BIT)
    }

    pub fn is_fragments(self) -> bool {
        self.0 & FRAGMENTS_BIT != 0
    }

    pub fn is_dir(self) -> bool {
        self.0 & TYPE_MASK == FileMode::DIR.0
    }

    pub fn is_regular(self) -> bool {
        matches!(self.base(), FileMode::REGULAR | FileMode::EXECUTABLE)
    }

    pub fn is_executable(self) -> bool {
        self.base() == FileMode::EXECUTABLE
    }

    pub fn is_symlink(self) -> bool {
        self.base() == FileMode::SYMLINK
    }

    pub fn is_submodule(self) -> bool {
        self.base() == FileMode::SUBMODULE
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:o}", self.0)
    }
}

impl fmt::Debug for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileMode({:o})", self.0)
    }
}

/// total order over tree entries: directory names compare as `name/`,
/// everything else as `name\0`, which places directory `foo` between
/// non-directory `foo` and non-directory `foo0`
pub fn subtree_cmp(a_name: &str, a_is_dir: bool, b_name: &str, b_is_dir: bool) -> Ordering {
    fn key(name: &str, is_dir: bool) -> impl Iterator<Item = u8> + '_ {
        name.as_bytes()
            .iter()
            .copied()
            .chain(std::iter::once(if is_dir { b'/' } else { 0 }))
    }
    key(a_name, a_is_dir).cmp(key(b_name, b_is_dir))
}

/// a single tree entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub mode: FileMode,
    pub hash: Hash,
    /// logical size; directories carry 0
    pub size: u64,
    /// small blob content stored inline in the tree itself
    pub payload: Option<Vec<u8>>,
}

impl TreeEntry {
    pub fn new(name: impl Into<String>, mode: FileMode, hash: Hash, size: u64) -> Self {
        Self {
            name: name.into(),
            mode,
            hash,
            size,
            payload: None,
        }
    }

    /// entry carrying its blob content inline (bounded)
    pub fn inline(name: impl Into<String>, mode: FileMode, hash: Hash, payload: Vec<u8>) -> Self {
        let size = payload.len() as u64;
        Self {
            name: name.into(),
            mode,
            hash,
            size,
            payload: Some(payload),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }
}

/// a directory listing, strictly ordered by [`subtree_cmp`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// create a tree, validating names, sorting into subtree order and
    /// rejecting duplicates
    pub fn new(mut entries: Vec<TreeEntry>) -> Result<Self> {
        for entry in &entries {
            validate_entry_name(&entry.name)?;
            if let Some(p) = &entry.payload {
                if p.len() > INLINE_PAYLOAD_LIMIT {
                    return Err(Error::MalformedObject {
                        hash: entry.hash,
                        message: format!("inline payload too large: {}", p.len()),
                    });
                }
            }
        }

        entries.sort_by(|a, b| subtree_cmp(&a.name, a.is_dir(), &b.name, b.is_dir()));

        for window in entries.windows(2) {
            if window[0].name == window[1].name {
                return Err(Error::MalformedObject {
                    hash: window[0].hash,
                    message: format!("duplicate tree entry: {}", window[0].name),
                });
            }
        }

        Ok(Self { entries })
    }

    pub fn empty() -> Self {
        Self { entries: vec![] }
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<TreeEntry> {
        self.entries
    }

    /// look up an entry by name
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        // the order key depends on whether the entry is a directory,
        // so probe both shapes
        for probe_dir in [false, true] {
            if let Ok(i) = self
                .entries
                .binary_search_by(|e| subtree_cmp(&e.name, e.is_dir(), name, probe_dir))
            {
                return Some(&self.entries[i]);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// serialize to the binary wire form
    pub fn encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_all(&ObjectKind::Tree.magic()).with_path("<tree>")?;
        for entry in &self.entries {
            let size_field = match &entry.payload {
                Some(p) => -(p.len() as i64),
                None => entry.size as i64,
            };
            write!(w, "{:o} {} {}\0", entry.mode.bits(), size_field, entry.name)
                .with_path("<tree>")?;
            w.write_all(entry.hash.as_bytes()).with_path("<tree>")?;
            if let Some(p) = &entry.payload {
                w.write_all(p).with_path("<tree>")?;
            }
        }
        Ok(())
    }

    /// decode from a typed reader, enforcing strict subtree order
    pub fn decode<R: Read>(mut r: TypedReader<R>) -> Result<Tree> {
        r.expect(ObjectKind::Tree)?;
        r.read_magic()?;
        let hash = r.hash;
        let buf = r.read_rest()?;

        let malformed = |message: String| Error::MalformedObject { hash, message };

        let mut entries = Vec::new();
        let mut i = 0usize;
        while i < buf.len() {
            let mode_end = find(&buf, i, b' ')
                .ok_or_else(|| malformed("truncated entry mode".into()))?;
            let mode_str = std::str::from_utf8(&buf[i..mode_end])
                .map_err(|_| malformed("non-ascii mode".into()))?;
            let bits = u16::from_str_radix(mode_str, 8)
                .map_err(|_| malformed(format!("bad mode: {}", mode_str)))?;
            let mode = FileMode::from_bits(bits)
                .ok_or_else(|| malformed(format!("unknown mode: {:o}", bits)))?;

            let size_end = find(&buf, mode_end + 1, b' ')
                .ok_or_else(|| malformed("truncated entry size".into()))?;
            let size_str = std::str::from_utf8(&buf[mode_end + 1..size_end])
                .map_err(|_| malformed("non-ascii size".into()))?;
            let size: i64 = size_str
                .parse()
                .map_err(|_| malformed(format!("bad size: {}", size_str)))?;

            let name_end = find(&buf, size_end + 1, 0)
                .ok_or_else(|| malformed("unterminated entry name".into()))?;
            let name = std::str::from_utf8(&buf[size_end + 1..name_end])
                .map_err(|_| malformed("entry name is not utf-8".into()))?
                .to_string();
            if name.is_empty() {
                return Err(malformed("empty entry name".into()));
            }

            let hash_end = name_end + 1 + 32;
            if buf.len() < hash_end {
                return Err(malformed("truncated entry hash".into()));
            }
            let mut hash_bytes = [0u8; 32];
            hash_bytes.copy_from_slice(&buf[name_end + 1..hash_end]);
            let entry_hash = Hash::from_bytes(hash_bytes);

            let (logical_size, payload, next) = if size < 0 {
                let n = size.unsigned_abs() as usize;
                if n > INLINE_PAYLOAD_LIMIT {
                    return Err(malformed(format!("inline payload too large: {}", n)));
                }
                if buf.len() < hash_end + n {
                    return Err(malformed("truncated inline payload".into()));
                }
                (
                    n as u64,
                    Some(buf[hash_end..hash_end + n].to_vec()),
                    hash_end + n,
                )
            } else {
                (size as u64, None, hash_end)
            };

            let entry = TreeEntry {
                name,
                mode,
                hash: entry_hash,
                size: logical_size,
                payload,
            };

            if let Some(prev) = entries.last() {
                let prev: &TreeEntry = prev;
                let ord = subtree_cmp(&prev.name, prev.is_dir(), &entry.name, entry.is_dir());
                if ord != Ordering::Less {
                    return Err(malformed(format!(
                        "entries out of subtree order at: {}",
                        entry.name
                    )));
                }
                if prev.name == entry.name {
                    return Err(malformed(format!("duplicate tree entry: {}", entry.name)));
                }
            }

            entries.push(entry);
            i = next;
        }

        Ok(Tree { entries })
    }
}

fn find(buf: &[u8], from: usize, needle: u8) -> Option<usize> {
    buf[from..].iter().position(|&b| b == needle).map(|p| from + p)
}

fn validate_entry_name(name: &str) -> Result<()> {
    let invalid = |reason: &'static str| Error::InvalidEntryName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("empty tree entry name"));
    }
    if name.contains('\0') {
        return Err(invalid("tree entry name contains NUL"));
    }
    if name.contains('/') {
        return Err(invalid("tree entry name contains '/'"));
    }
    if name == "." || name == ".." {
        return Err(invalid("reserved tree entry name"));
    }
    Ok(())
}
