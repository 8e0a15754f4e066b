//! reference store: loose refs, packed-refs, symbolic references and
//! the lock-based compare-and-swap update protocol

mod name;
mod packed;

pub use name::validate;
pub use packed::{PackedRefs, PACKED_HEADER};

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::repo::Repo;

/// the distinguished reference
pub const HEAD: &str = "HEAD";

/// symbolic reference chains are chased at most this deep
const MAX_SYMREF_DEPTH: usize = 1024;

/// what a reference points at
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefValue {
    Hash(Hash),
    Symbolic(String),
}

/// a named reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub value: RefValue,
}

impl Reference {
    /// target hash, if this is a hash reference
    pub fn hash(&self) -> Option<Hash> {
        match &self.value {
            RefValue::Hash(h) => Some(*h),
            RefValue::Symbolic(_) => None,
        }
    }
}

fn ref_file_path(repo: &Repo, name: &str) -> PathBuf {
    repo.path().join(name)
}

fn parse_ref_content(name: &str, content: &str) -> Result<RefValue> {
    let line = content.trim_end_matches('\n');
    if let Some(target) = line.strip_prefix("ref: ") {
        return Ok(RefValue::Symbolic(target.to_string()));
    }
    Hash::from_hex(line)
        .map(RefValue::Hash)
        .map_err(|_| Error::InvalidRefName {
            name: name.to_string(),
            reason: "unparseable reference content",
        })
}

fn format_ref_value(value: &RefValue) -> String {
    match value {
        RefValue::Hash(h) => format!("{}\n", h.to_hex()),
        RefValue::Symbolic(target) => format!("ref: {}\n", target),
    }
}

/// read one reference: the loose file wins, packed-refs is the
/// fallback for hash references
pub fn reference(repo: &Repo, name: &str) -> Result<Reference> {
    let path = ref_file_path(repo, name);
    match fs::read_to_string(&path) {
        Ok(content) => Ok(Reference {
            name: name.to_string(),
            value: parse_ref_content(name, &content)?,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let packed = PackedRefs::load(&repo.packed_refs_path())?;
            packed
                .get(name)
                .map(|hash| Reference {
                    name: name.to_string(),
                    value: RefValue::Hash(hash),
                })
                .ok_or_else(|| Error::RefNotFound(name.to_string()))
        }
        Err(e) => Err(Error::Io { path, source: e }),
    }
}

pub fn exists(repo: &Repo, name: &str) -> bool {
    reference(repo, name).is_ok()
}

/// chase symbolic references to the eventual hash
pub fn resolve(repo: &Repo, name: &str) -> Result<Hash> {
    let mut current = name.to_string();
    for _ in 0..MAX_SYMREF_DEPTH {
        match reference(repo, &current)?.value {
            RefValue::Hash(hash) => return Ok(hash),
            RefValue::Symbolic(target) => current = target,
        }
    }
    Err(Error::MaxResolveDepth(name.to_string()))
}

/// enumerate all references sorted by name: union of loose and packed
/// (loose wins), plus HEAD
pub fn references(repo: &Repo) -> Result<Vec<Reference>> {
    let mut union: BTreeMap<String, RefValue> = BTreeMap::new();

    let packed = PackedRefs::load(&repo.packed_refs_path())?;
    for (name, hash) in packed.iter() {
        union.insert(name.to_string(), RefValue::Hash(hash));
    }

    for (name, value) in list_loose(repo)? {
        union.insert(name, value);
    }

    if let Ok(head) = reference(repo, HEAD) {
        union.insert(HEAD.to_string(), head.value);
    }

    Ok(union
        .into_iter()
        .map(|(name, value)| Reference { name, value })
        .collect())
}

fn list_loose(repo: &Repo) -> Result<Vec<(String, RefValue)>> {
    let refs_dir = repo.refs_path();
    let mut out = Vec::new();
    if !refs_dir.exists() {
        return Ok(out);
    }

    for entry in WalkDir::new(&refs_dir) {
        let entry = entry.map_err(|e| Error::Io {
            path: refs_dir.clone(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("walkdir error")),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        // lock files are not references
        if entry.path().extension().is_some_and(|e| e == "lock") {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(repo.path())
            .expect("ref file under repo dir");
        let name = rel.to_string_lossy().replace('\\', "/");
        let content = fs::read_to_string(entry.path()).with_path(entry.path())?;
        out.push((name.clone(), parse_ref_content(&name, &content)?));
    }
    Ok(out)
}

/// compare-and-swap update of a hash reference
///
/// `expected` None means the reference must not exist yet. exactly one
/// concurrent updater wins; the loser sees `Locked` or `RefChanged`.
pub fn update(repo: &Repo, name: &str, expected: Option<&Hash>, new: &Hash) -> Result<()> {
    validate(name)?;
    let path = ref_file_path(repo, name);
    let mut lock = LockFile::acquire(&path, name)?;

    // re-read under the lock and compare against the expectation
    let current = match reference(repo, name) {
        Ok(r) => Some(r.value),
        Err(Error::RefNotFound(_)) => None,
        Err(e) => return Err(e),
    };
    let matches = match (&current, expected) {
        (None, None) => true,
        (Some(RefValue::Hash(h)), Some(e)) => h == e,
        _ => false,
    };
    if !matches {
        return Err(Error::RefChanged(name.to_string()));
    }

    lock.write_all(format_ref_value(&RefValue::Hash(*new)).as_bytes())?;
    lock.commit(&path)?;
    debug!(name, new = %new, "reference updated");
    Ok(())
}

/// rewrite HEAD, attached (symbolic) or detached (hash)
pub fn set_head(repo: &Repo, value: RefValue) -> Result<()> {
    if let RefValue::Symbolic(target) = &value {
        validate(target)?;
    }
    let path = ref_file_path(repo, HEAD);
    let mut lock = LockFile::acquire(&path, HEAD)?;
    lock.write_all(format_ref_value(&value).as_bytes())?;
    lock.commit(&path)
}

/// point a symbolic reference (typically HEAD) at another reference
pub fn update_symbolic(repo: &Repo, name: &str, target: &str) -> Result<()> {
    validate(name)?;
    validate(target)?;
    let path = ref_file_path(repo, name);
    let mut lock = LockFile::acquire(&path, name)?;
    lock.write_all(format_ref_value(&RefValue::Symbolic(target.to_string())).as_bytes())?;
    lock.commit(&path)?;
    Ok(())
}

/// delete a reference, rewriting packed-refs when it carries an entry
/// of the same name
pub fn delete(repo: &Repo, name: &str, expected: Option<&Hash>) -> Result<()> {
    validate(name)?;
    let path = ref_file_path(repo, name);
    let lock = LockFile::acquire(&path, name)?;

    let current = reference(repo, name)?;
    if let Some(e) = expected {
        if current.hash() != Some(*e) {
            return Err(Error::RefChanged(name.to_string()));
        }
    }

    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::Io { path, source: e }),
    }

    let mut packed = PackedRefs::load(&repo.packed_refs_path())?;
    if packed.remove(name) {
        let packed_path = repo.packed_refs_path();
        let mut packed_lock = LockFile::acquire(&packed_path, "packed-refs")?;
        let mut bytes = Vec::new();
        packed.write_to(&mut bytes)?;
        packed_lock.write_all(&bytes)?;
        packed_lock.commit(&packed_path)?;
    }

    drop(lock);
    prune_empty_ref_dirs(repo)?;
    debug!(name, "reference deleted");
    Ok(())
}

/// consolidate loose hash references into packed-refs, then unlink
/// the loose files
pub fn pack_refs(repo: &Repo) -> Result<()> {
    let packed_path = repo.packed_refs_path();
    let mut lock = LockFile::acquire(&packed_path, "packed-refs")?;

    let mut packed = PackedRefs::load(&packed_path)?;
    let mut packed_names = Vec::new();
    for (name, value) in list_loose(repo)? {
        // symbolic references stay loose
        if let RefValue::Hash(hash) = value {
            packed.upsert(&name, hash);
            packed_names.push(name);
        }
    }

    let mut bytes = Vec::new();
    packed.write_to(&mut bytes)?;
    lock.write_all(&bytes)?;
    lock.commit(&packed_path)?;

    for name in packed_names {
        let path = ref_file_path(repo, &name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io { path, source: e }),
        }
    }
    prune_empty_ref_dirs(repo)?;
    Ok(())
}

/// resolve a user-supplied revision string: a reference (with the
/// usual shorthand prefixes), a full hash, or a unique hash prefix
pub fn rev_parse(repo: &Repo, rev: &str) -> Result<Hash> {
    for prefix in ["", "refs/", "refs/heads/", "refs/tags/", "refs/remotes/"] {
        let candidate = format!("{}{}", prefix, rev);
        if validate(&candidate).is_ok() && exists(repo, &candidate) {
            return resolve(repo, &candidate);
        }
    }

    if rev.len() == 64 {
        return Hash::from_hex(rev);
    }
    if rev.len() >= 4 && rev.chars().all(|c| c.is_ascii_hexdigit()) {
        return repo.db().search(rev);
    }
    Err(Error::RefNotFound(rev.to_string()))
}

/// remove empty directories under the three ref buckets; the buckets
/// themselves are retained
fn prune_empty_ref_dirs(repo: &Repo) -> Result<()> {
    for bucket in ["refs/heads", "refs/tags", "refs/remotes"] {
        let root = repo.path().join(bucket);
        if !root.exists() {
            continue;
        }
        for entry in WalkDir::new(&root).min_depth(1).contents_first(true) {
            let entry = entry.map_err(|e| Error::Io {
                path: root.clone(),
                source: e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walkdir error")),
            })?;
            if entry.file_type().is_dir() {
                let _ = fs::remove_dir(entry.path());
            }
        }
    }
    Ok(())
}

/// exclusive lock file that unlinks itself on drop unless committed
struct LockFile {
    path: PathBuf,
    file: Option<File>,
}

impl LockFile {
    /// open `<target>.lock` create-exclusive; an existing lock means
    /// another writer is active
    fn acquire(target: &Path, resource: &str) -> Result<Self> {
        let path = lock_path(target);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => Ok(Self {
                path,
                file: Some(file),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::Locked(resource.to_string()))
            }
            Err(e) => Err(Error::Io { path, source: e }),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.file
            .as_mut()
            .expect("lock file still open")
            .write_all(bytes)
            .with_path(&self.path)
    }

    /// fsync and rename the lock over its target
    fn commit(mut self, target: &Path) -> Result<()> {
        let file = self.file.take().expect("lock file still open");
        file.sync_all().with_path(&self.path)?;
        drop(file);
        fs::rename(&self.path, target).with_path(target)?;
        std::mem::forget(self);
        Ok(())
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        self.file.take();
        let _ = fs::remove_file(&self.path);
    }
}

fn lock_path(target: &Path) -> PathBuf {
    let mut os = target.as_os_str().to_owned();
    os.push(".lock");
    PathBuf::from(os)
}
