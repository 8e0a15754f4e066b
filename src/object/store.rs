use std::fs::{self, File, Permissions};
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;
use walkdir::WalkDir;

use crate::cancel::Cancel;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;

/// a loose object listed during maintenance
#[derive(Clone, Copy, Debug)]
pub struct LooseObject {
    pub hash: Hash,
    pub size: u64,
    pub modified: SystemTime,
}

/// sharded content-addressed store rooted at a directory; objects live
/// at `<root>/<xx>/<yy>/<hash>` and are immutable once finalized
#[derive(Debug)]
pub(crate) struct ShardedStore {
    root: PathBuf,
    incoming: PathBuf,
}

impl ShardedStore {
    pub fn new(root: PathBuf, incoming: PathBuf) -> Self {
        Self { root, incoming }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, hash: &Hash) -> PathBuf {
        let (d1, d2, full) = hash.to_path_components();
        self.root.join(d1).join(d2).join(full)
    }

    pub fn exists(&self, hash: &Hash) -> bool {
        self.object_path(hash).is_file()
    }

    /// open the raw stored bytes
    pub fn open(&self, hash: &Hash) -> Result<File> {
        let path = self.object_path(hash);
        File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ObjectNotFound(*hash)
            } else {
                Error::Io { path, source: e }
            }
        })
    }

    /// on-disk size of a stored object
    pub fn size_of(&self, hash: &Hash) -> Result<u64> {
        let path = self.object_path(hash);
        let meta = fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ObjectNotFound(*hash)
            } else {
                Error::Io { path, source: e }
            }
        })?;
        Ok(meta.len())
    }

    /// find the unique object whose hex form begins with `prefix`
    pub fn search(&self, prefix: &str) -> Result<Hash> {
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidObjectName(prefix.to_string()));
        }
        let prefix = prefix.to_ascii_lowercase();

        let mut found: Option<Hash> = None;
        for object in self.scan(&prefix)? {
            if object.hash.matches_prefix(&prefix) {
                if found.is_some() {
                    return Err(Error::AmbiguousPrefix(prefix));
                }
                found = Some(object.hash);
            }
        }
        found.ok_or(Error::PrefixNotFound(prefix))
    }

    /// list every loose object, in no particular order
    pub fn list_loose(&self, ctx: &Cancel) -> Result<Vec<LooseObject>> {
        ctx.check()?;
        self.scan("")
    }

    fn scan(&self, prefix: &str) -> Result<Vec<LooseObject>> {
        let mut objects = Vec::new();
        if !self.root.exists() {
            return Ok(objects);
        }

        // a prefix of two or more hex digits pins the fan-out directory
        let scan_root = if prefix.len() >= 2 {
            self.root.join(&prefix[..2])
        } else {
            self.root.clone()
        };
        if !scan_root.exists() {
            return Ok(objects);
        }

        let depth = if prefix.len() >= 2 { 2 } else { 3 };
        for entry in WalkDir::new(&scan_root).min_depth(depth).max_depth(depth) {
            let entry = entry.map_err(|e| walkdir_error(&self.root, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_str().unwrap_or("");
            if let Ok(hash) = Hash::from_hex(name) {
                let meta = entry.metadata().map_err(|e| walkdir_error(&self.root, e))?;
                objects.push(LooseObject {
                    hash,
                    size: meta.len(),
                    modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                });
            }
        }
        Ok(objects)
    }

    /// delete one loose object
    pub fn prune_object(&self, hash: &Hash) -> Result<()> {
        let path = self.object_path(hash);
        // finalized objects are read-only; restore write permission so
        // unlink works on platforms that care
        let _ = fs::set_permissions(&path, Permissions::from_mode(0o644));
        fs::remove_file(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ObjectNotFound(*hash)
            } else {
                Error::Io { path, source: e }
            }
        })
    }

    /// remove empty shard directories left behind by pruning
    pub fn prune_empty_dirs(&self) -> Result<()> {
        if !self.root.exists() {
            return Ok(());
        }
        // deepest first so parents empty out as children go
        for depth in [2usize, 1] {
            for entry in WalkDir::new(&self.root).min_depth(depth).max_depth(depth) {
                let entry = entry.map_err(|e| walkdir_error(&self.root, e))?;
                if entry.file_type().is_dir() {
                    let _ = fs::remove_dir(entry.path());
                }
            }
        }
        Ok(())
    }

    /// begin a staged write in the incoming directory
    pub fn stage(&self) -> Result<StagedWrite> {
        StagedWrite::create(&self.incoming)
    }

    /// finalize a staged file under its hash: fsync, rename into the
    /// shard, mark read-only
    pub fn commit_staged(&self, staged: StagedWrite, hash: &Hash) -> Result<()> {
        let final_path = self.object_path(hash);

        // duplicate writes are benign: content is identical, last
        // rename wins
        if final_path.exists() {
            drop(staged);
            return Ok(());
        }

        let shard_dir = final_path.parent().expect("object path has a parent");
        fs::create_dir_all(shard_dir).with_path(shard_dir)?;

        let tmp_path = staged.finish()?;
        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(Error::Io {
                path: final_path,
                source: e,
            });
        }
        fs::set_permissions(&final_path, Permissions::from_mode(0o444)).with_path(&final_path)?;
        fsync_dir(shard_dir)?;

        debug!(hash = %hash, path = %final_path.display(), "stored object");
        Ok(())
    }
}

/// staging file that unlinks itself on drop unless finalized
pub(crate) struct StagedWrite {
    path: PathBuf,
    file: Option<File>,
}

impl StagedWrite {
    fn create(incoming: &Path) -> Result<Self> {
        fs::create_dir_all(incoming).with_path(incoming)?;
        let path = incoming.join(uuid::Uuid::new_v4().to_string());
        let file = File::create(&path).with_path(&path)?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn file(&mut self) -> &mut File {
        self.file.as_mut().expect("staging file still open")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// fsync and close, handing the path over to the caller
    fn finish(mut self) -> Result<PathBuf> {
        let file = self.file.take().expect("staging file still open");
        file.sync_all().with_path(&self.path)?;
        drop(file);
        let path = std::mem::take(&mut self.path);
        std::mem::forget(self);
        Ok(path)
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        self.file.take();
        let _ = fs::remove_file(&self.path);
    }
}

fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path).with_path(path)?;
    dir.sync_all().with_path(path)?;
    Ok(())
}

fn walkdir_error(root: &Path, e: walkdir::Error) -> Error {
    Error::Io {
        path: root.to_path_buf(),
        source: e
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::other("walkdir error")),
    }
}

/// drain a reader to the void, returning the byte count
pub(crate) fn copy_counted<R: Read, W: std::io::Write>(
    reader: &mut R,
    writer: &mut W,
) -> std::io::Result<u64> {
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn test_store() -> (tempfile::TempDir, ShardedStore) {
        let dir = tempdir().unwrap();
        let store = ShardedStore::new(dir.path().join("objects"), dir.path().join("incoming"));
        (dir, store)
    }

    fn put(store: &ShardedStore, content: &[u8]) -> Hash {
        let hash = crate::hash::hash_bytes(content);
        let mut staged = store.stage().unwrap();
        staged.file().write_all(content).unwrap();
        store.commit_staged(staged, &hash).unwrap();
        hash
    }

    #[test]
    fn test_stage_and_commit() {
        let (_dir, store) = test_store();
        let hash = put(&store, b"payload");

        assert!(store.exists(&hash));
        let mut out = Vec::new();
        store.open(&hash).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");

        // finalized objects are read-only
        let meta = fs::metadata(store.object_path(&hash)).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o444);
    }

    #[test]
    fn test_staged_write_cleans_up_on_drop() {
        let (dir, store) = test_store();
        {
            let mut staged = store.stage().unwrap();
            staged.file().write_all(b"abandoned").unwrap();
        }
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("incoming"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_duplicate_commit_is_noop() {
        let (_dir, store) = test_store();
        let h1 = put(&store, b"same");
        let h2 = put(&store, b"same");
        assert_eq!(h1, h2);
        assert!(store.exists(&h1));
    }

    #[test]
    fn test_open_missing_is_not_found() {
        let (_dir, store) = test_store();
        let err = store.open(&Hash::ZERO).unwrap_err();
        assert!(matches!(err, Error::ObjectNotFound(_)));
    }

    #[test]
    fn test_size_of() {
        let (_dir, store) = test_store();
        let hash = put(&store, b"12345678");
        assert_eq!(store.size_of(&hash).unwrap(), 8);
    }

    #[test]
    fn test_search_prefix() {
        let (_dir, store) = test_store();
        let h1 = put(&store, b"one");
        let h2 = put(&store, b"two");

        let found = store.search(&h1.to_hex()[..8]).unwrap();
        assert_eq!(found, h1);
        let found = store.search(&h2.to_hex()).unwrap();
        assert_eq!(found, h2);
    }

    #[test]
    fn test_search_missing_prefix() {
        let (_dir, store) = test_store();
        put(&store, b"content");
        // valid hex that matches nothing
        let err = store.search("ffffffffffff").unwrap_err();
        assert!(matches!(err, Error::PrefixNotFound(_)));
    }

    #[test]
    fn test_search_rejects_non_hex() {
        let (_dir, store) = test_store();
        assert!(store.search("zz").is_err());
        assert!(store.search("").is_err());
    }

    #[test]
    fn test_list_loose() {
        let (_dir, store) = test_store();
        let h1 = put(&store, b"a");
        let h2 = put(&store, b"b");

        let listed = store.list_loose(&Cancel::new()).unwrap();
        let mut hashes: Vec<_> = listed.iter().map(|o| o.hash).collect();
        hashes.sort();
        let mut expected = vec![h1, h2];
        expected.sort();
        assert_eq!(hashes, expected);
    }

    #[test]
    fn test_prune_object_and_empty_dirs() {
        let (_dir, store) = test_store();
        let hash = put(&store, b"to be pruned");

        store.prune_object(&hash).unwrap();
        assert!(!store.exists(&hash));

        store.prune_empty_dirs().unwrap();
        let (d1, _, _) = hash.to_path_components();
        assert!(!store.root().join(d1).exists());
    }

    #[test]
    fn test_prune_missing_is_not_found() {
        let (_dir, store) = test_store();
        let err = store.prune_object(&Hash::ZERO).unwrap_err();
        assert!(matches!(err, Error::ObjectNotFound(_)));
    }
}
