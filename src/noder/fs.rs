use std::cell::RefCell;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::cancel::Cancel;
use crate::config::Config;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::{Hash, Hasher};
use crate::noder::{sort_children, Node};
use crate::object::frame::{sniff_is_text, Compression, FrameHeader, SNIFF_LEN};
use crate::repo::REPO_DIR;
use crate::types::{FileMode, Fragments, FragmentEntry};

/// identity of a worktree file as the storage layer would record it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorktreeHash {
    pub hash: Hash,
    pub size: u64,
    /// true when the file crosses the fragmentation threshold and the
    /// hash names a fragments manifest
    pub fragments: bool,
}

/// hash of the frame that would be written for exactly `len` bytes of
/// the reader, without storing anything
fn hash_one_frame<R: Read>(reader: &mut R, len: u64, level: i32) -> Result<Hash> {
    let head_len = len.min(SNIFF_LEN as u64);
    let mut head = vec![0u8; head_len as usize];
    reader.read_exact(&mut head).with_path("<frame>")?;

    let method = if sniff_is_text(&head) {
        Compression::Zstd
    } else {
        Compression::Store
    };

    let mut hasher = Hasher::new();
    hasher.update(&FrameHeader::new(method, len).encode());

    let mut rest = reader.take(len - head_len);
    match method {
        Compression::Zstd => {
            let mut enc = zstd::stream::write::Encoder::new(&mut hasher, level)
                .with_path("<frame>")?;
            enc.write_all(&head).with_path("<frame>")?;
            std::io::copy(&mut rest, &mut enc).with_path("<frame>")?;
            enc.finish().with_path("<frame>")?;
        }
        Compression::Store | Compression::Deflate => {
            hasher.update(&head);
            std::io::copy(&mut rest, &mut hasher).with_path("<frame>")?;
        }
    }
    Ok(hasher.finalize())
}

/// compute the identity a worktree file would get from the store:
/// plain frame hash below the fragmentation threshold, fragments
/// manifest hash at or above it
pub fn hash_worktree_file(path: &Path, config: &Config) -> Result<WorktreeHash> {
    let meta = fs::metadata(path).with_path(path)?;
    if !meta.is_file() {
        return Err(Error::NotAFile(path.to_path_buf()));
    }
    let size = meta.len();
    let level = config.core.compression_level;

    if size == 0 {
        return Ok(WorktreeHash {
            hash: Hash::EMPTY_BLOB,
            size: 0,
            fragments: false,
        });
    }

    let mut file = fs::File::open(path).with_path(path)?;

    if size < config.core.fragment_threshold {
        return Ok(WorktreeHash {
            hash: hash_one_frame(&mut file, size, level)?,
            size,
            fragments: false,
        });
    }

    // fragmented: hash each shard's frame and the whole-file origin,
    // then hash the manifest those would form
    let shard_size = config.core.fragment_size.max(1);
    let mut origin = Hasher::new();
    let mut entries = Vec::new();
    let mut remaining = size;
    let mut index = 0u32;

    while remaining > 0 {
        let len = remaining.min(shard_size);
        let mut shard = TeeRead {
            inner: (&mut file).take(len),
            hasher: &mut origin,
        };
        let hash = hash_one_frame(&mut shard, len, level)?;
        entries.push(FragmentEntry { index, size: len, hash });
        remaining -= len;
        index += 1;
    }

    let manifest = Fragments::new(size, origin.finalize(), entries);
    let mut hasher = Hasher::new();
    manifest.encode(&mut hasher)?;

    Ok(WorktreeHash {
        hash: hasher.finalize(),
        size,
        fragments: true,
    })
}

/// identity of a symlink: the frame hash of its target path
pub fn hash_symlink(target: &str, config: &Config) -> Result<Hash> {
    if target.is_empty() {
        return Ok(Hash::EMPTY_BLOB);
    }
    hash_one_frame(
        &mut target.as_bytes(),
        target.len() as u64,
        config.core.compression_level,
    )
}

pub(crate) struct TeeRead<'a, R: Read> {
    pub(crate) inner: R,
    pub(crate) hasher: &'a mut Hasher,
}

impl<R: Read> Read for TeeRead<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// noder over a worktree directory; hashes are computed lazily per
/// node and cached
pub struct FsNoder {
    path: PathBuf,
    name: String,
    mode: FileMode,
    size: u64,
    config: Config,
    cached: RefCell<Option<Hash>>,
}

impl FsNoder {
    pub fn root(worktree: &Path, config: &Config) -> Self {
        Self {
            path: worktree.to_path_buf(),
            name: String::new(),
            mode: FileMode::DIR,
            size: 0,
            config: config.clone(),
            cached: RefCell::new(None),
        }
    }

    fn from_dir_entry(&self, path: PathBuf, name: String) -> Result<Option<FsNoder>> {
        let meta = fs::symlink_metadata(&path).with_path(&path)?;
        let file_type = meta.file_type();

        let (mode, size) = if file_type.is_dir() {
            (FileMode::DIR, 0)
        } else if file_type.is_symlink() {
            let target = fs::read_link(&path).with_path(&path)?;
            (FileMode::SYMLINK, target.as_os_str().len() as u64)
        } else if file_type.is_file() {
            let executable = meta.permissions().mode() & 0o111 != 0;
            let mut mode = if executable {
                FileMode::EXECUTABLE
            } else {
                FileMode::REGULAR
            };
            if meta.len() >= self.config.core.fragment_threshold {
                mode = mode.with_fragments();
            }
            (mode, meta.len())
        } else {
            // sockets, fifos and the like are invisible to the engine
            return Ok(None);
        };

        Ok(Some(FsNoder {
            path,
            name,
            mode,
            size,
            config: self.config.clone(),
            cached: RefCell::new(None),
        }))
    }
}

impl Node for FsNoder {
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
        if let Some(hash) = *self.cached.borrow() {
            return Ok(hash);
        }
        let hash = if self.mode.is_dir() {
            Hash::ZERO
        } else if self.mode.is_symlink() {
            let target = fs::read_link(&self.path).with_path(&self.path)?;
            hash_symlink(&target.to_string_lossy(), &self.config)?
        } else {
            hash_worktree_file(&self.path, &self.config)?.hash
        };
        *self.cached.borrow_mut() = Some(hash);
        Ok(hash)
    }

    fn children(&self, ctx: &Cancel) -> Result<Vec<Box<dyn Node + '_>>> {
        ctx.check()?;
        if !self.mode.is_dir() {
            return Ok(vec![]);
        }

        let mut children: Vec<Box<dyn Node + '_>> = Vec::new();
        for entry in fs::read_dir(&self.path).with_path(&self.path)? {
            let entry = entry.with_path(&self.path)?;
            let name = match entry.file_name().into_string() {
                Ok(n) => n,
                Err(_) => continue,
            };
            if name == REPO_DIR {
                continue;
            }
            if let Some(child) = self.from_dir_entry(entry.path(), name)? {
                children.push(Box::new(child));
            }
        }

        sort_children(&mut children);
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fs_noder_lists_sorted_and_skips_repo_dir() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join(REPO_DIR)).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("sub/inner.txt"), "inner").unwrap();

        let noder = FsNoder::root(dir.path(), &Config::default());
        let ctx = Cancel::new();
        let children = noder.children(&ctx).unwrap();
        let names: Vec<_> = children.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);

        let sub = children.iter().find(|c| c.is_dir()).unwrap();
        assert_eq!(sub.children(&ctx).unwrap().len(), 1);
    }

    #[test]
    fn test_fs_hash_matches_blob_store() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("data.txt");
        fs::write(&file, "deterministic text content\n").unwrap();

        let config = Config::default();
        let wt = hash_worktree_file(&file, &config).unwrap();

        // the store must produce the same name for the same bytes
        let store = crate::object::BlobStore::new(
            dir.path().join("objects"),
            dir.path().join("incoming"),
            config.core.compression_level,
        );
        let content = fs::read(&file).unwrap();
        let (stored, size) = store.hash_to(&mut &content[..], -1).unwrap();
        assert_eq!(wt.hash, stored);
        assert_eq!(wt.size, size);
        assert!(!wt.fragments);
    }

    #[test]
    fn test_fs_hash_empty_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("empty");
        fs::write(&file, "").unwrap();

        let wt = hash_worktree_file(&file, &Config::default()).unwrap();
        assert_eq!(wt.hash, Hash::EMPTY_BLOB);
        assert_eq!(wt.size, 0);
    }

    #[test]
    fn test_fragmented_hash_deterministic() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("big.bin");
        let content: Vec<u8> = (0..100_000u32).flat_map(|i| i.to_le_bytes()).collect();
        fs::write(&file, &content).unwrap();

        let mut config = Config::default();
        config.core.fragment_threshold = 64 * 1024;
        config.core.fragment_size = 64 * 1024;

        let first = hash_worktree_file(&file, &config).unwrap();
        let second = hash_worktree_file(&file, &config).unwrap();
        assert_eq!(first, second);
        assert!(first.fragments);
        assert_eq!(first.size, content.len() as u64);

        // a one-byte change anywhere moves the manifest hash
        let mut altered = content.clone();
        altered[90_000] ^= 0xFF;
        fs::write(&file, &altered).unwrap();
        assert_ne!(hash_worktree_file(&file, &config).unwrap().hash, first.hash);
    }

    #[test]
    fn test_executable_bit_detected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("tool.sh");
        fs::write(&file, "#!/bin/sh\n").unwrap();
        let mut perms = fs::metadata(&file).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&file, perms).unwrap();

        let noder = FsNoder::root(dir.path(), &Config::default());
        let children = noder.children(&Cancel::new()).unwrap();
        assert!(children[0].mode().is_executable());
    }

    #[test]
    fn test_not_a_file_is_precondition() {
        let dir = tempdir().unwrap();
        let err = hash_worktree_file(dir.path(), &Config::default()).unwrap_err();
        assert!(matches!(err, Error::NotAFile(_)));
    }
}
