use std::collections::HashSet;
use std::fs::{self, File, Permissions};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::debug;

use crate::cancel::Cancel;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::{Hash, Hasher};
use crate::index::{Index, IndexEntry};
use crate::noder::{FsNoder, IndexNoder};
use crate::object::Database;
use crate::ops::diff::{diff_nodes, Change};
use crate::ops::merge::flatten_tree;
use crate::refs::{self, RefValue};
use crate::repo::Repo;
use crate::types::FileMode;

/// reset flavors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetMode {
    /// move HEAD only
    Soft,
    /// move HEAD and reset the index
    Mixed,
    /// move HEAD, reset index and worktree, overwriting local changes
    Hard,
    /// like hard, but refuse when local changes would be lost
    Merge,
}

/// project a target tree onto the worktree and index
///
/// the diff runs against the current index; `force` overwrites local
/// modifications, otherwise conflicting paths abort the checkout.
/// paths flagged skip-worktree in the index are left untouched on
/// disk.
pub fn checkout_tree(repo: &Repo, target: Hash, force: bool, ctx: &Cancel) -> Result<()> {
    let worktree = repo.require_worktree()?;
    let mut index = Index::load(&repo.index_path())?;
    let skip = index.skip_worktree_set();

    let index_noder = IndexNoder::root(&index);
    let target_noder = crate::noder::TreeNoder::root(repo.db(), Some(target));
    let changes = diff_nodes(&index_noder, &target_noder, ctx)?;

    if !force {
        let fs_noder = FsNoder::root(worktree, repo.config());
        let local: HashSet<String> = diff_nodes(&index_noder, &fs_noder, ctx)?
            .into_iter()
            .map(|c| c.path().to_string())
            .collect();
        let conflicting = changes
            .iter()
            .filter(|c| !skip.contains(c.path()) && local.contains(c.path()))
            .count();
        if conflicting > 0 {
            return Err(Error::CheckoutConflicts(conflicting));
        }
    }

    apply_changes(repo, worktree, &changes, &skip, ctx)?;

    // the index now mirrors the target tree; skip-worktree flags on
    // surviving paths are preserved
    let mut next = Index::default();
    for (path, entry) in flatten_tree(repo.db(), Some(target), ctx)? {
        let mut ie = IndexEntry::new(path, entry.mode, entry.hash, entry.size);
        ie.skip_worktree = skip.contains(&ie.name);
        next.upsert(ie);
    }
    index = next;
    index.save(&repo.index_path())?;
    debug!(target = %target, "checkout complete");
    Ok(())
}

/// apply a change list to the worktree
pub(crate) fn apply_changes(
    repo: &Repo,
    worktree: &Path,
    changes: &[Change],
    skip: &HashSet<String>,
    ctx: &Cancel,
) -> Result<()> {
    for change in changes {
        ctx.check()?;
        let path = change.path();
        if skip.contains(path) {
            continue;
        }
        let dest = worktree.join(path);
        match &change.to {
            Some(to) => materialize_entry(repo.db(), &dest, to.mode, &to.hash, ctx)?,
            None => remove_worktree_path(worktree, &dest)?,
        }
    }
    Ok(())
}

/// write one entry into the worktree, replacing whatever is there
pub(crate) fn materialize_entry(
    db: &Database,
    dest: &Path,
    mode: FileMode,
    hash: &Hash,
    ctx: &Cancel,
) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }
    clear_path(dest)?;

    if mode.is_submodule() {
        fs::create_dir_all(dest).with_path(dest)?;
        return Ok(());
    }

    if mode.is_symlink() {
        let target = db.blobs().read_all(hash)?;
        let target = String::from_utf8_lossy(&target).into_owned();
        std::os::unix::fs::symlink(&target, dest).with_path(dest)?;
        return Ok(());
    }

    if mode.is_fragments() {
        materialize_fragments(db, hash, dest, ctx)?;
    } else {
        let mut reader = db.blobs().open_reader(hash)?;
        let mut file = File::create(dest).with_path(dest)?;
        std::io::copy(&mut reader, &mut file).with_path(dest)?;
        file.sync_all().with_path(dest)?;
    }

    let bits = if mode.is_executable() { 0o755 } else { 0o644 };
    fs::set_permissions(dest, Permissions::from_mode(bits)).with_path(dest)?;
    Ok(())
}

/// reassemble a fragmented file, verifying every shard and the final
/// origin hash; any mismatch aborts and removes the partial file
pub fn materialize_fragments(
    db: &Database,
    manifest_hash: &Hash,
    dest: &Path,
    ctx: &Cancel,
) -> Result<()> {
    let manifest = db.fragments(manifest_hash)?;

    let mut entries = manifest.entries.clone();
    entries.sort_by_key(|e| e.index);

    let result = (|| -> Result<()> {
        let mut file = File::create(dest).with_path(dest)?;
        let mut origin = Hasher::new();
        let mut total = 0u64;

        for entry in &entries {
            ctx.check()?;

            // the shard hash names the framed bytes as stored
            let mut framed_hasher = Hasher::new();
            let mut framed = db.blobs().open(&entry.hash)?;
            std::io::copy(&mut framed, &mut framed_hasher).with_path(dest)?;
            let actual = framed_hasher.finalize();
            if actual != entry.hash {
                return Err(Error::HashMismatch {
                    expected: entry.hash,
                    actual,
                });
            }

            let mut reader = db.blobs().open_reader(&entry.hash)?;
            let mut written = 0u64;
            let mut buf = [0u8; 64 * 1024];
            loop {
                ctx.check()?;
                let n = reader.read(&mut buf).with_path(dest)?;
                if n == 0 {
                    break;
                }
                origin.update(&buf[..n]);
                file.write_all(&buf[..n]).with_path(dest)?;
                written += n as u64;
            }
            if written != entry.size {
                return Err(Error::SizeMismatch {
                    expected: entry.size,
                    actual: written,
                });
            }
            total += written;
        }

        if total != manifest.size {
            return Err(Error::SizeMismatch {
                expected: manifest.size,
                actual: total,
            });
        }
        let actual = origin.finalize();
        if actual != manifest.origin {
            return Err(Error::HashMismatch {
                expected: manifest.origin,
                actual,
            });
        }
        file.sync_all().with_path(dest)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(dest);
    }
    result
}

/// remove a worktree path and any directories it leaves empty
pub(crate) fn remove_worktree_path(worktree: &Path, dest: &Path) -> Result<()> {
    clear_path(dest)?;
    let mut dir = dest.parent();
    while let Some(d) = dir {
        if d == worktree {
            break;
        }
        if fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
    Ok(())
}

fn clear_path(dest: &Path) -> Result<()> {
    match fs::symlink_metadata(dest) {
        Ok(meta) => {
            if meta.is_dir() {
                fs::remove_dir_all(dest).with_path(dest)?;
            } else {
                fs::remove_file(dest).with_path(dest)?;
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io {
            path: dest.to_path_buf(),
            source: e,
        }),
    }
}

/// move HEAD (and per mode the index and worktree) to a commit
pub fn reset(repo: &Repo, commit: Hash, mode: ResetMode, ctx: &Cancel) -> Result<()> {
    let tree = repo.db().commit(&commit)?.tree;

    match mode {
        ResetMode::Soft => {}
        ResetMode::Mixed => {
            let mut index = Index::default();
            for (path, entry) in flatten_tree(repo.db(), Some(tree), ctx)? {
                index.upsert(IndexEntry::new(path, entry.mode, entry.hash, entry.size));
            }
            index.save(&repo.index_path())?;
        }
        ResetMode::Hard => checkout_tree(repo, tree, true, ctx)?,
        ResetMode::Merge => checkout_tree(repo, tree, false, ctx)?,
    }

    update_head(repo, commit)?;
    Ok(())
}

/// point HEAD's branch (or a detached HEAD) at a commit
pub fn update_head(repo: &Repo, commit: Hash) -> Result<()> {
    let head = refs::reference(repo, refs::HEAD)?;
    match head.value {
        RefValue::Symbolic(branch) => {
            let expected = match refs::reference(repo, &branch) {
                Ok(r) => r.hash(),
                Err(Error::RefNotFound(_)) => None,
                Err(e) => return Err(e),
            };
            refs::update(repo, &branch, expected.as_ref(), &commit)
        }
        RefValue::Hash(current) => refs::update(repo, refs::HEAD, Some(&current), &commit),
    }
}

/// restore chosen paths from a source tree into the index, the
/// worktree, or both
pub fn restore(
    repo: &Repo,
    source_tree: Hash,
    paths: &[&str],
    staged: bool,
    worktree: bool,
    ctx: &Cancel,
) -> Result<()> {
    let worktree_root = repo.require_worktree()?;
    let mut index = Index::load(&repo.index_path())?;
    let source = repo.db().tree(&source_tree)?;

    for path in paths {
        ctx.check()?;
        let found = source.lookup(path)?;
        match found {
            Some(entry) => {
                if staged {
                    index.upsert(IndexEntry::new(
                        path.to_string(),
                        entry.mode,
                        entry.hash,
                        entry.size,
                    ));
                }
                if worktree {
                    materialize_entry(
                        repo.db(),
                        &worktree_root.join(path),
                        entry.mode,
                        &entry.hash,
                        ctx,
                    )?;
                }
            }
            None => {
                if staged && !index.remove(path) {
                    return Err(Error::PathNotTracked(path.to_string()));
                }
                if worktree {
                    remove_worktree_path(worktree_root, &worktree_root.join(path))?;
                }
            }
        }
    }

    if staged {
        index.save(&repo.index_path())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::merge::{write_tree_from_paths, PathEntry};
    use crate::types::{Commit, Signature};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn test_repo() -> (tempfile::TempDir, Repo) {
        let dir = tempdir().unwrap();
        let worktree = dir.path().join("work");
        fs::create_dir(&worktree).unwrap();
        let repo = Repo::init(&worktree).unwrap();
        (dir, repo)
    }

    fn store_tree(repo: &Repo, files: &[(&str, &str)]) -> Hash {
        let mut map = BTreeMap::new();
        for (path, content) in files {
            let (hash, size) = repo
                .db()
                .blobs()
                .hash_to(&mut content.as_bytes(), content.len() as i64)
                .unwrap();
            map.insert(
                path.to_string(),
                PathEntry {
                    mode: FileMode::REGULAR,
                    hash,
                    size,
                },
            );
        }
        write_tree_from_paths(repo.db(), &map).unwrap()
    }

    fn store_commit(repo: &Repo, tree: Hash, parents: Vec<Hash>) -> Hash {
        let sig = Signature::new("t", "t@x", 1);
        repo.db()
            .write_commit(&Commit::new(tree, parents, sig.clone(), sig, "c"))
            .unwrap()
    }

    #[test]
    fn test_checkout_materializes_files() {
        let (_dir, repo) = test_repo();
        let tree = store_tree(&repo, &[("a.txt", "alpha\n"), ("dir/b.txt", "beta\n")]);

        checkout_tree(&repo, tree, false, &Cancel::new()).unwrap();

        let worktree = repo.worktree().unwrap();
        assert_eq!(fs::read_to_string(worktree.join("a.txt")).unwrap(), "alpha\n");
        assert_eq!(
            fs::read_to_string(worktree.join("dir/b.txt")).unwrap(),
            "beta\n"
        );

        // index mirrors the tree
        let index = Index::load(&repo.index_path()).unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.get("dir/b.txt").is_some());
    }

    #[test]
    fn test_checkout_removes_stale_files() {
        let (_dir, repo) = test_repo();
        let full = store_tree(&repo, &[("keep.txt", "k\n"), ("dir/gone.txt", "g\n")]);
        let reduced = store_tree(&repo, &[("keep.txt", "k\n")]);

        let ctx = Cancel::new();
        checkout_tree(&repo, full, false, &ctx).unwrap();
        checkout_tree(&repo, reduced, false, &ctx).unwrap();

        let worktree = repo.worktree().unwrap();
        assert!(worktree.join("keep.txt").exists());
        assert!(!worktree.join("dir/gone.txt").exists());
        // emptied directory is pruned
        assert!(!worktree.join("dir").exists());
    }

    #[test]
    fn test_checkout_refuses_overwriting_local_edits() {
        let (_dir, repo) = test_repo();
        let v1 = store_tree(&repo, &[("f.txt", "v1\n")]);
        let v2 = store_tree(&repo, &[("f.txt", "v2\n")]);

        let ctx = Cancel::new();
        checkout_tree(&repo, v1, false, &ctx).unwrap();

        // local edit
        fs::write(repo.worktree().unwrap().join("f.txt"), "dirty\n").unwrap();

        let err = checkout_tree(&repo, v2, false, &ctx).unwrap_err();
        assert!(matches!(err, Error::CheckoutConflicts(1)));
        // untouched
        assert_eq!(
            fs::read_to_string(repo.worktree().unwrap().join("f.txt")).unwrap(),
            "dirty\n"
        );

        // hard overwrites
        checkout_tree(&repo, v2, true, &ctx).unwrap();
        assert_eq!(
            fs::read_to_string(repo.worktree().unwrap().join("f.txt")).unwrap(),
            "v2\n"
        );
    }

    #[test]
    fn test_checkout_honors_skip_worktree() {
        let (_dir, repo) = test_repo();
        let v1 = store_tree(&repo, &[("pinned.txt", "v1\n")]);
        let v2 = store_tree(&repo, &[("pinned.txt", "v2\n")]);

        let ctx = Cancel::new();
        checkout_tree(&repo, v1, false, &ctx).unwrap();

        let mut index = Index::load(&repo.index_path()).unwrap();
        index.set_skip_worktree("pinned.txt", true).unwrap();
        index.save(&repo.index_path()).unwrap();

        checkout_tree(&repo, v2, true, &ctx).unwrap();
        // disk untouched, flag preserved
        assert_eq!(
            fs::read_to_string(repo.worktree().unwrap().join("pinned.txt")).unwrap(),
            "v1\n"
        );
        let index = Index::load(&repo.index_path()).unwrap();
        assert!(index.get("pinned.txt").unwrap().skip_worktree);
    }

    #[test]
    fn test_checkout_then_status_clean() {
        let (_dir, repo) = test_repo();
        let tree = store_tree(&repo, &[("x/y/z.txt", "deep\n"), ("top.txt", "t\n")]);
        let ctx = Cancel::new();
        checkout_tree(&repo, tree, false, &ctx).unwrap();

        // worktree now equals the index equals the tree
        let index = Index::load(&repo.index_path()).unwrap();
        let fs_noder = FsNoder::root(repo.worktree().unwrap(), repo.config());
        let changes = diff_nodes(&IndexNoder::root(&index), &fs_noder, &ctx).unwrap();
        assert!(changes.is_empty(), "unexpected changes: {:?}", changes);
    }

    #[test]
    fn test_reset_modes() {
        let (_dir, repo) = test_repo();
        let ctx = Cancel::new();

        let t1 = store_tree(&repo, &[("f.txt", "one\n")]);
        let c1 = store_commit(&repo, t1, vec![]);
        checkout_tree(&repo, t1, false, &ctx).unwrap();
        update_head(&repo, c1).unwrap();

        let t2 = store_tree(&repo, &[("f.txt", "two\n")]);
        let c2 = store_commit(&repo, t2, vec![c1]);

        // soft: HEAD moves, index and worktree stay
        reset(&repo, c2, ResetMode::Soft, &ctx).unwrap();
        assert_eq!(refs::resolve(&repo, refs::HEAD).unwrap(), c2);
        let index = Index::load(&repo.index_path()).unwrap();
        assert_eq!(index.get("f.txt").unwrap().size, 4);

        // mixed: index follows, worktree stays
        reset(&repo, c2, ResetMode::Mixed, &ctx).unwrap();
        let index = Index::load(&repo.index_path()).unwrap();
        let t2_map = flatten_tree(repo.db(), Some(t2), &ctx).unwrap();
        assert_eq!(index.get("f.txt").unwrap().hash, t2_map["f.txt"].hash);
        assert_eq!(
            fs::read_to_string(repo.worktree().unwrap().join("f.txt")).unwrap(),
            "one\n"
        );

        // hard: worktree follows too
        reset(&repo, c1, ResetMode::Hard, &ctx).unwrap();
        assert_eq!(
            fs::read_to_string(repo.worktree().unwrap().join("f.txt")).unwrap(),
            "one\n"
        );
        assert_eq!(refs::resolve(&repo, refs::HEAD).unwrap(), c1);
    }

    #[test]
    fn test_reset_merge_refuses_dirty() {
        let (_dir, repo) = test_repo();
        let ctx = Cancel::new();

        let t1 = store_tree(&repo, &[("f.txt", "one\n")]);
        let c1 = store_commit(&repo, t1, vec![]);
        checkout_tree(&repo, t1, false, &ctx).unwrap();
        update_head(&repo, c1).unwrap();

        fs::write(repo.worktree().unwrap().join("f.txt"), "dirty\n").unwrap();

        let t2 = store_tree(&repo, &[("f.txt", "two\n")]);
        let c2 = store_commit(&repo, t2, vec![c1]);

        let err = reset(&repo, c2, ResetMode::Merge, &ctx).unwrap_err();
        assert!(matches!(err, Error::CheckoutConflicts(_)));
        // HEAD unchanged on failure
        assert_eq!(refs::resolve(&repo, refs::HEAD).unwrap(), c1);
    }

    #[test]
    fn test_restore_staged_and_worktree() {
        let (_dir, repo) = test_repo();
        let ctx = Cancel::new();

        let tree = store_tree(&repo, &[("f.txt", "original\n")]);
        checkout_tree(&repo, tree, false, &ctx).unwrap();

        fs::write(repo.worktree().unwrap().join("f.txt"), "scribbled\n").unwrap();
        restore(&repo, tree, &["f.txt"], false, true, &ctx).unwrap();
        assert_eq!(
            fs::read_to_string(repo.worktree().unwrap().join("f.txt")).unwrap(),
            "original\n"
        );
    }

    #[test]
    fn test_fragments_checkout_integrity() {
        let (_dir, repo) = test_repo();
        let db = repo.db();
        let ctx = Cancel::new();

        // two shards of raw binary content
        let shard1: Vec<u8> = vec![0xAB; 5000];
        let shard2: Vec<u8> = vec![0xCD; 3000];
        let (h1, _) = db.blobs().hash_to(&mut &shard1[..], -1).unwrap();
        let (h2, _) = db.blobs().hash_to(&mut &shard2[..], -1).unwrap();

        let mut origin = Hasher::new();
        origin.update(&shard1);
        origin.update(&shard2);

        let manifest = crate::types::Fragments::new(
            8000,
            origin.finalize(),
            vec![
                crate::types::FragmentEntry { index: 0, size: 5000, hash: h1 },
                crate::types::FragmentEntry { index: 1, size: 3000, hash: h2 },
            ],
        );
        let mh = db.write_fragments(&manifest).unwrap();

        let dest = repo.worktree().unwrap().join("assembled.bin");
        materialize_fragments(db, &mh, &dest, &ctx).unwrap();

        let assembled = fs::read(&dest).unwrap();
        assert_eq!(assembled.len(), 8000);
        assert_eq!(&assembled[..5000], &shard1[..]);
        assert_eq!(&assembled[5000..], &shard2[..]);

        // corrupt the second shard's stored bytes
        let shard_path = repo
            .objects_path()
            .join(&h2.to_hex()[..2])
            .join(&h2.to_hex()[2..4])
            .join(h2.to_hex());
        let mut bytes = fs::read(&shard_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::set_permissions(&shard_path, Permissions::from_mode(0o644)).unwrap();
        fs::write(&shard_path, &bytes).unwrap();

        fs::remove_file(&dest).unwrap();
        let err = materialize_fragments(db, &mh, &dest, &ctx).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Integrity);
        // the partial file was removed
        assert!(!dest.exists());
    }

    #[test]
    fn test_fragments_checkout_cancellation_cleans_up() {
        let (_dir, repo) = test_repo();
        let db = repo.db();

        let shard: Vec<u8> = vec![0x11; 1000];
        let (h, _) = db.blobs().hash_to(&mut &shard[..], -1).unwrap();
        let mut origin = Hasher::new();
        origin.update(&shard);
        let manifest = crate::types::Fragments::new(
            1000,
            origin.finalize(),
            vec![crate::types::FragmentEntry { index: 0, size: 1000, hash: h }],
        );
        let mh = db.write_fragments(&manifest).unwrap();

        let ctx = Cancel::new();
        ctx.cancel();
        let dest = repo.worktree().unwrap().join("out.bin");
        let err = materialize_fragments(db, &mh, &dest, &ctx).unwrap_err();
        assert!(matches!(err, Error::Canceled));
        assert!(!dest.exists());
    }
}
