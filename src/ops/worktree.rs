use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::cancel::Cancel;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::{Hash, Hasher};
use crate::ignore::IgnoreMatcher;
use crate::index::{Index, IndexEntry};
use crate::noder::fs::TeeRead;
use crate::noder::{FsNoder, IndexNoder};
use crate::ops::checkout::{apply_changes, checkout_tree, remove_worktree_path};
use crate::ops::diff::{diff_nodes, diff_trees};
use crate::refs;
use crate::repo::{Repo, REPO_DIR};
use crate::types::{Commit, FileMode, Fragments, FragmentEntry, Signature};

/// store one worktree file (or symlink) and return its index entry
fn store_worktree_file(repo: &Repo, rel: &str, abs: &Path) -> Result<IndexEntry> {
    let meta = fs::symlink_metadata(abs).with_path(abs)?;

    if meta.file_type().is_symlink() {
        let target = fs::read_link(abs).with_path(abs)?;
        let bytes = target.as_os_str().as_encoded_bytes();
        let (hash, size) = repo.db().blobs().hash_to(&mut &bytes[..], bytes.len() as i64)?;
        return Ok(IndexEntry::new(rel, FileMode::SYMLINK, hash, size));
    }

    if !meta.is_file() {
        return Err(Error::NotAFile(abs.to_path_buf()));
    }

    use std::os::unix::fs::PermissionsExt;
    let executable = meta.permissions().mode() & 0o111 != 0;
    let base_mode = if executable {
        FileMode::EXECUTABLE
    } else {
        FileMode::REGULAR
    };
    let size = meta.len();

    if size >= repo.config().core.fragment_threshold {
        let hash = store_fragments(repo, abs, size)?;
        return Ok(IndexEntry::new(
            rel,
            base_mode.with_fragments(),
            hash,
            size,
        ));
    }

    let mut file = File::open(abs).with_path(abs)?;
    let (hash, _) = repo.db().blobs().hash_to(&mut file, size as i64)?;
    Ok(IndexEntry::new(rel, base_mode, hash, size))
}

/// split a large file into shards, store each as a blob, and record
/// the manifest
fn store_fragments(repo: &Repo, abs: &Path, size: u64) -> Result<Hash> {
    let shard_size = repo.config().core.fragment_size.max(1);
    let mut file = File::open(abs).with_path(abs)?;

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
        let (hash, written) = repo.db().blobs().hash_to(&mut shard, len as i64)?;
        entries.push(FragmentEntry {
            index,
            size: written,
            hash,
        });
        remaining -= len;
        index += 1;
    }

    let manifest = Fragments::new(size, origin.finalize(), entries);
    let hash = repo.db().write_fragments(&manifest)?;
    debug!(file = %abs.display(), shards = manifest.entries.len(), "stored fragments");
    Ok(hash)
}

/// stage paths: files are stored as blobs (or fragments past the
/// threshold), directories are walked honoring ignore rules
pub fn add(repo: &Repo, paths: &[&str], ctx: &Cancel) -> Result<()> {
    let worktree = repo.require_worktree()?;
    let mut index = Index::load(&repo.index_path())?;
    let ignores = IgnoreMatcher::new(worktree);

    for path in paths {
        ctx.check()?;
        let rel = path.trim_end_matches('/');
        let abs = worktree.join(rel);
        let meta = fs::symlink_metadata(&abs).with_path(&abs)?;

        if meta.is_dir() {
            for entry in WalkDir::new(&abs) {
                ctx.check()?;
                let entry = entry.map_err(|e| Error::Io {
                    path: abs.clone(),
                    source: e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walkdir error")),
                })?;
                let ft = entry.file_type();
                if !ft.is_file() && !ft.is_symlink() {
                    continue;
                }
                let entry_rel = entry
                    .path()
                    .strip_prefix(worktree)
                    .expect("walked path under worktree")
                    .to_string_lossy()
                    .replace('\\', "/");
                if entry_rel.split('/').any(|c| c == REPO_DIR) {
                    continue;
                }
                if ignores.is_ignored(&entry_rel, false) {
                    continue;
                }
                index.upsert(store_worktree_file(repo, &entry_rel, entry.path())?);
            }
        } else {
            // an explicitly named file is staged even if ignored
            index.upsert(store_worktree_file(repo, rel, &abs)?);
        }
    }

    index.save(&repo.index_path())
}

/// unstage paths, and unless `cached` also delete them from the
/// worktree
pub fn rm(repo: &Repo, paths: &[&str], cached: bool, ctx: &Cancel) -> Result<()> {
    let worktree = repo.require_worktree()?;
    let mut index = Index::load(&repo.index_path())?;

    for path in paths {
        ctx.check()?;
        let rel = path.trim_end_matches('/');
        let removed_file = index.remove(rel);
        let removed_dir = index.remove_dir(rel);
        if !removed_file && removed_dir.is_empty() {
            return Err(Error::PathNotTracked(rel.to_string()));
        }
        if !cached {
            remove_worktree_path(worktree, &worktree.join(rel))?;
        }
    }

    index.save(&repo.index_path())
}

/// rename a tracked path in both the index and the worktree
pub fn mv(repo: &Repo, from: &str, to: &str, _ctx: &Cancel) -> Result<()> {
    let worktree = repo.require_worktree()?;
    let mut index = Index::load(&repo.index_path())?;

    let entry = index
        .get(from)
        .cloned()
        .ok_or_else(|| Error::PathNotTracked(from.to_string()))?;

    let dest = worktree.join(to);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }
    fs::rename(worktree.join(from), &dest).with_path(&dest)?;

    index.remove(from);
    let mut renamed = entry;
    renamed.name = to.to_string();
    index.upsert(renamed);
    index.save(&repo.index_path())
}

/// delete untracked files; ignored files are kept unless asked for.
/// returns the deleted (or, on a dry run, would-be deleted) paths.
pub fn clean(repo: &Repo, delete_ignored: bool, dry_run: bool, ctx: &Cancel) -> Result<Vec<String>> {
    let worktree = repo.require_worktree()?;
    let index = Index::load(&repo.index_path())?;
    let ignores = IgnoreMatcher::new(worktree);

    let fs_noder = FsNoder::root(worktree, repo.config());
    let changes = diff_nodes(&IndexNoder::root(&index), &fs_noder, ctx)?;

    let mut deleted = Vec::new();
    for change in changes {
        ctx.check()?;
        if !change.is_insert() {
            continue;
        }
        let path = change.path().to_string();
        if !delete_ignored && ignores.is_ignored(&path, false) {
            continue;
        }
        if !dry_run {
            remove_worktree_path(worktree, &worktree.join(&path))?;
        }
        deleted.push(path);
    }
    Ok(deleted)
}

/// snapshot the index and worktree as a stash commit under
/// `refs/stash`, then reset the worktree back to HEAD
///
/// returns None when there is nothing to stash.
pub fn stash_push(
    repo: &Repo,
    message: &str,
    who: Signature,
    ctx: &Cancel,
) -> Result<Option<Hash>> {
    let worktree = repo.require_worktree()?;
    let head = refs::resolve(repo, refs::HEAD)?;
    let head_tree = repo.db().commit(&head)?.tree;

    let index = Index::load(&repo.index_path())?;
    let index_tree = crate::ops::commit::write_tree_from_index(repo.db(), &index)?;

    // the worktree snapshot covers tracked paths with their current
    // content; deleted files simply drop out
    let mut wt_index = Index::default();
    for entry in index.entries() {
        ctx.check()?;
        let abs = worktree.join(&entry.name);
        if entry.skip_worktree || !abs.exists() {
            continue;
        }
        wt_index.upsert(store_worktree_file(repo, &entry.name, &abs)?);
    }
    let worktree_tree = crate::ops::commit::write_tree_from_index(repo.db(), &wt_index)?;

    if worktree_tree == head_tree && index_tree == head_tree {
        return Ok(None);
    }

    let index_commit = repo.db().write_commit(&Commit::new(
        index_tree,
        vec![head],
        who.clone(),
        who.clone(),
        format!("index state for: {}", message),
    ))?;
    let stash = repo.db().write_commit(&Commit::new(
        worktree_tree,
        vec![head, index_commit],
        who.clone(),
        who,
        message,
    ))?;

    let current = match refs::reference(repo, "refs/stash") {
        Ok(r) => r.hash(),
        Err(Error::RefNotFound(_)) => None,
        Err(e) => return Err(e),
    };
    refs::update(repo, "refs/stash", current.as_ref(), &stash)?;

    // worktree and index return to HEAD
    checkout_tree(repo, head_tree, true, ctx)?;
    debug!(stash = %stash, "stash pushed");
    Ok(Some(stash))
}

/// apply the stashed changes back onto the worktree (left unstaged)
/// and drop the stash reference
pub fn stash_pop(repo: &Repo, ctx: &Cancel) -> Result<Hash> {
    let worktree = repo.require_worktree()?;
    let stash = refs::resolve(repo, "refs/stash")?;
    let stash_commit = repo.db().commit(&stash)?;
    let base = *stash_commit
        .parents
        .first()
        .ok_or_else(|| Error::MalformedObject {
            hash: stash,
            message: "stash commit has no parent".into(),
        })?;

    let base_tree = repo.db().commit(&base)?.tree;
    let changes = diff_trees(repo.db(), Some(base_tree), Some(stash_commit.tree), ctx)?;

    // refuse when local edits overlap the stashed paths
    let index = Index::load(&repo.index_path())?;
    let fs_noder = FsNoder::root(worktree, repo.config());
    let local: std::collections::HashSet<String> =
        diff_nodes(&IndexNoder::root(&index), &fs_noder, ctx)?
            .into_iter()
            .filter(|c| !c.is_insert())
            .map(|c| c.path().to_string())
            .collect();
    let overlapping = changes
        .iter()
        .filter(|c| local.contains(c.path()))
        .count();
    if overlapping > 0 {
        return Err(Error::CheckoutConflicts(overlapping));
    }

    apply_changes(repo, worktree, &changes, &index.skip_worktree_set(), ctx)?;
    refs::delete(repo, "refs/stash", Some(&stash))?;
    debug!(stash = %stash, "stash popped");
    Ok(stash)
}
