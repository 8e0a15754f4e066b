use crate::cancel::Cancel;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::ignore::IgnoreMatcher;
use crate::index::Index;
use crate::noder::{FsNoder, IndexNoder, TreeNoder};
use crate::ops::diff::{diff_nodes, Change};
use crate::refs;
use crate::repo::Repo;

/// the three working-set reports
#[derive(Debug, Default)]
pub struct Status {
    /// index vs HEAD tree
    pub staged: Vec<Change>,
    /// worktree vs index, tracked paths only
    pub unstaged: Vec<Change>,
    /// worktree paths neither tracked nor ignored
    pub untracked: Vec<String>,
}

impl Status {
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty() && self.unstaged.is_empty() && self.untracked.is_empty()
    }
}

/// tree of the commit HEAD points at; None before the first commit
pub fn head_tree(repo: &Repo) -> Result<Option<Hash>> {
    match refs::resolve(repo, refs::HEAD) {
        Ok(commit) => Ok(Some(repo.db().commit(&commit)?.tree)),
        Err(Error::RefNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// compute staged, unstaged and untracked sets via the diff engine
pub fn status(repo: &Repo, ctx: &Cancel) -> Result<Status> {
    let worktree = repo.require_worktree()?;
    let index = Index::load(&repo.index_path())?;
    let skip = index.skip_worktree_set();

    let head = head_tree(repo)?;
    let index_noder = IndexNoder::root(&index);

    let staged = diff_nodes(&TreeNoder::root(repo.db(), head), &index_noder, ctx)?;

    let fs_noder = FsNoder::root(worktree, repo.config());
    let worktree_changes = diff_nodes(&index_noder, &fs_noder, ctx)?;

    let ignores = IgnoreMatcher::new(worktree);
    let mut unstaged = Vec::new();
    let mut untracked = Vec::new();
    for change in worktree_changes {
        if skip.contains(change.path()) {
            continue;
        }
        if change.is_insert() {
            let path = change.path().to_string();
            if !ignores.is_ignored(&path, false) {
                untracked.push(path);
            }
        } else {
            unstaged.push(change);
        }
    }

    Ok(Status {
        staged,
        unstaged,
        untracked,
    })
}
