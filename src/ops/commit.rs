use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::index::Index;
use crate::object::Database;
use crate::ops::checkout::update_head;
use crate::ops::merge::{write_tree_from_paths, PathEntry};
use crate::refs;
use crate::repo::Repo;
use crate::types::{Commit, Signature};

/// build tree objects from the index's flat entries
pub fn write_tree_from_index(db: &Database, index: &Index) -> Result<Hash> {
    let mut map = BTreeMap::new();
    for entry in index.entries() {
        map.insert(
            entry.name.clone(),
            PathEntry {
                mode: entry.mode,
                hash: entry.hash,
                size: entry.size,
            },
        );
    }
    write_tree_from_paths(db, &map)
}

/// record the index as a commit and advance HEAD's branch
pub fn commit_index(
    repo: &Repo,
    message: &str,
    author: Signature,
    committer: Signature,
) -> Result<Hash> {
    let index = Index::load(&repo.index_path())?;
    let tree = write_tree_from_index(repo.db(), &index)?;

    let parents = match refs::resolve(repo, refs::HEAD) {
        Ok(head) => vec![head],
        Err(Error::RefNotFound(_)) => vec![],
        Err(e) => return Err(e),
    };

    let commit = Commit::new(tree, parents, author, committer, message);
    let hash = repo.db().write_commit(&commit)?;
    update_head(repo, hash)?;
    debug!(commit = %hash, "commit recorded");
    Ok(hash)
}
