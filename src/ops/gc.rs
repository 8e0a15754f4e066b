use std::collections::HashSet;
use std::time::SystemTime;

use tracing::{debug, info};

use crate::cancel::Cancel;
use crate::error::Result;
use crate::hash::Hash;
use crate::object::Database;
use crate::refs;
use crate::repo::Repo;
use crate::traverse::{BfsWalk, Walker};
use crate::types::Object;

/// what a prune pass removed
#[derive(Debug, Default)]
pub struct GcStats {
    pub blobs_removed: usize,
    pub metadata_removed: usize,
    pub bytes_freed: u64,
}

/// reachability sets for the two stores
#[derive(Debug, Default)]
struct Marked {
    metadata: HashSet<Hash>,
    blobs: HashSet<Hash>,
}

/// delete every loose object that is unreachable from the references
/// and older than `cutoff`, then compact the reference store
pub fn prune(repo: &Repo, cutoff: SystemTime, ctx: &Cancel) -> Result<GcStats> {
    let db = repo.db();
    let mut marked = Marked::default();

    for reference in refs::references(repo)? {
        ctx.check()?;
        let target = match refs::resolve(repo, &reference.name) {
            Ok(h) => h,
            // dangling symbolic refs pin nothing
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        };
        mark_object(db, &target, &mut marked, ctx)?;
    }

    let mut stats = GcStats::default();

    for object in db.metadata().list_loose(ctx)? {
        ctx.check()?;
        if marked.metadata.contains(&object.hash) || object.modified >= cutoff {
            continue;
        }
        db.metadata().prune_object(&object.hash)?;
        stats.metadata_removed += 1;
        stats.bytes_freed += object.size;
    }

    for object in db.blobs().list_loose(ctx)? {
        ctx.check()?;
        if marked.blobs.contains(&object.hash) || object.modified >= cutoff {
            continue;
        }
        db.blobs().prune_object(&object.hash)?;
        stats.blobs_removed += 1;
        stats.bytes_freed += object.size;
    }

    db.metadata().prune_empty_dirs()?;
    db.blobs().prune_empty_dirs()?;
    refs::pack_refs(repo)?;

    info!(
        blobs = stats.blobs_removed,
        metadata = stats.metadata_removed,
        bytes = stats.bytes_freed,
        "prune complete"
    );
    Ok(stats)
}

/// mark one root and everything reachable from it; objects missing
/// from a shallow store are skipped
fn mark_object(db: &Database, hash: &Hash, marked: &mut Marked, ctx: &Cancel) -> Result<()> {
    if marked.metadata.contains(hash) || marked.blobs.contains(hash) {
        return Ok(());
    }

    let object = match db.object(hash) {
        Ok(o) => o,
        Err(e) if e.is_not_found() => {
            // not metadata: a tag may point straight at a blob
            if db.blobs().exists(hash) {
                marked.blobs.insert(*hash);
            }
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    match object {
        Object::Commit(_) => {
            let mut walk = BfsWalk::new(db, *hash, Default::default(), &[]);
            while let Some(commit) = walk.next(ctx)? {
                marked.metadata.insert(commit.hash);
                mark_tree(db, &commit.commit.tree, marked, ctx)?;
            }
        }
        Object::Tag(tag) => {
            marked.metadata.insert(*hash);
            mark_object(db, &tag.object, marked, ctx)?;
        }
        Object::Tree(_) => mark_tree(db, hash, marked, ctx)?,
        Object::Fragments(_) => mark_fragments(db, hash, marked, ctx)?,
    }
    Ok(())
}

fn mark_tree(db: &Database, hash: &Hash, marked: &mut Marked, ctx: &Cancel) -> Result<()> {
    ctx.check()?;
    if !marked.metadata.insert(*hash) {
        return Ok(());
    }

    let tree = match db.tree(hash) {
        Ok(t) => t,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in tree.entries() {
        if entry.mode.is_dir() {
            mark_tree(db, &entry.hash, marked, ctx)?;
        } else if entry.mode.is_fragments() {
            mark_fragments(db, &entry.hash, marked, ctx)?;
        } else if entry.mode.is_submodule() {
            // submodule hashes live in another repository
        } else if entry.payload.is_none() {
            marked.blobs.insert(entry.hash);
        }
    }
    Ok(())
}

fn mark_fragments(db: &Database, hash: &Hash, marked: &mut Marked, ctx: &Cancel) -> Result<()> {
    ctx.check()?;
    if !marked.metadata.insert(*hash) {
        return Ok(());
    }
    let manifest = match db.fragments(hash) {
        Ok(f) => f,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };
    for shard in &manifest.entries {
        marked.blobs.insert(shard.hash);
    }
    debug!(manifest = %hash, shards = manifest.entries.len(), "marked fragments");
    Ok(())
}
