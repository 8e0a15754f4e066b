use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::object::blob::{BlobStore, FramedStream};
use crate::object::frame::BlobReader;
use crate::object::metadata::MetadataStore;
use crate::types::{decode_object, Commit, Fragments, Object, ObjectKind, Tag, Tree};

/// tag chains are followed at most this deep
const MAX_TAG_DEPTH: usize = 10;

/// caching facade over the two object stores
///
/// returns typed objects; commit and tree snapshots carry a borrowed
/// backend handle so navigation (commit → root tree → subtree → blob)
/// stays consistent for every holder of the same snapshot.
#[derive(Debug)]
pub struct Database {
    blobs: BlobStore,
    metadata: MetadataStore,
    cache: Mutex<ObjectCache>,
}

impl Database {
    pub fn new(
        objects_root: PathBuf,
        metadata_root: PathBuf,
        incoming: PathBuf,
        config: &Config,
    ) -> Self {
        Self {
            blobs: BlobStore::new(objects_root, incoming.clone(), config.core.compression_level),
            metadata: MetadataStore::new(metadata_root, incoming),
            cache: Mutex::new(ObjectCache::new(config.core.cache_entries)),
        }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// decode a metadata object of any kind, through the cache
    pub fn object(&self, hash: &Hash) -> Result<Object> {
        if let Some(cached) = self.cache.lock().unwrap().get(hash) {
            return Ok(cached);
        }
        let stream = self.metadata.open(hash)?;
        let object = decode_object(stream, *hash)?;
        self.cache.lock().unwrap().put(*hash, object.clone());
        Ok(object)
    }

    /// typed read: commit snapshot with navigation handle
    pub fn commit(&self, hash: &Hash) -> Result<SnapshotCommit<'_>> {
        match self.object(hash)? {
            Object::Commit(commit) => Ok(SnapshotCommit {
                hash: *hash,
                commit,
                db: self,
            }),
            other => Err(wrong_kind(hash, ObjectKind::Commit, other.kind())),
        }
    }

    /// typed read: tree snapshot with navigation handle
    pub fn tree(&self, hash: &Hash) -> Result<SnapshotTree<'_>> {
        match self.object(hash)? {
            Object::Tree(tree) => Ok(SnapshotTree {
                hash: *hash,
                tree,
                db: self,
            }),
            other => Err(wrong_kind(hash, ObjectKind::Tree, other.kind())),
        }
    }

    pub fn tag(&self, hash: &Hash) -> Result<Tag> {
        match self.object(hash)? {
            Object::Tag(tag) => Ok(tag),
            other => Err(wrong_kind(hash, ObjectKind::Tag, other.kind())),
        }
    }

    pub fn fragments(&self, hash: &Hash) -> Result<Fragments> {
        match self.object(hash)? {
            Object::Fragments(fragments) => Ok(fragments),
            other => Err(wrong_kind(hash, ObjectKind::Fragments, other.kind())),
        }
    }

    /// size-bearing reader over a blob's decoded payload
    pub fn blob(&self, hash: &Hash) -> Result<BlobReader<FramedStream>> {
        self.blobs.open_reader(hash)
    }

    /// follow tag → tag → … to the eventual commit, returning it with
    /// the chain of tag hashes traversed
    pub fn parse_rev_exhaustive(&self, hash: &Hash) -> Result<(SnapshotCommit<'_>, Vec<Hash>)> {
        let mut chain = Vec::new();
        let mut current = *hash;

        for _ in 0..=MAX_TAG_DEPTH {
            match self.object(&current)? {
                Object::Commit(commit) => {
                    return Ok((
                        SnapshotCommit {
                            hash: current,
                            commit,
                            db: self,
                        },
                        chain,
                    ))
                }
                Object::Tag(tag) => {
                    chain.push(current);
                    current = tag.object;
                }
                other => {
                    return Err(Error::MalformedObject {
                        hash: current,
                        message: format!("revision chain hit a {}", other.kind().name()),
                    })
                }
            }
        }
        Err(Error::MaxResolveDepth(hash.to_hex()))
    }

    /// on-disk size of a stored object; `metadata` picks the store
    pub fn size(&self, hash: &Hash, metadata: bool) -> Result<u64> {
        if metadata {
            self.metadata.size_of(hash)
        } else {
            self.blobs.size_of(hash)
        }
    }

    /// prefix search, metadata store first, then blobs
    pub fn search(&self, prefix: &str) -> Result<Hash> {
        match self.metadata.search(prefix) {
            Ok(hash) => Ok(hash),
            Err(Error::PrefixNotFound(_)) => self.blobs.search(prefix),
            Err(e) => Err(e),
        }
    }

    pub fn write_commit(&self, commit: &Commit) -> Result<Hash> {
        let hash = self.metadata.write(|w| commit.encode(w))?;
        self.cache
            .lock()
            .unwrap()
            .put(hash, Object::Commit(commit.clone()));
        Ok(hash)
    }

    pub fn write_tree(&self, tree: &Tree) -> Result<Hash> {
        let hash = self.metadata.write(|w| tree.encode(w))?;
        self.cache
            .lock()
            .unwrap()
            .put(hash, Object::Tree(tree.clone()));
        Ok(hash)
    }

    pub fn write_tag(&self, tag: &Tag) -> Result<Hash> {
        let hash = self.metadata.write(|w| tag.encode(w))?;
        self.cache
            .lock()
            .unwrap()
            .put(hash, Object::Tag(tag.clone()));
        Ok(hash)
    }

    pub fn write_fragments(&self, fragments: &Fragments) -> Result<Hash> {
        let hash = self.metadata.write(|w| fragments.encode(w))?;
        self.cache
            .lock()
            .unwrap()
            .put(hash, Object::Fragments(fragments.clone()));
        Ok(hash)
    }
}

fn wrong_kind(hash: &Hash, expected: ObjectKind, actual: ObjectKind) -> Error {
    Error::WrongObjectKind {
        hash: *hash,
        expected: expected.name(),
        actual: actual.name(),
    }
}

/// a commit snapshot bound to its backing database
#[derive(Debug)]
pub struct SnapshotCommit<'db> {
    pub hash: Hash,
    commit: Commit,
    db: &'db Database,
}

impl<'db> SnapshotCommit<'db> {
    /// load the root tree
    pub fn root_tree(&self) -> Result<SnapshotTree<'db>> {
        self.db.tree(&self.commit.tree)
    }

    pub fn into_inner(self) -> Commit {
        self.commit
    }
}

impl Deref for SnapshotCommit<'_> {
    type Target = Commit;

    fn deref(&self) -> &Commit {
        &self.commit
    }
}

/// a tree snapshot bound to its backing database
pub struct SnapshotTree<'db> {
    pub hash: Hash,
    tree: Tree,
    db: &'db Database,
}

impl<'db> SnapshotTree<'db> {
    /// descend into a child directory
    pub fn subtree(&self, name: &str) -> Result<SnapshotTree<'db>> {
        let entry = self
            .tree
            .get(name)
            .filter(|e| e.is_dir())
            .ok_or_else(|| Error::PathNotTracked(name.to_string()))?;
        self.db.tree(&entry.hash)
    }

    /// walk a slash-separated path to its entry, if present
    pub fn lookup(&self, path: &str) -> Result<Option<crate::types::TreeEntry>> {
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        let mut current = self.db.tree(&self.hash)?;

        while let Some(component) = components.next() {
            let entry = match current.tree.get(component) {
                Some(e) => e.clone(),
                None => return Ok(None),
            };
            if components.peek().is_none() {
                return Ok(Some(entry));
            }
            if !entry.is_dir() {
                return Ok(None);
            }
            current = self.db.tree(&entry.hash)?;
        }
        Ok(None)
    }

    pub fn into_inner(self) -> Tree {
        self.tree
    }
}

impl Deref for SnapshotTree<'_> {
    type Target = Tree;

    fn deref(&self) -> &Tree {
        &self.tree
    }
}

/// bounded object cache with insertion-order eviction
#[derive(Debug)]
struct ObjectCache {
    capacity: usize,
    map: HashMap<Hash, Object>,
    order: VecDeque<Hash>,
}

impl ObjectCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, hash: &Hash) -> Option<Object> {
        self.map.get(hash).cloned()
    }

    fn put(&mut self, hash: Hash, object: Object) {
        if self.map.insert(hash, object).is_none() {
            self.order.push_back(hash);
            while self.map.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.map.remove(&evicted);
                }
            }
        }
    }
}
