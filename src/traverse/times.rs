use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::cancel::Cancel;
use crate::error::Result;
use crate::hash::Hash;
use crate::object::Database;
use crate::traverse::{initial_seen, load_commit, WalkCommit, Walker};

/// which timestamp drives the heap
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeKey {
    Committer,
    Author,
}

impl TimeKey {
    fn of(&self, commit: &crate::types::Commit) -> i64 {
        match self {
            TimeKey::Committer => commit.committer.when,
            TimeKey::Author => commit.author.when,
        }
    }
}

struct HeapEntry {
    when: i64,
    /// insertion sequence; earlier insertions win ties so the order
    /// stays stable
    seq: u64,
    item: WalkCommit,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.when
            .cmp(&other.when)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// newest-first walk keyed by committer (or author) timestamp; the
/// closest to a typical log view
pub struct TimeWalk<'db> {
    db: &'db Database,
    key: TimeKey,
    heap: BinaryHeap<HeapEntry>,
    seen: HashSet<Hash>,
    seq: u64,
    seeded: Option<Hash>,
}

impl<'db> TimeWalk<'db> {
    pub fn new(
        db: &'db Database,
        start: Hash,
        key: TimeKey,
        seen: HashSet<Hash>,
        ignore: &[Hash],
    ) -> Self {
        Self {
            db,
            key,
            heap: BinaryHeap::new(),
            seen: initial_seen(seen, ignore),
            seq: 0,
            seeded: Some(start),
        }
    }

    pub fn committer_time(db: &'db Database, start: Hash, seen: HashSet<Hash>, ignore: &[Hash]) -> Self {
        Self::new(db, start, TimeKey::Committer, seen, ignore)
    }

    pub fn author_time(db: &'db Database, start: Hash, seen: HashSet<Hash>, ignore: &[Hash]) -> Self {
        Self::new(db, start, TimeKey::Author, seen, ignore)
    }

    pub fn into_seen(self) -> HashSet<Hash> {
        self.seen
    }

    /// push a commit if unseen and present in the store
    fn push(&mut self, hash: Hash) -> Result<()> {
        if !self.seen.insert(hash) {
            return Ok(());
        }
        if let Some(commit) = load_commit(self.db, &hash)? {
            self.heap.push(HeapEntry {
                when: self.key.of(&commit),
                seq: self.seq,
                item: WalkCommit { hash, commit },
            });
            self.seq += 1;
        }
        Ok(())
    }
}

impl Walker for TimeWalk<'_> {
    fn next(&mut self, ctx: &Cancel) -> Result<Option<WalkCommit>> {
        ctx.check()?;

        if let Some(start) = self.seeded.take() {
            self.push(start)?;
        }

        let entry = match self.heap.pop() {
            Some(e) => e,
            None => return Ok(None),
        };

        for parent in entry.item.commit.parents.clone() {
            ctx.check()?;
            self.push(parent)?;
        }

        Ok(Some(entry.item))
    }
}
