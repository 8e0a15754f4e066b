use std::fs::File;
use std::io::{self, BufReader, Chain, Cursor, Read, Write};
use std::path::PathBuf;

use tracing::trace;

use crate::cancel::Cancel;
use crate::error::{IoResultExt, Result};
use crate::hash::{Hash, Hasher};
use crate::object::frame::ZSTD_MAGIC;
use crate::object::store::{copy_counted, LooseObject, ShardedStore};

/// stream returned by [`MetadataStore::open`]; always starts with the
/// object's type magic, whether or not the stored frame was
/// zstd-wrapped by a remote
pub enum MetadataStream {
    Plain(Chain<Cursor<[u8; 4]>, File>),
    Zstd(zstd::stream::read::Decoder<'static, BufReader<Chain<Cursor<[u8; 4]>, File>>>),
}

impl Read for MetadataStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            MetadataStream::Plain(r) => r.read(buf),
            MetadataStream::Zstd(r) => r.read(buf),
        }
    }
}

/// content-addressed store for commit/tree/fragments/tag objects
///
/// same sharded layout as the blob store; additionally accepts frames
/// a remote pre-compressed with zstd, which `open` unwraps so readers
/// always see a type magic first.
#[derive(Debug)]
pub struct MetadataStore {
    store: ShardedStore,
}

impl MetadataStore {
    pub(crate) fn new(root: PathBuf, incoming: PathBuf) -> Self {
        Self {
            store: ShardedStore::new(root, incoming),
        }
    }

    pub fn exists(&self, hash: &Hash) -> bool {
        self.store.exists(hash)
    }

    /// open a metadata object, transparently unwrapping one zstd layer
    pub fn open(&self, hash: &Hash) -> Result<MetadataStream> {
        let mut file = self.store.open(hash)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .with_path(self.store.object_path(hash))?;
        let rejoined = Cursor::new(magic).chain(file);

        if magic == ZSTD_MAGIC {
            let dec = zstd::stream::read::Decoder::new(rejoined)
                .with_path(self.store.object_path(hash))?;
            Ok(MetadataStream::Zstd(dec))
        } else {
            Ok(MetadataStream::Plain(rejoined))
        }
    }

    /// stream an encoder's output through a hasher into a staged file,
    /// then finalize under the resulting hash
    pub fn write<F>(&self, encode: F) -> Result<Hash>
    where
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        let mut staged = self.store.stage()?;
        let staged_path = staged.path().to_path_buf();

        let mut hasher = Hasher::new();
        {
            let mut tee = TeeWriter {
                file: staged.file(),
                hasher: &mut hasher,
            };
            encode(&mut tee)?;
            tee.flush().with_path(&staged_path)?;
        }

        let hash = hasher.finalize();
        trace!(hash = %hash, "metadata object written");
        self.store.commit_staged(staged, &hash)?;
        Ok(hash)
    }

    /// accept externally supplied object bytes for an arbitrary hash,
    /// written verbatim (possibly still zstd-wrapped)
    pub fn unpack<R: Read>(&self, hash: &Hash, reader: &mut R) -> Result<()> {
        let mut staged = self.store.stage()?;
        let staged_path = staged.path().to_path_buf();
        copy_counted(reader, staged.file()).with_path(&staged_path)?;
        self.store.commit_staged(staged, hash)
    }

    pub fn search(&self, prefix: &str) -> Result<Hash> {
        self.store.search(prefix)
    }

    pub fn list_loose(&self, ctx: &Cancel) -> Result<Vec<LooseObject>> {
        self.store.list_loose(ctx)
    }

    /// on-disk size of the stored object
    pub fn size_of(&self, hash: &Hash) -> Result<u64> {
        self.store.size_of(hash)
    }

    pub fn prune_object(&self, hash: &Hash) -> Result<()> {
        self.store.prune_object(hash)
    }

    pub fn prune_empty_dirs(&self) -> Result<()> {
        self.store.prune_empty_dirs()
    }
}

struct TeeWriter<'a, W: Write> {
    file: W,
    hasher: &'a mut Hasher,
}

impl<W: Write> Write for TeeWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
