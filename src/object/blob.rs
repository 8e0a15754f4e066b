use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use byteorder::{BigEndian, ByteOrder};
use tracing::trace;

use crate::cancel::Cancel;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::{Hash, Hasher};
use crate::object::frame::{
    empty_frame, make_blob_reader, sniff_is_text, BlobReader, Compression, FrameHeader, SNIFF_LEN,
};
use crate::object::store::{copy_counted, LooseObject, ShardedStore};

/// framed byte stream handed out by [`BlobStore::open`]; the empty
/// blob is served from memory without touching the store
pub enum FramedStream {
    File(std::fs::File),
    Memory(Cursor<Vec<u8>>),
}

impl Read for FramedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FramedStream::File(f) => f.read(buf),
            FramedStream::Memory(c) => c.read(buf),
        }
    }
}

/// content-addressed store for framed file contents
#[derive(Debug)]
pub struct BlobStore {
    store: ShardedStore,
    compression_level: i32,
}

impl BlobStore {
    pub(crate) fn new(root: PathBuf, incoming: PathBuf, compression_level: i32) -> Self {
        Self {
            store: ShardedStore::new(root, incoming),
            compression_level,
        }
    }

    pub fn exists(&self, hash: &Hash) -> bool {
        *hash == Hash::EMPTY_BLOB || self.store.exists(hash)
    }

    /// open the framed byte stream (header + payload)
    pub fn open(&self, hash: &Hash) -> Result<FramedStream> {
        if *hash == Hash::EMPTY_BLOB {
            return Ok(FramedStream::Memory(Cursor::new(empty_frame().to_vec())));
        }
        Ok(FramedStream::File(self.store.open(hash)?))
    }

    /// open and decode, returning a size-bearing payload reader
    pub fn open_reader(&self, hash: &Hash) -> Result<BlobReader<FramedStream>> {
        make_blob_reader(self.open(hash)?)
    }

    /// read the full decoded payload; only for callers that explicitly
    /// want the bytes in memory
    pub fn read_all(&self, hash: &Hash) -> Result<Vec<u8>> {
        let mut reader = self.open_reader(hash)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out).with_path("<blob>")?;
        Ok(out)
    }

    /// write a new blob from a stream, returning its hash and logical
    /// size
    ///
    /// the first up-to-4 KiB decide the compression method: textual
    /// content is zstd-compressed, anything else stored raw. when
    /// `size >= 0` the streamed payload must match it exactly;
    /// otherwise the length is back-patched into the header after
    /// streaming.
    pub fn hash_to<R: Read>(&self, reader: &mut R, size: i64) -> Result<(Hash, u64)> {
        // sniff the head to classify
        let mut head = Vec::with_capacity(SNIFF_LEN);
        let mut limited = reader.take(SNIFF_LEN as u64);
        limited
            .read_to_end(&mut head)
            .with_path(self.store.root())?;
        let reader = limited.into_inner();

        if head.is_empty() {
            if size > 0 {
                return Err(Error::SizeMismatch {
                    expected: size as u64,
                    actual: 0,
                });
            }
            return Ok((Hash::EMPTY_BLOB, 0));
        }

        let method = if sniff_is_text(&head) {
            Compression::Zstd
        } else {
            Compression::Store
        };

        let mut staged = self.store.stage()?;
        let staged_path = staged.path().to_path_buf();

        // placeholder header, length patched after streaming
        staged
            .file()
            .write_all(&FrameHeader::new(method, 0).encode())
            .with_path(&staged_path)?;

        let mut payload = Cursor::new(head).chain(reader);
        let written = match method {
            Compression::Zstd => {
                let mut enc = zstd::stream::write::Encoder::new(
                    staged.file(),
                    self.compression_level,
                )
                .with_path(&staged_path)?;
                let n = copy_counted(&mut payload, &mut enc).with_path(&staged_path)?;
                enc.finish().with_path(&staged_path)?;
                n
            }
            Compression::Store | Compression::Deflate => {
                copy_counted(&mut payload, staged.file()).with_path(&staged_path)?
            }
        };

        if size >= 0 && written != size as u64 {
            return Err(Error::SizeMismatch {
                expected: size as u64,
                actual: written,
            });
        }

        // back-patch the uncompressed length
        let mut len_bytes = [0u8; 8];
        BigEndian::write_u64(&mut len_bytes, written);
        let file = staged.file();
        file.seek(SeekFrom::Start(8)).with_path(&staged_path)?;
        file.write_all(&len_bytes).with_path(&staged_path)?;

        // the hash names the framed bytes; second pass over the staged
        // file computes it
        file.seek(SeekFrom::Start(0)).with_path(&staged_path)?;
        let mut hasher = Hasher::new();
        copy_counted(file, &mut hasher).with_path(&staged_path)?;
        let hash = hasher.finalize();

        trace!(hash = %hash, size = written, ?method, "blob written");
        self.store.commit_staged(staged, &hash)?;
        Ok((hash, written))
    }

    /// accept externally supplied framed bytes for an arbitrary hash;
    /// bytes land verbatim with no sniffing or classification
    pub fn unpack<R: Read>(&self, hash: &Hash, reader: &mut R) -> Result<()> {
        if *hash == Hash::EMPTY_BLOB {
            return Ok(());
        }
        let mut staged = self.store.stage()?;
        let staged_path = staged.path().to_path_buf();
        copy_counted(reader, staged.file()).with_path(&staged_path)?;
        self.store.commit_staged(staged, hash)
    }

    /// find the unique stored hash with the given hex prefix
    pub fn search(&self, prefix: &str) -> Result<Hash> {
        self.store.search(prefix)
    }

    /// enumerate loose objects (maintenance)
    pub fn list_loose(&self, ctx: &Cancel) -> Result<Vec<LooseObject>> {
        self.store.list_loose(ctx)
    }

    /// on-disk size of the framed object
    pub fn size_of(&self, hash: &Hash) -> Result<u64> {
        if *hash == Hash::EMPTY_BLOB {
            return Ok(empty_frame().len() as u64);
        }
        self.store.size_of(hash)
    }

    pub fn prune_object(&self, hash: &Hash) -> Result<()> {
        self.store.prune_object(hash)
    }

    pub fn prune_empty_dirs(&self) -> Result<()> {
        self.store.prune_empty_dirs()
    }

    /// emergency reclaim: delete and report every loose object whose
    /// on-disk size is at or above `limit`
    pub fn prune_large(&self, limit: u64, ctx: &Cancel) -> Result<Vec<LooseObject>> {
        let mut removed = Vec::new();
        for object in self.store.list_loose(ctx)? {
            ctx.check()?;
            if object.size >= limit {
                self.store.prune_object(&object.hash)?;
                removed.push(object);
            }
        }
        self.store.prune_empty_dirs()?;
        Ok(removed)
    }
}
