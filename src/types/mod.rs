//! metadata object model: the four typed objects, their binary codecs
//! and the magic-dispatched decoder

mod commit;
mod fragments;
mod signature;
mod tag;
mod tree;

pub use commit::Commit;
pub use fragments::{Fragments, FragmentEntry};
pub use signature::Signature;
pub use tag::Tag;
pub use tree::{subtree_cmp, FileMode, Tree, TreeEntry, INLINE_PAYLOAD_LIMIT};

use std::io::Read;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::object::frame::ZSTD_MAGIC;

/// the five object kinds; blobs live in their own store, the other
/// four in the metadata store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Commit,
    Tree,
    Fragments,
    Tag,
}

impl ObjectKind {
    /// four-byte type magic for metadata kinds
    pub fn magic(&self) -> [u8; 4] {
        match self {
            ObjectKind::Blob => *b"ZB\x00\x01",
            ObjectKind::Commit => *b"ZC\x00\x01",
            ObjectKind::Tree => *b"ZT\x00\x01",
            ObjectKind::Fragments => *b"ZF\x00\x01",
            ObjectKind::Tag => *b"ZG\x00\x01",
        }
    }

    pub fn from_magic(magic: [u8; 4]) -> Option<Self> {
        match &magic {
            b"ZB\x00\x01" => Some(ObjectKind::Blob),
            b"ZC\x00\x01" => Some(ObjectKind::Commit),
            b"ZT\x00\x01" => Some(ObjectKind::Tree),
            b"ZF\x00\x01" => Some(ObjectKind::Fragments),
            b"ZG\x00\x01" => Some(ObjectKind::Tag),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Commit => "commit",
            ObjectKind::Tree => "tree",
            ObjectKind::Fragments => "fragments",
            ObjectKind::Tag => "tag",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "blob" => Some(ObjectKind::Blob),
            "commit" => Some(ObjectKind::Commit),
            "tree" => Some(ObjectKind::Tree),
            "fragments" => Some(ObjectKind::Fragments),
            "tag" => Some(ObjectKind::Tag),
            _ => None,
        }
    }
}

/// reader that already knows which object it is looking at
pub struct TypedReader<R: Read> {
    pub hash: Hash,
    pub kind: ObjectKind,
    pub stream: R,
}

impl<R: Read> TypedReader<R> {
    pub fn new(stream: R, hash: Hash, kind: ObjectKind) -> Self {
        Self { hash, kind, stream }
    }

    /// reject a reader declared as some other kind
    pub fn expect(&self, kind: ObjectKind) -> Result<()> {
        if self.kind != kind {
            return Err(Error::WrongObjectKind {
                hash: self.hash,
                expected: kind.name(),
                actual: self.kind.name(),
            });
        }
        Ok(())
    }

    /// consume and validate the leading type magic
    pub(crate) fn read_magic(&mut self) -> Result<()> {
        let mut magic = [0u8; 4];
        self.stream
            .read_exact(&mut magic)
            .with_path("<object>")?;
        if magic != self.kind.magic() {
            return Err(Error::MismatchedMagic);
        }
        Ok(())
    }

    /// slurp the remaining object bytes
    pub(crate) fn read_rest(&mut self) -> Result<Vec<u8>> {
        let mut rest = Vec::new();
        self.stream.read_to_end(&mut rest).with_path("<object>")?;
        Ok(rest)
    }
}

/// a decoded metadata object
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Object {
    Commit(Commit),
    Tree(Tree),
    Fragments(Fragments),
    Tag(Tag),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Commit(_) => ObjectKind::Commit,
            Object::Tree(_) => ObjectKind::Tree,
            Object::Fragments(_) => ObjectKind::Fragments,
            Object::Tag(_) => ObjectKind::Tag,
        }
    }
}

/// peek the type magic (unwrapping one zstd layer if a remote left the
/// frame compressed) and dispatch to the matching codec
pub fn decode_object<R: Read>(mut stream: R, hash: Hash) -> Result<Object> {
    let mut magic = [0u8; 4];
    stream.read_exact(&mut magic).with_path("<object>")?;

    if magic == ZSTD_MAGIC {
        let rejoined = std::io::Cursor::new(magic).chain(stream);
        let dec = zstd::stream::read::Decoder::new(rejoined).with_path("<object>")?;
        return decode_plain(dec, hash);
    }

    decode_magic(magic, stream, hash)
}

fn decode_plain<R: Read>(mut stream: R, hash: Hash) -> Result<Object> {
    let mut magic = [0u8; 4];
    stream.read_exact(&mut magic).with_path("<object>")?;
    decode_magic(magic, stream, hash)
}

fn decode_magic<R: Read>(magic: [u8; 4], stream: R, hash: Hash) -> Result<Object> {
    let kind = ObjectKind::from_magic(magic).ok_or(Error::MismatchedMagic)?;
    let rejoined = std::io::Cursor::new(magic).chain(stream);
    let reader = TypedReader::new(rejoined, hash, kind);

    match kind {
        ObjectKind::Commit => Ok(Object::Commit(Commit::decode(reader)?)),
        ObjectKind::Tree => Ok(Object::Tree(Tree::decode(reader)?)),
        ObjectKind::Fragments => Ok(Object::Fragments(Fragments::decode(reader)?)),
        ObjectKind::Tag => Ok(Object::Tag(Tag::decode(reader)?)),
        // blobs never reach the metadata decoder
        ObjectKind::Blob => Err(Error::MismatchedMagic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_roundtrip() {
        for kind in [
            ObjectKind::Blob,
            ObjectKind::Commit,
            ObjectKind::Tree,
            ObjectKind::Fragments,
            ObjectKind::Tag,
        ] {
            assert_eq!(ObjectKind::from_magic(kind.magic()), Some(kind));
            assert_eq!(ObjectKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_magic_bytes() {
        assert_eq!(ObjectKind::Blob.magic(), [0x5A, 0x42, 0x00, 0x01]);
        assert_eq!(ObjectKind::Commit.magic(), [0x5A, 0x43, 0x00, 0x01]);
        assert_eq!(ObjectKind::Tree.magic(), [0x5A, 0x54, 0x00, 0x01]);
        assert_eq!(ObjectKind::Fragments.magic(), [0x5A, 0x46, 0x00, 0x01]);
        assert_eq!(ObjectKind::Tag.magic(), [0x5A, 0x47, 0x00, 0x01]);
    }

    #[test]
    fn test_unknown_magic_rejected() {
        assert_eq!(ObjectKind::from_magic(*b"XX\x00\x01"), None);
        let err = decode_object(&b"XX\x00\x01whatever"[..], Hash::ZERO).unwrap_err();
        assert!(matches!(err, Error::MismatchedMagic));
    }

    #[test]
    fn test_typed_reader_expect() {
        let r = TypedReader::new(&b""[..], Hash::ZERO, ObjectKind::Tree);
        assert!(r.expect(ObjectKind::Tree).is_ok());
        let err = r.expect(ObjectKind::Commit).unwrap_err();
        assert!(matches!(err, Error::WrongObjectKind { .. }));
    }

    #[test]
    fn test_decode_object_unwraps_zstd() {
        // an empty tree, zstd-wrapped as a remote would send it
        let tree = Tree::empty();
        let mut plain = Vec::new();
        tree.encode(&mut plain).unwrap();
        let wrapped = zstd::encode_all(&plain[..], 3).unwrap();

        let decoded = decode_object(&wrapped[..], Hash::ZERO).unwrap();
        assert_eq!(decoded, Object::Tree(tree));
    }
}
