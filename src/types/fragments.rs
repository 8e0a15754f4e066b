use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::types::{ObjectKind, TypedReader};

/// wire size of one fragment entry: index + size + hash
const ENTRY_LEN: usize = 4 + 8 + 32;

/// one shard of a fragmented file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentEntry {
    pub index: u32,
    pub size: u64,
    pub hash: Hash,
}

/// manifest of blob shards for a single logical file too large to
/// store as one blob
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragments {
    /// total uncompressed size of the reassembled file
    pub size: u64,
    /// hash of the logical (reassembled) file contents
    pub origin: Hash,
    pub entries: Vec<FragmentEntry>,
}

impl Fragments {
    pub fn new(size: u64, origin: Hash, entries: Vec<FragmentEntry>) -> Self {
        Self {
            size,
            origin,
            entries,
        }
    }

    /// serialize; entries are sorted by index on the way out
    pub fn encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_all(&ObjectKind::Fragments.magic())
            .with_path("<fragments>")?;

        let mut size_bytes = [0u8; 8];
        BigEndian::write_u64(&mut size_bytes, self.size);
        w.write_all(&size_bytes).with_path("<fragments>")?;
        w.write_all(self.origin.as_bytes()).with_path("<fragments>")?;

        let mut sorted: Vec<&FragmentEntry> = self.entries.iter().collect();
        sorted.sort_by_key(|e| e.index);

        let mut buf = [0u8; ENTRY_LEN];
        for entry in sorted {
            BigEndian::write_u32(&mut buf[..4], entry.index);
            BigEndian::write_u64(&mut buf[4..12], entry.size);
            buf[12..].copy_from_slice(entry.hash.as_bytes());
            w.write_all(&buf).with_path("<fragments>")?;
        }
        Ok(())
    }

    /// decode from a typed reader; entries run to end-of-object
    pub fn decode<R: Read>(mut r: TypedReader<R>) -> Result<Fragments> {
        r.expect(ObjectKind::Fragments)?;
        r.read_magic()?;
        let hash = r.hash;
        let buf = r.read_rest()?;

        let malformed = |message: &str| Error::MalformedObject {
            hash,
            message: message.to_string(),
        };

        if buf.len() < 8 + 32 {
            return Err(malformed("truncated fragments header"));
        }
        let size = BigEndian::read_u64(&buf[..8]);
        let mut origin_bytes = [0u8; 32];
        origin_bytes.copy_from_slice(&buf[8..40]);
        let origin = Hash::from_bytes(origin_bytes);

        let body = &buf[40..];
        if body.len() % ENTRY_LEN != 0 {
            return Err(malformed("truncated fragment entry"));
        }

        let mut entries = Vec::with_capacity(body.len() / ENTRY_LEN);
        for chunk in body.chunks_exact(ENTRY_LEN) {
            let mut entry_hash = [0u8; 32];
            entry_hash.copy_from_slice(&chunk[12..]);
            entries.push(FragmentEntry {
                index: BigEndian::read_u32(&chunk[..4]),
                size: BigEndian::read_u64(&chunk[4..12]),
                hash: Hash::from_bytes(entry_hash),
            });
        }

        Ok(Fragments {
            size,
            origin,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> Hash {
        Hash::from_bytes([n; 32])
    }

    fn roundtrip(f: &Fragments) -> Fragments {
        let mut bytes = Vec::new();
        f.encode(&mut bytes).unwrap();
        Fragments::decode(TypedReader::new(&bytes[..], Hash::ZERO, ObjectKind::Fragments)).unwrap()
    }

    #[test]
    fn test_fragments_roundtrip() {
        let f = Fragments::new(
            3 << 30,
            h(9),
            vec![
                FragmentEntry { index: 0, size: 1 << 30, hash: h(1) },
                FragmentEntry { index: 1, size: 1 << 30, hash: h(2) },
                FragmentEntry { index: 2, size: 1 << 30, hash: h(3) },
            ],
        );
        assert_eq!(roundtrip(&f), f);
    }

    #[test]
    fn test_fragments_encode_sorts_by_index() {
        let f = Fragments::new(
            30,
            h(9),
            vec![
                FragmentEntry { index: 2, size: 10, hash: h(3) },
                FragmentEntry { index: 0, size: 10, hash: h(1) },
                FragmentEntry { index: 1, size: 10, hash: h(2) },
            ],
        );
        let back = roundtrip(&f);
        let indices: Vec<_> = back.entries.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_fragments_empty_entries() {
        let f = Fragments::new(0, Hash::EMPTY_BLOB, vec![]);
        assert_eq!(roundtrip(&f), f);
    }

    #[test]
    fn test_fragments_wire_header() {
        let f = Fragments::new(0x0102030405060708, h(7), vec![]);
        let mut bytes = Vec::new();
        f.encode(&mut bytes).unwrap();

        assert_eq!(&bytes[..4], b"ZF\x00\x01");
        assert_eq!(&bytes[4..12], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&bytes[12..44], h(7).as_bytes());
    }

    #[test]
    fn test_fragments_rejects_truncated_entry() {
        let f = Fragments::new(
            10,
            h(9),
            vec![FragmentEntry { index: 0, size: 10, hash: h(1) }],
        );
        let mut bytes = Vec::new();
        f.encode(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 1);

        let err = Fragments::decode(TypedReader::new(
            &bytes[..],
            Hash::ZERO,
            ObjectKind::Fragments,
        ))
        .unwrap_err();
        assert!(matches!(err, Error::MalformedObject { .. }));
    }

    #[test]
    fn test_fragments_rejects_wrong_kind() {
        let mut bytes = Vec::new();
        Fragments::new(0, h(1), vec![]).encode(&mut bytes).unwrap();
        let err = Fragments::decode(TypedReader::new(&bytes[..], Hash::ZERO, ObjectKind::Tree))
            .unwrap_err();
        assert!(matches!(err, Error::WrongObjectKind { .. }));
    }
}
