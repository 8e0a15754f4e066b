use std::io::{self, BufReader, Read};

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// blob frame magic, "ZB" followed by a format tag
pub const BLOB_MAGIC: [u8; 4] = [0x5A, 0x42, 0x00, 0x01];

/// current frame version
pub const FRAME_VERSION: u16 = 1;

/// frame header length: magic + version + method + uncompressed length
pub const FRAME_HEADER_LEN: usize = 16;

/// zstd stream magic, used to detect pre-compressed metadata frames
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// maximum number of bytes sniffed to classify content
pub const SNIFF_LEN: usize = 4096;

/// payload compression method recorded in the frame header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    Store = 0,
    Zstd = 1,
    Deflate = 2,
}

impl Compression {
    pub fn from_u16(v: u16) -> Result<Self> {
        match v {
            0 => Ok(Compression::Store),
            1 => Ok(Compression::Zstd),
            2 => Ok(Compression::Deflate),
            other => Err(Error::UnknownCompression(other)),
        }
    }
}

/// decoded frame header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub method: Compression,
    pub uncompressed_len: u64,
}

impl FrameHeader {
    pub fn new(method: Compression, uncompressed_len: u64) -> Self {
        Self {
            method,
            uncompressed_len,
        }
    }

    /// serialize into the fixed 16-byte wire form
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        buf[..4].copy_from_slice(&BLOB_MAGIC);
        BigEndian::write_u16(&mut buf[4..6], FRAME_VERSION);
        BigEndian::write_u16(&mut buf[6..8], self.method as u16);
        BigEndian::write_u64(&mut buf[8..16], self.uncompressed_len);
        buf
    }

    /// read and validate a header from the start of a framed stream
    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        r.read_exact(&mut buf).map_err(|e| Error::Io {
            path: "<frame>".into(),
            source: e,
        })?;

        if buf[..4] != BLOB_MAGIC {
            return Err(Error::MismatchedMagic);
        }
        let version = BigEndian::read_u16(&buf[4..6]);
        if version != FRAME_VERSION {
            return Err(Error::MismatchedVersion(version));
        }
        let method = Compression::from_u16(BigEndian::read_u16(&buf[6..8]))?;
        let uncompressed_len = BigEndian::read_u64(&buf[8..16]);

        Ok(Self {
            method,
            uncompressed_len,
        })
    }
}

/// classify content from its first bytes: textual content compresses,
/// anything that looks binary is stored raw
///
/// the sniff is pinned: no NUL byte and valid UTF-8 up to a possibly
/// truncated final code point means text
pub fn sniff_is_text(head: &[u8]) -> bool {
    if head.is_empty() {
        return false;
    }
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // a multi-byte code point may be cut at the sniff boundary
        Err(e) => e.valid_up_to() + 4 > head.len() && e.error_len().is_none(),
    }
}

/// decompressing side of a blob frame
pub enum BlobPayload<R: Read> {
    Store(R),
    Zstd(zstd::stream::read::Decoder<'static, BufReader<R>>),
    Deflate(flate2::read::DeflateDecoder<R>),
}

impl<R: Read> Read for BlobPayload<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BlobPayload::Store(r) => r.read(buf),
            BlobPayload::Zstd(r) => r.read(buf),
            BlobPayload::Deflate(r) => r.read(buf),
        }
    }
}

/// size-bearing reader over the decompressed blob payload
pub struct BlobReader<R: Read> {
    payload: BlobPayload<R>,
    size: u64,
}

impl<R: Read> BlobReader<R> {
    /// uncompressed payload length from the frame header
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl<R: Read> Read for BlobReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.payload.read(buf)
    }
}

/// validate the frame and return a decoded `{reader, size}` pair
pub fn make_blob_reader<R: Read>(mut stream: R) -> Result<BlobReader<R>> {
    let header = FrameHeader::decode(&mut stream)?;

    let payload = match header.method {
        Compression::Store => BlobPayload::Store(stream),
        Compression::Zstd => {
            let dec = zstd::stream::read::Decoder::new(stream).map_err(|e| Error::Io {
                path: "<zstd>".into(),
                source: e,
            })?;
            BlobPayload::Zstd(dec)
        }
        Compression::Deflate => BlobPayload::Deflate(flate2::read::DeflateDecoder::new(stream)),
    };

    Ok(BlobReader {
        payload,
        size: header.uncompressed_len,
    })
}

/// canonical framed form of the empty blob
pub fn empty_frame() -> [u8; FRAME_HEADER_LEN] {
    FrameHeader::new(Compression::Store, 0).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_header_roundtrip() {
        let h = FrameHeader::new(Compression::Zstd, 123456789);
        let bytes = h.encode();
        let parsed = FrameHeader::decode(&mut &bytes[..]).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut bytes = FrameHeader::new(Compression::Store, 0).encode();
        bytes[0] = b'X';
        let err = FrameHeader::decode(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, Error::MismatchedMagic));
    }

    #[test]
    fn test_header_rejects_bad_version() {
        let mut bytes = FrameHeader::new(Compression::Store, 0).encode();
        bytes[5] = 9;
        let err = FrameHeader::decode(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, Error::MismatchedVersion(9)));
    }

    #[test]
    fn test_header_rejects_unknown_method() {
        let mut bytes = FrameHeader::new(Compression::Store, 0).encode();
        bytes[7] = 7;
        let err = FrameHeader::decode(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, Error::UnknownCompression(7)));
    }

    #[test]
    fn test_empty_frame_bytes() {
        assert_eq!(
            empty_frame(),
            [0x5A, 0x42, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
             0x00, 0x00]
        );
    }

    #[test]
    fn test_sniff_text() {
        assert!(sniff_is_text(b"fn main() {}\n"));
        assert!(sniff_is_text("héllo wörld".as_bytes()));
        assert!(!sniff_is_text(b""));
        assert!(!sniff_is_text(b"\x00\x01\x02"));
        assert!(!sniff_is_text(b"text with \x00 inside"));
        // invalid utf-8 in the middle is binary
        assert!(!sniff_is_text(b"ab\xff\xffcd many more bytes here"));
    }

    #[test]
    fn test_sniff_truncated_codepoint_is_text() {
        // 4095 ascii bytes then the first byte of a multi-byte char
        let mut data = vec![b'a'; SNIFF_LEN - 1];
        data.push(0xC3);
        assert!(sniff_is_text(&data));
    }

    #[test]
    fn test_make_blob_reader_store() {
        let mut framed = Vec::new();
        framed.extend_from_slice(&FrameHeader::new(Compression::Store, 5).encode());
        framed.extend_from_slice(b"hello");

        let mut reader = make_blob_reader(&framed[..]).unwrap();
        assert_eq!(reader.size(), 5);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn test_make_blob_reader_zstd() {
        let payload = b"compressible text payload, repeated repeated repeated";
        let compressed = zstd::encode_all(&payload[..], 3).unwrap();

        let mut framed = Vec::new();
        framed
            .extend_from_slice(&FrameHeader::new(Compression::Zstd, payload.len() as u64).encode());
        framed.extend_from_slice(&compressed);

        let mut reader = make_blob_reader(&framed[..]).unwrap();
        assert_eq!(reader.size(), payload.len() as u64);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_make_blob_reader_deflate() {
        let payload = b"deflate encoded payload";
        let mut enc =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(payload).unwrap();
        let compressed = enc.finish().unwrap();

        let mut framed = Vec::new();
        framed.extend_from_slice(
            &FrameHeader::new(Compression::Deflate, payload.len() as u64).encode(),
        );
        framed.extend_from_slice(&compressed);

        let mut reader = make_blob_reader(&framed[..]).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }
}
