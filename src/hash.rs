use std::fmt;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::Error;

/// BLAKE3 hash used for content addressing
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// zero hash (sentinel, distinct from any real object)
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// hash of the empty blob; opening it yields an empty reader
    /// without touching the store
    pub const EMPTY_BLOB: Hash = Hash([
        0xaf, 0x13, 0x49, 0xb9, 0xf5, 0xf9, 0xa1, 0xa6, 0xa0, 0x40, 0x4d, 0xea, 0x36, 0xdc,
        0xc9, 0x49, 0x9b, 0xcb, 0x25, 0xc9, 0xad, 0xc1, 0x12, 0xb7, 0xcc, 0x9a, 0x93, 0xca,
        0xe4, 0x1f, 0x32, 0x62,
    ]);

    /// create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// parse from a 64-character lowercase hex string
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(Error::InvalidObjectName(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| Error::InvalidObjectName(s.to_string()))?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// display form with trailing zero bytes stripped; never valid for
    /// lookup
    pub fn short_hex(&self) -> String {
        let mut end = self.0.len();
        while end > 1 && self.0[end - 1] == 0 {
            end -= 1;
        }
        hex::encode(&self.0[..end])
    }

    /// true if this hash is the zero sentinel
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// true if the hex form starts with the given prefix
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.to_hex().starts_with(prefix)
    }

    /// split into path components for the sharded object store
    /// returns (hex[0..2], hex[2..4], full hex)
    pub fn to_path_components(&self) -> (String, String, String) {
        let hex = self.to_hex();
        (hex[..2].to_string(), hex[2..4].to_string(), hex)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..12])
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// streaming hasher; implements Write so it can sit in a tee
pub struct Hasher {
    inner: blake3::Hasher,
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    /// feed bytes
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// finalize and return the hash
    pub fn finalize(self) -> Hash {
        Hash(*self.inner.finalize().as_bytes())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// hash a full byte slice in one call
pub fn hash_bytes(data: &[u8]) -> Hash {
    Hash(*blake3::hash(data).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hex_roundtrip() {
        let original =
            Hash::from_hex("abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789")
                .unwrap();
        let hex = original.to_hex();
        let parsed = Hash::from_hex(&hex).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_hash_invalid_hex() {
        assert!(Hash::from_hex("not valid hex").is_err());
        assert!(Hash::from_hex("abcd").is_err()); // too short
        assert!(Hash::from_hex(
            "abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789ff"
        )
        .is_err()); // too long
    }

    #[test]
    fn test_invalid_name_is_malformed() {
        let err = Hash::from_hex("zz").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Malformed);
        assert!(err.to_string().contains("not a valid object name"));
    }

    #[test]
    fn test_hash_path_components() {
        let h = Hash::from_hex("abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789")
            .unwrap();
        let (d1, d2, full) = h.to_path_components();
        assert_eq!(d1, "ab");
        assert_eq!(d2, "cd");
        assert_eq!(full, h.to_hex());
    }

    #[test]
    fn test_hash_ordering() {
        let h1 = Hash::from_hex("0000000000000000000000000000000000000000000000000000000000000001")
            .unwrap();
        let h2 = Hash::from_hex("0000000000000000000000000000000000000000000000000000000000000002")
            .unwrap();
        assert!(h1 < h2);
    }

    #[test]
    fn test_empty_blob_constant() {
        // BLAKE3 of zero bytes
        let h = hash_bytes(b"");
        assert_eq!(h, Hash::EMPTY_BLOB);
        assert_eq!(
            Hash::EMPTY_BLOB.to_hex(),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn test_short_hex_strips_trailing_zeros() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        bytes[1] = 0xcd;
        let h = Hash::from_bytes(bytes);
        assert_eq!(h.short_hex(), "abcd");
        // zero hash keeps one byte
        assert_eq!(Hash::ZERO.short_hex(), "00");
    }

    #[test]
    fn test_streaming_hasher_matches_one_shot() {
        let direct = hash_bytes(b"helloworld");

        let mut streaming = Hasher::new();
        streaming.update(b"hello");
        streaming.update(b"world");
        assert_eq!(direct, streaming.finalize());
    }

    #[test]
    fn test_hasher_as_writer() {
        let mut h = Hasher::new();
        h.write_all(b"some bytes").unwrap();
        assert_eq!(h.finalize(), hash_bytes(b"some bytes"));
    }

    #[test]
    fn test_matches_prefix() {
        let h = Hash::from_hex("abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789")
            .unwrap();
        assert!(h.matches_prefix("abcd"));
        assert!(!h.matches_prefix("abce"));
    }

    #[test]
    fn test_hash_serde_json() {
        let h = Hash::from_hex("abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789")
            .unwrap();
        let json = serde_json::to_string(&h).unwrap();
        assert!(json.contains("abcdef"));
        let parsed: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(h, parsed);
    }
}
