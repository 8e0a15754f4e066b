use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::types::commit::{parse_headers, write_multiline};
use crate::types::{ObjectKind, Signature, TypedReader};
use crate::error::IoResultExt;

/// annotated pointer to any object; the content may carry a trailing
/// signature block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub object: Hash,
    pub target_kind: ObjectKind,
    pub name: String,
    pub tagger: Signature,
    pub content: String,
}

impl Tag {
    pub fn new(
        object: Hash,
        target_kind: ObjectKind,
        name: impl Into<String>,
        tagger: Signature,
        content: impl Into<String>,
    ) -> Self {
        Self {
            object,
            target_kind,
            name: name.into(),
            tagger,
            content: content.into(),
        }
    }

    pub fn encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_all(&ObjectKind::Tag.magic()).with_path("<tag>")?;
        writeln!(w, "object {}", self.object.to_hex()).with_path("<tag>")?;
        writeln!(w, "type {}", self.target_kind.name()).with_path("<tag>")?;
        write_multiline(w, "tag", &self.name)?;
        writeln!(w, "tagger {}", self.tagger).with_path("<tag>")?;
        writeln!(w).with_path("<tag>")?;
        w.write_all(self.content.as_bytes()).with_path("<tag>")?;
        Ok(())
    }

    pub fn decode<R: Read>(mut r: TypedReader<R>) -> Result<Tag> {
        r.expect(ObjectKind::Tag)?;
        r.read_magic()?;
        let hash = r.hash;
        let buf = r.read_rest()?;

        let (headers, content) = parse_headers(&buf, hash)?;

        let mut object = None;
        let mut target_kind = None;
        let mut name = None;
        let mut tagger = None;

        for (key, value) in headers {
            match key.as_str() {
                "object" => object = Some(Hash::from_hex(&value)?),
                "type" => {
                    target_kind = Some(ObjectKind::from_name(&value).ok_or_else(|| {
                        Error::MalformedObject {
                            hash,
                            message: format!("unknown tag target type: {}", value),
                        }
                    })?)
                }
                "tag" => name = Some(value),
                "tagger" => tagger = Some(Signature::parse(&value, hash)?),
                other => {
                    return Err(Error::MalformedObject {
                        hash,
                        message: format!("unexpected tag header: {}", other),
                    })
                }
            }
        }

        let missing = |field: &str| Error::MalformedObject {
            hash,
            message: format!("tag missing {} header", field),
        };

        Ok(Tag {
            object: object.ok_or_else(|| missing("object"))?,
            target_kind: target_kind.ok_or_else(|| missing("type"))?,
            name: name.ok_or_else(|| missing("tag"))?,
            tagger: tagger.ok_or_else(|| missing("tagger"))?,
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> Hash {
        Hash::from_bytes([n; 32])
    }

    fn roundtrip(t: &Tag) -> Tag {
        let mut bytes = Vec::new();
        t.encode(&mut bytes).unwrap();
        Tag::decode(TypedReader::new(&bytes[..], Hash::ZERO, ObjectKind::Tag)).unwrap()
    }

    #[test]
    fn test_tag_roundtrip() {
        let t = Tag::new(
            h(1),
            ObjectKind::Commit,
            "v1.0.0",
            Signature::new("rel", "rel@example.com", 1700000000),
            "release 1.0.0\n",
        );
        assert_eq!(roundtrip(&t), t);
    }

    #[test]
    fn test_tag_wire_form() {
        let t = Tag::new(
            h(2),
            ObjectKind::Tree,
            "snapshot",
            Signature::new("a", "a@b", 5),
            "",
        );
        let mut bytes = Vec::new();
        t.encode(&mut bytes).unwrap();

        assert_eq!(&bytes[..4], b"ZG\x00\x01");
        let text = std::str::from_utf8(&bytes[4..]).unwrap();
        assert!(text.contains(&format!("object {}\n", h(2).to_hex())));
        assert!(text.contains("type tree\n"));
        assert!(text.contains("tag snapshot\n"));
    }

    #[test]
    fn test_tag_with_signature_block() {
        let t = Tag::new(
            h(1),
            ObjectKind::Commit,
            "signed",
            Signature::new("a", "a@b", 0),
            "message\n-----BEGIN SIGNATURE-----\nAAAA\n-----END SIGNATURE-----\n",
        );
        let back = roundtrip(&t);
        assert!(back.content.contains("BEGIN SIGNATURE"));
        assert_eq!(back, t);
    }

    #[test]
    fn test_tag_can_point_at_tag() {
        let t = Tag::new(
            h(3),
            ObjectKind::Tag,
            "meta",
            Signature::new("a", "a@b", 0),
            "tag of a tag\n",
        );
        assert_eq!(roundtrip(&t).target_kind, ObjectKind::Tag);
    }

    #[test]
    fn test_tag_missing_header() {
        let bytes = b"ZG\x00\x01object 0000000000000000000000000000000000000000000000000000000000000000\n\ncontent";
        let err =
            Tag::decode(TypedReader::new(&bytes[..], Hash::ZERO, ObjectKind::Tag)).unwrap_err();
        assert!(matches!(err, Error::MalformedObject { .. }));
    }

    #[test]
    fn test_tag_unknown_type_rejected() {
        let bytes = b"ZG\x00\x01object 0000000000000000000000000000000000000000000000000000000000000000\ntype gadget\ntag x\ntagger a <a@b> 0 +0000\n\n";
        assert!(Tag::decode(TypedReader::new(&bytes[..], Hash::ZERO, ObjectKind::Tag)).is_err());
    }
}
