use std::io::{Read, Write};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::types::{ObjectKind, Signature, TypedReader};

/// a commit: snapshot pointer plus history
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    /// root tree hash
    pub tree: Hash,
    /// parent commits (empty for initial, 1 for linear, 2+ for merge)
    pub parents: Vec<Hash>,
    pub author: Signature,
    pub committer: Signature,
    /// extra headers in file order; values may span lines
    pub extra: Vec<(String, String)>,
    pub message: String,
}

impl Commit {
    pub fn new(
        tree: Hash,
        parents: Vec<Hash>,
        author: Signature,
        committer: Signature,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tree,
            parents,
            author,
            committer,
            extra: vec![],
            message: message.into(),
        }
    }

    /// is this an initial commit (no parents)
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// is this a merge commit (multiple parents)
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// first line of the message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// serialize to the wire form
    pub fn encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_all(&ObjectKind::Commit.magic())
            .with_path("<commit>")?;
        writeln!(w, "tree {}", self.tree.to_hex()).with_path("<commit>")?;
        for parent in &self.parents {
            writeln!(w, "parent {}", parent.to_hex()).with_path("<commit>")?;
        }
        writeln!(w, "author {}", self.author).with_path("<commit>")?;
        writeln!(w, "committer {}", self.committer).with_path("<commit>")?;
        for (key, value) in &self.extra {
            write_multiline(w, key, value)?;
        }
        writeln!(w).with_path("<commit>")?;
        w.write_all(self.message.as_bytes()).with_path("<commit>")?;
        Ok(())
    }

    /// decode from a typed reader
    pub fn decode<R: Read>(mut r: TypedReader<R>) -> Result<Commit> {
        r.expect(ObjectKind::Commit)?;
        r.read_magic()?;
        let hash = r.hash;
        let buf = r.read_rest()?;

        let (headers, message) = parse_headers(&buf, hash)?;

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut extra = Vec::new();

        for (key, value) in headers {
            match key.as_str() {
                "tree" => tree = Some(Hash::from_hex(&value)?),
                "parent" => parents.push(Hash::from_hex(&value)?),
                "author" => author = Some(Signature::parse(&value, hash)?),
                "committer" => committer = Some(Signature::parse(&value, hash)?),
                _ => extra.push((key, value)),
            }
        }

        let missing = |field: &str| Error::MalformedObject {
            hash,
            message: format!("commit missing {} header", field),
        };

        Ok(Commit {
            tree: tree.ok_or_else(|| missing("tree"))?,
            parents,
            author: author.ok_or_else(|| missing("author"))?,
            committer: committer.ok_or_else(|| missing("committer"))?,
            extra,
            message,
        })
    }
}

/// write a `key value` header; value lines past the first continue
/// with a leading space
pub(crate) fn write_multiline<W: Write + ?Sized>(w: &mut W, key: &str, value: &str) -> Result<()> {
    let mut lines = value.split('\n');
    writeln!(w, "{} {}", key, lines.next().unwrap_or("")).with_path("<object>")?;
    for line in lines {
        writeln!(w, " {}", line).with_path("<object>")?;
    }
    Ok(())
}

/// split header block from message; handles continuation lines
pub(crate) fn parse_headers(buf: &[u8], hash: Hash) -> Result<(Vec<(String, String)>, String)> {
    let text = std::str::from_utf8(buf).map_err(|_| Error::MalformedObject {
        hash,
        message: "object is not utf-8".into(),
    })?;

    let mut headers: Vec<(String, String)> = Vec::new();
    let mut rest = text;

    loop {
        let (line, remainder) = match rest.find('\n') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => {
                return Err(Error::MalformedObject {
                    hash,
                    message: "missing blank line after headers".into(),
                })
            }
        };
        rest = remainder;

        if line.is_empty() {
            break;
        }

        if let Some(continuation) = line.strip_prefix(' ') {
            match headers.last_mut() {
                Some((_, value)) => {
                    value.push('\n');
                    value.push_str(continuation);
                }
                None => {
                    return Err(Error::MalformedObject {
                        hash,
                        message: "continuation line before any header".into(),
                    })
                }
            }
            continue;
        }

        match line.split_once(' ') {
            Some((key, value)) => headers.push((key.to_string(), value.to_string())),
            None => {
                return Err(Error::MalformedObject {
                    hash,
                    message: format!("unparseable header: {}", line),
                })
            }
        }
    }

    Ok((headers, rest.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> Hash {
        Hash::from_bytes([n; 32])
    }

    fn sig(name: &str, when: i64) -> Signature {
        Signature::new(name, format!("{}@example.com", name), when)
    }

    fn roundtrip(c: &Commit) -> Commit {
        let mut bytes = Vec::new();
        c.encode(&mut bytes).unwrap();
        Commit::decode(TypedReader::new(&bytes[..], Hash::ZERO, ObjectKind::Commit)).unwrap()
    }

    #[test]
    fn test_commit_roundtrip() {
        let c = Commit::new(
            h(1),
            vec![h(2), h(3)],
            sig("alice", 1700000000),
            sig("bob", 1700000100),
            "merge topic into main\n\nlonger body here\n",
        );
        assert_eq!(roundtrip(&c), c);
    }

    #[test]
    fn test_commit_wire_form() {
        let c = Commit::new(h(1), vec![], sig("a", 10), sig("a", 10), "msg");
        let mut bytes = Vec::new();
        c.encode(&mut bytes).unwrap();

        assert_eq!(&bytes[..4], b"ZC\x00\x01");
        let text = std::str::from_utf8(&bytes[4..]).unwrap();
        assert!(text.starts_with(&format!("tree {}\n", h(1).to_hex())));
        assert!(text.contains("\nauthor a <a@example.com> 10 +0000\n"));
        assert!(text.ends_with("\n\nmsg"));
    }

    #[test]
    fn test_commit_root_and_merge() {
        let root = Commit::new(h(1), vec![], sig("a", 0), sig("a", 0), "init");
        assert!(root.is_root());
        assert!(!root.is_merge());

        let merge = Commit::new(h(1), vec![h(2), h(3)], sig("a", 0), sig("a", 0), "merge");
        assert!(merge.is_merge());
        assert_eq!(roundtrip(&merge).parents, vec![h(2), h(3)]);
    }

    #[test]
    fn test_commit_extra_headers_multiline() {
        let mut c = Commit::new(h(1), vec![], sig("a", 0), sig("a", 0), "signed");
        c.extra.push((
            "gpgsig".to_string(),
            "-----BEGIN-----\nAAAA\nBBBB\n-----END-----".to_string(),
        ));
        c.extra.push(("encoding".to_string(), "utf-8".to_string()));

        let back = roundtrip(&c);
        assert_eq!(back, c);
        assert_eq!(back.extra[0].1.lines().count(), 4);
    }

    #[test]
    fn test_commit_empty_message() {
        let c = Commit::new(h(1), vec![], sig("a", 0), sig("a", 0), "");
        assert_eq!(roundtrip(&c).message, "");
        assert_eq!(c.summary(), "");
    }

    #[test]
    fn test_commit_summary() {
        let c = Commit::new(h(1), vec![], sig("a", 0), sig("a", 0), "first line\nrest");
        assert_eq!(c.summary(), "first line");
    }

    #[test]
    fn test_decode_missing_tree() {
        let bytes = b"ZC\x00\x01author a <a@b> 0 +0000\ncommitter a <a@b> 0 +0000\n\nmsg";
        let err = Commit::decode(TypedReader::new(&bytes[..], Hash::ZERO, ObjectKind::Commit))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedObject { .. }));
    }

    #[test]
    fn test_decode_rejects_wrong_kind() {
        let c = Commit::new(h(1), vec![], sig("a", 0), sig("a", 0), "m");
        let mut bytes = Vec::new();
        c.encode(&mut bytes).unwrap();

        let err =
            Commit::decode(TypedReader::new(&bytes[..], Hash::ZERO, ObjectKind::Tag)).unwrap_err();
        assert!(matches!(err, Error::WrongObjectKind { .. }));
    }

    #[test]
    fn test_decode_rejects_missing_blank_line() {
        let bytes = b"ZC\x00\x01tree 0000000000000000000000000000000000000000000000000000000000000000\n";
        assert!(
            Commit::decode(TypedReader::new(&bytes[..], Hash::ZERO, ObjectKind::Commit)).is_err()
        );
    }
}
