use std::fmt;

use crate::error::{Error, Result};
use crate::hash::Hash;

/// author/committer/tagger identity with timestamp
///
/// wire form: `Name <email> <unix-seconds> <±zzzz>`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// seconds since the unix epoch
    pub when: i64,
    /// timezone offset, e.g. "+0200"
    pub offset: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, when: i64) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            when,
            offset: "+0000".to_string(),
        }
    }

    /// parse the wire form; `hash` only feeds error context
    pub fn parse(s: &str, hash: Hash) -> Result<Self> {
        let malformed = || Error::MalformedObject {
            hash,
            message: format!("unparseable signature: {}", s),
        };

        let open = s.find('<').ok_or_else(malformed)?;
        let close = s[open..].find('>').ok_or_else(malformed)? + open;

        let name = s[..open].trim().to_string();
        let email = s[open + 1..close].to_string();

        let mut rest = s[close + 1..].split_whitespace();
        let when = rest
            .next()
            .ok_or_else(malformed)?
            .parse::<i64>()
            .map_err(|_| malformed())?;
        let offset = rest.next().unwrap_or("+0000").to_string();

        Ok(Self {
            name,
            email,
            when,
            offset,
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <{}> {} {}",
            self.name, self.email, self.when, self.offset
        )
    }
}
