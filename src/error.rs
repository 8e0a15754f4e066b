use std::path::PathBuf;

use crate::hash::Hash;

/// stable error categories, used by callers to react without matching
/// on individual variants
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// no such object, no such reference
    NotFound,
    /// bad magic, bad version, unparseable header, invalid name
    Malformed,
    /// resource locked, reference has changed
    Concurrency,
    /// not a file, unrelated histories, worktree not empty
    Precondition,
    /// hash mismatch after streaming, size mismatch
    Integrity,
    /// operation canceled through its context
    Canceled,
    /// any underlying filesystem error not classified above
    Io,
}

/// error type for zeta operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("repository not found at {0}")]
    NoRepo(PathBuf),

    #[error("repository already exists at {0}")]
    RepoExists(PathBuf),

    #[error("object not found: {0}")]
    ObjectNotFound(Hash),

    #[error("no object with prefix: {0}")]
    PrefixNotFound(String),

    #[error("ambiguous object prefix: {0}")]
    AmbiguousPrefix(String),

    #[error("reference not found: {0}")]
    RefNotFound(String),

    #[error("not a valid object name: {0}")]
    InvalidObjectName(String),

    #[error("invalid reference name '{name}': {reason}")]
    InvalidRefName { name: String, reason: &'static str },

    #[error("invalid tree entry name '{name}': {reason}")]
    InvalidEntryName { name: String, reason: &'static str },

    #[error("mismatched magic")]
    MismatchedMagic,

    #[error("mismatched version: {0}")]
    MismatchedVersion(u16),

    #[error("unknown compression method: {0}")]
    UnknownCompression(u16),

    #[error("corrupt object {hash}: {message}")]
    MalformedObject { hash: Hash, message: String },

    #[error("object {hash} is a {actual}, expected {expected}")]
    WrongObjectKind {
        hash: Hash,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("max recursion while resolving {0}")]
    MaxResolveDepth(String),

    #[error("resource locked: {0}")]
    Locked(String),

    #[error("reference has changed: {0}")]
    RefChanged(String),

    #[error("not a file: {0}")]
    NotAFile(PathBuf),

    #[error("refusing to merge unrelated histories")]
    UnrelatedHistories,

    #[error("worktree not empty: {0}")]
    WorktreeNotEmpty(PathBuf),

    #[error("checkout would overwrite {0} conflicting paths")]
    CheckoutConflicts(usize),

    #[error("path not tracked: {0}")]
    PathNotTracked(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: Hash, actual: Hash },

    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("operation canceled")]
    Canceled,

    /// sentinel used by traversal callbacks to terminate a walk early
    /// without reporting failure; never surfaced to callers
    #[error("stop iteration")]
    Stop,

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cbor serialization error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("cbor deserialization error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// classify into one of the stable categories
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoRepo(_)
            | Error::ObjectNotFound(_)
            | Error::PrefixNotFound(_)
            | Error::AmbiguousPrefix(_)
            | Error::RefNotFound(_)
            | Error::PathNotTracked(_) => ErrorKind::NotFound,

            Error::InvalidObjectName(_)
            | Error::InvalidRefName { .. }
            | Error::InvalidEntryName { .. }
            | Error::MismatchedMagic
            | Error::MismatchedVersion(_)
            | Error::UnknownCompression(_)
            | Error::MalformedObject { .. }
            | Error::WrongObjectKind { .. }
            | Error::MaxResolveDepth(_)
            | Error::CborEncode(_)
            | Error::CborDecode(_)
            | Error::Config(_)
            | Error::ConfigSerialize(_) => ErrorKind::Malformed,

            Error::Locked(_) | Error::RefChanged(_) => ErrorKind::Concurrency,

            Error::RepoExists(_)
            | Error::NotAFile(_)
            | Error::UnrelatedHistories
            | Error::WorktreeNotEmpty(_)
            | Error::CheckoutConflicts(_) => ErrorKind::Precondition,

            Error::HashMismatch { .. } | Error::SizeMismatch { .. } => ErrorKind::Integrity,

            Error::Canceled | Error::Stop => ErrorKind::Canceled,

            Error::Io { .. } => ErrorKind::Io,
        }
    }

    /// true for the not-found category (swallowed during shallow walks)
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            Error::ObjectNotFound(Hash::ZERO).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(Error::MismatchedMagic.kind(), ErrorKind::Malformed);
        assert_eq!(
            Error::Locked("refs/heads/main".into()).kind(),
            ErrorKind::Concurrency
        );
        assert_eq!(
            Error::RefChanged("refs/heads/main".into()).kind(),
            ErrorKind::Concurrency
        );
        assert_eq!(Error::UnrelatedHistories.kind(), ErrorKind::Precondition);
        assert_eq!(
            Error::HashMismatch {
                expected: Hash::ZERO,
                actual: Hash::ZERO,
            }
            .kind(),
            ErrorKind::Integrity
        );
        assert_eq!(Error::Canceled.kind(), ErrorKind::Canceled);
    }

    #[test]
    fn test_integrity_never_not_found() {
        let e = Error::HashMismatch {
            expected: Hash::ZERO,
            actual: Hash::ZERO,
        };
        assert!(!e.is_not_found());
    }

    #[test]
    fn test_io_with_path() {
        let r: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = r.with_path("/some/path").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("/some/path"));
    }
}
