//! zeta - version control for repositories with very large blobs
//!
//! a content-addressed object database keyed by BLAKE3, a reference
//! store with a locked compare-and-swap update protocol, commit-graph
//! traversal, and a merkle-trie diff engine driving merge, checkout
//! and the working-set commands.
//!
//! # Core concepts
//!
//! - **Blob**: framed file content, zstd-compressed when it sniffs as
//!   text
//! - **Tree**: a directory listing in subtree order
//! - **Commit**: a snapshot pointer with history
//! - **Fragments**: the shard manifest of a file too large for one
//!   blob
//! - **Tag**: an annotated pointer to any object
//! - **Reference**: a name for a hash, or for another reference
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use zeta::{ops, Cancel, Repo};
//! use zeta::types::Signature;
//!
//! let repo = Repo::init(Path::new("/path/to/worktree")).unwrap();
//! let ctx = Cancel::new();
//!
//! ops::add(&repo, &["src/main.rs"], &ctx).unwrap();
//! let author = Signature::new("ada", "ada@example.com", 1700000000);
//! ops::commit_index(&repo, "initial commit", author.clone(), author).unwrap();
//! ```

mod cancel;
mod config;
mod error;
mod hash;
mod repo;

pub mod ignore;
pub mod index;
pub mod noder;
pub mod object;
pub mod ops;
pub mod refs;
pub mod traverse;
pub mod types;

pub use cancel::Cancel;
pub use config::{Config, DEFAULT_FRAGMENT_SIZE, SYSTEM_CONFIG_ENV};
pub use error::{Error, ErrorKind, IoResultExt, Result};
pub use hash::{hash_bytes, Hash, Hasher};
pub use repo::{Repo, DEFAULT_BRANCH, REPO_DIR};
