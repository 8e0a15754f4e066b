//! content-addressed object storage: blob framing, the two sharded
//! stores, and the caching database facade

pub mod blob;
pub mod database;
pub mod frame;
pub mod metadata;
mod store;

pub use blob::{BlobStore, FramedStream};
pub use database::{Database, SnapshotCommit, SnapshotTree};
pub use frame::{make_blob_reader, BlobReader, Compression, FrameHeader};
pub use metadata::{MetadataStore, MetadataStream};
pub use store::LooseObject;
