//! Swappable collaborator adapters: KvCache, StorageNode, Transcoder, Catalog.
//!
//! Each is a trait the core Runner/Job depend on, with a filesystem/SQLite/
//! subprocess implementation, generalizing the teacher's probe/encode
//! wrappers and `jobs.rs` save/load pattern away from AV1-specific shapes.

pub mod catalog;
pub mod kv;
pub mod storage;
pub mod transcoder;

pub use catalog::{Catalog, SqliteCatalog};
pub use kv::{FsKvCache, KvCache};
pub use storage::{default_node, register_node, DummyNode, HttpNode, NodeType, PeerId, StorageNode};
pub use transcoder::{FfmpegTranscoder, StreamFormat, Transcoder};
