//! Reeltide ingestion runner
//!
//! Durable, concurrent job runner that slices, uploads, and catalogs
//! incoming video sources against a content-addressed storage node and a
//! relational catalog.

pub mod adapters;
pub mod error;
pub mod job;
pub mod metrics;
pub mod metrics_server;
pub mod queue;
pub mod runner;
pub mod slicer;
pub mod video;

pub use reeltide_config as config;
pub use reeltide_config::Config;

pub use adapters::{
    default_node, register_node, Catalog, DummyNode, FfmpegTranscoder, FsKvCache, HttpNode,
    KvCache, NodeType, PeerId, SqliteCatalog, StorageNode, StreamFormat, Transcoder,
};
pub use error::{
    CatalogError, EncodeError, JobError, KvError, ProbeError, RunnerError, StorageError,
};
pub use job::{HlsCrypto, Job, JobKind, JobStatus, Scale, SkipStep};
pub use metrics::{
    collect_system_metrics, new_shared_metrics, JobSnapshot, RunnerSnapshot, SharedMetrics,
    SystemMetrics,
};
pub use metrics_server::{create_metrics_router, run_metrics_server, ServerError};
pub use queue::Queue;
pub use runner::{Collaborators, Runner};
pub use slicer::{slice, Fragment};
pub use video::{
    episode_index, Actor, Genre, Hash, HashType, Sample, ToVideo, Video, VideoFormat, VideoInfo,
    VideoSource,
};
