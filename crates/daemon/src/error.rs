//! Crate-wide error taxonomy.
//!
//! Each collaborator boundary gets its own `thiserror` enum; job- and
//! runner-level errors wrap those with `#[from]` and a short phase tag via
//! [`wrap`].

use thiserror::Error;

/// Errors from the embedded key-value cache.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors from a content-addressed storage node.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage node already registered")]
    AlreadyRegistered,
    #[error("request failed: {0}")]
    Request(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from probing a media file.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),
    #[error("failed to parse ffprobe output: {0}")]
    Parse(String),
    #[error("no video or audio stream present")]
    NotMedia,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from invoking the HLS transcoder.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("ffmpeg exited with status: {0}")]
    FfmpegFailed(i32),
    #[error("ffmpeg was terminated by signal")]
    Terminated,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Errors from the relational catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("sql error: {0}")]
    Sql(String),
    #[error("row not found")]
    NotFound,
}

/// Errors surfaced while driving a [`crate::job::Job`] through its pipeline.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("kv cache: {0}")]
    Kv(#[from] KvError),
    #[error("decode payload: {0}")]
    Decode(String),
    #[error("{phase}: {source}")]
    Phase {
        phase: &'static str,
        #[source]
        source: Box<JobError>,
    },
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("probe: {0}")]
    Probe(#[from] ProbeError),
    #[error("encode: {0}")]
    Encode(#[from] EncodeError),
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("cancelled")]
    Cancelled,
}

/// Prepends a short phase tag to an error, matching the teacher's convention
/// of one wrapping helper rather than one variant per call site.
pub fn wrap(err: impl Into<JobError>, phase: &'static str) -> JobError {
    JobError::Phase {
        phase,
        source: Box::new(err.into()),
    }
}

/// Errors from `Runner::start` preconditions.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("storage node not ready")]
    StorageNotReady,
    #[error("catalog not ready")]
    CatalogNotReady,
    #[error("kv cache: {0}")]
    Kv(#[from] KvError),
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("restore: {0}")]
    Restore(#[from] JobError),
}
