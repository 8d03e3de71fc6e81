//! Durable state-machine for one unit of work: persists itself to the
//! KvCache and drives its own side-effect pipeline under a cancellable
//! token.

use crate::adapters::{Catalog, KvCache, StorageNode, Transcoder};
use crate::error::{wrap, JobError, KvError};
use crate::slicer::slice;
use crate::video::{episode_index, Hash, HashType, ToVideo, Video, VideoInfo, VideoSource};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

/// Which decoder and side-effect pipeline a Job drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Source,
    Info,
}

/// Per-job state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Running,
    Stopped,
    Finished,
    Abnormal,
}

/// Target resolution cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    P480,
    P720,
    P1080,
}

impl Scale {
    /// `sharpness = "<v>P"`, any unknown bucket mapping to 720.
    pub fn sharpness(self) -> &'static str {
        match self {
            Scale::P480 => "480P",
            Scale::P720 => "720P",
            Scale::P1080 => "1080P",
        }
    }

    /// Quantizes a probed pixel height into a scale bucket.
    pub fn bucketize(height: u32) -> Scale {
        if height > 1080 {
            Scale::P1080
        } else if height > 720 {
            Scale::P720
        } else {
            Scale::P480
        }
    }
}

/// Side effects that may be skipped per-job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipStep {
    Source,
    Slice,
    Poster,
    Thumb,
}

/// HLS AES-128 key/IV pair; presence enables encrypted segment output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HlsCrypto {
    pub key_uri: String,
    pub key_path: String,
    pub iv: String,
}

/// The unit of durable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub payload: Vec<u8>,
    pub video_paths: Vec<String>,
    pub poster_path: Option<String>,
    pub thumb_path: Option<String>,
    pub sample_paths: Vec<String>,
    pub scale: Scale,
    pub output: String,
    pub skip: HashSet<SkipStep>,
    pub crypto: Option<HlsCrypto>,
    pub clear_temp: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub error_reason: Option<String>,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl Job {
    pub fn new(id: impl Into<String>, kind: JobKind, payload: Vec<u8>) -> Self {
        let ts = now_millis();
        Self {
            id: id.into(),
            kind,
            status: JobStatus::Waiting,
            payload,
            video_paths: Vec::new(),
            poster_path: None,
            thumb_path: None,
            sample_paths: Vec::new(),
            scale: Scale::P720,
            output: String::new(),
            skip: HashSet::new(),
            crypto: None,
            clear_temp: false,
            created_at: ts,
            updated_at: ts,
            error_reason: None,
        }
    }

    fn touch(&mut self) {
        self.updated_at = now_millis();
    }

    /// Writes self to KvCache under key `id`, iff no entry exists yet.
    pub async fn store(&self, kv: &dyn KvCache) -> Result<(), JobError> {
        if kv.has(&self.id).await.map_err(JobError::Kv)? {
            return Ok(());
        }
        let bytes = serde_json::to_vec(self).map_err(|e| JobError::Kv(KvError::Encode(e)))?;
        kv.set(&self.id, &bytes).await.map_err(JobError::Kv)?;
        Ok(())
    }

    /// Overwrites the existing KvCache entry; no-op if absent.
    pub async fn update(&self, kv: &dyn KvCache) -> Result<(), JobError> {
        if !kv.has(&self.id).await.map_err(JobError::Kv)? {
            return Ok(());
        }
        let bytes = serde_json::to_vec(self).map_err(|e| JobError::Kv(KvError::Encode(e)))?;
        kv.set(&self.id, &bytes).await.map_err(JobError::Kv)?;
        Ok(())
    }

    /// Sets `status = Waiting` and persists.
    pub async fn reset(&mut self, kv: &dyn KvCache) -> Result<(), JobError> {
        self.status = JobStatus::Waiting;
        self.touch();
        self.update(kv).await
    }

    /// Reads and decodes the KvCache entry under `id`.
    pub async fn load(kv: &dyn KvCache, id: &str) -> Result<Job, JobError> {
        let bytes = kv
            .get(id)
            .await
            .map_err(JobError::Kv)?
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| JobError::Decode(e.to_string()))
    }

    /// Cancels `token` (if a run is active), sets `status = Stopped`, persists.
    pub async fn stop(&mut self, kv: &dyn KvCache, token: &CancellationToken) -> Result<(), JobError> {
        token.cancel();
        self.status = JobStatus::Stopped;
        self.touch();
        self.update(kv).await
    }

    fn decode_video(&self) -> Result<Box<dyn ToVideo + Send>, JobError> {
        match self.kind {
            JobKind::Source => {
                let source: VideoSource = serde_json::from_slice(&self.payload)
                    .map_err(|e| JobError::Decode(e.to_string()))?;
                Ok(Box::new(source))
            }
            JobKind::Info => {
                let info: VideoInfo = serde_json::from_slice(&self.payload)
                    .map_err(|e| JobError::Decode(e.to_string()))?;
                Ok(Box::new(info))
            }
        }
    }

    /// Drives the Job through its full run pipeline: decode -> per-path
    /// (source upload, slice+upload, poster, thumb, catalog write) ->
    /// Finished. Any step error aborts with `status = Abnormal`.
    pub async fn run(
        &mut self,
        token: CancellationToken,
        kv: &dyn KvCache,
        storage: &Arc<dyn StorageNode>,
        transcoder: &Arc<dyn Transcoder>,
        catalog: &Arc<dyn Catalog>,
    ) -> Result<(), JobError> {
        self.status = JobStatus::Running;
        self.touch();
        self.update(kv).await?;

        let result = self.run_inner(&token, storage, transcoder, catalog).await;

        match &result {
            Ok(()) => {
                if token.is_cancelled() {
                    self.status = JobStatus::Stopped;
                } else {
                    self.status = JobStatus::Finished;
                }
            }
            Err(JobError::Cancelled) => {
                self.status = JobStatus::Stopped;
            }
            Err(e) => {
                self.status = JobStatus::Abnormal;
                self.error_reason = Some(e.to_string());
            }
        }
        self.touch();
        self.update(kv).await?;
        result
    }

    async fn run_inner(
        &mut self,
        token: &CancellationToken,
        storage: &Arc<dyn StorageNode>,
        transcoder: &Arc<dyn Transcoder>,
        catalog: &Arc<dyn Catalog>,
    ) -> Result<(), JobError> {
        let decoded = self.decode_video()?;

        if self.kind == JobKind::Info && self.video_paths.is_empty() {
            let video = decoded.to_video();
            let affected = catalog.insert_or_update(&video).await?;
            if affected == 0 {
                eprintln!("job {}: catalog write affected 0 rows", self.id);
            }
            return Ok(());
        }

        let total_episode = self.video_paths.len();
        for path in self.video_paths.iter().filter(|p| !p.is_empty()) {
            if token.is_cancelled() {
                return Err(JobError::Cancelled);
            }

            let mut video = decoded.to_video();
            video.episode = episode_index(path).to_string();
            video.total_episode = total_episode.to_string();

            if !self.skip.contains(&SkipStep::Source) {
                video.source_hash = storage
                    .add_file(Path::new(path))
                    .await
                    .map_err(|e| wrap(e, "add source"))?;
                let row = hash_row(
                    &video.business_key,
                    &video.episode,
                    &video.source_hash,
                    HashType::Video,
                    &video.sharpness,
                );
                if let Err(e) = catalog.insert_hash(&row).await {
                    eprintln!("job {}: hash row write failed: {e}", self.id);
                }
            }

            if !self.skip.contains(&SkipStep::Slice) {
                let fragment = slice(
                    token,
                    Path::new(path),
                    self.scale,
                    Path::new(&self.output),
                    self.crypto.as_ref(),
                    transcoder.as_ref(),
                )
                .await
                .map_err(|e| wrap(e, "run slice"))?;
                video.sharpness = fragment.sharpness.clone();
                video.m3u8_hash = storage
                    .add_dir(&fragment.out_dir)
                    .await
                    .map_err(|e| wrap(e, "add slice"))?;
                if self.clear_temp {
                    let _ = tokio::fs::remove_dir_all(&fragment.out_dir).await;
                }
                let mut row = hash_row(
                    &video.business_key,
                    &video.episode,
                    &video.m3u8_hash,
                    HashType::Slice,
                    &video.sharpness,
                );
                row.encrypt = self.crypto.is_some();
                row.m3u8 = fragment.out_dir.to_string_lossy().to_string();
                if let Err(e) = catalog.insert_hash(&row).await {
                    eprintln!("job {}: hash row write failed: {e}", self.id);
                }
            }

            if !self.skip.contains(&SkipStep::Poster) {
                if let Some(poster) = &self.poster_path {
                    video.poster_hash = storage
                        .add_file(Path::new(poster))
                        .await
                        .map_err(|e| wrap(e, "add poster"))?;
                    let row = hash_row(
                        &video.business_key,
                        &video.episode,
                        &video.poster_hash,
                        HashType::Poster,
                        &video.sharpness,
                    );
                    if let Err(e) = catalog.insert_hash(&row).await {
                        eprintln!("job {}: hash row write failed: {e}", self.id);
                    }
                }
            }

            if !self.skip.contains(&SkipStep::Thumb) {
                if let Some(thumb) = &self.thumb_path {
                    video.thumb_hash = storage
                        .add_file(Path::new(thumb))
                        .await
                        .map_err(|e| wrap(e, "add thumb"))?;
                    let row = hash_row(
                        &video.business_key,
                        &video.episode,
                        &video.thumb_hash,
                        HashType::Thumb,
                        &video.sharpness,
                    );
                    if let Err(e) = catalog.insert_hash(&row).await {
                        eprintln!("job {}: hash row write failed: {e}", self.id);
                    }
                }
            }

            let affected = catalog
                .insert_or_update(&video)
                .await
                .map_err(|e| wrap(e, "catalog write"))?;
            if affected == 0 {
                eprintln!("job {}: catalog write affected 0 rows for {}", self.id, path);
            }
        }

        Ok(())
    }
}

/// Constructs the secondary [`Hash`] row for one uploaded artifact, grounded
/// on the original's per-upload bookkeeping in `hash.go`.
pub fn hash_row(name: &str, episode: &str, hash: &str, hash_type: HashType, sharpness: &str) -> Hash {
    Hash {
        id: uuid::Uuid::new_v4().to_string(),
        checksum: String::new(),
        hash_type,
        episode: episode.to_string(),
        name: name.to_string(),
        hash: hash.to_string(),
        sharpness: sharpness.to_string(),
        caption: String::new(),
        encrypt: false,
        key: String::new(),
        m3u8: String::new(),
        segment_file: String::new(),
        resource: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::DummyNode;
    use crate::adapters::transcoder::{StreamFormat, Transcoder as TranscoderTrait};
    use crate::adapters::FsKvCache;
    use crate::error::{CatalogError, EncodeError, ProbeError};
    use crate::video::VideoSource;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::path::PathBuf;

    struct FakeTranscoder {
        height: u32,
    }

    #[async_trait]
    impl TranscoderTrait for FakeTranscoder {
        async fn probe(&self, _path: &Path) -> Result<StreamFormat, ProbeError> {
            Ok(StreamFormat {
                has_video: true,
                has_audio: true,
                resolution_height: self.height,
            })
        }

        async fn transcode_to_hls(
            &self,
            _token: &CancellationToken,
            _input: &Path,
            _scale: Scale,
            output: &Path,
            _crypto: Option<&HlsCrypto>,
        ) -> Result<PathBuf, EncodeError> {
            tokio::fs::create_dir_all(output).await?;
            Ok(output.to_path_buf())
        }
    }

    struct FakeCatalog {
        inserts: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn insert_or_update(&self, _video: &Video) -> Result<u64, CatalogError> {
            self.inserts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(1)
        }
        async fn insert_hash(&self, _hash: &Hash) -> Result<u64, CatalogError> {
            self.inserts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(1)
        }
        async fn is_exist(&self, _business_key: &str) -> Result<bool, CatalogError> {
            Ok(false)
        }
        async fn sync(&self) -> Result<(), CatalogError> {
            Ok(())
        }
    }

    fn source_payload(bangumi: &str) -> Vec<u8> {
        let source = VideoSource {
            bangumi: bangumi.to_string(),
            ..Default::default()
        };
        serde_json::to_vec(&source).unwrap()
    }

    #[tokio::test]
    async fn empty_video_paths_finishes_without_abnormal() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FsKvCache::new(dir.path());
        let storage: Arc<dyn StorageNode> = Arc::new(DummyNode);
        let transcoder: Arc<dyn Transcoder> = Arc::new(FakeTranscoder { height: 720 });
        let catalog: Arc<dyn Catalog> = Arc::new(FakeCatalog {
            inserts: Default::default(),
        });

        let mut job = Job::new("ABC-001", JobKind::Source, source_payload("abc-001"));
        job.store(&kv).await.unwrap();
        let token = CancellationToken::new();
        job.run(token, &kv, &storage, &transcoder, &catalog)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn source_job_with_path_finishes_and_writes_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FsKvCache::new(dir.path());
        let storage: Arc<dyn StorageNode> = Arc::new(DummyNode);
        let transcoder: Arc<dyn Transcoder> = Arc::new(FakeTranscoder { height: 720 });
        let catalog_impl = Arc::new(FakeCatalog {
            inserts: Default::default(),
        });
        let catalog: Arc<dyn Catalog> = catalog_impl.clone();

        let mut job = Job::new("ABC-002", JobKind::Source, source_payload("abc-002"));
        job.video_paths = vec!["/v/abc-002.mp4".to_string()];
        job.output = dir.path().join("out").to_string_lossy().to_string();
        job.store(&kv).await.unwrap();

        let token = CancellationToken::new();
        job.run(token, &kv, &storage, &transcoder, &catalog)
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(
            catalog_impl.inserts.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn info_job_with_empty_paths_performs_one_catalog_write() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FsKvCache::new(dir.path());
        let storage: Arc<dyn StorageNode> = Arc::new(DummyNode);
        let transcoder: Arc<dyn Transcoder> = Arc::new(FakeTranscoder { height: 720 });
        let catalog_impl = Arc::new(FakeCatalog {
            inserts: Default::default(),
        });
        let catalog: Arc<dyn Catalog> = catalog_impl.clone();

        let info = VideoInfo {
            id: "abc-003".to_string(),
            ..Default::default()
        };
        let payload = serde_json::to_vec(&info).unwrap();
        let mut job = Job::new("abc-003", JobKind::Info, payload);
        job.store(&kv).await.unwrap();

        let token = CancellationToken::new();
        job.run(token, &kv, &storage, &transcoder, &catalog)
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(
            catalog_impl.inserts.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn job_json_round_trips() {
        let job = Job::new("ABC-004", JobKind::Source, source_payload("abc-004"));
        let bytes = serde_json::to_vec(&job).unwrap();
        let decoded: Job = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.id, job.id);
        assert_eq!(decoded.kind, job.kind);
        assert_eq!(decoded.status, job.status);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]
        #[test]
        fn prop_job_json_round_trips(
            id in "[A-Za-z0-9_-]{1,12}",
            is_info in proptest::bool::ANY,
            scale_idx in 0u8..3,
            video_paths in proptest::collection::vec("[a-z0-9@.-]{0,12}", 0..4),
            clear_temp in proptest::bool::ANY,
        ) {
            let kind = if is_info { JobKind::Info } else { JobKind::Source };
            let scale = match scale_idx {
                0 => Scale::P480,
                1 => Scale::P720,
                _ => Scale::P1080,
            };
            let mut job = Job::new(id.clone(), kind, source_payload(&id));
            job.scale = scale;
            job.video_paths = video_paths;
            job.clear_temp = clear_temp;

            let bytes = serde_json::to_vec(&job).unwrap();
            let decoded: Job = serde_json::from_slice(&bytes).unwrap();

            prop_assert_eq!(decoded.id, job.id);
            prop_assert_eq!(decoded.kind, job.kind);
            prop_assert_eq!(decoded.status, job.status);
            prop_assert_eq!(decoded.scale, job.scale);
            prop_assert_eq!(decoded.video_paths, job.video_paths);
            prop_assert_eq!(decoded.clear_temp, job.clear_temp);
            prop_assert_eq!(decoded.payload, job.payload);
        }
    }

    #[tokio::test]
    async fn store_is_noop_if_entry_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FsKvCache::new(dir.path());
        let mut job = Job::new("ABC-005", JobKind::Source, source_payload("abc-005"));
        job.store(&kv).await.unwrap();
        job.status = JobStatus::Running;
        job.store(&kv).await.unwrap();

        let reloaded = Job::load(&kv, "ABC-005").await.unwrap();
        assert_eq!(reloaded.status, JobStatus::Waiting);
    }

    #[tokio::test]
    async fn update_is_noop_if_entry_absent() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FsKvCache::new(dir.path());
        let job = Job::new("ABC-006", JobKind::Source, source_payload("abc-006"));
        job.update(&kv).await.unwrap();
        assert!(!kv.has("ABC-006").await.unwrap());
    }

    #[tokio::test]
    async fn decode_error_marks_job_abnormal() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FsKvCache::new(dir.path());
        let storage: Arc<dyn StorageNode> = Arc::new(DummyNode);
        let transcoder: Arc<dyn Transcoder> = Arc::new(FakeTranscoder { height: 720 });
        let catalog: Arc<dyn Catalog> = Arc::new(FakeCatalog {
            inserts: Default::default(),
        });

        let mut job = Job::new("ABC-007", JobKind::Source, b"not json".to_vec());
        job.store(&kv).await.unwrap();
        let token = CancellationToken::new();
        let result = job.run(token, &kv, &storage, &transcoder, &catalog).await;
        assert!(result.is_err());
        assert_eq!(job.status, JobStatus::Abnormal);
    }
}
