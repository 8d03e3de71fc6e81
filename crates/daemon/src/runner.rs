//! Lifecycle, worker pool, and admission for the durable job runner.

use crate::adapters::{default_node, Catalog, KvCache, StorageNode, Transcoder};
use crate::error::{JobError, RunnerError};
use crate::job::{Job, JobStatus};
use crate::queue::Queue;
use reeltide_config::RunnerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Injected dependency bundle, replacing the original's global singletons
/// (storage node, catalog handle, KvCache client, ffprobe wrapper).
#[derive(Clone)]
pub struct Collaborators {
    pub kv: Arc<dyn KvCache>,
    pub storage: Arc<dyn StorageNode>,
    pub transcoder: Arc<dyn Transcoder>,
    pub catalog: Arc<dyn Catalog>,
}

impl Collaborators {
    /// Convenience constructor using the process-wide default StorageNode.
    pub fn with_default_storage(
        kv: Arc<dyn KvCache>,
        transcoder: Arc<dyn Transcoder>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            kv,
            storage: default_node(),
            transcoder,
            catalog,
        }
    }
}

/// Owns a root cancellation token, a fixed number of worker tasks, and the
/// Queue. Restores in-flight work on start, dispatches jobs, enforces
/// state-machine transitions, and shuts down on cancellation or drain.
pub struct Runner {
    config: RunnerConfig,
    collaborators: Collaborators,
    queue: Arc<Queue>,
    root_token: CancellationToken,
}

fn derive_limit(configured: u32) -> u32 {
    if configured > 0 {
        configured
    } else {
        num_cpus::get().clamp(1, 8) as u32
    }
}

impl Runner {
    pub fn new(config: RunnerConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            queue: Arc::new(Queue::new()),
            root_token: CancellationToken::new(),
        }
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Refuses (no-op success, duplicate admission is idempotent) if
    /// already running. Otherwise stores (or resets, if `force`) the Job
    /// and adds it to the Queue.
    pub async fn admit(&self, mut job: Job, force: bool) -> Result<(), JobError> {
        let kv = self.collaborators.kv.as_ref();
        if self.queue.is_running(&job.id) {
            return Ok(());
        }

        if kv.has(&job.id).await.map_err(JobError::Kv)? {
            if force {
                let mut existing = Job::load(kv, &job.id).await?;
                existing.reset(kv).await?;
            }
            // leave the existing persisted job alone otherwise
        } else {
            job.status = JobStatus::Waiting;
            job.store(kv).await?;
        }

        let mut persisted = Job::load(kv, &job.id).await?;
        if persisted.status == JobStatus::Stopped {
            persisted.reset(kv).await?;
        }

        self.queue.add(&job.id, kv).await
    }

    /// Preconditions: storage and catalog report ready. Restores in-flight
    /// work, spawns `limit` workers, returns once all have exited.
    pub async fn start(&self) -> Result<(), RunnerError> {
        let kv = self.collaborators.kv.as_ref();

        if self.collaborators.storage.id().await.is_err()
            && self.collaborators.storage.node_type() != crate::adapters::NodeType::Dummy
        {
            return Err(RunnerError::StorageNotReady);
        }
        self.collaborators
            .catalog
            .sync()
            .await
            .map_err(RunnerError::Catalog)?;

        let _ = self.queue.restore(kv).await?;

        let limit = derive_limit(self.config.limit);
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(limit as usize);

        for _ in 0..limit {
            let queue = self.queue.clone();
            let collaborators = self.collaborators.clone();
            let root_token = self.root_token.clone();
            let auto_stop = self.config.auto_stop;
            handles.push(tokio::spawn(async move {
                worker_loop(queue, collaborators, root_token, auto_stop, poll_interval).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Cancels the root token; all workers observe cancellation between
    /// iterations and exit.
    pub fn stop(&self) {
        self.root_token.cancel();
    }

    /// Cancels only the child token of `id` (if running) and sets its
    /// persisted status to `Stopped`, even if it was only waiting.
    pub async fn stop_work(&self, id: &str) -> Result<(), JobError> {
        let kv = self.collaborators.kv.as_ref();
        let token = self.queue.token_for(id);
        self.queue.stop(id, kv).await?;
        let mut job = Job::load(kv, id).await?;
        job.stop(kv, &token).await
    }

    pub async fn start_work(&self, id: &str) -> Result<(), JobError> {
        let kv = self.collaborators.kv.as_ref();
        let mut job = Job::load(kv, id).await?;
        job.reset(kv).await?;
        self.queue.add(id, kv).await
    }

    pub async fn get_work(&self, id: &str) -> Result<Job, JobError> {
        Job::load(self.collaborators.kv.as_ref(), id).await
    }

    /// Reflects persisted status, except a Job whose persisted status is
    /// `Running` but whose id is not in the `running` map self-heals and
    /// reports `Waiting` (recovered after a crash).
    pub async fn get_work_status(&self, id: &str) -> Result<JobStatus, JobError> {
        let job = self.get_work(id).await?;
        if job.status == JobStatus::Running && !self.queue.is_running(id) {
            return Ok(JobStatus::Waiting);
        }
        Ok(job.status)
    }

    pub fn all_running(&self) -> Vec<String> {
        self.queue.all_running()
    }
}

async fn worker_loop(
    queue: Arc<Queue>,
    collaborators: Collaborators,
    root_token: CancellationToken,
    auto_stop: bool,
    poll_interval: Duration,
) {
    loop {
        if root_token.is_cancelled() {
            return;
        }

        let id = match queue.get() {
            Some(id) => id,
            None => {
                if auto_stop {
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => continue,
                    _ = root_token.cancelled() => return,
                }
            }
        };

        let mut job = match Job::load(collaborators.kv.as_ref(), &id).await {
            Ok(job) => job,
            Err(e) => {
                eprintln!("worker: failed to load job {id}: {e}");
                continue;
            }
        };

        let (already_running, child_token) = queue.start_run(&id);
        if already_running {
            eprintln!("worker: job {id} already running");
            continue;
        }

        match job.status {
            JobStatus::Waiting => {
                let child = child_token.clone();
                tokio::select! {
                    result = job.run(
                        child,
                        collaborators.kv.as_ref(),
                        &collaborators.storage,
                        &collaborators.transcoder,
                        &collaborators.catalog,
                    ) => {
                        if let Err(e) = result {
                            eprintln!("worker: job {id} finished with error: {e}");
                        }
                    }
                    _ = root_token.cancelled() => {
                        child_token.cancel();
                    }
                }
            }
            JobStatus::Stopped | JobStatus::Running | JobStatus::Finished | JobStatus::Abnormal => {
                // Stopped: leave alone. Running: restored without reset,
                // next cycle will fix. Finished/Abnormal: nothing to do.
            }
        }

        if let Err(e) = queue.finish(&id, collaborators.kv.as_ref()).await {
            eprintln!("worker: failed to finish job {id}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::DummyNode;
    use crate::adapters::transcoder::StreamFormat;
    use crate::adapters::{Catalog as CatalogTrait, FsKvCache, KvCache as KvCacheTrait};
    use crate::error::{CatalogError, EncodeError, ProbeError};
    use crate::job::{HlsCrypto, JobKind, Scale};
    use crate::video::{Hash, Video, VideoSource};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};

    struct FakeTranscoder;

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn probe(&self, _path: &Path) -> Result<StreamFormat, ProbeError> {
            Ok(StreamFormat {
                has_video: true,
                has_audio: true,
                resolution_height: 720,
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
        inserts: std::sync::Mutex<Vec<Video>>,
    }

    #[async_trait]
    impl CatalogTrait for FakeCatalog {
        async fn insert_or_update(&self, video: &Video) -> Result<u64, CatalogError> {
            self.inserts.lock().unwrap().push(video.clone());
            Ok(1)
        }
        async fn insert_hash(&self, _hash: &Hash) -> Result<u64, CatalogError> {
            Ok(1)
        }
        async fn is_exist(&self, _business_key: &str) -> Result<bool, CatalogError> {
            Ok(false)
        }
        async fn sync(&self) -> Result<(), CatalogError> {
            Ok(())
        }
    }

    fn make_collaborators(dir: &std::path::Path) -> (Collaborators, Arc<FakeCatalog>) {
        let kv: Arc<dyn KvCache> = Arc::new(FsKvCache::new(dir));
        let catalog_impl = Arc::new(FakeCatalog {
            inserts: std::sync::Mutex::new(vec![]),
        });
        let catalog: Arc<dyn Catalog> = catalog_impl.clone();
        (
            Collaborators {
                kv,
                storage: Arc::new(DummyNode),
                transcoder: Arc::new(FakeTranscoder),
                catalog,
            },
            catalog_impl,
        )
    }

    fn source_job(id: &str, bangumi: &str) -> Job {
        let payload = serde_json::to_vec(&VideoSource {
            bangumi: bangumi.to_string(),
            ..Default::default()
        })
        .unwrap();
        Job::new(id, JobKind::Source, payload)
    }

    #[tokio::test]
    async fn admit_then_has_and_kv_entry_exists() {
        let dir = tempfile::tempdir().unwrap();
        let (collaborators, _catalog) = make_collaborators(dir.path());
        let config = RunnerConfig {
            auto_stop: true,
            ..Default::default()
        };
        let runner = Runner::new(config, collaborators);

        let job = source_job("ABC-001", "abc-001");
        runner.admit(job, false).await.unwrap();

        assert!(runner.queue().has("ABC-001"));
        assert!(runner
            .get_work("ABC-001")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn double_admit_without_force_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (collaborators, _catalog) = make_collaborators(dir.path());
        let config = RunnerConfig {
            auto_stop: true,
            ..Default::default()
        };
        let runner = Runner::new(config, collaborators);

        runner.admit(source_job("ABC-002", "abc-002"), false).await.unwrap();
        runner.admit(source_job("ABC-002", "abc-002"), false).await.unwrap();

        assert_eq!(runner.queue().list(), vec!["ABC-002".to_string()]);
    }

    #[tokio::test]
    async fn cold_start_happy_path_finishes_job() {
        let dir = tempfile::tempdir().unwrap();
        let (collaborators, catalog) = make_collaborators(dir.path());
        let config = RunnerConfig {
            auto_stop: true,
            limit: 1,
            ..Default::default()
        };
        let runner = Runner::new(config, collaborators);

        let mut job = source_job("ABC-003", "abc-003");
        job.video_paths = vec!["/v/abc-003.mp4".to_string()];
        job.output = dir.path().join("out").to_string_lossy().to_string();
        runner.admit(job, false).await.unwrap();

        runner.start().await.unwrap();

        let persisted = runner.get_work("ABC-003").await.unwrap();
        assert_eq!(persisted.status, JobStatus::Finished);
        assert_eq!(catalog.inserts.lock().unwrap().len(), 1);
        let video = &catalog.inserts.lock().unwrap()[0];
        assert_eq!(video.business_key, "ABC-003");
        assert_eq!(video.sharpness, "720P");
        assert_eq!(video.total_episode, "1");
    }

    #[tokio::test]
    async fn force_readmit_resets_finished_job_to_waiting_then_reruns() {
        let dir = tempfile::tempdir().unwrap();
        let (collaborators, _catalog) = make_collaborators(dir.path());
        let config = RunnerConfig {
            auto_stop: true,
            ..Default::default()
        };
        let runner = Runner::new(config, collaborators);

        runner.admit(source_job("ABC-004", "abc-004"), false).await.unwrap();
        runner.start().await.unwrap();
        assert_eq!(
            runner.get_work_status("ABC-004").await.unwrap(),
            JobStatus::Finished
        );

        runner.admit(source_job("ABC-004", "abc-004"), true).await.unwrap();
        assert_eq!(
            runner.get_work_status("ABC-004").await.unwrap(),
            JobStatus::Waiting
        );
    }

    #[tokio::test]
    async fn restart_recovery_resets_running_jobs_and_completes_them() {
        let dir = tempfile::tempdir().unwrap();
        let (collaborators, _catalog) = make_collaborators(dir.path());
        let kv = collaborators.kv.clone();

        for id in ["ABC-005", "ABC-006"] {
            let mut job = source_job(id, id);
            job.status = JobStatus::Waiting;
            job.store(kv.as_ref()).await.unwrap();
            job.status = JobStatus::Running;
            job.update(kv.as_ref()).await.unwrap();
        }
        kv.set("running", br#"["ABC-005","ABC-006"]"#)
            .await
            .unwrap();

        let config = RunnerConfig {
            auto_stop: true,
            ..Default::default()
        };
        let runner = Runner::new(config, collaborators);
        runner.start().await.unwrap();

        for id in ["ABC-005", "ABC-006"] {
            assert_eq!(runner.get_work_status(id).await.unwrap(), JobStatus::Finished);
        }
    }

    #[tokio::test]
    async fn stop_work_while_waiting_marks_stopped_and_dequeues() {
        let dir = tempfile::tempdir().unwrap();
        let (collaborators, _catalog) = make_collaborators(dir.path());
        let config = RunnerConfig {
            auto_stop: true,
            ..Default::default()
        };
        let runner = Runner::new(config, collaborators);

        runner.admit(source_job("ABC-007", "abc-007"), false).await.unwrap();
        runner.stop_work("ABC-007").await.unwrap();

        assert!(!runner.queue().has("ABC-007"));
        assert_eq!(
            runner.get_work_status("ABC-007").await.unwrap(),
            JobStatus::Stopped
        );
    }

    #[tokio::test]
    async fn get_work_status_self_heals_stale_running() {
        let dir = tempfile::tempdir().unwrap();
        let (collaborators, _catalog) = make_collaborators(dir.path());
        let kv = collaborators.kv.clone();

        let mut job = source_job("ABC-008", "abc-008");
        job.store(kv.as_ref()).await.unwrap();
        job.status = JobStatus::Running;
        job.update(kv.as_ref()).await.unwrap();

        let config = RunnerConfig::default();
        let runner = Runner::new(config, collaborators);
        assert_eq!(
            runner.get_work_status("ABC-008").await.unwrap(),
            JobStatus::Waiting
        );
    }
}
