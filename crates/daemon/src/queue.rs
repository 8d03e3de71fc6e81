//! The concurrency substrate: the *queuing* set (admitted work), the
//! *tasking* dispenser (yields ids to workers), and the *running* map
//! (in-flight jobs, used for cancellation and admission dedup). Persists
//! the queuing set to KvCache on every mutation.
//!
//! Replaces the original's `sync.Pool`-as-FIFO misuse (Pool has no ordering
//! guarantee and may drop items) with an `mpsc::unbounded_channel`
//! dispenser plus a membership re-check against `queuing`.

use crate::adapters::KvCache;
use crate::error::JobError;
use crate::job::{Job, JobStatus};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const QUEUE_SNAPSHOT_KEY: &str = "running";

/// The Queue's cancellation capability for an in-flight Job. One-way
/// ownership: the Queue holds this handle, never the Job itself.
pub struct RunningHandle {
    pub token: CancellationToken,
}

struct Inner {
    queuing: HashSet<String>,
    running: HashMap<String, RunningHandle>,
}

/// Bounded, durable, deduplicated work admission.
pub struct Queue {
    inner: Mutex<Inner>,
    tasking_tx: mpsc::UnboundedSender<String>,
    tasking_rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl Queue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Mutex::new(Inner {
                queuing: HashSet::new(),
                running: HashMap::new(),
            }),
            tasking_tx: tx,
            tasking_rx: Mutex::new(rx),
        }
    }

    fn snapshot_locked(inner: &Inner) -> Vec<String> {
        let mut ids: Vec<String> = inner.queuing.iter().cloned().collect();
        ids.sort();
        ids
    }

    async fn persist_snapshot(&self, kv: &dyn KvCache) -> Result<(), JobError> {
        let ids = {
            let inner = self.inner.lock().expect("queue lock poisoned");
            Self::snapshot_locked(&inner)
        };
        let bytes = serde_json::to_vec(&ids).map_err(|e| JobError::Kv(crate::error::KvError::Encode(e)))?;
        kv.set(QUEUE_SNAPSHOT_KEY, &bytes)
            .await
            .map_err(JobError::Kv)?;
        Ok(())
    }

    /// Inserts `id`, persists the snapshot, then offers `id` to the tasking
    /// dispenser. Idempotent on `id`.
    pub async fn add(&self, id: &str, kv: &dyn KvCache) -> Result<(), JobError> {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            inner.queuing.insert(id.to_string());
        }
        self.persist_snapshot(kv).await?;
        let _ = self.tasking_tx.send(id.to_string());
        Ok(())
    }

    /// Removes `id` from `queuing` and rewrites the snapshot. Does not
    /// touch `running`.
    pub async fn delete(&self, id: &str, kv: &dyn KvCache) -> Result<(), JobError> {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            inner.queuing.remove(id);
        }
        self.persist_snapshot(kv).await
    }

    /// Pops one id from the tasking dispenser (non-blocking). Returns
    /// `None` if the dispenser is empty OR the popped id is no longer in
    /// `queuing`.
    pub fn get(&self) -> Option<String> {
        let mut rx = self.tasking_rx.lock().expect("queue lock poisoned");
        loop {
            let id = match rx.try_recv() {
                Ok(id) => id,
                Err(_) => return None,
            };
            let still_queued = {
                let inner = self.inner.lock().expect("queue lock poisoned");
                inner.queuing.contains(&id)
            };
            if still_queued {
                return Some(id);
            }
            // stale id, re-check membership and keep draining
        }
    }

    /// Membership in `queuing`.
    pub fn has(&self, id: &str) -> bool {
        self.inner.lock().expect("queue lock poisoned").queuing.contains(id)
    }

    /// CAS insertion of a `RunningHandle` for `job.id`. Returns `true` if an
    /// entry already existed (caller must not start a second execution).
    pub fn start_run(&self, job_id: &str) -> (bool, CancellationToken) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if let Some(existing) = inner.running.get(job_id) {
            return (true, existing.token.clone());
        }
        let token = CancellationToken::new();
        inner.running.insert(
            job_id.to_string(),
            RunningHandle {
                token: token.clone(),
            },
        );
        (false, token)
    }

    /// Returns the running handle's token if `id` is currently in
    /// `running`, without inserting a new entry. For ids not running, a
    /// fresh standalone token is returned (cancelling it has no effect on
    /// the Queue's own bookkeeping).
    pub fn token_for(&self, id: &str) -> CancellationToken {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner
            .running
            .get(id)
            .map(|handle| handle.token.clone())
            .unwrap_or_default()
    }

    /// Cancels the running handle's token (if present); always removes
    /// from `queuing`.
    pub async fn stop(&self, id: &str, kv: &dyn KvCache) -> Result<(), JobError> {
        {
            let inner = self.inner.lock().expect("queue lock poisoned");
            if let Some(handle) = inner.running.get(id) {
                handle.token.cancel();
            }
        }
        self.delete(id, kv).await
    }

    /// Removes `id` from both `running` and `queuing`.
    pub async fn finish(&self, id: &str, kv: &dyn KvCache) -> Result<(), JobError> {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            inner.running.remove(id);
        }
        self.delete(id, kv).await
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.inner.lock().expect("queue lock poisoned").running.contains_key(id)
    }

    /// Ordered snapshot of `queuing`.
    pub fn list(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        Self::snapshot_locked(&inner)
    }

    pub fn all_running(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.running.keys().cloned().collect()
    }

    /// Reads the snapshot from KvCache, for each id loads the Job, resets
    /// status to `Waiting`, re-adds to the Queue. A missing snapshot is a
    /// cold start: returns an empty vec, not an error.
    pub async fn restore(&self, kv: &dyn KvCache) -> Result<Vec<String>, JobError> {
        let bytes = match kv.get(QUEUE_SNAPSHOT_KEY).await.map_err(JobError::Kv)? {
            Some(bytes) => bytes,
            None => return Ok(Vec::new()),
        };
        let ids: Vec<String> =
            serde_json::from_slice(&bytes).map_err(|e| JobError::Decode(e.to_string()))?;

        let mut restored = Vec::with_capacity(ids.len());
        for id in ids {
            match Job::load(kv, &id).await {
                Ok(mut job) => {
                    if job.status == JobStatus::Running {
                        job.reset(kv).await?;
                    }
                    self.add(&id, kv).await?;
                    restored.push(id);
                }
                Err(_) => {
                    // Job id was in the snapshot but its record is gone; drop it.
                    self.delete(&id, kv).await?;
                }
            }
        }
        Ok(restored)
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::FsKvCache;
    use crate::job::JobKind;

    #[tokio::test]
    async fn add_then_has_and_kv_contains_entry() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FsKvCache::new(dir.path());
        let queue = Queue::new();
        queue.add("job-1", &kv).await.unwrap();
        assert!(queue.has("job-1"));
        assert!(kv.has("running").await.unwrap());
    }

    #[tokio::test]
    async fn get_skips_ids_removed_before_pop() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FsKvCache::new(dir.path());
        let queue = Queue::new();
        queue.add("job-1", &kv).await.unwrap();
        queue.delete("job-1", &kv).await.unwrap();
        assert_eq!(queue.get(), None);
    }

    #[tokio::test]
    async fn get_returns_queued_id() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FsKvCache::new(dir.path());
        let queue = Queue::new();
        queue.add("job-1", &kv).await.unwrap();
        assert_eq!(queue.get(), Some("job-1".to_string()));
    }

    #[tokio::test]
    async fn start_run_returns_already_running_on_second_call() {
        let queue = Queue::new();
        let (first, _token) = queue.start_run("job-1");
        assert!(!first);
        let (second, _token2) = queue.start_run("job-1");
        assert!(second);
    }

    #[tokio::test]
    async fn stop_cancels_token_and_removes_from_queuing() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FsKvCache::new(dir.path());
        let queue = Queue::new();
        queue.add("job-1", &kv).await.unwrap();
        let (_, token) = queue.start_run("job-1");
        queue.stop("job-1", &kv).await.unwrap();
        assert!(token.is_cancelled());
        assert!(!queue.has("job-1"));
    }

    #[tokio::test]
    async fn finish_removes_from_running_and_queuing() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FsKvCache::new(dir.path());
        let queue = Queue::new();
        queue.add("job-1", &kv).await.unwrap();
        queue.start_run("job-1");
        queue.finish("job-1", &kv).await.unwrap();
        assert!(!queue.is_running("job-1"));
        assert!(!queue.has("job-1"));
    }

    #[tokio::test]
    async fn restore_is_empty_on_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FsKvCache::new(dir.path());
        let queue = Queue::new();
        let restored = queue.restore(&kv).await.unwrap();
        assert!(restored.is_empty());
    }

    #[tokio::test]
    async fn restore_resets_running_jobs_to_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FsKvCache::new(dir.path());

        let mut job = Job::new("job-1", JobKind::Source, vec![]);
        job.store(&kv).await.unwrap();
        job.status = JobStatus::Running;
        job.update(&kv).await.unwrap();
        kv.set("running", br#"["job-1"]"#).await.unwrap();

        let queue = Queue::new();
        let restored = queue.restore(&kv).await.unwrap();
        assert_eq!(restored, vec!["job-1".to_string()]);

        let reloaded = Job::load(&kv, "job-1").await.unwrap();
        assert_eq!(reloaded.status, JobStatus::Waiting);
        assert!(queue.has("job-1"));
    }

    #[tokio::test]
    async fn restore_then_list_equals_persisted_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FsKvCache::new(dir.path());

        for id in ["job-1", "job-2"] {
            let job = Job::new(id, JobKind::Source, vec![]);
            job.store(&kv).await.unwrap();
        }
        kv.set("running", br#"["job-1","job-2"]"#).await.unwrap();

        let queue = Queue::new();
        queue.restore(&kv).await.unwrap();
        assert_eq!(queue.list(), vec!["job-1".to_string(), "job-2".to_string()]);
    }
}
