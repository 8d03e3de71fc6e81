//! Metrics module for the ingestion runner.
//!
//! Generalizes the teacher's per-frame `JobMetrics`/`MetricsSnapshot` (which
//! tracked encode progress, fps, VMAF/PSNR/SSIM) into per-job status and
//! queue depth, since the run pipeline here has no encode-progress signal to
//! sample mid-flight. System-level resource visibility is carried unchanged.

use crate::runner::Runner;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One admitted job's state as exposed on the metrics surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSnapshot {
    pub id: String,
    pub kind: String,
    pub status: String,
}

/// System-level metrics for resource monitoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self {
            cpu_usage_percent: 0.0,
            mem_usage_percent: 0.0,
            load_avg_1: 0.0,
            load_avg_5: 0.0,
            load_avg_15: 0.0,
        }
    }
}

/// Complete metrics snapshot: queue depth, per-job status, and host metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerSnapshot {
    pub timestamp_unix_ms: i64,
    pub queue_len: usize,
    pub running_jobs: usize,
    pub jobs: Vec<JobSnapshot>,
    pub system: SystemMetrics,
}

impl Default for RunnerSnapshot {
    fn default() -> Self {
        Self {
            timestamp_unix_ms: 0,
            queue_len: 0,
            running_jobs: 0,
            jobs: Vec::new(),
            system: SystemMetrics::default(),
        }
    }
}

/// Shared metrics state for concurrent access across daemon components.
pub type SharedMetrics = Arc<RwLock<RunnerSnapshot>>;

/// Creates a new SharedMetrics instance with default values.
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(RunnerSnapshot::default()))
}

/// Collects current system metrics using sysinfo.
pub fn collect_system_metrics() -> SystemMetrics {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_usage = sys.global_cpu_usage();
    let total_memory = sys.total_memory();
    let used_memory = sys.used_memory();
    let mem_usage = if total_memory > 0 {
        (used_memory as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    let load_avg = System::load_average();

    SystemMetrics {
        cpu_usage_percent: cpu_usage,
        mem_usage_percent: mem_usage,
        load_avg_1: load_avg.one as f32,
        load_avg_5: load_avg.five as f32,
        load_avg_15: load_avg.fifteen as f32,
    }
}

fn status_label(status: crate::job::JobStatus) -> &'static str {
    use crate::job::JobStatus;
    match status {
        JobStatus::Waiting => "waiting",
        JobStatus::Running => "running",
        JobStatus::Stopped => "stopped",
        JobStatus::Finished => "finished",
        JobStatus::Abnormal => "abnormal",
    }
}

fn kind_label(kind: crate::job::JobKind) -> &'static str {
    use crate::job::JobKind;
    match kind {
        JobKind::Source => "source",
        JobKind::Info => "info",
    }
}

/// Walks the Runner's queued and running ids and builds a fresh snapshot.
/// `timestamp_unix_ms` is supplied by the caller since wall-clock reads are
/// not available inside this module's tests.
pub async fn snapshot(runner: &Runner, timestamp_unix_ms: i64) -> RunnerSnapshot {
    let running_ids = runner.all_running();
    let mut ids = runner.queue().list();
    for id in &running_ids {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }

    let mut jobs = Vec::with_capacity(ids.len());
    for id in &ids {
        match runner.get_work(id).await {
            Ok(job) => jobs.push(JobSnapshot {
                id: id.clone(),
                kind: kind_label(job.kind).to_string(),
                status: status_label(job.status).to_string(),
            }),
            Err(_) => continue,
        }
    }

    RunnerSnapshot {
        timestamp_unix_ms,
        queue_len: ids.len(),
        running_jobs: running_ids.len(),
        jobs,
        system: collect_system_metrics(),
    }
}
