//! CLI entry point for the reeltide ingestion runner.
//!
//! Parses command line arguments, wires up collaborator adapters from
//! config, and starts the runner alongside its metrics HTTP server.

use clap::{Parser, Subcommand};
use reeltide::{
    default_node, new_shared_metrics, register_node, run_metrics_server, Collaborators, Config,
    FfmpegTranscoder, FsKvCache, HttpNode, Job, JobKind, KvCache, Runner, SqliteCatalog,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[command(name = "reeltide")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the worker pool and metrics server; runs until signalled.
    Run,
    /// Admit a single job from a JSON payload file and exit once queued.
    Admit {
        /// Job id (business key for `source`, verbatim id for `info`)
        id: String,
        /// "source" or "info"
        #[arg(value_enum)]
        kind: CliJobKind,
        /// Path to the JSON-encoded payload
        payload: PathBuf,
        /// Re-admit even if a terminal record already exists
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum CliJobKind {
    Source,
    Info,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config {}: {e}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    match args.command {
        Command::Run => run(config).await,
        Command::Admit {
            id,
            kind,
            payload,
            force,
        } => admit(config, id, kind, payload, force).await,
    }
}

async fn run(config: Config) -> ExitCode {
    let kv: Arc<dyn KvCache> = Arc::new(FsKvCache::new(config.kvcache.dir.clone()));

    match config.storage.kind.as_str() {
        "single" => {
            let Some(addr) = config.storage.address.clone() else {
                eprintln!("storage.address is required for kind = \"single\"");
                return ExitCode::FAILURE;
            };
            if let Err(e) = register_node(Arc::new(HttpNode::single(addr))) {
                eprintln!("failed to register storage node: {e}");
                return ExitCode::FAILURE;
            }
        }
        "cluster" => {
            let Some(addr) = config.storage.address.clone() else {
                eprintln!("storage.address is required for kind = \"cluster\"");
                return ExitCode::FAILURE;
            };
            if let Err(e) = register_node(Arc::new(HttpNode::cluster(addr))) {
                eprintln!("failed to register storage node: {e}");
                return ExitCode::FAILURE;
            }
        }
        _ => {}
    }

    let transcoder = Arc::new(FfmpegTranscoder::new(
        config.transcoder.ffmpeg_path.clone(),
        config.transcoder.ffprobe_path.clone(),
    ));
    let catalog = match SqliteCatalog::connect(&config.catalog.dsn).await {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            eprintln!("failed to connect catalog: {e}");
            return ExitCode::FAILURE;
        }
    };

    let collaborators = Collaborators {
        kv,
        storage: default_node(),
        transcoder,
        catalog,
    };

    let runner = Arc::new(Runner::new(config.runner.clone(), collaborators));
    let shared_metrics = new_shared_metrics();

    let metrics_runner = runner.clone();
    let metrics_handle = shared_metrics.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(2));
        loop {
            ticker.tick().await;
            let snapshot = reeltide::metrics::snapshot(&metrics_runner, now_millis()).await;
            *metrics_handle.write().await = snapshot;
        }
    });

    println!("reeltide runner starting");
    println!("metrics server: http://{}/metrics", config.metrics.bind_addr);
    let bind_addr = config.metrics.bind_addr.clone();
    let server_metrics = shared_metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(server_metrics, &bind_addr).await {
            eprintln!("metrics server error: {e}");
        }
    });

    if let Err(e) = runner.start().await {
        eprintln!("runner error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn admit(
    config: Config,
    id: String,
    kind: CliJobKind,
    payload_path: PathBuf,
    force: bool,
) -> ExitCode {
    let kv: Arc<dyn KvCache> = Arc::new(FsKvCache::new(config.kvcache.dir.clone()));
    let transcoder = Arc::new(FfmpegTranscoder::new(
        config.transcoder.ffmpeg_path.clone(),
        config.transcoder.ffprobe_path.clone(),
    ));
    let catalog = match SqliteCatalog::connect(&config.catalog.dsn).await {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            eprintln!("failed to connect catalog: {e}");
            return ExitCode::FAILURE;
        }
    };
    let collaborators = Collaborators {
        kv,
        storage: default_node(),
        transcoder,
        catalog,
    };

    let payload = match std::fs::read(&payload_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("failed to read payload {}: {e}", payload_path.display());
            return ExitCode::FAILURE;
        }
    };

    let job_kind = match kind {
        CliJobKind::Source => JobKind::Source,
        CliJobKind::Info => JobKind::Info,
    };
    let job = Job::new(id.clone(), job_kind, payload);

    let runner = Runner::new(config.runner, collaborators);
    match runner.admit(job, force).await {
        Ok(()) => {
            println!("admitted job {id}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed to admit job {id}: {e}");
            ExitCode::FAILURE
        }
    }
}
