//! forkpool - run echo tasks across a pool of worker processes.

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use forkpool_manager::{Manager, PoolConfig, PoolEvent};

/// forkpool - process pool task runner
#[derive(Parser)]
#[command(name = "forkpool")]
#[command(about = "Fork a pool of workers and run echo tasks across them", long_about = None)]
struct Cli {
    /// JSON pool configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of worker processes
    #[arg(short, long)]
    forks: Option<usize>,

    /// Worker executable (defaults to forkpool-echo-worker next to this binary)
    #[arg(short, long)]
    worker: Option<PathBuf>,

    /// Number of echo tasks to run
    #[arg(short, long, default_value = "100")]
    tasks: usize,

    /// Time allowed for each worker to come online
    #[arg(long)]
    startup_timeout_ms: Option<u64>,

    /// Log level for this process and the workers
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // stdout carries task results
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&cli)?;
    let mut manager = Manager::new(config)?;
    let started = Instant::now();

    if let Err(e) = manager.up().await {
        error!(error = %e, "Pool failed to start");
        if let Err(e) = manager.shutdown().await {
            warn!(error = %e, "Shutdown after failed start");
        }
        return Err(e.into());
    }

    // Errors free a worker without dispatching the backlog, so tasks are fed
    // as workers report back.
    let workers = manager.workers().len();
    let mut payloads = (0..cli.tasks).map(|i| json!({ "type": "echo", "msg": format!("hello {}", i) }));
    for payload in payloads.by_ref().take(workers) {
        manager.add_task(payload).await;
    }

    let mut failed = 0usize;
    while !manager.is_idle() {
        let settled = match manager.next_event().await {
            Some(PoolEvent::TaskFinished {
                worker_id,
                task_id,
                result,
            }) => {
                println!("{}\t{}\t{}", task_id, worker_id, result);
                true
            }
            Some(PoolEvent::TaskError {
                task_id, failure, ..
            })
            | Some(PoolEvent::TaskFatal {
                task_id, failure, ..
            }) => {
                failed += 1;
                warn!(task_id = %task_id, failure = %failure, "Task failed");
                true
            }
            Some(PoolEvent::Fatal { worker_id, failure }) => {
                error!(worker_id = %worker_id, failure = %failure, "Worker fatal");
                false
            }
            Some(event) => {
                tracing::debug!(event = ?event, "Pool event");
                false
            }
            None => break,
        };
        if settled {
            if let Some(payload) = payloads.next() {
                manager.add_task(payload).await;
            }
        }
    }

    info!(
        tasks = manager.tasks().len(),
        failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "All tasks done"
    );
    for (worker_id, stat) in manager.workers_stat() {
        println!(
            "worker {}: started={} finished={} errored={} fatal={}",
            worker_id, stat.started, stat.finished, stat.errored, stat.fatal
        );
    }

    manager.shutdown().await?;
    Ok(())
}

fn build_config(cli: &Cli) -> Result<PoolConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => PoolConfig::default(),
    };

    if let Some(forks) = cli.forks {
        config.fork_count = forks;
    }
    if let Some(worker) = &cli.worker {
        config.worker.path = worker.clone();
    }
    if config.worker.path.as_os_str().is_empty() {
        config.worker.path = std::env::current_exe()?.with_file_name("forkpool-echo-worker");
    }
    if let Some(ms) = cli.startup_timeout_ms {
        config.worker.startup_timeout_ms = ms;
    }
    config.log_level = cli.log_level.clone();
    Ok(config)
}
