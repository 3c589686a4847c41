//! millpath CLI - toolpath generation and distributed workers
//!
//! `generate` runs a job file, `serve` starts a manager that remote workers
//! and clients connect to, and `worker` attaches worker threads to one.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use millpath_cam::{generate_toolpath, registry, CutterSpec, Progress, ToolpathSettings};
use millpath_mesh::Model;
use millpath_parallel::{
    Channels, DistributedPool, Executor, ManagerConfig, ParallelConfig, RemoteChannels, Supervisor,
};
use serde::Deserialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "millpath")]
#[command(about = "Toolpath generation for 3-axis milling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a toolpath from a job file
    Generate {
        /// Job file (TOML)
        job: PathBuf,
        /// Output file for the toolpath JSON (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run a manager that distributed clients and workers connect to
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7878")]
        listen: String,
        /// Shared secret
        #[arg(short, long)]
        secret: String,
        /// Worker threads to run next to the manager
        #[arg(short, long, default_value_t = 0)]
        workers: usize,
    },
    /// Attach worker threads to a running manager
    Worker {
        /// Manager address
        #[arg(short, long)]
        connect: String,
        /// Shared secret
        #[arg(short, long)]
        secret: String,
        /// Worker threads (default: one per core)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Connect and request timeout in milliseconds
        #[arg(long, default_value_t = 5_000)]
        timeout_ms: u64,
        /// Idle poll interval in milliseconds
        #[arg(long, default_value_t = 100)]
        poll_interval_ms: u64,
    },
}

/// A generation job as read from TOML.
#[derive(Debug, Deserialize)]
struct JobFile {
    /// Model JSON, relative to the job file.
    model: PathBuf,
    #[serde(default)]
    cutter: CutterSpec,
    #[serde(default)]
    settings: ToolpathSettings,
    #[serde(default)]
    parallel: ParallelConfig,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate { job, output } => generate(&job, output.as_deref()),
        Commands::Serve {
            listen,
            secret,
            workers,
        } => serve(ManagerConfig {
            listen,
            secret,
            workers,
            ..ManagerConfig::default()
        }),
        Commands::Worker {
            connect,
            secret,
            workers,
            timeout_ms,
            poll_interval_ms,
        } => {
            let workers = workers.unwrap_or_else(|| {
                std::thread::available_parallelism().map_or(1, usize::from)
            });
            worker(
                &connect,
                &secret,
                workers,
                Duration::from_millis(timeout_ms),
                Duration::from_millis(poll_interval_ms),
            )
        }
    }
}

/// Console logging filtered by `RUST_LOG`, `info` by default.
fn init_logging() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .init();
}

fn load_job(path: &Path) -> Result<(JobFile, Model)> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    let job: JobFile = toml::from_str(&text)
        .with_context(|| format!("Failed to parse job file {}", path.display()))?;

    let model_path = path
        .parent()
        .map_or_else(|| job.model.clone(), |dir| dir.join(&job.model));
    let model_text = fs::read_to_string(&model_path)
        .with_context(|| format!("Failed to read model {}", model_path.display()))?;
    let model: Model = serde_json::from_str(&model_text)
        .with_context(|| format!("Failed to parse model {}", model_path.display()))?;
    Ok((job, model))
}

fn generate(job_path: &Path, output: Option<&Path>) -> Result<()> {
    let (job, model) = load_job(job_path)?;
    info!(
        triangles = model.len(),
        strategy = ?job.settings.strategy,
        "loaded job"
    );

    let executor = Executor::from_config(&job.parallel, Arc::new(registry()))
        .context("Failed to start executor")?;
    let mut last_percent = -1.0;
    let mut report = |progress: &Progress| {
        if let Some(percent) = progress.percent {
            if percent - last_percent >= 10.0 {
                last_percent = percent;
                debug!(percent, text = progress.text.as_deref(), "progress");
            }
        }
        false
    };
    let toolpath = generate_toolpath(&model, &job.cutter, &job.settings, &executor, &mut report)
        .context("Toolpath generation failed")?;

    let stats = toolpath.stats();
    info!(
        paths = stats.paths,
        points = stats.points,
        cutting_length = stats.cutting_length,
        "toolpath ready"
    );

    match output {
        Some(path) => {
            let file = fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &toolpath)?;
            writer.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            serde_json::to_writer_pretty(&mut writer, &toolpath)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}

fn serve(config: ManagerConfig) -> Result<()> {
    let pool = DistributedPool::serve(&config, Arc::new(registry()))
        .with_context(|| format!("Failed to start manager on {}", config.listen))?;
    info!(addr = ?pool.local_addr(), workers = config.workers, "manager running");
    loop {
        std::thread::park();
    }
}

fn worker(
    addr: &str,
    secret: &str,
    workers: usize,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let supervisor = Supervisor::start(workers, Arc::new(registry()), poll_interval, || {
        let remote = RemoteChannels::connect(addr, secret, timeout)?;
        Ok(Channels::from_shared(Arc::new(remote)))
    })
    .with_context(|| format!("Failed to connect workers to {addr}"))?;
    info!(addr, workers = supervisor.workers(), "workers attached");
    supervisor.wait();
    Ok(())
}
