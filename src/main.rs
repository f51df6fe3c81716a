//! Backup orchestrator for S3-compatible object storage.
//!
//! Reads a declarative TOML job list, builds one artifact per job (file,
//! directory archive, database dump, or captured command output), uploads it,
//! and enforces per-job retention — once, or continuously on a schedule.

// backuptool/src/main.rs
mod artifact;
mod config;
mod errors;
mod locks;
mod retention;
mod runner;
mod scheduler;
mod store;

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use config::{AppConfig, JobDefinition};
use locks::LockTable;
use runner::RunContext;
use store::{ObjectStore, S3Gateway};

#[derive(Parser)]
#[command(name = "backuptool")]
#[command(about = "Backup orchestrator for S3-compatible object storage", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Comma-separated list of job names to run
    #[arg(short, long)]
    jobs: Option<String>,

    /// Simulate actions without uploading or deleting
    #[arg(long)]
    dry_run: bool,

    /// List available jobs from the config and exit
    #[arg(long)]
    list: bool,

    /// Apply retention policies only, without running backups
    #[arg(long)]
    retention_only: bool,

    /// List available buckets and exit
    #[arg(long)]
    list_buckets: bool,

    /// Create a bucket and exit
    #[arg(long)]
    create_bucket: bool,

    /// Bucket name to create (used with --create-bucket)
    #[arg(long)]
    bucket_name: Option<String>,

    /// When creating a bucket, apply a public-read policy
    #[arg(long)]
    public: bool,

    /// Run in scheduler mode, re-triggering jobs on their 'every' interval
    #[arg(long)]
    schedule: bool,

    /// Scheduler loop tick interval in seconds
    #[arg(long, default_value_t = 10)]
    tick_interval: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run_app(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            eprintln!("❌ One or more jobs failed.");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("❌ Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Runs the selected mode. `Ok(false)` means the work itself reported
/// failures (batch exit code); `Err` means startup/configuration problems.
async fn run_app(cli: Cli) -> Result<bool> {
    let _ = dotenv::dotenv();

    let app_config = AppConfig::load_from_toml(&cli.config).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            cli.config.display()
        )
    })?;

    if cli.list {
        println!("Available jobs:");
        for job in &app_config.jobs {
            match job.every {
                Some(every) => println!(
                    "- {} ({}, every {}s)",
                    job.name,
                    job.kind.type_name(),
                    every.as_secs()
                ),
                None => println!("- {} ({})", job.name, job.kind.type_name()),
            }
        }
        return Ok(true);
    }

    let store: Arc<dyn ObjectStore> = Arc::new(S3Gateway::connect(&app_config.s3).await);

    if cli.list_buckets {
        let names = store.list_buckets().await?;
        if names.is_empty() {
            println!("No buckets returned or insufficient permissions.");
        } else {
            println!("Buckets:");
            for name in names {
                println!("- {name}");
            }
        }
        return Ok(true);
    }

    if cli.create_bucket {
        let target = cli
            .bucket_name
            .or_else(|| app_config.s3.bucket.clone())
            .context("Please provide --bucket-name or define [s3].bucket in the config")?;
        let created = store
            .ensure_bucket(&target, Some(&app_config.s3.region), cli.public)
            .await?;
        if !created && cli.public {
            store.set_bucket_visibility(&target, true).await?;
        }
        return Ok(true);
    }

    let selected_jobs = select_jobs(&app_config.jobs, cli.jobs.as_deref())?;
    let ctx = RunContext {
        store,
        locks: Arc::new(LockTable::new()),
        dry_run: cli.dry_run,
    };

    if cli.schedule {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_on_signal = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\n🛑 Stop requested; finishing in-flight runs.");
                stop_on_signal.store(true, Ordering::SeqCst);
            }
        });
        scheduler::run_scheduler(
            selected_jobs,
            ctx,
            Duration::from_secs(cli.tick_interval.max(1)),
            stop,
        )
        .await?;
        return Ok(true);
    }

    if selected_jobs.is_empty() {
        println!("No jobs configured. Define [[jobs]] in the config file.");
        return Ok(true);
    }

    if cli.retention_only {
        return run_retention_only(&selected_jobs, &ctx).await;
    }

    let results = runner::run_jobs(&selected_jobs, &ctx).await;
    let all_ok = !results.iter().any(|r| r.is_failure());
    if all_ok {
        println!("\n✅ Operation completed successfully.");
    }
    Ok(all_ok)
}

/// Applies each selected job's retention policy without building or
/// uploading anything. Failures are reported per job and never stop the rest.
async fn run_retention_only(jobs: &[JobDefinition], ctx: &RunContext) -> Result<bool> {
    let mut all_ok = true;
    for job in jobs {
        let prefix = format!("{}/{}", job.prefix.trim_end_matches('/'), job.name);
        match retention::apply_retention(
            ctx.store.as_ref(),
            &job.bucket,
            &prefix,
            &job.retention,
            ctx.dry_run,
        )
        .await
        {
            Ok(deleted) => println!("Job '{}': {} object(s) deleted", job.name, deleted),
            Err(err) => {
                eprintln!("❌ Retention failed for job '{}': {err:#}", job.name);
                all_ok = false;
            }
        }
    }
    Ok(all_ok)
}

/// Resolves a comma-separated `-j` selection against the configured jobs.
/// Unknown names are an error rather than a silent no-op.
fn select_jobs(all: &[JobDefinition], selector: Option<&str>) -> Result<Vec<JobDefinition>> {
    let Some(selector) = selector else {
        return Ok(all.to_vec());
    };

    let mut selected = Vec::new();
    let mut missing = Vec::new();
    for name in selector.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match all.iter().find(|j| j.name == name) {
            Some(job) => selected.push(job.clone()),
            None => missing.push(name),
        }
    }
    if !missing.is_empty() {
        bail!("Jobs not found: {}", missing.join(", "));
    }
    Ok(selected)
}
