// backuptool/src/runner/mod.rs
use std::sync::Arc;

use crate::artifact;
use crate::config::JobDefinition;
use crate::errors::JobError;
use crate::locks::LockTable;
use crate::retention;
use crate::store::ObjectStore;

/// Terminal state of one run attempt. `SkippedBusy` is a normal skip, not a
/// failure: a job whose previous run is still going is neither queued nor
/// retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Failed,
    SkippedBusy,
}

#[derive(Debug)]
pub struct RunResult {
    pub job_name: String,
    pub status: RunStatus,
    pub artifacts_uploaded: usize,
    pub objects_deleted: usize,
    pub errors: Vec<JobError>,
}

impl RunResult {
    pub fn is_failure(&self) -> bool {
        self.status == RunStatus::Failed
    }
}

/// Everything a run needs besides the job itself. Cheap to clone into
/// per-job tasks.
#[derive(Clone)]
pub struct RunContext {
    pub store: Arc<dyn ObjectStore>,
    pub locks: Arc<LockTable>,
    pub dry_run: bool,
}

/// Executes one job: acquire lock → build artifact(s) → upload → retention →
/// release. The lock guard and the temp dir are scoped to this call, so both
/// are released on every exit path.
///
/// Uploads within an uncompressed multi-file job are independent: a failing
/// source is recorded and its siblings still go out. Retention runs only if
/// at least one upload succeeded (in dry-run: always, for visibility).
pub async fn run_job(job: &JobDefinition, ctx: &RunContext) -> RunResult {
    let mut result = RunResult {
        job_name: job.name.clone(),
        status: RunStatus::Completed,
        artifacts_uploaded: 0,
        objects_deleted: 0,
        errors: Vec::new(),
    };

    let Some(lock_guard) = ctx.locks.acquire(&job.name) else {
        match ctx.locks.holder(&job.name) {
            Some(holder) => println!(
                "Another run is in progress for job '{}' (since {}). Skipping this attempt.",
                job.name, holder.acquired_at
            ),
            None => println!(
                "Another run is in progress for job '{}'. Skipping this attempt.",
                job.name
            ),
        }
        result.status = RunStatus::SkippedBusy;
        return result;
    };
    println!("task_id={}", lock_guard.holder_id());

    let temp_root = match tempfile::Builder::new().prefix("backup-").tempdir() {
        Ok(dir) => dir,
        Err(err) => {
            result.errors.push(JobError::Build(format!(
                "Failed to create temporary directory: {err}"
            )));
            result.status = RunStatus::Failed;
            return result;
        }
    };

    for built in artifact::build_artifacts(job, temp_root.path()) {
        let built = match built {
            Ok(artifact) => artifact,
            Err(err) => {
                eprintln!("❌ Build failed for job '{}': {err:#}", job.name);
                result.errors.push(JobError::build(&err));
                continue;
            }
        };

        let object_key = artifact::generate_object_key(&job.prefix, &job.name, &built.file_name);
        if ctx.dry_run {
            println!(
                "[dry-run] Upload {} -> s3://{}/{}",
                built.path.display(),
                job.bucket,
                object_key
            );
            result.artifacts_uploaded += 1;
        } else {
            match ctx.store.put(&job.bucket, &object_key, &built.path).await {
                Ok(()) => {
                    println!(
                        "✅ Upload: {} -> s3://{}/{} ({} bytes)",
                        built.file_name, job.bucket, object_key, built.content_length
                    );
                    result.artifacts_uploaded += 1;
                }
                Err(err) => {
                    eprintln!("❌ Upload failed for job '{}': {err:#}", job.name);
                    result.errors.push(JobError::upload(&err));
                    continue;
                }
            }
        }

        // Best effort: a presign failure never fails the run.
        if let Ok(url) = ctx
            .store
            .presign(&job.bucket, &object_key, job.presign_expiration)
            .await
        {
            let minutes = std::cmp::max(1, job.presign_expiration.as_secs() / 60);
            println!("Presigned ({minutes} min):\n{url}");
        }
    }

    if result.artifacts_uploaded > 0 || ctx.dry_run {
        let retention_prefix = format!("{}/{}", job.prefix.trim_end_matches('/'), job.name);
        match retention::apply_retention(
            ctx.store.as_ref(),
            &job.bucket,
            &retention_prefix,
            &job.retention,
            ctx.dry_run,
        )
        .await
        {
            Ok(deleted) => result.objects_deleted = deleted,
            Err(err) => {
                eprintln!("❌ Retention failed for job '{}': {err:#}", job.name);
                result.errors.push(JobError::retention(&err));
            }
        }
    }

    if !result.errors.is_empty() {
        result.status = RunStatus::Failed;
    }
    drop(lock_guard);
    result
}

/// Runs the given jobs one after another, never letting one job's failure
/// reach the next. Batch mode's exit code comes from the collected results.
pub async fn run_jobs(jobs: &[JobDefinition], ctx: &RunContext) -> Vec<RunResult> {
    let mut results = Vec::new();
    for job in jobs {
        println!("\n==> Running job: {} ({})", job.name, job.kind.type_name());
        let result = run_job(job, ctx).await;
        match result.status {
            RunStatus::Completed => println!(
                "✅ Job '{}' completed: {} uploaded, {} deleted",
                result.job_name, result.artifacts_uploaded, result.objects_deleted
            ),
            RunStatus::Failed => eprintln!(
                "❌ Job '{}' failed: {} uploaded, {} error(s)",
                result.job_name,
                result.artifacts_uploaded,
                result.errors.len()
            ),
            RunStatus::SkippedBusy => {}
        }
        results.push(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JobKind, RetentionPolicy};
    use crate::store::ObjectMeta;
    use crate::store::memory::MemoryStore;
    use anyhow::Result;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::path::PathBuf;
    use std::time::Duration;

    fn job(kind: JobKind, retention: RetentionPolicy) -> JobDefinition {
        JobDefinition {
            name: "unit-job".to_string(),
            bucket: "bucket".to_string(),
            prefix: "backups".to_string(),
            retention,
            every: None,
            presign_expiration: Duration::from_secs(3600),
            archive_name_snake_date: false,
            kind,
        }
    }

    fn context(store: Arc<MemoryStore>, dry_run: bool) -> RunContext {
        RunContext {
            store,
            locks: Arc::new(LockTable::new()),
            dry_run,
        }
    }

    fn seeded_store(old_objects: usize) -> MemoryStore {
        let now = Utc::now();
        MemoryStore::with_objects(
            "bucket",
            (0..old_objects)
                .map(|i| ObjectMeta {
                    key: format!("backups/unit-job/old-{i}.tar.gz"),
                    last_modified: now - ChronoDuration::days(30 + i as i64),
                    size: 1,
                })
                .collect(),
        )
    }

    fn write_sources(dir: &tempfile::TempDir, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                std::fs::write(&path, name.as_bytes()).expect("test file writes");
                path
            })
            .collect()
    }

    #[tokio::test]
    async fn test_multi_file_upload_failure_spares_siblings() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sources = write_sources(&dir, &["a.txt", "b.txt"]);

        let store = Arc::new(seeded_store(2));
        *store.fail_put_containing.lock().expect("test mutex") = Some("b.txt".to_string());

        let job = job(
            JobKind::File {
                sources,
                compress: false,
                archive_name: None,
            },
            RetentionPolicy {
                max_keep: Some(1),
                max_age_days: None,
            },
        );
        let result = run_job(&job, &context(Arc::clone(&store), false)).await;

        assert_eq!(result.artifacts_uploaded, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(result.errors[0], JobError::Upload(_)));
        assert_eq!(result.status, RunStatus::Failed);
        // Retention still ran: one upload succeeded, and with max_keep=1 the
        // two seeded objects are pruned in favor of the fresh one.
        assert_eq!(result.objects_deleted, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sources = write_sources(&dir, &["a.txt"]);

        let store = Arc::new(seeded_store(2));
        let job = job(
            JobKind::File {
                sources,
                compress: false,
                archive_name: None,
            },
            RetentionPolicy {
                max_keep: Some(1),
                max_age_days: None,
            },
        );
        let result = run_job(&job, &context(Arc::clone(&store), true)).await;

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.artifacts_uploaded, 1);
        // max_keep=1 over the two seeded objects: one would go.
        assert_eq!(result.objects_deleted, 1);
        assert_eq!(store.mutating_calls(), 0);
        assert_eq!(store.keys("bucket").len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_retention_block_deletes_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sources = write_sources(&dir, &["a.txt"]);

        let store = Arc::new(seeded_store(5));
        let job = job(
            JobKind::File {
                sources,
                compress: false,
                archive_name: None,
            },
            RetentionPolicy::default(),
        );
        let result = run_job(&job, &context(Arc::clone(&store), false)).await;

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.objects_deleted, 0);
        // The upload itself is the only mutating call.
        assert_eq!(store.puts.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(store.deletes.load(std::sync::atomic::Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_busy_lock_skips_without_store_calls() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sources = write_sources(&dir, &["a.txt"]);

        let store = Arc::new(seeded_store(0));
        let ctx = context(Arc::clone(&store), false);
        let _held = ctx.locks.acquire("unit-job").expect("test pre-acquires");

        let job = job(
            JobKind::File {
                sources,
                compress: false,
                archive_name: None,
            },
            RetentionPolicy::default(),
        );
        let result = run_job(&job, &ctx).await;

        assert_eq!(result.status, RunStatus::SkippedBusy);
        assert_eq!(result.artifacts_uploaded, 0);
        assert!(result.errors.is_empty());
        assert_eq!(store.mutating_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_single_artifact_build_failure_ends_run() -> Result<()> {
        let store = Arc::new(seeded_store(3));
        let job = job(
            JobKind::Directory {
                source: PathBuf::from("/no/such/directory"),
                exclude: Vec::new(),
                archive_name: None,
            },
            RetentionPolicy {
                max_keep: Some(1),
                max_age_days: None,
            },
        );
        let ctx = context(Arc::clone(&store), false);
        let result = run_job(&job, &ctx).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.artifacts_uploaded, 0);
        assert!(matches!(result.errors[0], JobError::Build(_)));
        // Nothing uploaded, so retention never ran.
        assert_eq!(result.objects_deleted, 0);
        assert_eq!(store.mutating_calls(), 0);
        // The lock is free again after the failed run.
        assert!(ctx.locks.acquire("unit-job").is_some());
        Ok(())
    }
}
