pub(crate) mod archive;
pub(crate) mod command;

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};

use crate::config::{JobDefinition, JobKind};

/// One payload produced for a job run, ready for upload. Payloads built under
/// the run's temp root disappear with it; plain `file` sources are uploaded
/// in place.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub path: PathBuf,
    pub content_length: u64,
}

impl Artifact {
    fn from_path(path: PathBuf) -> Result<Self> {
        let file_name = path
            .file_name()
            .with_context(|| format!("Artifact has no file name: {}", path.display()))?
            .to_string_lossy()
            .to_string();
        let content_length = std::fs::metadata(&path)
            .with_context(|| format!("Failed to stat artifact: {}", path.display()))?
            .len();
        Ok(Artifact {
            file_name,
            path,
            content_length,
        })
    }
}

/// Builds every artifact a job produces, one result per planned artifact.
///
/// An uncompressed `file` job plans one artifact per source path so a broken
/// source cannot take its siblings down with it. Every other kind plans
/// exactly one artifact.
pub fn build_artifacts(job: &JobDefinition, temp_root: &Path) -> Vec<Result<Artifact>> {
    match &job.kind {
        JobKind::File {
            sources,
            compress: false,
            ..
        } => sources.iter().map(|src| plain_file_artifact(src)).collect(),

        JobKind::File {
            sources,
            compress: true,
            archive_name,
        } => {
            let base = match archive_name {
                Some(name) => name.clone(),
                None => sources
                    .first()
                    .and_then(|p| p.file_stem())
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| job.name.clone()),
            };
            let out = temp_root.join(build_archive_name(&base, job.archive_name_snake_date));
            vec![archive::tar_files(sources, &out).and_then(Artifact::from_path)]
        }

        JobKind::Directory {
            source,
            exclude,
            archive_name,
        } => {
            let base = match archive_name {
                Some(name) => name.clone(),
                None => source
                    .file_name()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| job.name.clone()),
            };
            let out = temp_root.join(build_archive_name(&base, job.archive_name_snake_date));
            vec![archive::tar_directory(source, &out, exclude).and_then(Artifact::from_path)]
        }

        JobKind::Postgres(params) => {
            let out = temp_root.join(format!("{}.sql", job.name));
            vec![command::dump_postgres(params, &out).and_then(Artifact::from_path)]
        }

        JobKind::Mysql(params) => {
            let out = temp_root.join(format!("{}.sql", job.name));
            vec![command::dump_mysql(params, &out).and_then(Artifact::from_path)]
        }

        JobKind::Command { command: line } => {
            let out = temp_root.join(format!("{}.out", job.name));
            vec![command::run_command_line_to_file(line, &out).and_then(Artifact::from_path)]
        }
    }
}

fn plain_file_artifact(source: &Path) -> Result<Artifact> {
    if !source.is_file() {
        anyhow::bail!("File not found: {}", source.display());
    }
    Artifact::from_path(source.to_path_buf())
}

/// Lowercases and squashes everything non-alphanumeric to single underscores.
pub fn to_snake_lower(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_sep = true;
    for ch in text.trim().chars() {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    let out = out.trim_end_matches('_').to_string();
    if out.is_empty() { "archive".to_string() } else { out }
}

/// Archive file name from a base label, optionally date-stamped:
/// `nightly_site_20260806.tar.gz`.
pub fn build_archive_name(base: &str, add_date: bool) -> String {
    let base_clean = to_snake_lower(base);
    if add_date {
        let date_part = Utc::now().format("%Y%m%d");
        format!("{base_clean}_{date_part}.tar.gz")
    } else {
        format!("{base_clean}.tar.gz")
    }
}

/// Fully-qualified object key: `prefix/job_name/<UTC timestamp>-<file>`.
/// The timestamp keeps every run's uploads distinct, which retention relies on.
pub fn generate_object_key(prefix: &str, job_name: &str, file_name: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    format!(
        "{}/{}/{}-{}",
        prefix.trim_end_matches('/'),
        job_name,
        timestamp,
        file_name
    )
}
