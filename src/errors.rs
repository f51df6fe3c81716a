use thiserror::Error;

/// Per-job error taxonomy. A run collects these in its result instead of
/// propagating them; one job's failure never reaches sibling jobs or the
/// scheduler loop. Configuration problems are not represented here — they
/// are fatal at startup, before any job runs.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Artifact build failed: {0}")]
    Build(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Retention failed: {0}")]
    Retention(String),
}

impl JobError {
    pub fn build(err: &anyhow::Error) -> Self {
        JobError::Build(format!("{err:#}"))
    }

    pub fn upload(err: &anyhow::Error) -> Self {
        JobError::Upload(format!("{err:#}"))
    }

    pub fn retention(err: &anyhow::Error) -> Self {
        JobError::Retention(format!("{err:#}"))
    }
}
