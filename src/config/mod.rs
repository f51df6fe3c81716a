// backuptool/src/config/mod.rs
use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// Structs for deserializing the TOML configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawS3Config {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRetention {
    pub max_keep: Option<usize>,
    pub max_age_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDefaults {
    pub prefix: Option<String>,
    pub presign_expiration: Option<u64>,
    pub archive_name_snake_date: Option<bool>,
    pub retention: Option<RawRetention>,
}

/// `source` accepts either a single path or a list of paths.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// `every` accepts an integer number of seconds or a human string ("5m").
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IntervalValue {
    Seconds(u64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJob {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub every: Option<IntervalValue>,
    pub presign_expiration: Option<u64>,
    pub retention: Option<RawRetention>,
    pub archive_name_snake_date: Option<bool>,
    pub archive_name: Option<String>,
    pub source: Option<OneOrMany>,
    pub compress: Option<bool>,
    pub exclude: Option<Vec<String>>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub command: Option<String>,
}

// `dot_env` / `dot_envs` are read straight off the TOML value tree before
// this struct exists: the env files they point at may hold the variables the
// placeholder pass needs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    pub s3: Option<RawS3Config>,
    pub defaults: Option<RawDefaults>,
    pub jobs: Option<Vec<RawJob>>,
}

// The application's validated internal configuration.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_keep: Option<usize>,
    pub max_age_days: Option<i64>,
}

impl RetentionPolicy {
    pub fn is_empty(&self) -> bool {
        self.max_keep.is_none() && self.max_age_days.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Defaults {
    pub prefix: String,
    pub presign_expiration: Duration,
    pub archive_name_snake_date: bool,
    pub retention: RawRetention,
}

#[derive(Debug, Clone)]
pub struct DatabaseParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

#[derive(Debug, Clone)]
pub enum JobKind {
    File {
        sources: Vec<PathBuf>,
        compress: bool,
        archive_name: Option<String>,
    },
    Directory {
        source: PathBuf,
        exclude: Vec<String>,
        archive_name: Option<String>,
    },
    Postgres(DatabaseParams),
    Mysql(DatabaseParams),
    Command {
        command: String,
    },
}

impl JobKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            JobKind::File { .. } => "file",
            JobKind::Directory { .. } => "directory",
            JobKind::Postgres(_) => "postgres",
            JobKind::Mysql(_) => "mysql",
            JobKind::Command { .. } => "command",
        }
    }
}

/// One validated backup job. Immutable after construction.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub name: String,
    pub bucket: String,
    pub prefix: String,
    pub retention: RetentionPolicy,
    pub every: Option<Duration>,
    pub presign_expiration: Duration,
    pub archive_name_snake_date: bool,
    pub kind: JobKind,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub s3: S3Settings,
    pub jobs: Vec<JobDefinition>,
}

impl AppConfig {
    pub fn load_from_toml(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let mut value: toml::Value = toml::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse TOML from config file at {}",
                config_path.display()
            )
        })?;

        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        load_env_files(config_dir, &value);
        resolve_env_placeholders(&mut value, &|name| env::var(name).ok());

        let raw: RawConfig = value
            .try_into()
            .context("Failed to deserialize configuration")?;
        build_app_config(raw)
    }
}

/// Loads `.env` files without overriding variables already present in the
/// process environment: first a `.env` next to the config file, then any
/// `dot_env` / `dot_envs` entries declared in the config itself.
fn load_env_files(config_dir: &Path, value: &toml::Value) {
    let default_env = config_dir.join(".env");
    if default_env.exists() {
        let _ = dotenv::from_path(&default_env);
    }

    let mut declared: Vec<String> = Vec::new();
    if let Some(path) = value.get("dot_env").and_then(|v| v.as_str()) {
        declared.push(path.to_string());
    }
    if let Some(paths) = value.get("dot_envs").and_then(|v| v.as_array()) {
        for p in paths {
            if let Some(s) = p.as_str() {
                declared.push(s.to_string());
            }
        }
    }
    for p in declared {
        if p.is_empty() {
            continue;
        }
        let _ = dotenv::from_path(config_dir.join(p));
    }
}

/// Replaces every string value of the form `ENV_<NAME>` with `$NAME` from the
/// environment. Unresolved placeholders produce a warning and keep the
/// literal token so the problem is visible downstream.
pub fn resolve_env_placeholders(
    value: &mut toml::Value,
    lookup: &dyn Fn(&str) -> Option<String>,
) {
    let pattern = Regex::new(r"^ENV_[A-Z0-9_]+$").expect("placeholder pattern is valid");
    resolve_value(value, &pattern, lookup);
}

fn resolve_value(value: &mut toml::Value, pattern: &Regex, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        toml::Value::String(s) => {
            if pattern.is_match(s) {
                let var_name = &s[4..];
                match lookup(var_name) {
                    Some(resolved) => *s = resolved,
                    None => println!(
                        "Warning: environment variable '{}' not set for placeholder '{}'",
                        var_name, s
                    ),
                }
            }
        }
        toml::Value::Table(table) => {
            for (_, v) in table.iter_mut() {
                resolve_value(v, pattern, lookup);
            }
        }
        toml::Value::Array(items) => {
            for v in items.iter_mut() {
                resolve_value(v, pattern, lookup);
            }
        }
        _ => {}
    }
}

fn build_app_config(raw: RawConfig) -> Result<AppConfig> {
    let s3 = build_s3_settings(raw.s3)?;
    let defaults = build_defaults(raw.defaults.unwrap_or_default());

    let mut jobs = Vec::new();
    let mut seen_names: HashSet<String> = HashSet::new();
    for (index, raw_job) in raw.jobs.unwrap_or_default().into_iter().enumerate() {
        let job = build_job(raw_job, &defaults, s3.bucket.as_deref())
            .with_context(|| format!("Invalid job definition at jobs[{index}]"))?;
        if !seen_names.insert(job.name.clone()) {
            bail!("Duplicate job name '{}' in configuration", job.name);
        }
        jobs.push(job);
    }

    Ok(AppConfig { s3, jobs })
}

/// Environment variables take precedence over the `[s3]` table so deployments
/// can keep credentials out of the config file entirely.
fn build_s3_settings(raw: Option<RawS3Config>) -> Result<S3Settings> {
    let raw = raw.unwrap_or(RawS3Config {
        endpoint: None,
        region: None,
        access_key_id: None,
        secret_access_key: None,
        bucket: None,
    });

    let pick = |env_name: &str, cfg_value: Option<String>| -> Option<String> {
        env::var(env_name)
            .ok()
            .filter(|s| !s.is_empty())
            .or(cfg_value.filter(|s| !s.is_empty()))
    };

    let endpoint = pick("S3_ENDPOINT", raw.endpoint)
        .context("S3 endpoint must be set ([s3].endpoint or S3_ENDPOINT)")?;
    let region = pick("S3_REGION", raw.region).unwrap_or_else(|| "us-east-1".to_string());
    let access_key_id = pick("S3_ACCESS_KEY_ID", raw.access_key_id)
        .context("Missing S3 credentials ([s3].access_key_id or S3_ACCESS_KEY_ID)")?;
    let secret_access_key = pick("S3_SECRET_ACCESS_KEY", raw.secret_access_key)
        .context("Missing S3 credentials ([s3].secret_access_key or S3_SECRET_ACCESS_KEY)")?;
    let bucket = pick("S3_BUCKET", raw.bucket);

    Ok(S3Settings {
        endpoint,
        region,
        access_key_id,
        secret_access_key,
        bucket,
    })
}

fn build_defaults(raw: RawDefaults) -> Defaults {
    Defaults {
        prefix: raw.prefix.filter(|s| !s.is_empty()).unwrap_or_else(|| "backups".to_string()),
        presign_expiration: Duration::from_secs(raw.presign_expiration.unwrap_or(3600)),
        archive_name_snake_date: raw.archive_name_snake_date.unwrap_or(false),
        retention: raw.retention.unwrap_or_default(),
    }
}

fn build_job(raw: RawJob, defaults: &Defaults, default_bucket: Option<&str>) -> Result<JobDefinition> {
    let name = raw
        .name
        .filter(|s| !s.trim().is_empty())
        .context("Job requires a 'name'")?;
    let job_type = raw
        .job_type
        .map(|t| t.to_lowercase())
        .context("Job requires a 'type'")?;

    let bucket = raw
        .bucket
        .filter(|s| !s.is_empty())
        .or_else(|| default_bucket.map(|s| s.to_string()))
        .context("Job requires 'bucket' (no default bucket defined)")?;

    let prefix = raw
        .prefix
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| defaults.prefix.clone());

    // Retention rules merge per-field: a job may set only max_keep and still
    // inherit the default max_age_days.
    let job_retention = raw.retention.unwrap_or_default();
    let retention = RetentionPolicy {
        max_keep: job_retention.max_keep.or(defaults.retention.max_keep),
        max_age_days: job_retention.max_age_days.or(defaults.retention.max_age_days),
    };

    let every = match &raw.every {
        Some(value) => Some(
            parse_interval(value)
                .with_context(|| format!("Job '{name}' has an invalid 'every' interval"))?,
        ),
        None => None,
    };

    let presign_expiration = raw
        .presign_expiration
        .map(Duration::from_secs)
        .unwrap_or(defaults.presign_expiration);
    let archive_name_snake_date = raw
        .archive_name_snake_date
        .unwrap_or(defaults.archive_name_snake_date);

    let kind = match job_type.as_str() {
        "file" => {
            let sources: Vec<PathBuf> = raw
                .source
                .context("'file' job requires 'source'")?
                .into_vec()
                .into_iter()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
            if sources.is_empty() {
                bail!("'file' job requires at least one non-empty 'source'");
            }
            let compress = raw.compress.unwrap_or(false);
            if compress && sources.len() > 1 && raw.archive_name.is_none() {
                bail!(
                    "'file' job with 'compress = true' and multiple sources requires an explicit 'archive_name' (one archive is produced for the whole source list)"
                );
            }
            JobKind::File {
                sources,
                compress,
                archive_name: raw.archive_name,
            }
        }
        "directory" => {
            let source = match raw.source.context("'directory' job requires 'source'")? {
                OneOrMany::One(s) if !s.is_empty() => PathBuf::from(s),
                _ => bail!("'directory' job requires a single 'source' path"),
            };
            JobKind::Directory {
                source,
                exclude: raw.exclude.unwrap_or_default(),
                archive_name: raw.archive_name,
            }
        }
        "postgres" => JobKind::Postgres(build_database_params(
            raw.host,
            raw.port,
            raw.user,
            raw.password,
            raw.database,
            5432,
            "postgres",
        )?),
        "mysql" => JobKind::Mysql(build_database_params(
            raw.host,
            raw.port,
            raw.user,
            raw.password,
            raw.database,
            3306,
            "mysql",
        )?),
        "command" => {
            let command = raw
                .command
                .filter(|s| !s.trim().is_empty())
                .context("'command' job requires 'command'")?;
            JobKind::Command { command }
        }
        other => bail!("Unknown job type: {other}"),
    };

    Ok(JobDefinition {
        name,
        bucket,
        prefix,
        retention,
        every,
        presign_expiration,
        archive_name_snake_date,
        kind,
    })
}

fn build_database_params(
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
    default_port: u16,
    kind: &str,
) -> Result<DatabaseParams> {
    let database = database
        .filter(|s| !s.is_empty())
        .with_context(|| format!("'{kind}' job requires 'database'"))?;
    let user = user
        .filter(|s| !s.is_empty())
        .with_context(|| format!("'{kind}' job requires 'user'"))?;
    Ok(DatabaseParams {
        host: host.filter(|s| !s.is_empty()).unwrap_or_else(|| "localhost".to_string()),
        port: port.unwrap_or(default_port),
        user,
        password: password.filter(|s| !s.is_empty()),
        database,
    })
}

/// Parses a schedule interval: plain seconds, or a digit string with an
/// `s`/`m`/`h`/`d` suffix.
pub fn parse_interval(value: &IntervalValue) -> Result<Duration> {
    let seconds = match value {
        IntervalValue::Seconds(n) => *n,
        IntervalValue::Text(s) => {
            let s = s.trim().to_lowercase();
            let (digits, multiplier) = match s.as_bytes().last().copied() {
                Some(b's') => (&s[..s.len() - 1], 1),
                Some(b'm') => (&s[..s.len() - 1], 60),
                Some(b'h') => (&s[..s.len() - 1], 3600),
                Some(b'd') => (&s[..s.len() - 1], 86400),
                _ => (s.as_str(), 1),
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                bail!("Unrecognized interval: '{s}'");
            }
            digits.parse::<u64>().context("Interval out of range")? * multiplier
        }
    };
    if seconds == 0 {
        bail!("Interval must be greater than zero");
    }
    Ok(Duration::from_secs(seconds))
}
