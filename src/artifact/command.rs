// backuptool/src/artifact/command.rs
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use which::which;

use crate::config::DatabaseParams;

/// Runs a program and writes its captured stdout to `output_file`.
/// A non-zero exit status is a build failure carrying the tool's stderr.
pub fn run_command_to_file(
    program: &Path,
    args: &[String],
    envs: &[(&str, String)],
    output_file: &Path,
) -> Result<PathBuf> {
    if let Some(parent) = output_file.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create output directory: {}", parent.display())
        })?;
    }

    let mut command = Command::new(program);
    command.args(args);
    for (name, value) in envs {
        command.env(name, value);
    }

    let output = command
        .output()
        .with_context(|| format!("Failed to execute command: {}", program.display()))?;

    if !output.status.success() {
        anyhow::bail!(
            "Command {} failed with status: {}\nStderr: {}",
            program.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    std::fs::write(output_file, &output.stdout)
        .with_context(|| format!("Failed to write command output: {}", output_file.display()))?;
    Ok(output_file.to_path_buf())
}

/// Runs a whitespace-split command line from a `command` job.
pub fn run_command_line_to_file(command_line: &str, output_file: &Path) -> Result<PathBuf> {
    let mut parts = command_line.split_whitespace();
    let program = parts.next().context("Command is empty")?;
    let args: Vec<String> = parts.map(|s| s.to_string()).collect();
    let program_path = which(program)
        .with_context(|| format!("Command executable not found in PATH: {program}"))?;
    println!("$ {command_line}");
    run_command_to_file(&program_path, &args, &[], output_file)
}

/// Dumps a PostgreSQL database with pg_dump, passing the password through
/// PGPASSWORD so it never appears in the process list.
pub fn dump_postgres(params: &DatabaseParams, output_file: &Path) -> Result<PathBuf> {
    let pg_dump = which("pg_dump").context(
        "pg_dump executable not found in PATH. Please ensure PostgreSQL client tools are installed and in your PATH.",
    )?;
    let args = vec![
        "-h".to_string(),
        params.host.clone(),
        "-p".to_string(),
        params.port.to_string(),
        "-U".to_string(),
        params.user.clone(),
        params.database.clone(),
    ];
    let mut envs = Vec::new();
    if let Some(password) = &params.password {
        envs.push(("PGPASSWORD", password.clone()));
    }
    println!("Dumping PostgreSQL database '{}' via pg_dump...", params.database);
    run_command_to_file(&pg_dump, &args, &envs, output_file)
}

/// Dumps a MySQL database with mysqldump, passing the password through
/// MYSQL_PWD.
pub fn dump_mysql(params: &DatabaseParams, output_file: &Path) -> Result<PathBuf> {
    let mysqldump = which("mysqldump").context(
        "mysqldump executable not found in PATH. Please ensure MySQL client tools are installed and in your PATH.",
    )?;
    let args = vec![
        "-h".to_string(),
        params.host.clone(),
        "-P".to_string(),
        params.port.to_string(),
        "-u".to_string(),
        params.user.clone(),
        params.database.clone(),
    ];
    let mut envs = Vec::new();
    if let Some(password) = &params.password {
        envs.push(("MYSQL_PWD", password.clone()));
    }
    println!("Dumping MySQL database '{}' via mysqldump...", params.database);
    run_command_to_file(&mysqldump, &args, &envs, output_file)
}
