// backuptool/src/artifact/archive.rs
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use glob::Pattern;
use std::fs::File;
use std::path::{Path, PathBuf};
use tar::Builder;
use walkdir::WalkDir;

/// Creates a gzipped TAR archive from a source directory.
///
/// Paths inside the archive are relative to `source_dir`. Entries whose
/// relative path matches one of `exclude_globs` are skipped.
pub fn tar_directory(
    source_dir: &Path,
    archive_dest_path: &Path,
    exclude_globs: &[String],
) -> Result<PathBuf> {
    if !source_dir.is_dir() {
        anyhow::bail!("Directory not found: {}", source_dir.display());
    }
    ensure_parent(archive_dest_path)?;

    let patterns = exclude_globs
        .iter()
        .map(|g| Pattern::new(g).with_context(|| format!("Invalid exclude pattern: {g}")))
        .collect::<Result<Vec<_>>>()?;

    let mut tar_builder = new_tar_builder(archive_dest_path)?;

    for entry in WalkDir::new(source_dir) {
        let entry = entry
            .with_context(|| format!("Failed to walk directory: {}", source_dir.display()))?;
        let path = entry.path();
        let name = path.strip_prefix(source_dir).with_context(|| {
            format!(
                "Failed to strip prefix {} from {}",
                source_dir.display(),
                path.display()
            )
        })?;

        if name.as_os_str().is_empty() {
            // Skip the root directory itself.
            continue;
        }
        if patterns.iter().any(|p| p.matches_path(name)) {
            continue;
        }

        if path.is_dir() {
            tar_builder
                .append_dir(name, path)
                .with_context(|| format!("Failed to append directory {} to archive", path.display()))?;
        } else if path.is_file() {
            tar_builder.append_path_with_name(path, name).with_context(|| {
                format!(
                    "Failed to append file {} as {} to archive",
                    path.display(),
                    name.display()
                )
            })?;
        }
    }

    finish_archive(tar_builder, archive_dest_path)?;
    Ok(archive_dest_path.to_path_buf())
}

/// Creates a gzipped TAR archive containing the given files, each stored
/// under its own file name.
pub fn tar_files(sources: &[PathBuf], archive_dest_path: &Path) -> Result<PathBuf> {
    ensure_parent(archive_dest_path)?;
    let mut tar_builder = new_tar_builder(archive_dest_path)?;

    for source in sources {
        if !source.is_file() {
            anyhow::bail!("File not found: {}", source.display());
        }
        let name = source
            .file_name()
            .with_context(|| format!("Source has no file name: {}", source.display()))?;
        tar_builder
            .append_path_with_name(source, name)
            .with_context(|| format!("Failed to append file {} to archive", source.display()))?;
    }

    finish_archive(tar_builder, archive_dest_path)?;
    Ok(archive_dest_path.to_path_buf())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directory for archive: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn new_tar_builder(archive_dest_path: &Path) -> Result<Builder<GzEncoder<File>>> {
    let archive_file = File::create(archive_dest_path).with_context(|| {
        format!("Failed to create archive file: {}", archive_dest_path.display())
    })?;
    Ok(Builder::new(GzEncoder::new(archive_file, Compression::default())))
}

fn finish_archive(tar_builder: Builder<GzEncoder<File>>, archive_dest_path: &Path) -> Result<()> {
    let encoder = tar_builder.into_inner().with_context(|| {
        format!(
            "Failed to finalize tar stream for archive: {}",
            archive_dest_path.display()
        )
    })?;
    encoder.finish().with_context(|| {
        format!(
            "Failed to finish gzip encoding for archive: {}",
            archive_dest_path.display()
        )
    })?;
    Ok(())
}
