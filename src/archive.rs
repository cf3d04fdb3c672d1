//! Unpacking incoming GTFS archives and packing transformed feeds back up.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to read archive {archive}: {reason}")]
    Read { archive: PathBuf, reason: String },
    #[error("failed to write archive {archive}: {reason}")]
    Write { archive: PathBuf, reason: String },
    #[error("nothing to pack in {0}")]
    Empty(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Extract every entry of `archive_path` below `dest_dir`.
///
/// Entries whose names would escape `dest_dir` are skipped. Returns the paths
/// of the extracted files.
pub fn unpack(archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    debug!(?archive_path, ?dest_dir, "unpacking archive");
    std::fs::create_dir_all(dest_dir)?;

    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ArchiveError::Read {
        archive: archive_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| ArchiveError::Read {
            archive: archive_path.to_path_buf(),
            reason: format!("entry {i}: {e}"),
        })?;

        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!(name = entry.name(), "skipping entry with unsafe path");
            continue;
        };
        let target = dest_dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        extracted.push(target);
    }

    info!(
        ?archive_path,
        extracted_count = extracted.len(),
        "archive unpacked"
    );
    Ok(extracted)
}

/// Write every regular file below `src_dir` into a new archive at `archive_path`.
///
/// Entry names are relative to `src_dir`, use `/` separators and are written in
/// sorted order so identical trees produce identical archives. Returns the
/// number of entries written.
pub fn pack(src_dir: &Path, archive_path: &Path) -> Result<usize, ArchiveError> {
    debug!(?src_dir, ?archive_path, "packing directory");

    let mut files = Vec::new();
    for entry in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| ArchiveError::Io(io::Error::other(e.to_string())))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    if files.is_empty() {
        return Err(ArchiveError::Empty(src_dir.to_path_buf()));
    }

    let write_err = |e: zip::result::ZipError| ArchiveError::Write {
        archive: archive_path.to_path_buf(),
        reason: e.to_string(),
    };

    let out = File::create(archive_path)?;
    let mut writer = ZipWriter::new(out);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in &files {
        let name = entry_name(src_dir, path)?;
        writer.start_file(name.as_str(), options).map_err(write_err)?;
        let mut input = File::open(path)?;
        io::copy(&mut input, &mut writer)?;
        debug!(entry = %name, "added archive entry");
    }
    writer.finish().map_err(write_err)?.flush()?;

    info!(?archive_path, entries = files.len(), "archive packed");
    Ok(files.len())
}

fn entry_name(root: &Path, path: &Path) -> Result<String, ArchiveError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| ArchiveError::Io(io::Error::other(e.to_string())))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}
