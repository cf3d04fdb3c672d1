//! Per-invocation scratch directories.
//!
//! Every invocation gets its own uniquely named directory, so two invocations
//! sharing a host never touch each other's files. The directory disappears when
//! the [`Workspace`] is dropped.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::WorkspaceConfig;

pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create(config: &WorkspaceConfig) -> io::Result<Self> {
        std::fs::create_dir_all(&config.root)?;
        let dir = tempfile::Builder::new()
            .prefix(&config.prefix)
            .tempdir_in(&config.root)?;
        debug!(path = %dir.path().display(), "Created workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The archive as downloaded.
    pub fn source_archive(&self) -> PathBuf {
        self.path().join("source.zip")
    }

    pub fn script(&self) -> PathBuf {
        self.path().join("transform.txt")
    }

    /// Unpacked feed handed to the transformer.
    pub fn input_dir(&self) -> PathBuf {
        self.path().join("input")
    }

    /// Where the transformer writes the edited feed.
    pub fn output_dir(&self) -> PathBuf {
        self.path().join("output")
    }

    pub fn packed_archive(&self) -> PathBuf {
        self.path().join("transformed.zip")
    }

    /// Remove the directory now and report failures, instead of silently on drop.
    pub fn close(self) -> io::Result<()> {
        let path = self.path().to_path_buf();
        self.dir.close()?;
        debug!(path = %path.display(), "Removed workspace");
        Ok(())
    }
}

/// Delete workspace directories left behind by invocations that never got to
/// clean up (a crash or a platform timeout). Only directories carrying the
/// workspace prefix and untouched for `stale_after_secs` are removed. Returns
/// how many were deleted.
pub fn sweep_stale(config: &WorkspaceConfig) -> usize {
    let entries = match std::fs::read_dir(&config.root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(root = %config.root.display(), error = %e, "Cannot list workspace root");
            return 0;
        }
    };

    let max_age = Duration::from_secs(config.stale_after_secs);
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(&config.prefix) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_dir() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                removed += 1;
                debug!(path = %entry.path().display(), age_secs = age.as_secs(), "Removed stale workspace");
            }
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove stale workspace"),
        }
    }

    if removed > 0 {
        info!(removed, root = %config.root.display(), "Swept stale workspaces");
    }
    removed
}
