mod builtin;
mod external;
mod sevenz;

pub use builtin::BuiltinReader;
pub use external::ExternalArchiver;
pub use sevenz::SevenZipReader;

use std::fs;
use std::path::{Path, PathBuf};

use super::error::{BackendFailure, Result, UpdateError};
use super::fsutil;

/// Name under which a failed move of staged files is reported
pub const MERGE_STEP: &str = "merge";

/// One way of unpacking an archive.
pub trait ExtractBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Unpack `archive` into `dest`, an existing empty directory
    fn extract(&self, archive: &Path, dest: &Path) -> anyhow::Result<()>;
}

/// Ordered fallback over extraction backends. Every backend writes into its
/// own empty staging directory; only a successful attempt is merged into the
/// destination, so a backend that dies half way leaves nothing behind.
pub struct ArchiveExtractor {
    backends: Vec<Box<dyn ExtractBackend>>,
}

impl Default for ArchiveExtractor {
    /// Native 7z reader, then an external 7-Zip, then zip/tar.gz sniffing
    fn default() -> Self {
        Self::new(vec![
            Box::new(SevenZipReader),
            Box::new(ExternalArchiver::default()),
            Box::new(BuiltinReader),
        ])
    }
}

impl ArchiveExtractor {
    pub fn new(backends: Vec<Box<dyn ExtractBackend>>) -> Self {
        Self { backends }
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Try each backend in order until one succeeds, then move its output into
    /// `dest_dir`. Returns the name of the backend that won. `on_failure` sees
    /// every failed attempt as it happens, including a failed move into
    /// `dest_dir`, which is reported under the `merge` name.
    pub fn extract(
        &self,
        archive: &Path,
        dest_dir: &Path,
        on_failure: &mut dyn FnMut(&BackendFailure),
    ) -> Result<String> {
        let staging = staging_root(dest_dir).map_err(|e| UpdateError::Extraction {
            attempts: vec![BackendFailure {
                backend: "staging".to_string(),
                reason: format!("could not create staging directory: {}", e),
            }],
            install_touched: false,
        })?;

        let mut failures = Vec::new();

        for (index, backend) in self.backends.iter().enumerate() {
            let attempt_dir = staging.path().join(format!("{}-{}", index, backend.name()));
            tracing::debug!(backend = backend.name(), dir = %attempt_dir.display(), "extraction attempt");

            let outcome = fs::create_dir_all(&attempt_dir)
                .map_err(anyhow::Error::from)
                .and_then(|_| backend.extract(archive, &attempt_dir))
                .and_then(|_| {
                    if fsutil::has_entries(&attempt_dir) {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("extraction produced no files"))
                    }
                });

            match outcome {
                Ok(()) => {
                    tracing::info!(backend = backend.name(), "archive extracted");
                    return match fsutil::merge_tree(&attempt_dir, dest_dir) {
                        Ok(moved) => {
                            tracing::debug!(files = moved, dest = %dest_dir.display(), "staged files moved into place");
                            Ok(backend.name().to_string())
                        }
                        Err(e) => {
                            let failure = BackendFailure {
                                backend: MERGE_STEP.to_string(),
                                reason: format!(
                                    "could not move files extracted by {} into place: {:#}",
                                    backend.name(),
                                    e
                                ),
                            };
                            tracing::error!(reason = %failure.reason, "install left partially updated");
                            on_failure(&failure);
                            failures.push(failure);
                            Err(UpdateError::Extraction {
                                attempts: failures,
                                install_touched: true,
                            })
                        }
                    };
                }
                Err(e) => {
                    let failure = BackendFailure {
                        backend: backend.name().to_string(),
                        reason: format!("{:#}", e),
                    };
                    tracing::warn!(backend = backend.name(), reason = %failure.reason, "extraction backend failed");
                    on_failure(&failure);
                    failures.push(failure);
                    let _ = fsutil::remove_path(&attempt_dir);
                }
            }
        }

        Err(UpdateError::Extraction {
            attempts: failures,
            install_touched: false,
        })
    }
}

/// Staging lives next to the destination so the final move is a rename.
/// Falls back to the system temp dir when the parent is not writable.
fn staging_root(dest_dir: &Path) -> std::io::Result<tempfile::TempDir> {
    let parent: PathBuf = dest_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir);

    tempfile::Builder::new()
        .prefix(".freshen-staging-")
        .tempdir_in(&parent)
        .or_else(|_| tempfile::Builder::new().prefix("freshen-staging-").tempdir())
}
