use semver::Version;
use std::fmt;
use std::path::PathBuf;

use super::error::{BackendFailure, ErrorKind, UpdateError};

/// Pipeline state. `UpToDate`, `Complete` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Checking,
    UpdateAvailable,
    UpToDate,
    Downloading,
    Extracting,
    Restoring,
    Finalizing,
    Complete,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::UpToDate | Self::Complete | Self::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Checking => "checking for updates",
            Self::UpdateAvailable => "update available",
            Self::UpToDate => "up to date",
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::Restoring => "restoring user data",
            Self::Finalizing => "finalizing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Result of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    UpToDate,
    /// A newer version exists but installing it was not confirmed
    UpdateAvailable(Version),
    Complete(Version),
    Failed {
        kind: ErrorKind,
        /// Ready for display
        message: String,
        /// Technical description of the underlying error
        detail: String,
        attempts: Vec<BackendFailure>,
    },
}

impl Outcome {
    pub fn failed(err: &UpdateError) -> Self {
        Self::Failed {
            kind: err.kind(),
            message: err.user_message(),
            detail: err.to_string(),
            attempts: err.attempts().to_vec(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    Stage(Stage),
    /// `fraction` is 0 when the server did not say how large the asset is
    DownloadProgress { fraction: f64, bytes_per_second: f64 },
    CacheHit { path: PathBuf },
    BackendFailed(BackendFailure),
    Finished(Outcome),
}

/// Receives every notification of a run, from the thread the run executes on.
pub trait Observer: Send {
    fn notify(&self, event: &UpdateEvent);
}

impl<F> Observer for F
where
    F: Fn(&UpdateEvent) + Send,
{
    fn notify(&self, event: &UpdateEvent) {
        self(event)
    }
}

/// Observer that ignores everything
pub struct Silent;

impl Observer for Silent {
    fn notify(&self, _event: &UpdateEvent) {}
}
