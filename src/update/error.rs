use std::fmt;
use thiserror::Error;

const ARCHIVER_HINT: &str =
    "Please install 7-Zip from https://www.7-zip.org/ and try again.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    #[error("received {actual} of {expected} bytes")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Writing the destination file failed.
    #[error("could not write {path}: {reason}")]
    Write { path: String, reason: String },
}

/// One extraction backend's failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub backend: String,
    pub reason: String,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.reason)
    }
}

/// Every stage converts its lower-level failures into one of these variants
/// before returning.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Feed or asset unreachable, timed out, or answered with a non-success status.
    #[error("network error: {0}")]
    Network(String),

    /// Feed body could not be understood.
    #[error("could not parse release feed: {0}")]
    Parse(String),

    /// A newer release exists but carries no asset we can install.
    #[error("version {version} is available but has no '{extension}' asset")]
    MissingAsset { version: String, extension: String },

    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    /// Every extraction backend failed, or moving the extracted files into
    /// the install failed. `install_touched` is set in the second case: the
    /// install may then hold a mix of old and new files.
    #[error("{}", extraction_message(.attempts, .install_touched))]
    Extraction {
        attempts: Vec<BackendFailure>,
        install_touched: bool,
    },

    /// Backing up or restoring preserved user data failed.
    #[error("could not preserve user data: {0}")]
    Restore(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("another update is already running")]
    Busy,
}

/// Discriminant of [`UpdateError`], used on the result surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Parse,
    MissingAsset,
    Download,
    Extraction,
    Restore,
    Config,
    Busy,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parse => "parse",
            Self::MissingAsset => "missing-asset",
            Self::Download => "download",
            Self::Extraction => "extraction",
            Self::Restore => "restore",
            Self::Config => "config",
            Self::Busy => "busy",
        }
    }
}

impl UpdateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Parse(_) => ErrorKind::Parse,
            Self::MissingAsset { .. } => ErrorKind::MissingAsset,
            Self::Download(_) => ErrorKind::Download,
            Self::Extraction { .. } => ErrorKind::Extraction,
            Self::Restore(_) => ErrorKind::Restore,
            Self::Config(_) => ErrorKind::Config,
            Self::Busy => ErrorKind::Busy,
        }
    }

    /// Short text suitable for showing to an end user as-is.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => {
                "Could not reach the update server. Please check your internet connection."
                    .to_string()
            }
            Self::Parse(_) => "The update server returned an unexpected response.".to_string(),
            Self::MissingAsset { version, .. } => format!(
                "Version {} is available but no installable package was published for it.",
                version
            ),
            Self::Download(DownloadError::SizeMismatch { .. }) => {
                "The download was interrupted. Please try again.".to_string()
            }
            Self::Download(DownloadError::Write { .. }) => {
                "Could not save the update package. Check free disk space.".to_string()
            }
            Self::Extraction {
                install_touched: true,
                ..
            } => "The update could not be fully installed. Please run the update again.".to_string(),
            Self::Extraction { .. } => format!(
                "Could not extract the update package. {}",
                ARCHIVER_HINT
            ),
            Self::Restore(_) => "Could not preserve your data during the update.".to_string(),
            Self::Config(detail) => format!("Settings problem: {}", detail),
            Self::Busy => "An update is already in progress.".to_string(),
        }
    }

    /// Whether re-running the pipeline may succeed without user intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Download(DownloadError::SizeMismatch { .. }) | Self::Busy
        )
    }

    /// Backend diagnostics, empty for anything but extraction failures.
    pub fn attempts(&self) -> &[BackendFailure] {
        match self {
            Self::Extraction { attempts, .. } => attempts,
            _ => &[],
        }
    }

    /// True when the failure happened after files were written into the install
    pub fn install_touched(&self) -> bool {
        matches!(
            self,
            Self::Extraction {
                install_touched: true,
                ..
            }
        )
    }
}

fn extraction_message(attempts: &[BackendFailure], install_touched: &bool) -> String {
    if *install_touched {
        let reason = attempts.last().map(|a| a.reason.as_str()).unwrap_or("unknown error");
        return format!("extracted files could not be moved into the install: {}", reason);
    }
    let Some(primary) = attempts.first() else {
        return "no extraction backend is configured".to_string();
    };

    let mut msg = format!("failed to extract archive: {}", primary.reason);
    if primary.reason.contains("BCJ2") {
        msg.push_str(" (the package uses the BCJ2 filter, which needs an external 7-Zip)");
    }
    msg.push_str(". ");
    msg.push_str(ARCHIVER_HINT);

    msg.push_str("\nattempted backends:");
    for attempt in attempts {
        msg.push_str(&format!("\n  - {}", attempt));
    }
    msg
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
