use anyhow::{bail, Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::ExtractBackend;

/// Where 7-Zip usually lives, in search order
const CANDIDATES: &[&str] = &[
    "7z",
    "7za",
    "7zz",
    r"C:\Program Files\7-Zip\7z.exe",
    r"C:\Program Files (x86)\7-Zip\7z.exe",
];

const RUN_TIMEOUT: Duration = Duration::from_secs(300);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shells out to a 7-Zip command line found on this machine
pub struct ExternalArchiver {
    candidates: Vec<String>,
    timeout: Duration,
}

impl Default for ExternalArchiver {
    fn default() -> Self {
        Self::with_candidates(CANDIDATES.iter().map(|c| c.to_string()))
    }
}

impl ExternalArchiver {
    pub fn with_candidates<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
            timeout: RUN_TIMEOUT,
        }
    }

    /// First candidate that exists: absolute paths are checked directly,
    /// bare names are looked up on PATH.
    pub fn locate(&self) -> Option<PathBuf> {
        self.candidates.iter().find_map(|candidate| {
            let path = Path::new(candidate);
            if path.is_absolute() {
                path.is_file().then(|| path.to_path_buf())
            } else {
                which::which(candidate).ok()
            }
        })
    }
}

impl ExtractBackend for ExternalArchiver {
    fn name(&self) -> &str {
        "7z-cli"
    }

    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        let Some(exe) = self.locate() else {
            bail!(
                "no 7-Zip executable found (tried: {})",
                if self.candidates.is_empty() {
                    "nothing".to_string()
                } else {
                    self.candidates.join(", ")
                }
            );
        };
        tracing::debug!(exe = %exe.display(), "using external 7-Zip");

        let mut child = Command::new(&exe)
            .arg("x")
            .arg(archive)
            .arg(format!("-o{}", dest.display()))
            .arg("-y")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", exe.display()))?;

        // Drain stderr so a chatty archiver cannot block on a full pipe
        let stderr = child.stderr.take();
        let collector = thread::spawn(move || {
            let mut text = String::new();
            if let Some(mut pipe) = stderr {
                let _ = pipe.read_to_string(&mut text);
            }
            text
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().context("Failed to wait for 7-Zip")? {
                break status;
            }
            if started.elapsed() > self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                bail!("7-Zip did not finish within {}s", self.timeout.as_secs());
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stderr = collector.join().unwrap_or_default();
        if !status.success() {
            let detail = if stderr.trim().is_empty() {
                format!("exit code {}", status.code().unwrap_or(-1))
            } else {
                stderr.trim().to_string()
            };
            bail!("7-Zip extraction failed: {}", detail);
        }

        Ok(())
    }
}
