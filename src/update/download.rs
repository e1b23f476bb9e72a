use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::error::{DownloadError, Result, UpdateError};
use super::feed::USER_AGENT;

const CHUNK_SIZE: usize = 8192;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_OVERALL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Streams release assets to disk. Never leaves a partial file at the destination.
pub struct Downloader {
    client: reqwest::blocking::Client,
    overall_timeout: Duration,
}

impl Downloader {
    pub fn new(overall_timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            overall_timeout,
        })
    }

    /// Download `url` to `dest`, calling `on_progress(fraction, bytes_per_second)`
    /// after every chunk. Fraction stays 0 when the server sends no length.
    ///
    /// Returns the number of bytes written.
    pub fn download<F>(&self, url: &str, dest: &Path, mut on_progress: F) -> Result<u64>
    where
        F: FnMut(f64, f64),
    {
        let part = part_path(dest);
        tracing::info!(url, dest = %dest.display(), "downloading");

        let result = self
            .stream_to(url, &part, &mut on_progress)
            .and_then(|bytes| {
                fs::rename(&part, dest).map_err(|e| write_error(dest, &e))?;
                Ok(bytes)
            });

        if let Err(e) = &result {
            tracing::warn!(error = %e, "download failed, removing partial file");
            let _ = fs::remove_file(&part);
            let _ = fs::remove_file(dest);
        }
        result
    }

    fn stream_to(
        &self,
        url: &str,
        part: &Path,
        on_progress: &mut dyn FnMut(f64, f64),
    ) -> Result<u64> {
        // The request deadline also covers every body read, so a silent
        // connection cannot block past it.
        let mut response = self
            .client
            .get(url)
            .timeout(self.overall_timeout)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    self.stalled()
                } else {
                    UpdateError::from(e)
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Network(format!("download answered {}", status)));
        }

        let total = response.content_length();
        if let Some(parent) = part.parent() {
            fs::create_dir_all(parent).map_err(|e| write_error(parent, &e))?;
        }
        let mut file = File::create(part).map_err(|e| write_error(part, &e))?;

        let started = Instant::now();
        let mut downloaded: u64 = 0;
        let mut buffer = [0u8; CHUNK_SIZE];

        loop {
            if started.elapsed() > self.overall_timeout {
                return Err(self.stalled());
            }

            let bytes_read = response.read(&mut buffer).map_err(|e| {
                if e.kind() == std::io::ErrorKind::TimedOut {
                    self.stalled()
                } else {
                    UpdateError::Network(format!("transfer interrupted: {}", e))
                }
            })?;
            if bytes_read == 0 {
                break;
            }
            file.write_all(&buffer[..bytes_read])
                .map_err(|e| write_error(part, &e))?;
            downloaded += bytes_read as u64;

            let fraction = match total {
                Some(t) if t > 0 => (downloaded as f64 / t as f64).min(1.0),
                _ => 0.0,
            };
            let elapsed = started.elapsed().as_secs_f64();
            let speed = if elapsed > 0.0 {
                downloaded as f64 / elapsed
            } else {
                0.0
            };
            on_progress(fraction, speed);
        }

        file.sync_all().map_err(|e| write_error(part, &e))?;

        check_size(total, downloaded)?;

        tracing::debug!(bytes = downloaded, "download complete");
        Ok(downloaded)
    }

    fn stalled(&self) -> UpdateError {
        UpdateError::Network(format!(
            "download stalled: not finished after {}s",
            self.overall_timeout.as_secs()
        ))
    }
}

/// The server's declared length, when it sent one, must match what arrived
fn check_size(declared: Option<u64>, received: u64) -> Result<()> {
    match declared {
        Some(expected) if expected != received => Err(DownloadError::SizeMismatch {
            expected,
            actual: received,
        }
        .into()),
        _ => Ok(()),
    }
}

/// In-progress sibling of `dest`
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

fn write_error(path: &Path, err: &std::io::Error) -> UpdateError {
    DownloadError::Write {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
    .into()
}
