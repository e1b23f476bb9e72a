use semver::Version;
use serde::Deserialize;
use std::time::Duration;

use super::error::{Result, UpdateError};
use super::version;

pub(crate) const USER_AGENT: &str = concat!("freshen/", env!("CARGO_PKG_VERSION"));
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// What a check learned about the newest release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub version: Version,
    pub download_url: Option<String>,
    pub asset_name: String,
    /// Size advertised by the feed, if any
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    UpToDate { latest: Version },
    Available(ReleaseInfo),
}

/// Fetches the release feed and decides whether an update applies.
pub struct VersionChecker {
    client: reqwest::blocking::Client,
    extension: String,
}

impl VersionChecker {
    pub fn new(extension: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(CHECK_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            extension: extension.into(),
        })
    }

    pub fn check(&self, feed_url: &str, local_version: &Version) -> Result<CheckResult> {
        tracing::debug!(feed_url, local = %local_version, "checking release feed");
        let release = self.fetch(feed_url)?;
        let remote = version::parse_remote(&release.tag_name)?;

        if !version::is_newer(&remote, local_version) {
            tracing::info!(latest = %remote, local = %local_version, "already up to date");
            return Ok(CheckResult::UpToDate { latest: remote });
        }

        let asset = select_asset(&release.assets, &self.extension).ok_or_else(|| {
            UpdateError::MissingAsset {
                version: remote.to_string(),
                extension: self.extension.clone(),
            }
        })?;

        tracing::info!(latest = %remote, asset = %asset.name, "update available");
        Ok(CheckResult::Available(ReleaseInfo {
            version: remote,
            download_url: Some(asset.browser_download_url.clone()),
            asset_name: asset.name.clone(),
            size: asset.size.filter(|s| *s > 0),
        }))
    }

    fn fetch(&self, feed_url: &str) -> Result<Release> {
        let response = self
            .client
            .get(feed_url)
            .header("Accept", "application/vnd.github+json")
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Network(format!(
                "release feed answered {}",
                status
            )));
        }

        let body = response.text()?;
        parse_release(&body)
    }
}

pub fn parse_release(body: &str) -> Result<Release> {
    serde_json::from_str(body).map_err(|e| UpdateError::Parse(e.to_string()))
}

/// First asset in feed order whose name carries the archive extension
pub fn select_asset<'a>(assets: &'a [Asset], extension: &str) -> Option<&'a Asset> {
    assets.iter().find(|a| a.name.ends_with(extension))
}
