use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::update::download::DEFAULT_OVERALL_TIMEOUT;

const DEFAULT_FEED_URL: &str = "https://api.github.com/repos/RemakePlace/app/releases/latest";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Version of the installed application; rewritten after every successful update
    pub current_version: String,

    pub installation_path: PathBuf,

    /// Application executable, relative to `installation_path`
    pub exe_relative_path: String,

    /// Paths under the install that belong to the user and survive updates
    pub preserve_relative_paths: Vec<String>,

    /// JSON settings files under the install: the user's values are kept and
    /// keys introduced by the new package are added
    pub merged_config_files: Vec<String>,

    pub update_feed_url: String,

    /// RFC 3339 time of the last successful update
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check_timestamp: Option<String>,

    /// Release asset suffix to look for
    pub archive_extension: String,

    /// Holds the download cache and the backup area
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,

    pub download_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            current_version: "0.0.0".to_string(),
            installation_path: PathBuf::new(),
            exe_relative_path: "Makeplace.exe".to_string(),
            preserve_relative_paths: vec!["Makeplace/Custom".to_string(), "Makeplace/Save".to_string()],
            merged_config_files: vec!["config.json".to_string()],
            update_feed_url: DEFAULT_FEED_URL.to_string(),
            last_check_timestamp: None,
            archive_extension: ".7z".to_string(),
            work_dir: None,
            download_timeout_secs: DEFAULT_OVERALL_TIMEOUT.as_secs(),
        }
    }
}

/// What is wrong with the configured installation, if anything
#[derive(Debug, Clone, PartialEq)]
pub enum InstallCheck {
    Ok,
    NotConfigured,
    MissingDirectory(PathBuf),
    MissingExecutable(PathBuf),
}

/// How an install run treats the target directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationMode {
    /// Existing install: user data is backed up and restored around extraction
    Update,
    /// Missing or empty directory: created if needed, nothing to preserve
    FreshInstall,
}

impl InstallationMode {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Update => "existing installation, user data will be preserved",
            Self::FreshInstall => "no existing installation, files will be installed fresh",
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Read the config at `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Write via a temp file in the same directory and rename over the target,
    /// so a crash never leaves a half-written config.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).context("Failed to create temp config")?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("freshen")
            .join("config.toml")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("freshen")
        })
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.work_dir().join("update_cache")
    }

    pub fn holding_dir(&self) -> PathBuf {
        self.work_dir().join("temp_backup")
    }

    /// `FreshInstall` when the install directory is missing or empty
    pub fn installation_mode(&self) -> InstallationMode {
        let empty = fs::read_dir(&self.installation_path)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true);
        if empty {
            InstallationMode::FreshInstall
        } else {
            InstallationMode::Update
        }
    }

    pub fn validate_installation(&self) -> InstallCheck {
        if self.installation_path.as_os_str().is_empty() {
            return InstallCheck::NotConfigured;
        }
        if !self.installation_path.is_dir() {
            return InstallCheck::MissingDirectory(self.installation_path.clone());
        }
        let exe = self.installation_path.join(&self.exe_relative_path);
        if !exe.is_file() {
            return InstallCheck::MissingExecutable(exe);
        }
        InstallCheck::Ok
    }
}
