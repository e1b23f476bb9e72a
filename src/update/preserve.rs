use anyhow::{bail, Context};
use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};

use super::error::{Result, UpdateError};
use super::fsutil;

/// Snapshot of preserved paths, held for the duration of one pipeline run.
#[derive(Debug)]
pub struct HoldingArea {
    root: PathBuf,
}

impl HoldingArea {
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// True if `relative` was present at backup time
    pub fn contains(&self, relative: &str) -> bool {
        self.root.join(relative).exists()
    }

    pub fn discard(self) {
        if let Err(e) = fsutil::remove_path(&self.root) {
            tracing::warn!(path = %self.root.display(), error = %e, "could not remove holding area");
        }
    }
}

/// Keeps user-owned paths (saves, custom content) alive across an overwrite.
pub struct DataPreserver {
    holding_dir: PathBuf,
    /// JSON files merged on restore instead of replaced
    merged_files: Vec<String>,
}

impl DataPreserver {
    pub fn new(holding_dir: impl Into<PathBuf>) -> Self {
        Self {
            holding_dir: holding_dir.into(),
            merged_files: Vec::new(),
        }
    }

    /// Settings files the package ships defaults for. On restore the user's
    /// values win and keys new in the package are added.
    pub fn with_merged_files(mut self, files: Vec<String>) -> Self {
        self.merged_files = files;
        self
    }

    /// Copy every existing preserved path, and every merged file, out of the
    /// install. Paths that do not exist yet are skipped.
    pub fn backup(&self, install_path: &Path, relative_paths: &[String]) -> Result<HoldingArea> {
        self.snapshot(install_path, relative_paths)
            .map_err(|e| UpdateError::Restore(format!("backup failed: {:#}", e)))
    }

    /// Put backed-up paths back, replacing whatever the new package wrote there.
    pub fn restore(
        &self,
        holding: &HoldingArea,
        install_path: &Path,
        relative_paths: &[String],
    ) -> Result<()> {
        for relative in relative_paths {
            let source = holding.root.join(relative);
            if !source.exists() {
                continue;
            }
            let target = install_path.join(relative);

            fsutil::remove_path(&target)
                .and_then(|_| fsutil::copy_recursively(&source, &target))
                .map_err(|e| UpdateError::Restore(format!("restoring {} failed: {:#}", relative, e)))?;
            tracing::debug!(path = %relative, "restored preserved path");
        }

        for relative in &self.merged_files {
            let source = holding.root.join(relative);
            if !source.is_file() {
                continue;
            }
            let target = install_path.join(relative);

            if let Err(e) = merge_json_file(&source, &target) {
                tracing::warn!(path = %relative, error = ?e, "merge failed, restoring user copy as-is");
                fsutil::copy_recursively(&source, &target).map_err(|e| {
                    UpdateError::Restore(format!("restoring {} failed: {:#}", relative, e))
                })?;
            }
        }
        Ok(())
    }

    fn snapshot(&self, install_path: &Path, relative_paths: &[String]) -> anyhow::Result<HoldingArea> {
        for relative in relative_paths.iter().chain(&self.merged_files) {
            check_relative(relative)?;
        }

        self.set_aside_stale()?;
        fs::create_dir_all(&self.holding_dir)
            .with_context(|| format!("Failed to create {}", self.holding_dir.display()))?;
        let holding = HoldingArea {
            root: self.holding_dir.clone(),
        };

        let copied = relative_paths
            .iter()
            .chain(&self.merged_files)
            .try_for_each(|relative| -> anyhow::Result<()> {
                let source = install_path.join(relative);
                if !source.exists() {
                    tracing::debug!(path = %relative, "preserved path absent, skipping");
                    return Ok(());
                }
                fsutil::copy_recursively(&source, &holding.root.join(relative))?;
                tracing::debug!(path = %relative, "backed up preserved path");
                Ok(())
            });

        // A partial snapshot is useless and would be set aside by the next run
        if let Err(e) = copied {
            holding.discard();
            return Err(e);
        }
        Ok(holding)
    }

    /// A holding area left by a failed run may be the only copy of the user's
    /// data, so it is renamed rather than overwritten.
    fn set_aside_stale(&self) -> anyhow::Result<()> {
        if !self.holding_dir.exists() {
            return Ok(());
        }

        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
        let mut name = self
            .holding_dir
            .file_name()
            .unwrap_or_default()
            .to_os_string();
        name.push(format!("-{}", stamp));
        let aside = self.holding_dir.with_file_name(name);

        fs::rename(&self.holding_dir, &aside)
            .with_context(|| format!("Failed to set aside stale backup {}", self.holding_dir.display()))?;
        tracing::warn!(path = %aside.display(), "kept backup left by an earlier failed update");
        Ok(())
    }
}

/// Preserved paths must name something strictly inside the install directory
fn check_relative(relative: &str) -> anyhow::Result<()> {
    let mut named = false;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(_) => named = true,
            Component::CurDir => {}
            _ => bail!("preserved path '{}' must be relative to the install directory", relative),
        }
    }
    if !named {
        bail!("preserved path '{}' does not name anything inside the install", relative);
    }
    Ok(())
}

/// Merge the user's copy at `user_path` into the package's copy at
/// `package_path`, writing the result to `package_path`.
fn merge_json_file(user_path: &Path, package_path: &Path) -> anyhow::Result<()> {
    let user = fs::read_to_string(user_path)
        .with_context(|| format!("Failed to read {}", user_path.display()))?;
    let mut merged: Value = serde_json::from_str(&user)
        .with_context(|| format!("Failed to parse {}", user_path.display()))?;

    if package_path.is_file() {
        let shipped = fs::read_to_string(package_path)
            .with_context(|| format!("Failed to read {}", package_path.display()))?;
        let shipped: Value = serde_json::from_str(&shipped)
            .with_context(|| format!("Failed to parse {}", package_path.display()))?;
        add_missing_keys(&mut merged, &shipped);
    }

    let content = serde_json::to_string_pretty(&merged).context("Failed to serialize merged settings")?;
    fs::write(package_path, content)
        .with_context(|| format!("Failed to write {}", package_path.display()))?;
    Ok(())
}

/// Copy keys present only in `shipped` into `user`, recursing into objects
/// both sides have. Existing user values are never changed.
fn add_missing_keys(user: &mut Value, shipped: &Value) {
    let (Some(user), Some(shipped)) = (user.as_object_mut(), shipped.as_object()) else {
        return;
    };
    for (key, value) in shipped {
        match user.get_mut(key) {
            Some(existing) => add_missing_keys(existing, value),
            None => {
                tracing::debug!(key = %key, "adding new setting from package");
                user.insert(key.clone(), value.clone());
            }
        }
    }
}
