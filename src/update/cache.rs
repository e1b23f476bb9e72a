use anyhow::{Context, Result};
use semver::Version;
use std::fs;
use std::path::{Path, PathBuf};

/// A downloaded archive retained between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub version: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Owns the update cache directory: one file per retained version, named
/// `v{version}_{asset}`.
pub struct CacheManager {
    dir: PathBuf,
}

impl CacheManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Canonical cache path for an asset of a given version
    pub fn resolve(&self, version: &Version, asset_name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", prefix(&version.to_string()), asset_name))
    }

    /// Returns the entry if a complete download is already cached.
    /// A file counts as complete when it is non-empty and matches the size
    /// the feed declared, if it declared one.
    pub fn lookup(
        &self,
        version: &Version,
        asset_name: &str,
        expected_size: Option<u64>,
    ) -> Option<CacheEntry> {
        let path = self.resolve(version, asset_name);
        let size = fs::metadata(&path).ok().filter(|m| m.is_file())?.len();

        if size == 0 {
            tracing::debug!(path = %path.display(), "cached file is empty, ignoring");
            return None;
        }
        if let Some(expected) = expected_size {
            if expected != size {
                tracing::debug!(expected, actual = size, "cached file size mismatch, ignoring");
                return None;
            }
        }

        Some(CacheEntry {
            version: version.to_string(),
            path,
            size_bytes: size,
        })
    }

    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir).context("Failed to read cache directory")? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(version) = version_of(&path) else {
                continue;
            };
            entries.push(CacheEntry {
                version,
                size_bytes: entry.metadata()?.len(),
                path,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Delete every cached file that does not belong to `keep_version`, then
    /// remove the directory if nothing is left. Returns the number of files removed.
    pub fn prune(&self, keep_version: &Version) -> Result<usize> {
        let keep = prefix(&keep_version.to_string());
        self.remove_matching(|name| !name.starts_with(&keep) || name.ends_with(".part"))
    }

    /// Remove the whole cache
    pub fn clear(&self) -> Result<usize> {
        self.remove_matching(|_| true)
    }

    fn remove_matching(&self, should_remove: impl Fn(&str) -> bool) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.dir).context("Failed to read cache directory")? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if !should_remove(name) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove cache file"),
            }
        }

        let is_empty = fs::read_dir(&self.dir)
            .map(|mut d| d.next().is_none())
            .unwrap_or(false);
        if is_empty {
            fs::remove_dir(&self.dir).context("Failed to remove empty cache directory")?;
        }

        if removed > 0 {
            tracing::info!(removed, "cleaned up cached files");
        }
        Ok(removed)
    }
}

fn prefix(version: &str) -> String {
    format!("v{}_", version)
}

/// Version encoded in a cache file name, if it follows the naming scheme
fn version_of(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_prefix('v')?;
    let (version, _) = rest.split_once('_')?;
    Some(version.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let cache = CacheManager::new("/var/cache/freshen");
        let a = cache.resolve(&v("1.2.0"), "pkg-1.2.0.7z");
        assert_eq!(a, PathBuf::from("/var/cache/freshen/v1.2.0_pkg-1.2.0.7z"));
        assert_eq!(a, cache.resolve(&v("1.2.0"), "pkg-1.2.0.7z"));
        assert_ne!(a, cache.resolve(&v("1.2.1"), "pkg-1.2.0.7z"));
    }

    #[test]
    fn test_lookup_requires_complete_file() {
        let dir = tempdir().unwrap();
        let cache = CacheManager::new(dir.path());
        let version = v("1.2.0");

        assert!(cache.lookup(&version, "pkg.7z", None).is_none());

        let path = cache.resolve(&version, "pkg.7z");
        fs::write(&path, b"").unwrap();
        assert!(cache.lookup(&version, "pkg.7z", None).is_none());

        fs::write(&path, b"archive").unwrap();
        assert!(cache.lookup(&version, "pkg.7z", Some(100)).is_none());

        let hit = cache.lookup(&version, "pkg.7z", Some(7)).unwrap();
        assert_eq!(hit.size_bytes, 7);
        assert_eq!(hit.version, "1.2.0");
        assert!(cache.lookup(&version, "pkg.7z", None).is_some());
    }

    #[test]
    fn test_prune_keeps_only_current_version() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().join("update_cache");
        fs::create_dir_all(&cache_dir).unwrap();
        let cache = CacheManager::new(&cache_dir);

        for name in [
            "v1.0.0_pkg.7z",
            "v2.2.9_pkg.7z",
            "v2.3.0_pkg.7z",
            "v2.3.0_pkg.7z.part",
            "v2.3.0-rc.1_pkg.7z",
        ] {
            fs::write(cache_dir.join(name), b"data").unwrap();
        }

        let removed = cache.prune(&v("2.3.0")).unwrap();
        assert_eq!(removed, 4);

        let entries = cache.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version, "2.3.0");
        assert!(cache_dir.join("v2.3.0_pkg.7z").exists());
    }

    #[test]
    fn test_prune_removes_empty_directory() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().join("update_cache");
        fs::create_dir_all(&cache_dir).unwrap();
        fs::write(cache_dir.join("v1.0.0_pkg.7z"), b"old").unwrap();

        let cache = CacheManager::new(&cache_dir);
        assert_eq!(cache.prune(&v("2.0.0")).unwrap(), 1);
        assert!(!cache_dir.exists());

        // Missing directory is not an error
        assert_eq!(cache.prune(&v("2.0.0")).unwrap(), 0);
        assert!(cache.entries().unwrap().is_empty());
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let cache = CacheManager::new(dir.path().join("c"));
        fs::create_dir_all(cache.dir()).unwrap();
        fs::write(cache.resolve(&v("1.0.0"), "a.7z"), b"a").unwrap();
        fs::write(cache.resolve(&v("2.0.0"), "b.7z"), b"b").unwrap();

        assert_eq!(cache.clear().unwrap(), 2);
        assert!(!cache.dir().exists());
    }
}
