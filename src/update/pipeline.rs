use semver::Version;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::cache::CacheManager;
use super::download::Downloader;
use super::error::{BackendFailure, Result, UpdateError};
use super::events::{Observer, Outcome, Stage, UpdateEvent};
use super::extract::ArchiveExtractor;
use super::feed::{CheckResult, ReleaseInfo, VersionChecker};
use super::preserve::{DataPreserver, HoldingArea};
use super::version;
use crate::config::{Config, InstallationMode};

static ACTIVE: AtomicBool = AtomicBool::new(false);

/// Held for the duration of a run; at most one exists per process.
pub(crate) struct RunGuard(());

impl RunGuard {
    pub(crate) fn acquire() -> Option<Self> {
        ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(()))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        ACTIVE.store(false, Ordering::Release);
    }
}

/// The update state machine. Stages run strictly in sequence and the first
/// failure aborts the run. What is left behind on failure:
/// - download failure: no partial file, other cache entries untouched
/// - extraction failure: backup discarded, install untouched
/// - failure while moving extracted files into the install: preserved paths
///   are put back from the backup; if that fails too the backup is kept
/// - restore failure: backup kept in the holding area for manual recovery
///
/// Moving the staged files into the install is done file by file, so the
/// third case can leave program files from both versions side by side.
pub struct UpdatePipeline {
    config: Config,
    config_path: PathBuf,
    checker: VersionChecker,
    downloader: Downloader,
    cache: CacheManager,
    extractor: ArchiveExtractor,
    preserver: DataPreserver,
    stage: Stage,
}

impl UpdatePipeline {
    /// Build a pipeline from the config stored at `config_path`
    pub fn open(config_path: &Path) -> Result<Self> {
        let config = Config::load_from(config_path)
            .map_err(|e| UpdateError::Config(format!("{:#}", e)))?;
        Self::new(config, config_path.to_path_buf())
    }

    pub fn new(config: Config, config_path: PathBuf) -> Result<Self> {
        let checker = VersionChecker::new(config.archive_extension.clone())?;
        let downloader = Downloader::new(Duration::from_secs(config.download_timeout_secs))?;
        let cache = CacheManager::new(config.cache_dir());
        let preserver = DataPreserver::new(config.holding_dir())
            .with_merged_files(config.merged_config_files.clone());

        Ok(Self {
            config,
            config_path,
            checker,
            downloader,
            cache,
            extractor: ArchiveExtractor::default(),
            preserver,
            stage: Stage::Idle,
        })
    }

    pub fn with_extractor(mut self, extractor: ArchiveExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Check only; never installs
    pub fn check(&mut self, observer: &dyn Observer) -> Outcome {
        self.run(observer, &mut |_: &ReleaseInfo| false)
    }

    /// Run the whole pipeline. `confirm` is asked once an update is found;
    /// answering false ends the run with [`Outcome::UpdateAvailable`].
    pub fn run(
        &mut self,
        observer: &dyn Observer,
        confirm: &mut dyn FnMut(&ReleaseInfo) -> bool,
    ) -> Outcome {
        let outcome = match RunGuard::acquire() {
            Some(_guard) => match self.execute(observer, confirm) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(stage = %self.stage, error = %e, "update failed");
                    self.enter(observer, Stage::Failed);
                    Outcome::failed(&e)
                }
            },
            None => Outcome::failed(&UpdateError::Busy),
        };

        observer.notify(&UpdateEvent::Finished(outcome.clone()));
        outcome
    }

    fn enter(&mut self, observer: &dyn Observer, stage: Stage) {
        tracing::debug!(from = %self.stage, to = %stage, "stage transition");
        self.stage = stage;
        observer.notify(&UpdateEvent::Stage(stage));
    }

    fn execute(
        &mut self,
        observer: &dyn Observer,
        confirm: &mut dyn FnMut(&ReleaseInfo) -> bool,
    ) -> Result<Outcome> {
        self.stage = Stage::Idle;
        self.enter(observer, Stage::Checking);

        let local = version::parse_local(&self.config.current_version)?;
        let release = match self.checker.check(&self.config.update_feed_url, &local)? {
            CheckResult::UpToDate { .. } => {
                self.enter(observer, Stage::UpToDate);
                return Ok(Outcome::UpToDate);
            }
            CheckResult::Available(release) => release,
        };

        self.enter(observer, Stage::UpdateAvailable);
        if !confirm(&release) {
            tracing::info!(version = %release.version, "update not confirmed");
            return Ok(Outcome::UpdateAvailable(release.version));
        }

        self.install(observer, &release)?;
        Ok(Outcome::Complete(release.version))
    }

    fn install(&mut self, observer: &dyn Observer, release: &ReleaseInfo) -> Result<()> {
        let archive = self.fetch_archive(observer, release)?;

        self.enter(observer, Stage::Extracting);
        let install_path = self.config.installation_path.clone();
        if install_path.as_os_str().is_empty() {
            return Err(UpdateError::Config("no installation path configured".to_string()));
        }
        let preserved = self.config.preserve_relative_paths.clone();

        let holding = match self.config.installation_mode() {
            InstallationMode::Update => Some(self.preserver.backup(&install_path, &preserved)?),
            InstallationMode::FreshInstall => {
                tracing::info!(path = %install_path.display(), "fresh install, nothing to preserve");
                fs::create_dir_all(&install_path).map_err(|e| {
                    UpdateError::Config(format!(
                        "could not create installation directory {}: {}",
                        install_path.display(),
                        e
                    ))
                })?;
                None
            }
        };

        let extracted = self.extractor.extract(&archive, &install_path, &mut |failure: &BackendFailure| {
            observer.notify(&UpdateEvent::BackendFailed(failure.clone()))
        });
        if let Err(e) = extracted {
            return Err(self.recover(holding, &install_path, &preserved, e));
        }

        if let Some(holding) = &holding {
            self.enter(observer, Stage::Restoring);
            self.preserver.restore(holding, &install_path, &preserved)?;
        }

        self.enter(observer, Stage::Finalizing);
        self.persist_version(&release.version)?;
        if let Err(e) = self.cache.prune(&release.version) {
            tracing::warn!(error = %e, "cache cleanup failed");
        }
        if let Some(holding) = holding {
            holding.discard();
        }

        self.enter(observer, Stage::Complete);
        tracing::info!(version = %release.version, "update installed");
        Ok(())
    }

    /// Decide what happens to the backup after extraction failed. When the
    /// install was already written to, the preserved paths are put back first;
    /// the backup survives only if that fails.
    fn recover(
        &self,
        holding: Option<HoldingArea>,
        install_path: &Path,
        preserved: &[String],
        err: UpdateError,
    ) -> UpdateError {
        let Some(holding) = holding else {
            return err;
        };
        if !err.install_touched() {
            holding.discard();
            return err;
        }

        match self.preserver.restore(&holding, install_path, preserved) {
            Ok(()) => {
                tracing::warn!("install partially updated, user data put back");
                holding.discard();
                err
            }
            Err(restore_err) => {
                tracing::error!(
                    backup = %holding.path().display(),
                    error = %restore_err,
                    "user data could not be put back after a partial install"
                );
                UpdateError::Restore(format!(
                    "{}; putting user data back also failed ({}); backup kept at {}",
                    err,
                    restore_err,
                    holding.path().display()
                ))
            }
        }
    }

    /// Cached archive for the release, downloading it first on a cache miss
    fn fetch_archive(&mut self, observer: &dyn Observer, release: &ReleaseInfo) -> Result<PathBuf> {
        if let Some(entry) = self
            .cache
            .lookup(&release.version, &release.asset_name, release.size)
        {
            tracing::info!(path = %entry.path.display(), "using cached download");
            observer.notify(&UpdateEvent::CacheHit {
                path: entry.path.clone(),
            });
            return Ok(entry.path);
        }

        self.enter(observer, Stage::Downloading);
        let url = release
            .download_url
            .as_deref()
            .ok_or_else(|| UpdateError::MissingAsset {
                version: release.version.to_string(),
                extension: self.config.archive_extension.clone(),
            })?;
        let dest = self.cache.resolve(&release.version, &release.asset_name);

        self.downloader.download(url, &dest, |fraction, bytes_per_second| {
            observer.notify(&UpdateEvent::DownloadProgress {
                fraction,
                bytes_per_second,
            })
        })?;
        Ok(dest)
    }

    /// Record the new version with write-then-rename; nothing else in the
    /// config changes.
    fn persist_version(&mut self, new_version: &Version) -> Result<()> {
        let mut updated = self.config.clone();
        updated.current_version = new_version.to_string();
        updated.last_check_timestamp = Some(chrono::Local::now().to_rfc3339());

        updated
            .save_to(&self.config_path)
            .map_err(|e| UpdateError::Config(format!("could not record new version: {:#}", e)))?;
        self.config = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feed_json, serial, zip_bytes, FixtureServer, Route};
    use crate::update::error::ErrorKind;
    use crate::update::extract::{BuiltinReader, ExtractBackend, ExternalArchiver};
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::{tempdir, TempDir};

    const PACKAGE: &[(&str, &str)] = &[
        ("Makeplace.exe", "new binary"),
        ("Makeplace/Save/settings.ini", "volume=10"),
        ("Makeplace/Data/items.json", "[1,2,3]"),
    ];

    struct Fixture {
        _dir: TempDir,
        server: FixtureServer,
        config_path: PathBuf,
        install: PathBuf,
        work: PathBuf,
    }

    impl Fixture {
        fn new(local_version: &str, tag: &str, asset: &str, package: Vec<u8>) -> Self {
            let dir = tempdir().unwrap();
            let install = dir.path().join("install");
            fs::create_dir_all(install.join("Makeplace/Save")).unwrap();
            fs::write(install.join("Makeplace.exe"), "old binary").unwrap();
            fs::write(install.join("Makeplace/Save/settings.ini"), "volume=3").unwrap();
            fs::write(install.join("Makeplace/Save/slot1.json"), r#"{"house":1}"#).unwrap();

            let server = FixtureServer::start();
            let asset_path = format!("/download/{}", asset);
            let asset_url = server.url(&asset_path);
            server.route("/latest", Route::ok(feed_json(tag, &[(asset, asset_url.as_str())])));
            server.route(&asset_path, Route::ok(package));

            let work = dir.path().join("work");
            let config = Config {
                current_version: local_version.to_string(),
                installation_path: install.clone(),
                preserve_relative_paths: vec!["Makeplace/Save".into(), "Makeplace/Custom".into()],
                update_feed_url: server.url("/latest"),
                work_dir: Some(work.clone()),
                ..Config::default()
            };
            let config_path = dir.path().join("config.toml");
            config.save_to(&config_path).unwrap();

            Self {
                _dir: dir,
                server,
                config_path,
                install,
                work,
            }
        }

        fn pipeline(&self, extractor: ArchiveExtractor) -> UpdatePipeline {
            UpdatePipeline::open(&self.config_path)
                .unwrap()
                .with_extractor(extractor)
        }

        fn cache_files(&self) -> Vec<String> {
            let dir = self.work.join("update_cache");
            if !dir.exists() {
                return Vec::new();
            }
            let mut names: Vec<String> = fs::read_dir(dir)
                .unwrap()
                .flatten()
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect();
            names.sort();
            names
        }
    }

    /// Extractor that never shells out, so tests behave the same everywhere
    fn local_extractor() -> ArchiveExtractor {
        ArchiveExtractor::new(vec![
            Box::new(ExternalArchiver::with_candidates(Vec::<String>::new())),
            Box::new(BuiltinReader),
        ])
    }

    fn recorder() -> (Arc<Mutex<Vec<UpdateEvent>>>, impl Observer) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        (events, move |event: &UpdateEvent| {
            sink.lock().unwrap().push(event.clone())
        })
    }

    fn stages(events: &[UpdateEvent]) -> Vec<Stage> {
        events
            .iter()
            .filter_map(|e| match e {
                UpdateEvent::Stage(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_full_update_preserves_user_data() {
        let _serial = serial();
        let fx = Fixture::new("2.2.0", "v2.3.0", "pkg-2.3.0.7z", zip_bytes(PACKAGE));
        fs::create_dir_all(fx.work.join("update_cache")).unwrap();
        fs::write(fx.work.join("update_cache/v2.2.0_pkg-2.2.0.7z"), "old package").unwrap();

        let (events, observer) = recorder();
        let mut pipeline = fx.pipeline(local_extractor());
        let outcome = pipeline.run(&observer, &mut |_| true);

        assert_eq!(outcome, Outcome::Complete(Version::new(2, 3, 0)));
        assert_eq!(pipeline.stage(), Stage::Complete);

        // package contents landed, user data won over the package's defaults
        assert_eq!(fs::read_to_string(fx.install.join("Makeplace.exe")).unwrap(), "new binary");
        assert_eq!(fs::read_to_string(fx.install.join("Makeplace/Data/items.json")).unwrap(), "[1,2,3]");
        assert_eq!(
            fs::read_to_string(fx.install.join("Makeplace/Save/settings.ini")).unwrap(),
            "volume=3"
        );
        assert!(fx.install.join("Makeplace/Save/slot1.json").exists());

        // only the new version stays cached, the holding area is gone
        assert_eq!(fx.cache_files(), vec!["v2.3.0_pkg-2.3.0.7z".to_string()]);
        assert!(!fx.work.join("temp_backup").exists());

        let saved = Config::load_from(&fx.config_path).unwrap();
        assert_eq!(saved.current_version, "2.3.0");
        assert!(saved.last_check_timestamp.is_some());

        let events = events.lock().unwrap();
        assert_eq!(
            stages(&events),
            vec![
                Stage::Checking,
                Stage::UpdateAvailable,
                Stage::Downloading,
                Stage::Extracting,
                Stage::Restoring,
                Stage::Finalizing,
                Stage::Complete,
            ]
        );
        assert!(events.iter().any(|e| matches!(e, UpdateEvent::DownloadProgress { .. })));
        assert!(matches!(events.last(), Some(UpdateEvent::Finished(Outcome::Complete(_)))));
    }

    #[test]
    fn test_cached_archive_skips_download() {
        let _serial = serial();
        let fx = Fixture::new("1.0.0", "v1.2.0", "pkg-1.2.0.7z", zip_bytes(PACKAGE));
        fs::create_dir_all(fx.work.join("update_cache")).unwrap();
        fs::write(
            fx.work.join("update_cache/v1.2.0_pkg-1.2.0.7z"),
            zip_bytes(PACKAGE),
        )
        .unwrap();

        let (events, observer) = recorder();
        let outcome = fx.pipeline(local_extractor()).run(&observer, &mut |_| true);

        assert_eq!(outcome, Outcome::Complete(Version::new(1, 2, 0)));
        assert_eq!(fx.server.hits("/download/pkg-1.2.0.7z"), 0);
        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, UpdateEvent::CacheHit { .. })));
        assert!(!stages(&events).contains(&Stage::Downloading));
    }

    #[test]
    fn test_rerun_after_failed_extraction_reuses_download() {
        let _serial = serial();
        let fx = Fixture::new("1.0.0", "v1.2.0", "pkg-1.2.0.7z", zip_bytes(PACKAGE));

        let broken = ArchiveExtractor::new(vec![Box::new(ExternalArchiver::with_candidates(
            Vec::<String>::new(),
        ))]);
        let first = fx.pipeline(broken).run(&|_: &UpdateEvent| {}, &mut |_| true);
        assert!(first.is_failure());
        assert_eq!(fx.server.hits("/download/pkg-1.2.0.7z"), 1);
        assert_eq!(fx.cache_files(), vec!["v1.2.0_pkg-1.2.0.7z".to_string()]);

        let second = fx.pipeline(local_extractor()).run(&|_: &UpdateEvent| {}, &mut |_| true);
        assert_eq!(second, Outcome::Complete(Version::new(1, 2, 0)));
        assert_eq!(fx.server.hits("/download/pkg-1.2.0.7z"), 1);
    }

    #[test]
    fn test_up_to_date_and_unconfirmed() {
        let _serial = serial();
        let fx = Fixture::new("1.2.0", "v1.2.0", "pkg-1.2.0.7z", zip_bytes(PACKAGE));
        let mut pipeline = fx.pipeline(local_extractor());
        assert_eq!(pipeline.check(&|_: &UpdateEvent| {}), Outcome::UpToDate);
        assert_eq!(pipeline.stage(), Stage::UpToDate);

        let fx = Fixture::new("1.0.0", "v1.2.0", "pkg-1.2.0.7z", zip_bytes(PACKAGE));
        let mut asked = Vec::new();
        let outcome = fx.pipeline(local_extractor()).run(&|_: &UpdateEvent| {}, &mut |release| {
            asked.push(release.asset_name.clone());
            false
        });
        assert_eq!(outcome, Outcome::UpdateAvailable(Version::new(1, 2, 0)));
        assert_eq!(asked, vec!["pkg-1.2.0.7z".to_string()]);
        assert_eq!(fx.server.hits("/download/pkg-1.2.0.7z"), 0);
        assert_eq!(
            fs::read_to_string(fx.install.join("Makeplace.exe")).unwrap(),
            "old binary"
        );
    }

    #[test]
    fn test_all_backends_failing_keeps_install_intact() {
        let _serial = serial();
        let fx = Fixture::new("1.0.0", "v1.2.0", "pkg-1.2.0.7z", b"not an archive at all".to_vec());

        let (events, observer) = recorder();
        let outcome = fx.pipeline(local_extractor()).run(&observer, &mut |_| true);

        match &outcome {
            Outcome::Failed { kind, attempts, detail, .. } => {
                assert_eq!(*kind, ErrorKind::Extraction);
                assert_eq!(attempts.len(), 2);
                assert!(detail.contains("7z-cli"));
                assert!(detail.contains("builtin"));
            }
            other => panic!("expected failure, got {:?}", other),
        }

        assert_eq!(
            fs::read_to_string(fx.install.join("Makeplace/Save/settings.ini")).unwrap(),
            "volume=3"
        );
        assert_eq!(fs::read_to_string(fx.install.join("Makeplace.exe")).unwrap(), "old binary");
        assert!(!fx.work.join("temp_backup").exists());
        // the download stays cached for a retry and the version is unchanged
        assert_eq!(fx.cache_files(), vec!["v1.2.0_pkg-1.2.0.7z".to_string()]);
        assert_eq!(Config::load_from(&fx.config_path).unwrap().current_version, "1.0.0");

        let events = events.lock().unwrap();
        let failures = events
            .iter()
            .filter(|e| matches!(e, UpdateEvent::BackendFailed(_)))
            .count();
        assert_eq!(failures, 2);
        assert_eq!(stages(&events).last(), Some(&Stage::Failed));
    }

    struct AlwaysFails;

    impl ExtractBackend for AlwaysFails {
        fn name(&self) -> &str {
            "primary"
        }

        fn extract(&self, _archive: &Path, dest: &Path) -> anyhow::Result<()> {
            fs::write(dest.join("Makeplace.exe"), "corrupt")?;
            anyhow::bail!("unsupported filter BCJ2")
        }
    }

    #[test]
    fn test_second_backend_completes_the_run() {
        let _serial = serial();
        let fx = Fixture::new("1.0.0", "v1.2.0", "pkg-1.2.0.7z", zip_bytes(PACKAGE));

        let extractor = ArchiveExtractor::new(vec![Box::new(AlwaysFails), Box::new(BuiltinReader)]);
        let (events, observer) = recorder();
        let outcome = fx.pipeline(extractor).run(&observer, &mut |_| true);

        assert_eq!(outcome, Outcome::Complete(Version::new(1, 2, 0)));
        assert_eq!(fs::read_to_string(fx.install.join("Makeplace.exe")).unwrap(), "new binary");
        let recorded: Vec<BackendFailure> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                UpdateEvent::BackendFailed(f) => Some(f.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].backend, "primary");
    }

    /// Stages a package that overwrites the user's settings and also wants
    /// a directory at `Makeplace/zz`
    struct OverwritesSave;

    impl ExtractBackend for OverwritesSave {
        fn name(&self) -> &str {
            "overwrites-save"
        }

        fn extract(&self, _archive: &Path, dest: &Path) -> anyhow::Result<()> {
            fs::create_dir_all(dest.join("Makeplace/Save"))?;
            fs::write(dest.join("Makeplace/Save/settings.ini"), "volume=10")?;
            fs::create_dir_all(dest.join("Makeplace/zz"))?;
            fs::write(dest.join("Makeplace/zz/x"), "new")?;
            Ok(())
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_move_into_install_puts_user_data_back() {
        let _serial = serial();
        let fx = Fixture::new("1.0.0", "v1.2.0", "pkg-1.2.0.7z", zip_bytes(PACKAGE));
        // a dangling link blocks the package's Makeplace/zz directory
        std::os::unix::fs::symlink(fx.work.join("gone"), fx.install.join("Makeplace/zz")).unwrap();

        let (events, observer) = recorder();
        let extractor = ArchiveExtractor::new(vec![Box::new(OverwritesSave)]);
        let outcome = fx.pipeline(extractor).run(&observer, &mut |_| true);

        match &outcome {
            Outcome::Failed { kind, detail, attempts, .. } => {
                assert_eq!(*kind, ErrorKind::Extraction);
                assert!(detail.contains("could not be moved into the install"));
                assert_eq!(attempts.last().unwrap().backend, "merge");
            }
            other => panic!("expected failure, got {:?}", other),
        }

        assert_eq!(
            fs::read_to_string(fx.install.join("Makeplace/Save/settings.ini")).unwrap(),
            "volume=3"
        );
        assert_eq!(
            fs::read_to_string(fx.install.join("Makeplace/Save/slot1.json")).unwrap(),
            r#"{"house":1}"#
        );
        assert_eq!(Config::load_from(&fx.config_path).unwrap().current_version, "1.0.0");
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, UpdateEvent::BackendFailed(f) if f.backend == "merge")));
    }

    #[test]
    fn test_fresh_install_into_missing_directory() {
        let _serial = serial();
        let fx = Fixture::new("0.0.0", "v1.2.0", "pkg-1.2.0.7z", zip_bytes(PACKAGE));
        let target = fx.work.join("new-install");
        let mut config = Config::load_from(&fx.config_path).unwrap();
        config.installation_path = target.clone();
        config.save_to(&fx.config_path).unwrap();

        let (events, observer) = recorder();
        let outcome = fx.pipeline(local_extractor()).run(&observer, &mut |_| true);

        assert_eq!(outcome, Outcome::Complete(Version::new(1, 2, 0)));
        assert_eq!(fs::read_to_string(target.join("Makeplace.exe")).unwrap(), "new binary");
        assert_eq!(
            fs::read_to_string(target.join("Makeplace/Save/settings.ini")).unwrap(),
            "volume=10"
        );
        assert!(!fx.work.join("temp_backup").exists());
        assert_eq!(
            stages(&events.lock().unwrap()),
            vec![
                Stage::Checking,
                Stage::UpdateAvailable,
                Stage::Downloading,
                Stage::Extracting,
                Stage::Finalizing,
                Stage::Complete,
            ]
        );
    }

    #[test]
    fn test_update_merges_app_settings() {
        let _serial = serial();
        let package = zip_bytes(&[
            ("Makeplace.exe", "new binary"),
            ("config.json", r#"{"volume": 10, "language": "en"}"#),
        ]);
        let fx = Fixture::new("1.0.0", "v1.2.0", "pkg-1.2.0.7z", package);
        fs::write(fx.install.join("config.json"), r#"{"volume": 3}"#).unwrap();

        let outcome = fx.pipeline(local_extractor()).run(&|_: &UpdateEvent| {}, &mut |_| true);

        assert_eq!(outcome, Outcome::Complete(Version::new(1, 2, 0)));
        let settings: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(fx.install.join("config.json")).unwrap()).unwrap();
        assert_eq!(settings, serde_json::json!({"volume": 3, "language": "en"}));
    }

    #[test]
    fn test_download_failure_keeps_other_cache_entries() {
        let _serial = serial();
        let fx = Fixture::new("1.0.0", "v1.2.0", "pkg-1.2.0.7z", Vec::new());
        fx.server.route("/download/pkg-1.2.0.7z", Route::status(503));
        fs::create_dir_all(fx.work.join("update_cache")).unwrap();
        fs::write(fx.work.join("update_cache/v1.1.0_pkg-1.1.0.7z"), "older").unwrap();

        let outcome = fx.pipeline(local_extractor()).run(&|_: &UpdateEvent| {}, &mut |_| true);

        assert!(matches!(outcome, Outcome::Failed { kind: ErrorKind::Network, .. }));
        assert_eq!(fx.cache_files(), vec!["v1.1.0_pkg-1.1.0.7z".to_string()]);
        assert_eq!(
            fs::read_to_string(fx.install.join("Makeplace.exe")).unwrap(),
            "old binary"
        );
    }

    #[test]
    fn test_missing_asset_and_bad_feed() {
        let _serial = serial();
        let fx = Fixture::new("1.0.0", "v1.2.0", "pkg-1.2.0.zip", zip_bytes(PACKAGE));
        let outcome = fx.pipeline(local_extractor()).check(&|_: &UpdateEvent| {});
        assert!(matches!(outcome, Outcome::Failed { kind: ErrorKind::MissingAsset, .. }));

        fx.server.route("/latest", Route::ok("{\"tag\": 1"));
        let outcome = fx.pipeline(local_extractor()).check(&|_: &UpdateEvent| {});
        assert!(matches!(outcome, Outcome::Failed { kind: ErrorKind::Parse, .. }));
    }

    #[test]
    fn test_second_concurrent_run_is_busy() {
        let _serial = serial();
        let fx = Fixture::new("1.0.0", "v1.2.0", "pkg-1.2.0.7z", zip_bytes(PACKAGE));

        let held = RunGuard::acquire().unwrap();
        let outcome = fx.pipeline(local_extractor()).check(&|_: &UpdateEvent| {});
        assert!(matches!(outcome, Outcome::Failed { kind: ErrorKind::Busy, .. }));
        assert_eq!(fx.server.hits("/latest"), 0);

        drop(held);
        let outcome = fx.pipeline(local_extractor()).check(&|_: &UpdateEvent| {});
        assert_eq!(outcome, Outcome::UpdateAvailable(Version::new(1, 2, 0)));
    }
}
