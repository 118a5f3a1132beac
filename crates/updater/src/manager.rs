use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task;

use crate::checker::{CheckEvent, UpdateChecker};
use crate::download::{DownloadEvent, Downloader};
use crate::error::{Result, UpdateError};
use crate::installer::{self, InstallPlan};
use crate::integrity;
use crate::metadata::{MetadataFetcher, VersionInfo};
use crate::skip::{Clock, ConfigStore, SkipEntryInfo, SkipVersionStore, SystemClock};

/// Tunables read once from the configuration collaborator's typed accessors.
#[derive(Debug, Clone)]
pub struct UpdateSettings {
    pub app_name: String,
    pub current_version: String,
    /// Metadata endpoint returning the version JSON.
    pub check_url: String,
    /// Connect/read timeout of the metadata fetch.
    pub check_timeout: Duration,
    /// Connect/read timeout of downloads; never a whole-transfer deadline.
    pub download_timeout: Duration,
    /// How long a "skip this version" decision stays in effect.
    pub skip_duration_days: u32,
    /// Whether startup checks run at all.
    pub auto_check: bool,
    /// Staging directory name under the system temp dir.
    pub temp_dir_name: String,
    /// Delay before the startup check so it does not contend with
    /// application startup I/O.
    pub startup_grace: Duration,
    /// Entry-point name reported to the updater when running unpackaged.
    pub default_app_exe: String,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            app_name: "deskbase".into(),
            current_version: "1.0.0".into(),
            check_url: String::new(),
            check_timeout: Duration::from_secs(10),
            download_timeout: Duration::from_secs(300),
            skip_duration_days: 30,
            auto_check: true,
            temp_dir_name: "app_update".into(),
            startup_grace: Duration::from_secs(3),
            default_app_exe: "deskbase".into(),
        }
    }
}

impl UpdateSettings {
    /// `User-Agent` sent on every metadata fetch and download.
    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.app_name, self.current_version)
    }
}

/// The user's answer to an update offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDecision {
    /// Download and install now.
    Install,
    /// Ask again next time; nothing is persisted.
    Defer,
    /// Stop offering this version for the configured duration.
    Skip,
}

/// Why a check was started. Startup checks stay quiet on "no update" and on
/// failure; manual checks surface both to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOrigin {
    Startup,
    Manual,
}

/// Presentation collaborator: dialogs in a GUI build, a console prompt in
/// the template binary. Rendering is out of scope here; this is the whole
/// surface the pipeline needs.
#[async_trait]
pub trait UpdatePrompt: Send + Sync {
    /// Present version and changelog; resolves to exactly one decision.
    async fn present_update(&self, info: &VersionInfo) -> UpdateDecision;
    /// A manual check found nothing newer.
    async fn notify_up_to_date(&self, current_version: &str);
    /// A surfaced failure, worded for the user.
    async fn notify_error(&self, message: &str);
    /// Download progress; return false to request cancellation.
    async fn download_progress(&self, downloaded: u64, total: u64) -> bool {
        let _ = (downloaded, total);
        true
    }
}

/// Host-application hook for the final handoff: once the updater process is
/// launched the host must exit so its files can be replaced.
pub trait HostHandle: Send + Sync {
    fn request_exit(&self);
}

/// Lifecycle of one check→install cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    CheckingForUpdate,
    UpdateFound,
    Downloading,
    Verifying,
    InstallReady,
    VerifyFailed,
    LaunchingInstaller,
    Terminated,
    Error,
}

/// Ephemeral record of the release currently being offered or installed; a
/// new session starts with every found update and nothing in it is persisted.
struct UpdateSession {
    info: VersionInfo,
}

/// Top-level coordinator tying checker, downloader, verifier, skip store
/// and installer launcher to user decisions.
///
/// The manager itself never performs blocking I/O: network and file work
/// happen on background tasks, results arrive as events, and the config
/// collaborator is only ever touched from here. Check and download are
/// mutually exclusive within one manager, and there is no automatic retry
/// anywhere — every retry is user-initiated.
pub struct UpdateManager {
    settings: UpdateSettings,
    state: UpdateState,
    checker: UpdateChecker,
    check_events: UnboundedReceiver<CheckEvent>,
    downloader: Downloader,
    download_events: UnboundedReceiver<DownloadEvent>,
    skip_store: SkipVersionStore,
    prompt: Arc<dyn UpdatePrompt>,
    host: Arc<dyn HostHandle>,
    session: Option<UpdateSession>,
}

impl UpdateManager {
    pub fn new(
        settings: UpdateSettings,
        fetcher: Arc<dyn MetadataFetcher>,
        config: Arc<Mutex<dyn ConfigStore>>,
        prompt: Arc<dyn UpdatePrompt>,
        host: Arc<dyn HostHandle>,
    ) -> Result<Self> {
        Self::with_clock(settings, fetcher, config, prompt, host, Arc::new(SystemClock))
    }

    /// Like [`UpdateManager::new`] with an injected clock for the skip store.
    pub fn with_clock(
        settings: UpdateSettings,
        fetcher: Arc<dyn MetadataFetcher>,
        config: Arc<Mutex<dyn ConfigStore>>,
        prompt: Arc<dyn UpdatePrompt>,
        host: Arc<dyn HostHandle>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let (checker, check_events) = UpdateChecker::new(
            Arc::clone(&fetcher),
            settings.check_url.clone(),
            settings.current_version.clone(),
        );
        let (downloader, download_events) =
            Downloader::new(settings.user_agent(), settings.download_timeout)?;
        let skip_store = SkipVersionStore::with_clock(config, clock);

        Ok(Self {
            settings,
            state: UpdateState::Idle,
            checker,
            check_events,
            downloader,
            download_events,
            skip_store,
            prompt,
            host,
            session: None,
        })
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn settings(&self) -> &UpdateSettings {
        &self.settings
    }

    /// The release currently being offered or installed, if any.
    pub fn pending_update(&self) -> Option<&VersionInfo> {
        self.session.as_ref().map(|session| &session.info)
    }

    fn set_state(&mut self, next: UpdateState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "update state transition");
            self.state = next;
        }
    }

    /// Delayed automatic check; a no-op when auto-check is disabled. Quiet:
    /// "no update", errors, and skipped versions only produce log lines.
    pub async fn check_on_startup(&mut self) {
        if !self.settings.auto_check {
            tracing::debug!("automatic update checks disabled");
            return;
        }
        tokio::time::sleep(self.settings.startup_grace).await;
        self.run_check(CheckOrigin::Startup).await;
    }

    /// User-initiated check; "already up to date" and failures are surfaced
    /// through the prompt.
    pub async fn check_manual(&mut self) {
        self.run_check(CheckOrigin::Manual).await;
    }

    async fn run_check(&mut self, origin: CheckOrigin) {
        self.set_state(UpdateState::CheckingForUpdate);
        self.checker.check();

        let Some(event) = self.check_events.recv().await else {
            self.set_state(UpdateState::Idle);
            return;
        };

        match event {
            CheckEvent::UpdateAvailable(info) => self.on_update_found(origin, info).await,
            CheckEvent::UpToDate => {
                if origin == CheckOrigin::Manual {
                    self.prompt
                        .notify_up_to_date(&self.settings.current_version)
                        .await;
                }
                self.set_state(UpdateState::Idle);
            }
            CheckEvent::Failed(message) => {
                tracing::warn!("update check failed: {message}");
                if origin == CheckOrigin::Manual {
                    self.prompt.notify_error(&message).await;
                }
                self.set_state(UpdateState::Error);
            }
        }
    }

    async fn on_update_found(&mut self, origin: CheckOrigin, info: VersionInfo) {
        if origin == CheckOrigin::Startup && self.skip_store.is_skipped(&info.version) {
            tracing::info!(version = %info.version, "update available but version is skipped");
            self.set_state(UpdateState::Idle);
            return;
        }

        self.set_state(UpdateState::UpdateFound);
        self.session = Some(UpdateSession { info: info.clone() });

        match self.prompt.present_update(&info).await {
            UpdateDecision::Install => {
                if let Err(err) = self.install(&info).await {
                    tracing::error!("update installation failed: {err}");
                    self.prompt.notify_error(&err.to_string()).await;
                    if self.state != UpdateState::VerifyFailed {
                        self.set_state(UpdateState::Error);
                    }
                }
                self.session = None;
            }
            UpdateDecision::Defer => {
                tracing::info!(version = %info.version, "update deferred");
                self.session = None;
                self.set_state(UpdateState::Idle);
            }
            UpdateDecision::Skip => {
                self.skip_store
                    .skip(&info.version, self.settings.skip_duration_days);
                self.session = None;
                self.set_state(UpdateState::Idle);
            }
        }
    }

    async fn install(&mut self, info: &VersionInfo) -> Result<()> {
        if info.package_url.is_empty() {
            return Err(UpdateError::Format(
                "metadata did not include a package URL".into(),
            ));
        }

        self.set_state(UpdateState::Downloading);
        let staging = std::env::temp_dir().join(&self.settings.temp_dir_name);
        let package_path = self
            .download_to(
                &info.package_url,
                staging.join(file_name_from_url(&info.package_url, "update_package")),
            )
            .await?;

        self.set_state(UpdateState::Verifying);
        if let Err(err) = self.verify_artifact(&package_path, &info.package_sha256).await {
            self.set_state(UpdateState::VerifyFailed);
            return Err(err);
        }
        self.set_state(UpdateState::InstallReady);

        let updater_path = self.obtain_updater(info).await?;

        self.set_state(UpdateState::LaunchingInstaller);
        let (target_dir, app_exe) =
            installer::resolve_app_location(&self.settings.default_app_exe);
        let plan = InstallPlan {
            updater_path,
            target_dir,
            package_path,
            app_exe,
        };
        installer::launch_detached(&plan)?;

        self.set_state(UpdateState::Terminated);
        self.host.request_exit();
        Ok(())
    }

    /// Drive one download to completion, forwarding progress to the prompt;
    /// the prompt cancels by returning false.
    async fn download_to(&mut self, url: &str, destination: PathBuf) -> Result<PathBuf> {
        self.downloader.download(url, destination)?;
        while let Some(event) = self.download_events.recv().await {
            match event {
                DownloadEvent::Progress { downloaded, total } => {
                    if !self.prompt.download_progress(downloaded, total).await {
                        self.downloader.cancel();
                    }
                }
                DownloadEvent::Completed { path } => return Ok(path),
                DownloadEvent::Failed(err) => return Err(err),
            }
        }
        Err(UpdateError::Other(
            "download worker stopped without a result".into(),
        ))
    }

    /// Hash off the coordinator; a corrupt artifact is deleted before the
    /// error surfaces so a later retry cannot silently reuse it.
    async fn verify_artifact(&self, path: &Path, expected: &str) -> Result<()> {
        let path_owned = path.to_path_buf();
        let expected_owned = expected.to_string();
        let outcome =
            task::spawn_blocking(move || integrity::expect_digest(&path_owned, &expected_owned))
                .await
                .map_err(|err| UpdateError::Other(format!("task join error: {err}")))?;

        if let Err(err) = outcome {
            if let Err(remove_err) = tokio::fs::remove_file(path).await {
                tracing::warn!("failed to remove corrupt artifact: {remove_err}");
            }
            return Err(err);
        }
        Ok(())
    }

    /// Resolve or fetch the external updater binary.
    ///
    /// When the metadata supplies an updater URL the binary is re-downloaded
    /// unconditionally so the installer itself is always current; otherwise
    /// an existing local binary is used, and having neither is fatal.
    async fn obtain_updater(&mut self, info: &VersionInfo) -> Result<PathBuf> {
        let (app_dir, _) = installer::resolve_app_location(&self.settings.default_app_exe);
        let updater_path = installer::updater_path(&app_dir);

        if info.updater_url.is_empty() {
            if updater_path.is_file() {
                tracing::info!(path = %updater_path.display(), "using existing updater binary");
                return Ok(updater_path);
            }
            tracing::error!(
                path = %updater_path.display(),
                "no updater binary on disk and none offered by the server"
            );
            return Err(UpdateError::InstallerMissing(updater_path));
        }

        tracing::info!(url = %info.updater_url, "fetching updater binary");
        let path = self.download_to(&info.updater_url, updater_path).await?;
        self.verify_artifact(&path, &info.updater_sha256).await?;
        installer::mark_executable(&path)?;
        Ok(path)
    }

    /// Diagnostic listing of skipped versions.
    pub fn skipped_versions(&self) -> BTreeMap<String, SkipEntryInfo> {
        self.skip_store.list_with_metadata()
    }

    /// Drop one skipped version; returns whether it was present.
    pub fn remove_skipped_version(&self, version: &str) -> bool {
        self.skip_store.remove(version)
    }

    /// Drop every skipped version.
    pub fn clear_skipped_versions(&self) {
        self.skip_store.clear_all()
    }
}

fn file_name_from_url(url: &str, fallback: &str) -> String {
    let tail = url.rsplit('/').next().unwrap_or_default();
    let tail = tail.split(['?', '#']).next().unwrap_or_default();
    if tail.is_empty() {
        format!("{fallback}.bin")
    } else {
        tail.to_string()
    }
}
