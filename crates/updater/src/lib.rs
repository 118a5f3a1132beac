//! Application auto-update pipeline: check, download, verify, hand off.
//!
//! The crate covers the full lifecycle of a desktop-application update.
//! A JSON document on the update server describes the latest release; the
//! checker fetches it and compares versions, the downloader streams the
//! update package to a staging directory with progress and cancellation,
//! the integrity module checks its SHA-256 digest, and the installer module
//! launches an external updater binary detached so the application can exit
//! and be replaced. Versions the user declined are remembered with an
//! expiry. [`UpdateManager`] ties the stages to user decisions.
//!
//! ```ignore
//! use std::sync::{Arc, Mutex};
//! use updater::{HttpMetadataFetcher, UpdateManager, UpdateSettings};
//!
//! # async fn demo(
//! #     config: Arc<Mutex<dyn updater::ConfigStore>>,
//! #     prompt: Arc<dyn updater::UpdatePrompt>,
//! #     host: Arc<dyn updater::HostHandle>,
//! # ) -> updater::Result<()> {
//! let settings = UpdateSettings {
//!     app_name: "myapp".into(),
//!     current_version: env!("CARGO_PKG_VERSION").into(),
//!     check_url: "https://updates.example.com/update.json".into(),
//!     ..UpdateSettings::default()
//! };
//! let fetcher = Arc::new(HttpMetadataFetcher::new(
//!     settings.user_agent(),
//!     settings.check_timeout,
//! )?);
//! let mut manager = UpdateManager::new(settings, fetcher, config, prompt, host)?;
//! manager.check_on_startup().await;
//! # Ok(())
//! # }
//! ```

mod checker;
mod download;
mod error;
mod installer;
mod integrity;
mod manager;
mod metadata;
mod skip;
mod version;

pub use checker::{CheckEvent, UpdateChecker};
pub use download::{DownloadEvent, Downloader};
pub use error::{Result, UpdateError};
pub use installer::{
    build_command, launch_detached, mark_executable, resolve_app_location, updater_path,
    InstallPlan, UPDATER_EXE_NAME,
};
pub use integrity::{expect_digest, file_sha256, verify_file};
pub use manager::{
    CheckOrigin, HostHandle, UpdateDecision, UpdateManager, UpdatePrompt, UpdateSettings,
    UpdateState,
};
pub use metadata::{normalize_url, HttpMetadataFetcher, MetadataFetcher, VersionInfo};
pub use skip::{Clock, ConfigStore, SkipEntryInfo, SkipVersionStore, SystemClock};
pub use version::{is_newer, Version};
