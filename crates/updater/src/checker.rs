use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::metadata::{MetadataFetcher, VersionInfo};
use crate::version;

/// Outcome of one update check, delivered to the coordinator as an event.
#[derive(Debug)]
pub enum CheckEvent {
    /// The remote endpoint advertises a strictly newer version.
    UpdateAvailable(VersionInfo),
    /// The current version is the latest (or the remote version did not parse).
    UpToDate,
    /// Fetch or parse failed; carries a user-presentable message.
    Failed(String),
}

/// Single-flight asynchronous update check.
///
/// `check()` runs fetch + parse + compare on a background task and delivers
/// exactly one [`CheckEvent`] per started check; a call while a check is
/// already in flight is ignored, so concurrent callers collapse into the one
/// running fetch. The worker converts every failure into an event and never
/// panics across the channel boundary.
pub struct UpdateChecker {
    fetcher: Arc<dyn MetadataFetcher>,
    check_url: String,
    current_version: String,
    in_flight: Arc<AtomicBool>,
    events: UnboundedSender<CheckEvent>,
}

impl UpdateChecker {
    /// Create a checker; the returned receiver yields one event per check.
    pub fn new(
        fetcher: Arc<dyn MetadataFetcher>,
        check_url: impl Into<String>,
        current_version: impl Into<String>,
    ) -> (Self, UnboundedReceiver<CheckEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                fetcher,
                check_url: check_url.into(),
                current_version: current_version.into(),
                in_flight: Arc::new(AtomicBool::new(false)),
                events,
            },
            receiver,
        )
    }

    /// Whether a check is currently running.
    pub fn is_checking(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Start a background check; a no-op while one is already in flight.
    pub fn check(&self) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            tracing::debug!("update check already in flight, ignoring request");
            return;
        }

        let fetcher = Arc::clone(&self.fetcher);
        let url = self.check_url.clone();
        let current = self.current_version.clone();
        let events = self.events.clone();
        let in_flight = Arc::clone(&self.in_flight);

        tokio::spawn(async move {
            let event = run_check(fetcher.as_ref(), &url, &current).await;
            // Clear the gate before delivery so a consumer reacting to the
            // event can immediately issue the next check.
            in_flight.store(false, Ordering::SeqCst);
            let _ = events.send(event);
        });
    }
}

async fn run_check(fetcher: &dyn MetadataFetcher, url: &str, current: &str) -> CheckEvent {
    tracing::info!(%url, current, "checking for updates");

    let bytes = match fetcher.fetch(url).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!("update check fetch failed: {err}");
            return CheckEvent::Failed(err.to_string());
        }
    };

    let info = match VersionInfo::parse_json(&bytes) {
        Ok(info) => info,
        Err(err) => {
            tracing::warn!("update metadata rejected: {err}");
            return CheckEvent::Failed(err.to_string());
        }
    };

    if version::is_newer(&info.version, current) {
        tracing::info!(remote = %info.version, "new version available");
        CheckEvent::UpdateAvailable(info)
    } else {
        tracing::info!(remote = %info.version, "no newer version");
        CheckEvent::UpToDate
    }
}
