//! Desktop application template entry point: wires the configuration file,
//! a console update prompt, and the update pipeline together.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use app_config::AppConfig;
use updater::{
    ConfigStore, HostHandle, HttpMetadataFetcher, UpdateDecision, UpdateManager, UpdatePrompt,
    UpdateSettings, VersionInfo,
};

#[derive(Parser, Debug)]
#[command(name = "deskbase", about = "Desktop application template with auto-update")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Run a user-initiated update check instead of the startup check.
    #[arg(long)]
    check: bool,

    /// Verbose logging.
    #[arg(long)]
    debug: bool,
}

/// Adapts [`AppConfig`] to the persistence surface the updater consumes.
struct ConfigBridge(AppConfig);

impl ConfigStore for ConfigBridge {
    fn get(&self, key: &str) -> Option<Value> {
        self.0.get(key)
    }

    fn set(&mut self, key: &str, value: Value) {
        self.0.set(key, value);
    }

    fn save(&self) -> io::Result<()> {
        self.0
            .save()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))
    }
}

/// Console rendition of the update dialog. A GUI build replaces this with
/// real dialogs; the pipeline does not care.
struct ConsolePrompt;

impl ConsolePrompt {
    async fn ask(question: String) -> String {
        tokio::task::spawn_blocking(move || {
            print!("{question}");
            let _ = io::stdout().flush();
            let mut answer = String::new();
            let _ = io::stdin().lock().read_line(&mut answer);
            answer.trim().to_ascii_lowercase()
        })
        .await
        .unwrap_or_default()
    }
}

#[async_trait]
impl UpdatePrompt for ConsolePrompt {
    async fn present_update(&self, info: &VersionInfo) -> UpdateDecision {
        println!("Update available: version {}", info.version);
        if !info.changelog.is_empty() {
            println!("\n{}\n", info.changelog);
        }
        loop {
            let answer = Self::ask("Install now, remind later, or skip? [i/l/s] ".into()).await;
            match answer.as_str() {
                "i" | "install" => return UpdateDecision::Install,
                "l" | "later" | "" => return UpdateDecision::Defer,
                "s" | "skip" => return UpdateDecision::Skip,
                _ => println!("Please answer i, l, or s."),
            }
        }
    }

    async fn notify_up_to_date(&self, current_version: &str) {
        println!("You are up to date (version {current_version}).");
    }

    async fn notify_error(&self, message: &str) {
        eprintln!("Update failed: {message}");
    }

    async fn download_progress(&self, downloaded: u64, total: u64) -> bool {
        if total > 0 {
            print!("\rDownloading update: {downloaded}/{total} bytes");
        } else {
            print!("\rDownloading update: {downloaded} bytes");
        }
        let _ = io::stdout().flush();
        true
    }
}

/// The updater process replaces our files, so once it is launched we exit.
struct ProcessExit;

impl HostHandle for ProcessExit {
    fn request_exit(&self) {
        tracing::info!("updater launched, exiting for file replacement");
        std::process::exit(0);
    }
}

fn settings_from(config: &AppConfig) -> UpdateSettings {
    UpdateSettings {
        app_name: config.app_name(),
        current_version: config.current_version(),
        check_url: config.update_check_url(),
        check_timeout: Duration::from_secs(config.update_check_timeout()),
        download_timeout: Duration::from_secs(config.download_timeout()),
        skip_duration_days: config.skip_duration_days(),
        auto_check: config.auto_check_updates(),
        temp_dir_name: config.temp_dir_name(),
        default_app_exe: config.app_name().to_ascii_lowercase(),
        ..UpdateSettings::default()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = AppConfig::load(&args.config);
    let settings = settings_from(&config);
    if settings.check_url.is_empty() {
        anyhow::bail!(
            "no update server configured; set `update_server` in {}",
            args.config.display()
        );
    }

    let fetcher = Arc::new(HttpMetadataFetcher::new(
        settings.user_agent(),
        settings.check_timeout,
    )?);
    let store: Arc<Mutex<dyn ConfigStore>> = Arc::new(Mutex::new(ConfigBridge(config)));

    let mut manager = UpdateManager::new(
        settings,
        fetcher,
        store,
        Arc::new(ConsolePrompt),
        Arc::new(ProcessExit),
    )?;

    if args.check {
        manager.check_manual().await;
    } else {
        manager.check_on_startup().await;
    }

    Ok(())
}
