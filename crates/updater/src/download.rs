use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::{Result, UpdateError};
use crate::metadata::map_request_error;

/// Fixed transfer granularity; progress and the cancellation flag are
/// serviced once per chunk.
const CHUNK_SIZE: usize = 8 * 1024;

/// Progress and completion events emitted by a download worker.
#[derive(Debug)]
pub enum DownloadEvent {
    /// Emitted after every chunk. `total` is 0 when the server did not send
    /// a Content-Length; that is a valid degraded case, not an error.
    Progress { downloaded: u64, total: u64 },
    /// The whole body was written to `path`.
    Completed { path: PathBuf },
    /// The transfer failed or was cancelled; the partial file was removed.
    Failed(UpdateError),
}

/// One in-flight transfer. Created per invocation, never reused.
struct DownloadTask {
    url: String,
    destination: PathBuf,
    downloaded: u64,
    total: u64,
    cancelled: Arc<AtomicBool>,
}

impl DownloadTask {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Single-flight chunked file downloader.
///
/// One download may run at a time per instance; a second request is
/// rejected immediately with [`UpdateError::DownloadBusy`] rather than
/// queued. Cancellation is cooperative: after [`Downloader::cancel`] at
/// most one chunk (≤ 8 KiB) of further I/O happens before the worker stops
/// and deletes the partial destination file.
pub struct Downloader {
    client: Client,
    user_agent: String,
    read_timeout: Duration,
    busy: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    events: UnboundedSender<DownloadEvent>,
}

impl Downloader {
    /// Build a downloader; the returned receiver carries the events of every
    /// transfer started on this instance.
    ///
    /// `read_timeout` bounds the connect and each body read, never the whole
    /// transfer — a slow but progressing download is not aborted.
    pub fn new(
        user_agent: impl Into<String>,
        read_timeout: Duration,
    ) -> Result<(Self, UnboundedReceiver<DownloadEvent>)> {
        let client = Client::builder().connect_timeout(read_timeout).build()?;
        let (events, receiver) = mpsc::unbounded_channel();
        Ok((
            Self {
                client,
                user_agent: user_agent.into(),
                read_timeout,
                busy: Arc::new(AtomicBool::new(false)),
                cancel: Arc::new(AtomicBool::new(false)),
                events,
            },
            receiver,
        ))
    }

    /// Start a background download of `url` into `destination`.
    pub fn download(&self, url: &str, destination: PathBuf) -> Result<()> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(UpdateError::DownloadBusy);
        }
        self.cancel.store(false, Ordering::SeqCst);

        let task = DownloadTask {
            url: url.to_string(),
            destination,
            downloaded: 0,
            total: 0,
            cancelled: Arc::clone(&self.cancel),
        };
        let client = self.client.clone();
        let user_agent = self.user_agent.clone();
        let read_timeout = self.read_timeout;
        let events = self.events.clone();
        let busy = Arc::clone(&self.busy);

        tokio::spawn(async move {
            run_download(client, user_agent, read_timeout, task, &events).await;
            busy.store(false, Ordering::SeqCst);
        });
        Ok(())
    }

    /// Request cooperative cancellation of the running download.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Whether a download is currently running.
    pub fn is_downloading(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

async fn run_download(
    client: Client,
    user_agent: String,
    read_timeout: Duration,
    mut task: DownloadTask,
    events: &UnboundedSender<DownloadEvent>,
) {
    match transfer(&client, &user_agent, read_timeout, &mut task, events).await {
        Ok(()) => {
            tracing::info!(
                path = %task.destination.display(),
                bytes = task.downloaded,
                "download complete"
            );
            let _ = events.send(DownloadEvent::Completed {
                path: task.destination.clone(),
            });
        }
        Err(err) => {
            // Leave no partial artifact behind, cancelled or failed alike.
            if let Err(remove_err) = fs::remove_file(&task.destination).await {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("failed to remove partial download: {remove_err}");
                }
            }
            tracing::warn!(url = %task.url, "download failed: {err}");
            let _ = events.send(DownloadEvent::Failed(err));
        }
    }
}

async fn transfer(
    client: &Client,
    user_agent: &str,
    read_timeout: Duration,
    task: &mut DownloadTask,
    events: &UnboundedSender<DownloadEvent>,
) -> Result<()> {
    tracing::info!(url = %task.url, dest = %task.destination.display(), "starting download");

    let response = client
        .get(&task.url)
        .header(USER_AGENT, user_agent)
        .send()
        .await
        .map_err(map_request_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(UpdateError::HttpStatus(status.as_u16()));
    }

    task.total = response.content_length().unwrap_or(0);

    if let Some(parent) = task.destination.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::File::create(&task.destination).await?;

    let mut stream = response.bytes_stream();
    loop {
        let next = tokio::time::timeout(read_timeout, stream.next())
            .await
            .map_err(|_| UpdateError::Timeout)?;
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(map_request_error)?;

        for piece in chunk.chunks(CHUNK_SIZE) {
            if task.is_cancelled() {
                return Err(UpdateError::Cancelled);
            }
            file.write_all(piece).await?;
            task.downloaded += piece.len() as u64;
            let _ = events.send(DownloadEvent::Progress {
                downloaded: task.downloaded,
                total: task.total,
            });
        }
    }

    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a fresh port, then close.
    async fn serve_once(response: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/pkg.bin")
    }

    /// Serve a response that dribbles its body forever until the client
    /// disconnects; used to exercise cancellation.
    async fn serve_dribble() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;
                if socket
                    .write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n")
                    .await
                    .is_err()
                {
                    return;
                }
                let block = vec![0xabu8; 1024];
                loop {
                    if socket.write_all(&block).await.is_err() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        });
        format!("http://{addr}/pkg.bin")
    }

    fn downloader() -> (Downloader, UnboundedReceiver<DownloadEvent>) {
        Downloader::new("deskbase/1.0.0", Duration::from_secs(5)).expect("client builds")
    }

    #[tokio::test]
    async fn completes_without_content_length() {
        let body = b"hello update package".repeat(1000);
        let mut response = b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n".to_vec();
        response.extend_from_slice(&body);
        let url = serve_once(response).await;

        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("pkg.bin");
        let (downloader, mut events) = downloader();
        downloader.download(&url, dest.clone()).expect("starts");

        let mut last = 0u64;
        loop {
            match events.recv().await.expect("event") {
                DownloadEvent::Progress { downloaded, total } => {
                    assert!(downloaded >= last, "progress must not regress");
                    assert_eq!(total, 0, "no Content-Length means total 0");
                    last = downloaded;
                }
                DownloadEvent::Completed { path } => {
                    assert_eq!(path, dest);
                    break;
                }
                DownloadEvent::Failed(err) => panic!("unexpected failure: {err}"),
            }
        }
        assert_eq!(std::fs::read(&dest).expect("file exists"), body);
        assert_eq!(last, body.len() as u64);
    }

    #[tokio::test]
    async fn second_download_is_rejected_not_queued() {
        let url = serve_dribble().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let (downloader, mut events) = downloader();
        downloader
            .download(&url, dir.path().join("first.bin"))
            .expect("first starts");

        // Wait until the first transfer is demonstrably running.
        assert!(matches!(
            events.recv().await,
            Some(DownloadEvent::Progress { .. })
        ));
        let second = downloader.download(&url, dir.path().join("second.bin"));
        assert!(matches!(second, Err(UpdateError::DownloadBusy)));

        downloader.cancel();
        while let Some(event) = events.recv().await {
            if matches!(event, DownloadEvent::Failed(_)) {
                break;
            }
        }
    }

    #[tokio::test]
    async fn cancellation_removes_the_partial_file() {
        let url = serve_dribble().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("pkg.bin");
        let (downloader, mut events) = downloader();
        downloader.download(&url, dest.clone()).expect("starts");

        assert!(matches!(
            events.recv().await,
            Some(DownloadEvent::Progress { .. })
        ));
        downloader.cancel();

        loop {
            match events.recv().await.expect("event") {
                DownloadEvent::Progress { .. } => continue,
                DownloadEvent::Failed(UpdateError::Cancelled) => break,
                other => panic!("expected Cancelled, got {other:?}"),
            }
        }
        assert!(!dest.exists(), "partial file must be deleted");
        assert!(!downloader.is_downloading());
    }

    #[tokio::test]
    async fn http_error_status_is_reported() {
        let url = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_vec()).await;
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("pkg.bin");
        let (downloader, mut events) = downloader();
        downloader.download(&url, dest.clone()).expect("starts");

        match events.recv().await.expect("event") {
            DownloadEvent::Failed(UpdateError::HttpStatus(404)) => {}
            other => panic!("expected HttpStatus(404), got {other:?}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn content_length_is_forwarded_as_total() {
        let body = vec![1u8; 4096];
        let mut response =
            format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
        response.extend_from_slice(&body);
        let url = serve_once(response).await;

        let dir = tempfile::tempdir().expect("tempdir");
        let (downloader, mut events) = downloader();
        downloader
            .download(&url, dir.path().join("pkg.bin"))
            .expect("starts");

        loop {
            match events.recv().await.expect("event") {
                DownloadEvent::Progress { total, .. } => assert_eq!(total, 4096),
                DownloadEvent::Completed { .. } => break,
                DownloadEvent::Failed(err) => panic!("unexpected failure: {err}"),
            }
        }
    }
}
