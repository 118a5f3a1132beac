use std::path::PathBuf;

/// Convenient result alias for update-pipeline operations.
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Errors that can occur while checking for, fetching, or installing an update.
#[derive(thiserror::Error, Debug)]
pub enum UpdateError {
    /// Network request failed at the transport level.
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Connect or read deadline elapsed.
    #[error("request timed out")]
    Timeout,
    /// The server answered with a non-2xx status.
    #[error("server returned status {0}")]
    HttpStatus(u16),
    /// The version metadata was malformed or missing mandatory fields.
    #[error("malformed version metadata: {0}")]
    Format(String),
    /// A version string could not be parsed as dotted-numeric.
    #[error("unparseable version string: {0:?}")]
    VersionParse(String),
    /// A downloaded artifact did not match its expected digest.
    #[error("integrity check failed (expected {expected}, got {actual})")]
    IntegrityMismatch {
        /// Expected SHA-256 digest, lowercase hex.
        expected: String,
        /// Actual SHA-256 digest of the artifact.
        actual: String,
    },
    /// Failed to perform a filesystem operation.
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),
    /// No updater executable exists locally and none can be fetched.
    #[error("no updater executable available at {0:?}")]
    InstallerMissing(PathBuf),
    /// The download was cancelled cooperatively.
    #[error("download cancelled")]
    Cancelled,
    /// A second download was requested while one is still running.
    #[error("another download is already in progress")]
    DownloadBusy,
    /// Generic error.
    #[error("{0}")]
    Other(String),
}
