use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Result, UpdateError};

/// Read granularity for hashing; memory use is constant regardless of
/// file size.
const READ_BUFFER: usize = 4096;

/// Streaming SHA-256 of a file, as lowercase hex.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; READ_BUFFER];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Check a file against an expected hex digest, case-insensitively.
///
/// An empty expected hash passes by policy: legacy metadata may omit
/// checksums, and such releases are trusted without verification rather
/// than rejected. The pass is logged so it is never silent.
pub fn expect_digest(path: &Path, expected_hex: &str) -> Result<()> {
    if expected_hex.is_empty() {
        tracing::warn!(
            path = %path.display(),
            "no checksum provided, trusting artifact without verification"
        );
        return Ok(());
    }

    let actual = file_sha256(path)?;
    if actual.eq_ignore_ascii_case(expected_hex) {
        tracing::info!(path = %path.display(), "checksum verified");
        Ok(())
    } else {
        Err(UpdateError::IntegrityMismatch {
            expected: expected_hex.to_ascii_lowercase(),
            actual,
        })
    }
}

/// Boolean form of [`expect_digest`]; I/O failures still propagate.
pub fn verify_file(path: &Path, expected_hex: &str) -> Result<bool> {
    match expect_digest(path, expected_hex) {
        Ok(()) => Ok(true),
        Err(UpdateError::IntegrityMismatch { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}
