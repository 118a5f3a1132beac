use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Client;
use serde_json::Value;

use crate::error::{Result, UpdateError};

/// Repair common misconfigurations in metadata-supplied URLs: a duplicated
/// scheme prefix is collapsed into one correct scheme, and redundant
/// slashes after the `://` separator are collapsed (the separator itself is
/// never touched).
pub fn normalize_url(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }

    let mut url = url.to_string();
    for (broken, fixed) in [
        ("https://https://", "https://"),
        ("http://https://", "https://"),
        ("http://http://", "http://"),
    ] {
        if url.starts_with(broken) {
            let repaired = format!("{fixed}{}", &url[broken.len()..]);
            tracing::warn!(from = %url, to = %repaired, "repaired duplicated scheme prefix");
            url = repaired;
            break;
        }
    }

    if let Some((scheme, rest)) = url.split_once("://") {
        let mut rest = rest.to_string();
        while rest.contains("//") {
            rest = rest.replace("//", "/");
        }
        return format!("{scheme}://{rest}");
    }

    url
}

/// Remote release description decoded from the update endpoint.
///
/// Immutable: created once per successful metadata fetch and discarded when
/// the update cycle completes or is abandoned. URLs are normalized on
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Remote version string. Presence is mandatory; whether it parses as a
    /// version is decided later by the comparator (which fails safe).
    pub version: String,
    /// Human-readable changelog, possibly empty.
    pub changelog: String,
    /// Where to download the update package.
    pub package_url: String,
    /// Where to download the updater executable, if the server provides one.
    pub updater_url: String,
    /// Expected SHA-256 of the package, hex; empty means "trust without checksum".
    pub package_sha256: String,
    /// Expected SHA-256 of the updater executable, hex; empty means no check.
    pub updater_sha256: String,
}

impl VersionInfo {
    /// Decode the JSON body of the metadata endpoint.
    ///
    /// Only `version` is mandatory; every other field defaults to an empty
    /// string when missing or of the wrong type.
    pub fn parse_json(bytes: &[u8]) -> Result<Self> {
        let doc: Value = serde_json::from_slice(bytes)
            .map_err(|err| UpdateError::Format(err.to_string()))?;

        let text = |value: &Value, key: &str| -> String {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let version = text(&doc, "version");
        if version.is_empty() {
            return Err(UpdateError::Format(
                "missing mandatory `version` field".into(),
            ));
        }

        let checksums = doc.get("sha256").cloned().unwrap_or(Value::Null);

        Ok(Self {
            version,
            changelog: text(&doc, "changelog"),
            package_url: normalize_url(&text(&doc, "url")),
            updater_url: normalize_url(&text(&doc, "update_exe_url")),
            package_sha256: text(&checksums, "package"),
            updater_sha256: text(&checksums, "update_exe"),
        })
    }
}

/// Abstraction over fetching raw version metadata.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Fetch the raw response bytes for the given URL.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP(S) metadata fetcher with a connect/read timeout.
pub struct HttpMetadataFetcher {
    client: Client,
    user_agent: String,
}

impl HttpMetadataFetcher {
    /// Build a fetcher identifying itself as `user_agent` and giving up
    /// after `timeout` (default contract: 10 s).
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            user_agent: user_agent.into(),
        })
    }
}

#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::HttpStatus(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(map_request_error)?;
        Ok(bytes.to_vec())
    }
}

/// Classify a reqwest failure: deadline overruns become [`UpdateError::Timeout`],
/// everything else is a transport error.
pub(crate) fn map_request_error(err: reqwest::Error) -> UpdateError {
    if err.is_timeout() {
        UpdateError::Timeout
    } else {
        UpdateError::Network(err)
    }
}
