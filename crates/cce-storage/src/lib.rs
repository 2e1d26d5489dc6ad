//! Catalog record stores, raw response archive, and HTTP fetch utilities for CCE.

pub mod store;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub use store::memory::MemoryCatalogStore;
pub use store::postgres::{run_migrations, PgCatalogStore};
pub use store::{CatalogStore, EligibilityFilter, FieldWrites, StoreError};

pub const CRATE_NAME: &str = "cce-storage";

/// Query parameters never written to logs or archive paths.
const REDACTED_PARAMS: &[&str] = &["api_key", "apikey", "key", "token"];

#[derive(Debug, Clone)]
pub struct ArchivedResponse {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Immutable, hash-addressed archive of raw provider response bodies.
#[derive(Debug, Clone)]
pub struct ResponseArchive {
    root: PathBuf,
}

impl ResponseArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn response_relative_path(
        &self,
        fetched_at: DateTime<Utc>,
        provider_id: &str,
        call_kind: &str,
        content_hash: &str,
    ) -> PathBuf {
        PathBuf::from(fetched_at.format("%Y%m%d").to_string())
            .join(provider_id)
            .join(call_kind)
            .join(format!("{content_hash}.json"))
    }

    /// Write via temp file + rename; an existing hash path short-circuits as a dedup hit.
    pub async fn store_response(
        &self,
        fetched_at: DateTime<Utc>,
        provider_id: &str,
        call_kind: &str,
        bytes: &[u8],
    ) -> anyhow::Result<ArchivedResponse> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path =
            self.response_relative_path(fetched_at, provider_id, call_kind, &content_hash);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating archive directory {}", parent.display()))?;

        let archived = |deduplicated| ArchivedResponse {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking archive path {}", absolute_path.display()))?
        {
            return Ok(archived(true));
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp archive file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp archive file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp archive file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(archived(false)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(archived(true))
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "renaming temp archive {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String, body: String },
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Request { source, .. } if source.is_timeout())
    }

    /// Response body of a non-success status, if any. Providers report quota errors here.
    pub fn body(&self) -> Option<&str> {
        match self {
            FetchError::HttpStatus { body, .. } => Some(body),
            FetchError::Request { .. } => None,
        }
    }
}

/// Bounded-timeout GET client with retry on transient statuses.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(&self, provider_id: &str, url: Url) -> Result<FetchedResponse, FetchError> {
        let display_url = redact_url(&url);
        let span = info_span!("http_fetch", provider_id, url = %display_url);
        self.fetch_with_retries(url, display_url).instrument(span).await
    }

    async fn fetch_with_retries(
        &self,
        url: Url,
        display_url: String,
    ) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0usize;
        loop {
            let can_retry = attempt < self.backoff.max_retries;
            match self.client.get(url.clone()).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp
                        .bytes()
                        .await
                        .map_err(|source| FetchError::Request {
                            url: display_url.clone(),
                            source,
                        })?
                        .to_vec();

                    if status.is_success() {
                        return Ok(FetchedResponse { status, body });
                    }

                    if classify_status(status) == RetryDisposition::Retryable && can_retry {
                        debug!(%status, attempt, "retrying after status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: display_url,
                        body: String::from_utf8_lossy(&body).into_owned(),
                    });
                }
                Err(source) => {
                    if classify_reqwest_error(&source) == RetryDisposition::Retryable && can_retry {
                        debug!(error = %source, attempt, "retrying after request error");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request {
                        url: display_url,
                        source,
                    });
                }
            }
        }
    }
}

/// Render a URL with credential-bearing query parameters masked.
pub fn redact_url(url: &Url) -> String {
    if url.query().is_none() {
        return url.to_string();
    }
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if REDACTED_PARAMS.iter().any(|p| k.eq_ignore_ascii_case(p)) {
                "***".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), value)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn response_hashing_is_stable() {
        let hash = ResponseArchive::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn archive_deduplicates_identical_bodies() {
        let dir = tempdir().expect("tempdir");
        let archive = ResponseArchive::new(dir.path());
        let fetched_at = DateTime::parse_from_rfc3339("2026-02-24T12:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);

        let first = archive
            .store_response(fetched_at, "serpapi", "search", br#"{"products":[]}"#)
            .await
            .expect("first store");
        let second = archive
            .store_response(fetched_at, "serpapi", "search", br#"{"products":[]}"#)
            .await
            .expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first
            .relative_path
            .starts_with(PathBuf::from("20260224").join("serpapi").join("search")));
        assert!(first.absolute_path.exists());
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(BackoffPolicy::none().delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn redaction_masks_api_key_only() {
        let url = Url::parse("https://serpapi.com/search.json?engine=home_depot&q=drill&api_key=secret")
            .unwrap();
        let shown = redact_url(&url);
        assert!(shown.contains("q=drill"));
        assert!(shown.contains("api_key=***") || shown.contains("api_key=%2A%2A%2A"));
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn transient_statuses_are_retryable() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), RetryDisposition::NonRetryable);
    }
}
