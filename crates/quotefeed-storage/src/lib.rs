//! JSON quote store + HTTP fetch utilities for quotefeed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use quotefeed_core::{normalize_items, PersistedDocument, QuoteCollection};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "quotefeed-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o on quote store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("quote store {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serializing quote document: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Whole-document JSON file holding the persisted quote collection.
///
/// The file is the only source of truth; nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct QuoteStore {
    path: PathBuf,
}

impl QuoteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and normalize the stored collection.
    ///
    /// A missing file is an empty collection. Unparseable JSON is reported as
    /// [`StoreError::Corrupt`] instead of being treated as empty, so a damaged
    /// file never silently resets history.
    pub async fn read(&self) -> Result<QuoteCollection, StoreError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "quote store missing; starting empty");
                return Ok(Vec::new());
            }
            Err(err) => return Err(StoreError::io(&self.path, err)),
        };

        let value: JsonValue = serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let raw = raw_items(&value);
        let quotes = normalize_items(raw);
        if quotes.len() != raw.len() {
            warn!(
                path = %self.path.display(),
                dropped = raw.len() - quotes.len(),
                "dropped invalid stored quote entries"
            );
        }
        Ok(quotes)
    }

    /// Replace the stored document atomically (temp file + rename).
    pub async fn write(&self, document: &PersistedDocument) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(document)?;

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .map_err(|err| StoreError::io(&parent, err))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "quotes.json".to_string());
        let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        if let Err(err) = write_temp(&temp_path, &bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::io(&temp_path, err));
        }

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::io(&self.path, err));
        }

        debug!(path = %self.path.display(), count = document.count, "quote store written");
        Ok(())
    }
}

async fn write_temp(temp_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(temp_path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Raw item list of a stored document: a bare array (legacy) or the
/// `quotes` field of an object.
fn raw_items(value: &JsonValue) -> &[JsonValue] {
    match value {
        JsonValue::Array(items) => items.as_slice(),
        JsonValue::Object(map) => map
            .get("quotes")
            .and_then(JsonValue::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
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
    if err.is_timeout() || err.is_connect() || err.is_request() {
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
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
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
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

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

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        self.fetch_with_retries(url).instrument(span).await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::NonRetryable
                        || attempt >= self.backoff.max_retries
                    {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                        });
                    }
                    warn!(%status, attempt, "retryable http status");
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::NonRetryable
                        || attempt >= self.backoff.max_retries
                    {
                        return Err(FetchError::Request(err));
                    }
                    warn!(error = %err, attempt, "retryable request error");
                }
            }

            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use quotefeed_core::QuoteRecord;
    use tempfile::tempdir;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T10:00:00Z")
            .expect("ts")
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempdir().expect("tempdir");
        let store = QuoteStore::new(dir.path().join("nope.json"));
        assert!(store.read().await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = QuoteStore::new(dir.path().join("nested/deeper/quotes.json"));
        let quotes = vec![
            QuoteRecord::new("A", "Ann").with_tags(["life", "love"]),
            QuoteRecord::new("B", ""),
        ];
        let doc = PersistedDocument::new(fixed_time(), "https://example.test/", "Quotes", quotes.clone());

        store.write(&doc).await.expect("write");
        assert_eq!(store.read().await.expect("read"), quotes);

        let leftovers = std::fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn write_replaces_previous_document() {
        let dir = tempdir().expect("tempdir");
        let store = QuoteStore::new(dir.path().join("quotes.json"));
        let first = PersistedDocument::new(fixed_time(), "s", "t", vec![QuoteRecord::new("A", "")]);
        let second = PersistedDocument::new(fixed_time(), "s", "t", vec![QuoteRecord::new("B", "")]);
        store.write(&first).await.expect("first");
        store.write(&second).await.expect("second");

        let raw: JsonValue =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["count"], 1);
        assert_eq!(raw["quotes"][0]["text"], "B");
    }

    #[tokio::test]
    async fn legacy_and_odd_shapes_are_tolerated() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("quotes.json");
        let store = QuoteStore::new(&path);

        std::fs::write(&path, r#"{"quotes": [" old one ", "", 5, {"text": "new", "author": "N"}]}"#).unwrap();
        let quotes = store.read().await.expect("read");
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].text, "old one");
        assert_eq!(quotes[1].author, "N");

        std::fs::write(&path, r#"["a", "b"]"#).unwrap();
        assert_eq!(store.read().await.expect("read").len(), 2);

        std::fs::write(&path, r#"{"quotes": "nope"}"#).unwrap();
        assert!(store.read().await.expect("read").is_empty());

        std::fs::write(&path, "42").unwrap();
        assert!(store.read().await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn corrupt_json_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("quotes.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = QuoteStore::new(&path).read().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn retryable_statuses() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }
}
