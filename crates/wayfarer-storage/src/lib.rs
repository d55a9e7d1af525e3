//! HTTP plumbing, retry policies and local key/value storage for Wayfarer.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::{RequestBuilder, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "wayfarer-storage";

/// The four failure kinds every outbound call collapses into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    CredentialMissing,
    NetworkFailure,
    MalformedResponse,
    EmptyResult,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no credential configured for {service}")]
    CredentialMissing { service: &'static str },
    #[error("request failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("empty result: {0}")]
    EmptyResult(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::CredentialMissing { .. } => FailureKind::CredentialMissing,
            FetchError::Network(_) | FetchError::HttpStatus { .. } => FailureKind::NetworkFailure,
            FetchError::MalformedResponse(_) => FailureKind::MalformedResponse,
            FetchError::EmptyResult(_) => FailureKind::EmptyResult,
        }
    }

    /// Wraps a transport error with its URL stripped; two of the services carry
    /// their key in the query string.
    pub fn network(err: reqwest::Error) -> Self {
        FetchError::Network(err.without_url())
    }
}

/// Fixed-delay automatic retry applied to every outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Runs `operation` once plus up to `max_retries` more times, sleeping the fixed
    /// delay between attempts. The error of the final attempt is returned.
    pub async fn with_retry<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut retries_left = self.max_retries;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if retries_left > 0 => {
                    warn!(retries_left, error = %err, "attempt failed, retrying");
                    retries_left -= 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Exponential, capped delay schedule used by the user-triggered retry gate.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RetryBlocked {
    #[error("a retry is already in progress")]
    Pending,
    #[error("retry available in {}ms", .remaining.as_millis())]
    Backoff { remaining: Duration },
}

/// Gate for manual "try again" actions. Independent of [`RetryPolicy`]: it is driven
/// by user actions and widens its window after every consecutive failure.
#[derive(Debug, Clone)]
pub struct ManualRetryGate {
    backoff: BackoffPolicy,
    failures: u32,
    pending: bool,
    blocked_until: Option<Instant>,
}

impl Default for ManualRetryGate {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

impl ManualRetryGate {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            backoff,
            failures: 0,
            pending: false,
            blocked_until: None,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn check(&self, now: Instant) -> Result<(), RetryBlocked> {
        if self.pending {
            return Err(RetryBlocked::Pending);
        }
        match self.blocked_until {
            Some(until) if until > now => Err(RetryBlocked::Backoff {
                remaining: until - now,
            }),
            _ => Ok(()),
        }
    }

    pub fn begin(&mut self, now: Instant) -> Result<(), RetryBlocked> {
        self.check(now)?;
        self.pending = true;
        Ok(())
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.pending = false;
        self.blocked_until = None;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.failures = self.failures.saturating_add(1);
        self.pending = false;
        let window = self
            .backoff
            .delay_for_attempt(self.failures.saturating_sub(1) as usize);
        self.blocked_until = Some(now + window);
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
        }
    }
}

/// Thin wrapper over a configured `reqwest::Client` that turns responses into
/// decoded JSON or a [`FetchError`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, FetchError> {
        let resp = request.send().await.map_err(FetchError::network)?;
        let status = resp.status();
        let url = redacted_url(resp.url());

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body = resp.bytes().await.map_err(FetchError::network)?;
        debug!(%url, bytes = body.len(), "received response");
        serde_json::from_slice(&body)
            .map_err(|e| FetchError::MalformedResponse(format!("decoding {url}: {e}")))
    }
}

/// Scheme, host and path only.
pub fn redacted_url(url: &Url) -> String {
    format!(
        "{}://{}{}",
        url.scheme(),
        url.host_str().unwrap_or_default(),
        url.path()
    )
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// File-backed key/value store with browser local-storage semantics.
///
/// The whole file is one JSON object; every write replaces it atomically through a
/// temp file and rename.
#[derive(Debug)]
pub struct LocalStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get_item<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let mut items = self.read_all().await?;
        match items.remove(key) {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StorageError::Json {
                    path: self.path.clone(),
                    source,
                }),
            None => Ok(None),
        }
    }

    pub async fn set_item<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(value).map_err(|source| StorageError::Json {
            path: self.path.clone(),
            source,
        })?;
        let _guard = self.write_lock.lock().await;
        let mut items = self.read_all().await?;
        items.insert(key.to_string(), value);
        self.write_all(&items).await
    }

    pub async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.read_all().await?;
        if items.remove(key).is_some() {
            self.write_all(&items).await?;
        }
        Ok(())
    }

    async fn read_all(&self) -> Result<Map<String, Value>, StorageError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&text).map_err(|source| StorageError::Json {
            path: self.path.clone(),
            source,
        })
    }

    async fn write_all(&self, items: &Map<String, Value>) -> Result<(), StorageError> {
        let io_err = |path: &Path, source: std::io::Error| StorageError::Io {
            path: path.to_path_buf(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(items).map_err(|source| StorageError::Json {
            path: self.path.clone(),
            source,
        })?;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| io_err(&parent, e))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(|e| io_err(&temp_path, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| io_err(&temp_path, e))?;
        file.flush().await.map_err(|e| io_err(&temp_path, e))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_err(&self.path, err));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[tokio::test(start_paused = true)]
    async fn retry_returns_success_after_two_failures() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1000));
        let started = tokio::time::Instant::now();

        let result: Result<&str, String> = policy
            .with_retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(format!("boom {n}"))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_propagates_last_error_when_exhausted() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(1, Duration::from_millis(1000));

        let result: Result<(), String> = policy
            .with_retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("attempt {n}")) }
            })
            .await;

        assert_eq!(result, Err("attempt 1".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(0, Duration::from_secs(60));
        let result: Result<(), &str> = policy
            .with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("nope") }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(10));
    }

    #[test]
    fn manual_gate_blocks_while_pending_and_during_backoff() {
        let mut gate = ManualRetryGate::default();
        let t0 = Instant::now();

        gate.begin(t0).unwrap();
        assert_eq!(gate.begin(t0), Err(RetryBlocked::Pending));

        gate.record_failure(t0);
        assert_eq!(gate.failures(), 1);
        assert!(matches!(
            gate.check(t0 + Duration::from_millis(500)),
            Err(RetryBlocked::Backoff { .. })
        ));
        assert!(gate.check(t0 + Duration::from_secs(1)).is_ok());

        let t1 = t0 + Duration::from_secs(1);
        gate.begin(t1).unwrap();
        gate.record_failure(t1);
        assert_eq!(
            gate.check(t1 + Duration::from_secs(1)),
            Err(RetryBlocked::Backoff {
                remaining: Duration::from_secs(1)
            })
        );

        let t2 = t1 + Duration::from_secs(2);
        gate.begin(t2).unwrap();
        gate.record_success();
        assert_eq!(gate.failures(), 0);
        assert!(gate.check(t2).is_ok());
    }

    #[test]
    fn http_status_counts_as_network_failure() {
        let err = FetchError::HttpStatus {
            status: 503,
            url: "https://api.example.test/x".into(),
        };
        assert_eq!(err.kind(), FailureKind::NetworkFailure);
        assert_eq!(
            FetchError::CredentialMissing { service: "weather" }.kind(),
            FailureKind::CredentialMissing
        );
        assert_eq!(
            FetchError::EmptyResult("none".into()).kind(),
            FailureKind::EmptyResult
        );
    }

    #[test]
    fn redacted_url_drops_query_string() {
        let url = Url::parse("https://api.example.test/data/2.5/weather?q=Rome&appid=secret").unwrap();
        assert_eq!(redacted_url(&url), "https://api.example.test/data/2.5/weather");
    }

    #[tokio::test]
    async fn local_storage_round_trips_items_and_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("storage.json");
        let storage = LocalStorage::new(&path);

        assert_eq!(storage.get_item::<Vec<String>>("k").await.unwrap(), None);

        storage
            .set_item("k", &vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        storage.set_item("other", &42).await.unwrap();

        let reopened = LocalStorage::new(&path);
        assert_eq!(
            reopened.get_item::<Vec<String>>("k").await.unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );

        reopened.remove_item("k").await.unwrap();
        assert_eq!(reopened.get_item::<Vec<String>>("k").await.unwrap(), None);
        assert_eq!(reopened.get_item::<i32>("other").await.unwrap(), Some(42));

        let leftovers = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn local_storage_reports_corrupt_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "{not json").unwrap();
        let storage = LocalStorage::new(&path);
        assert!(matches!(
            storage.get_item::<i32>("k").await,
            Err(StorageError::Json { .. })
        ));
    }
}
