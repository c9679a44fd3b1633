//! Rate-limited fetch client
//!
//! All remote traffic goes through [`RateLimitClient`]: a reqwest client with
//! a fixed header profile, quota-header bookkeeping, and the retrying raw
//! content fetch. Quota exhaustion is informational only: it is surfaced to
//! the observer and via [`RateLimitClient::rate_limit`], never used to block
//! a request.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// API lookups (branch, tree, store metadata)
const API_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw file content downloads
const RAW_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw content retries before giving up on a path
const RAW_ATTEMPTS: u32 = 3;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Failed to download after 3 attempts: {path}")]
    Exhausted { path: String },
}

impl FetchError {
    /// Denied by the remote end (as opposed to transport trouble).
    pub fn is_forbidden(&self) -> bool {
        matches!(self, FetchError::Status { status, .. } if *status == reqwest::StatusCode::FORBIDDEN)
    }
}

/// Remaining request quota as last reported by the source.
///
/// Mutated only by responses that actually carry quota headers; a response
/// without them leaves the previous reading in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub remaining: Option<u64>,
    pub limit: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitState {
    /// `"remaining/limit"`, or None before any quota headers were seen.
    pub fn display(&self) -> Option<String> {
        let remaining = self.remaining?;
        let limit = self.limit?;
        Some(format!("{remaining}/{limit}"))
    }
}

type Observer = Arc<dyn Fn(&str) + Send + Sync>;

/// HTTP client wrapper shared by every component that talks to the network.
pub struct RateLimitClient {
    client: reqwest::Client,
    raw_base: String,
    state: Mutex<RateLimitState>,
    observer: Mutex<Option<Observer>>,
}

impl std::fmt::Debug for RateLimitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitClient")
            .field("raw_base", &self.raw_base)
            .finish_non_exhaustive()
    }
}

impl RateLimitClient {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_raw_base("https://raw.githubusercontent.com")
    }

    /// Build against a different raw-content host (tests point this at a
    /// local mock server).
    pub fn with_raw_base(raw_base: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .default_headers(header_profile())
            .build()?;
        Ok(Self {
            client,
            raw_base: raw_base.trim_end_matches('/').to_string(),
            state: Mutex::new(RateLimitState::default()),
            observer: Mutex::new(None),
        })
    }

    /// Register the observer notified with `"remaining/limit"` after every
    /// response that carries quota headers.
    pub fn set_observer(&self, observer: impl Fn(&str) + Send + Sync + 'static) {
        *self.observer.lock().expect("observer lock") = Some(Arc::new(observer));
    }

    /// Last quota reading.
    pub fn rate_limit(&self) -> RateLimitState {
        self.state.lock().expect("rate limit lock").clone()
    }

    /// GET a JSON document with the API timeout.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self.client.get(url).timeout(API_TIMEOUT).send().await?;
        self.update_rate_limits(response.headers());
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                url: url.to_string(),
            });
        }
        Ok(response.json().await?)
    }

    /// GET raw content from a repository path at a specific revision.
    ///
    /// Retries up to [`RAW_ATTEMPTS`] times on any failure, immediately and
    /// without backoff, returning the first successful body. Exhausting the
    /// retries is a terminal error naming the path.
    pub async fn fetch_manifest(
        &self,
        repo: &str,
        revision: &str,
        path: &str,
    ) -> Result<Vec<u8>, FetchError> {
        let url = format!("{}/{repo}/{revision}/{path}", self.raw_base);
        for attempt in 1..=RAW_ATTEMPTS {
            match self.try_fetch_raw(&url).await {
                Ok(body) => return Ok(body),
                Err(err) => {
                    tracing::debug!("fetch attempt {attempt}/{RAW_ATTEMPTS} failed for {path}: {err}");
                }
            }
        }
        Err(FetchError::Exhausted {
            path: path.to_string(),
        })
    }

    async fn try_fetch_raw(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).timeout(RAW_TIMEOUT).send().await?;
        self.update_rate_limits(response.headers());
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Pull quota headers out of a response, if present.
    ///
    /// Header lookup is case-insensitive (reqwest normalizes names). A
    /// response without `x-ratelimit-remaining` leaves the state untouched
    /// rather than resetting it to unknown.
    fn update_rate_limits(&self, headers: &HeaderMap) {
        let Some(remaining) = header_u64(headers, "x-ratelimit-remaining") else {
            return;
        };
        let limit = header_u64(headers, "x-ratelimit-limit");
        let reset_at = header_u64(headers, "x-ratelimit-reset")
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0));

        let display = {
            let mut state = self.state.lock().expect("rate limit lock");
            state.remaining = Some(remaining);
            state.limit = limit;
            state.reset_at = reset_at;
            state.display()
        };

        let observer = self.observer.lock().expect("observer lock").clone();
        if let (Some(display), Some(observer)) = (display, observer) {
            observer(&display);
        }
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Fixed header profile attached to every request.
fn header_profile() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(crate::USER_AGENT));
    headers.insert(
        REFERER,
        HeaderValue::from_static("https://store.steampowered.com/"),
    );
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_rate_limit_headers_update_state_and_notify() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/repo/sha/file")
            .with_status(200)
            .with_header("X-RateLimit-Remaining", "42")
            .with_header("X-RateLimit-Limit", "60")
            .with_header("X-RateLimit-Reset", "1700000000")
            .with_body("data")
            .create_async()
            .await;

        let client = RateLimitClient::with_raw_base(&server.url()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        client.set_observer(move |info| seen_clone.lock().unwrap().push(info.to_string()));

        let body = client.fetch_manifest("repo", "sha", "file").await.unwrap();
        assert_eq!(body, b"data");

        let state = client.rate_limit();
        assert_eq!(state.remaining, Some(42));
        assert_eq!(state.limit, Some(60));
        assert!(state.reset_at.is_some());
        assert_eq!(state.display().as_deref(), Some("42/60"));
        assert_eq!(seen.lock().unwrap().as_slice(), ["42/60"]);
    }

    #[tokio::test]
    async fn test_missing_quota_headers_leave_state_unchanged() {
        let mut server = mockito::Server::new_async().await;
        let _first = server
            .mock("GET", "/r/s/a")
            .with_header("x-ratelimit-remaining", "10")
            .with_header("x-ratelimit-limit", "60")
            .with_body("a")
            .create_async()
            .await;
        let _second = server
            .mock("GET", "/r/s/b")
            .with_body("b")
            .create_async()
            .await;

        let client = RateLimitClient::with_raw_base(&server.url()).unwrap();
        client.fetch_manifest("r", "s", "a").await.unwrap();
        client.fetch_manifest("r", "s", "b").await.unwrap();

        // The second response carried no quota headers; the reading sticks
        assert_eq!(client.rate_limit().display().as_deref(), Some("10/60"));
    }

    #[tokio::test]
    async fn test_fetch_manifest_exhausts_after_three_attempts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/r/s/depot/missing.manifest")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let client = RateLimitClient::with_raw_base(&server.url()).unwrap();
        let err = client
            .fetch_manifest("r", "s", "depot/missing.manifest")
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, FetchError::Exhausted { path } if path == "depot/missing.manifest"));
    }

    #[tokio::test]
    async fn test_fetch_manifest_first_success_short_circuits() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut server = mockito::Server::new_async().await;
        let counter_clone = counter.clone();
        let _mock = server
            .mock("GET", "/r/s/ok.manifest")
            .with_body_from_request(move |_| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                b"manifest".to_vec()
            })
            .create_async()
            .await;

        let client = RateLimitClient::with_raw_base(&server.url()).unwrap();
        let body = client.fetch_manifest("r", "s", "ok.manifest").await.unwrap();
        assert_eq!(body, b"manifest");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
