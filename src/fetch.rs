//!
//! src/fetch.rs
//!
//! Defines methods for hitting specified endpoints and
//! returning unparsed data, handling retries, etc.
//!

use std::time::Duration;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use reqwest::{header, redirect, Client, RequestBuilder};
use tokio::time::sleep;
use tracing::warn;
use url::Url;

use crate::config::{HttpConfig, MusicBrainzConfig, RetryConfig, SlskdConfig};
use crate::errors::ScoutError;

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

fn client_with_headers(http: &HttpConfig, headers: header::HeaderMap) ->
    Result<Client, ScoutError> {
    client_helper(http)
        .default_headers(headers)
        .build()
        .map_err(|e| ScoutError::Http(format!("build client: {e}")))
}

#[derive(Clone, Debug)]
pub struct SlskdClient {
    pub http: Client,
    pub base: Url
}

impl SlskdClient {
    pub fn new(http_config: &HttpConfig, cfg: &SlskdConfig) ->
        Result<Self, ScoutError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        headers.insert(
            "X-API-Key",
            header::HeaderValue::from_str(&cfg.api_key)
                .map_err(|e| ScoutError::Config(format!("invalid slskd api key: {e}")))?
        );
        let http = client_with_headers(http_config, headers)?;
        Ok(Self { http, base: cfg.base_url.clone() })
    }

    /// POST /api/v0/searches
    pub fn start_search(&self, text: &str, timeout_ms: u64) -> RequestBuilder {
        let url = self.base.join("api/v0/searches").unwrap();
        self.http.post(url).json(&serde_json::json!({
            "searchText": text,
            "searchTimeout": timeout_ms,
        }))
    }

    /// GET /api/v0/searches/{id}
    pub fn search_state(&self, search_id: &str) -> RequestBuilder {
        let url = self.base.join(&format!("api/v0/searches/{search_id}")).unwrap();
        self.http.get(url)
    }

    /// GET /api/v0/searches/{id}/responses
    pub fn search_responses(&self, search_id: &str) -> RequestBuilder {
        let url = self.base
            .join(&format!("api/v0/searches/{search_id}/responses"))
            .unwrap();
        self.http.get(url)
    }

    /// GET /api/v0/application
    pub fn application_state(&self) -> RequestBuilder {
        let url = self.base.join("api/v0/application").unwrap();
        self.http.get(url)
    }
}

#[derive(Clone, Debug)]
pub struct MusicBrainzClient {
    pub http: Client,
    pub base: Url,
    pub search_limit: u32
}

impl MusicBrainzClient {
    pub fn new(http_config: &HttpConfig, cfg: &MusicBrainzConfig) ->
        Result<Self, ScoutError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_str(&cfg.user_agent)
                .map_err(|e| ScoutError::Config(format!("invalid mb user-agent {e}")))?
        );
        let http = client_with_headers(http_config, headers)?;
        Ok(Self {
            http,
            base: cfg.base_url.clone(),
            search_limit: cfg.search_limit
        })
    }

    /// GET /ws/2/recording?query=...&fmt=json&limit=
    pub fn search_recording(&self, lucene: &str) -> RequestBuilder {
        let url = self.base.join("recording").unwrap();
        self.http.get(url).query(&[
            ("query", lucene),
            ("fmt", "json"),
            ("limit", &self.search_limit.to_string())
        ])
    }
}

fn backoff_delay(retry: &RetryConfig, attempt: usize, rng: &mut SmallRng) -> Duration {
    let exp = (1_u64 << attempt.min(6)) * retry.base_backoff.as_millis() as u64;
    let jitter = if retry.jitter { rng.gen_range(50..=200) } else { 0 };
    Duration::from_millis(exp + jitter)
}

/// Sends a request, retrying 429/5xx and connection errors with
/// exponential backoff. Auth rejections never retry; they surface as
/// transport errors so the caller can stop the whole batch.
pub async fn http_with_retry(
    request: RequestBuilder,
    retry: &RetryConfig
) -> Result<serde_json::Value, ScoutError> {
    let mut rng = SmallRng::from_entropy();
    let mut attempt = 0_usize;
    loop {
        let response = request.try_clone()
            .ok_or_else(|| ScoutError::Http("non-cloneable request".to_string()))?
            .send()
            .await;
        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    let v = resp.json::<serde_json::Value>().await?;
                    return Ok(v);
                }
                if status.as_u16() == 401 || status.as_u16() == 403 {
                    return Err(ScoutError::Transport(
                        format!("authentication rejected ({status})")
                    ));
                }
                let retryable = retry.retryable_statuses.contains(&status.as_u16());
                if !retryable || attempt >= retry.max_attempts as usize {
                    return Err(ScoutError::Http(
                        format!("status {status} after {attempt} retries")
                    ));
                }
                let backoff = backoff_delay(retry, attempt, &mut rng);
                warn!(status = %status, backoff_ms = backoff.as_millis() as u64, "http.retry");
                sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt >= retry.max_attempts as usize {
                    return Err(e.into());
                }
                let backoff = backoff_delay(retry, attempt, &mut rng);
                warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "http.retry.error");
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
