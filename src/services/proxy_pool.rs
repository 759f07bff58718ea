//! Cached, health-tracked pool of upstream HTTP proxies.
//!
//! The proxy list lives in Redis under [`PROXY_LIST_KEY`] as one JSON array
//! with a TTL. When the key is missing a caller writes an empty array first
//! ([`ProxyPool::mark_empty`]) so that concurrent workers see a refill in
//! flight instead of all hitting the upstream API, then fetches and stores the
//! fresh list ([`ProxyPool::refill`]). The empty marker carries a short TTL of
//! its own, so a failed refill is retried by the next caller instead of
//! leaving the pool empty for the whole list TTL. A cached list in which no
//! proxy is usable any more is swapped for the marker and refilled the same
//! way.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::models::proxy::{ProxyRecord, UpstreamProxy};
use crate::services::retry::{retry, RetryPolicy};
use crate::services::store::{Store, StoreError};

pub const PROXY_LIST_KEY: &str = "webshare:proxy_list";

const MAX_UPDATE_ATTEMPTS: u32 = 16;

/// Source of fresh proxy credentials.
#[async_trait]
pub trait ProxySource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<UpstreamProxy>, ProxyApiError>;
}

#[derive(Deserialize)]
struct ProxyListResponse {
    results: Vec<UpstreamProxy>,
}

/// Client for the Webshare proxy listing API.
pub struct WebshareClient {
    http: reqwest::Client,
    url: String,
    token: String,
}

impl WebshareClient {
    pub fn new(url: &str, token: &str) -> Result<Self, ProxyApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            url: url.to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl ProxySource for WebshareClient {
    async fn fetch(&self) -> Result<Vec<UpstreamProxy>, ProxyApiError> {
        let response = self
            .http
            .get(&self.url)
            .query(&[("mode", "direct")])
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .send()
            .await?;

        check_status(response.status())?;
        let body = response.text().await?;
        parse_proxy_list(&body)
    }
}

/// 200 is the only success. 429 and 5xx are worth retrying; anything else is
/// a hard failure.
pub fn check_status(status: StatusCode) -> Result<(), ProxyApiError> {
    match status {
        StatusCode::OK => Ok(()),
        StatusCode::TOO_MANY_REQUESTS => Err(ProxyApiError::RateLimited),
        s if s.is_server_error() => Err(ProxyApiError::Upstream(s.as_u16())),
        s => Err(ProxyApiError::Status(s.as_u16())),
    }
}

pub fn parse_proxy_list(body: &str) -> Result<Vec<UpstreamProxy>, ProxyApiError> {
    serde_json::from_str::<ProxyListResponse>(body)
        .map(|r| r.results)
        .map_err(|e| ProxyApiError::Malformed(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    pub ttl: Duration,
    /// Lifetime of the empty marker written while a refill is in flight.
    pub marker_ttl: Duration,
    /// A proxy with this many reported failures is no longer handed out.
    pub failure_threshold: u32,
    pub refill_policy: RetryPolicy,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(15 * 60),
            marker_ttl: Duration::from_secs(60),
            failure_threshold: 3,
            refill_policy: RetryPolicy::new(3, Duration::from_secs(2)),
        }
    }
}

pub struct ProxyPool {
    store: Arc<dyn Store>,
    source: Arc<dyn ProxySource>,
    config: ProxyPoolConfig,
}

impl ProxyPool {
    pub fn new(store: Arc<dyn Store>, source: Arc<dyn ProxySource>, config: ProxyPoolConfig) -> Self {
        Self {
            store,
            source,
            config,
        }
    }

    /// Fetch the upstream list and cache it with every record reset to
    /// healthy. Returns the number of proxies cached.
    pub async fn refill(&self) -> Result<usize, ProxyPoolError> {
        let upstream = retry(
            self.config.refill_policy,
            ProxyApiError::is_retryable,
            |attempt| {
                tracing::info!(attempt, "Fetching proxy list from upstream");
                self.source.fetch()
            },
        )
        .await
        .map_err(|e| {
            tracing::error!(attempts = e.attempts, error = %e.last, "Proxy list refill failed");
            ProxyPoolError::Api(e.into_inner())
        })?;

        let records: Vec<ProxyRecord> = upstream.into_iter().map(ProxyRecord::from).collect();
        let payload = serde_json::to_string(&records)?;
        self.store
            .set_ex(PROXY_LIST_KEY, &payload, self.config.ttl)
            .await?;

        metrics::counter!("proxy_refills_total").increment(1);
        tracing::info!(proxies = records.len(), "Proxy list cached");
        Ok(records.len())
    }

    /// Cache an empty list so other workers see a refill in progress.
    pub async fn mark_empty(&self) -> Result<(), ProxyPoolError> {
        self.store
            .set_ex(PROXY_LIST_KEY, "[]", self.config.marker_ttl)
            .await?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<(String, Vec<ProxyRecord>)>, ProxyPoolError> {
        match self.store.get(PROXY_LIST_KEY).await? {
            Some(raw) => {
                let records = serde_json::from_str(&raw)?;
                Ok(Some((raw, records)))
            }
            None => Ok(None),
        }
    }

    fn choose(&self, records: &[ProxyRecord]) -> Option<ProxyRecord> {
        let eligible: Vec<&ProxyRecord> = records
            .iter()
            .filter(|p| p.is_eligible(self.config.failure_threshold))
            .collect();
        eligible.choose(&mut rand::thread_rng()).map(|p| (*p).clone())
    }

    /// A uniformly random healthy proxy.
    pub async fn pick(&self) -> Result<ProxyRecord, ProxyPoolError> {
        let (_, records) = self.load().await?.ok_or(ProxyPoolError::PoolNotFound)?;
        self.choose(&records).ok_or(ProxyPoolError::PoolExhausted)
    }

    /// `pick`, refilling first when the list is missing or every cached
    /// proxy has been used up. An empty list means another caller is
    /// refilling, so it is reported as exhausted without a fetch.
    pub async fn acquire(&self) -> Result<ProxyRecord, ProxyPoolError> {
        match self.load().await? {
            None => {
                tracing::info!("Proxy list not cached, refilling");
                self.mark_empty().await?;
            }
            Some((_, records)) if records.is_empty() => {
                return Err(ProxyPoolError::PoolExhausted);
            }
            Some((raw, records)) => {
                if let Some(proxy) = self.choose(&records) {
                    return Ok(proxy);
                }
                // Only the caller that replaces this exact list refills it.
                if !self
                    .store
                    .compare_and_swap(PROXY_LIST_KEY, &raw, "[]", self.config.marker_ttl)
                    .await?
                {
                    return self.pick().await;
                }
                tracing::info!(proxies = records.len(), "No usable proxy left in cached list, refilling");
            }
        }

        self.refill().await?;
        self.pick().await
    }

    /// Count a failure against a proxy. Best effort: a missing list or id is
    /// only logged.
    pub async fn report_failure(&self, proxy_id: &str) -> Result<(), ProxyPoolError> {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let Some((raw, mut records)) = self.load().await? else {
                tracing::warn!(proxy_id, "Proxy list expired before failure could be recorded");
                return Ok(());
            };
            let Some(record) = records.iter_mut().find(|p| p.id == proxy_id) else {
                tracing::warn!(proxy_id, "Proxy not in cached list, failure not recorded");
                return Ok(());
            };
            record.failures += 1;
            let failures = record.failures;

            let updated = serde_json::to_string(&records)?;
            if self
                .store
                .compare_and_swap(PROXY_LIST_KEY, &raw, &updated, self.config.ttl)
                .await?
            {
                metrics::counter!("proxy_failures_reported_total").increment(1);
                tracing::info!(proxy_id, failures, "Proxy failure recorded");
                return Ok(());
            }
        }
        Err(ProxyPoolError::Conflict)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyApiError {
    #[error("HTTP request to proxy API failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Proxy API rate limited the request")]
    RateLimited,

    #[error("Proxy API server error: HTTP {0}")]
    Upstream(u16),

    #[error("Proxy API returned HTTP {0}")]
    Status(u16),

    #[error("Malformed proxy list: {0}")]
    Malformed(String),
}

impl ProxyApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProxyApiError::Http(_) | ProxyApiError::RateLimited | ProxyApiError::Upstream(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyPoolError {
    #[error("Proxy list is not cached")]
    PoolNotFound,

    #[error("No usable proxy in the cached list")]
    PoolExhausted,

    #[error("Proxy list kept changing while updating it")]
    Conflict,

    #[error(transparent)]
    Api(#[from] ProxyApiError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
