//! External market rate lookup with per-currency caching.
//!
//! Market rates come from a public forex table API, except KRW which is
//! quoted by a dedicated bid/ask endpoint (the table rate lags the
//! dealable rate there). Each currency slot is refreshed at most once
//! per freshness window, including after a failed fetch.

use async_trait::async_trait;
use dashmap::DashMap;
use escrow_core::Currency;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Slot freshness window. A cached rate is served without refetching
/// within this window; a stale rate is never served.
const FRESHNESS_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RateError {
    #[error("rate request failed: {0}")]
    Http(String),

    #[error("no rate for {0} in response")]
    MissingRate(Currency),

    #[error("malformed rate response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for RateError {
    fn from(e: reqwest::Error) -> Self {
        RateError::Http(e.to_string())
    }
}

/// Source of a USD-to-fiat market rate.
#[async_trait]
pub trait RateFetcher: Send + Sync {
    async fn fetch(&self, currency: Currency) -> Result<f64, RateError>;
}

#[derive(Debug, Clone, Copy, Default)]
struct RateSlot {
    rate: Option<f64>,
    fetched_at: Option<Instant>,
    last_attempt: Option<Instant>,
}

/// Per-currency rate cache.
///
/// At most one fetch is made per slot per freshness window. A failed
/// fetch leaves the slot empty for the remainder of its window rather
/// than serving a stale value or hammering the upstream.
pub struct RateCache {
    slots: DashMap<Currency, RateSlot>,
    window: Duration,
}

impl RateCache {
    pub fn new() -> Self {
        Self::with_window(FRESHNESS_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            window,
        }
    }

    /// Current rate for `currency`, fetching through `fetcher` when the
    /// slot's window has lapsed. Returns None while no fresh rate is
    /// available.
    pub async fn get(&self, currency: Currency, fetcher: &dyn RateFetcher) -> Option<f64> {
        // Decide and mark the attempt under one entry lock so a slot
        // sees one attempt per window even with concurrent callers.
        {
            let now = Instant::now();
            let mut slot = self.slots.entry(currency).or_default();
            if let (Some(rate), Some(at)) = (slot.rate, slot.fetched_at) {
                if now.duration_since(at) < self.window {
                    return Some(rate);
                }
            }
            if let Some(at) = slot.last_attempt {
                if now.duration_since(at) < self.window {
                    return None;
                }
            }
            slot.rate = None;
            slot.fetched_at = None;
            slot.last_attempt = Some(now);
        }

        match fetcher.fetch(currency).await {
            Ok(rate) => {
                debug!(%currency, rate, "market rate refreshed");
                if let Some(mut slot) = self.slots.get_mut(&currency) {
                    slot.rate = Some(rate);
                    slot.fetched_at = Some(Instant::now());
                }
                Some(rate)
            }
            Err(e) => {
                warn!(%currency, error = %e, "market rate fetch failed");
                None
            }
        }
    }
}

impl Default for RateCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves market rates per currency: USD is the identity, KRW goes
/// through the dedicated regional quote, everything else through the
/// forex table.
pub struct RateService {
    table_fetcher: Arc<dyn RateFetcher>,
    regional_fetcher: Arc<dyn RateFetcher>,
    table_cache: RateCache,
    regional_cache: RateCache,
}

impl RateService {
    pub fn new(table_fetcher: Arc<dyn RateFetcher>, regional_fetcher: Arc<dyn RateFetcher>) -> Self {
        Self {
            table_fetcher,
            regional_fetcher,
            table_cache: RateCache::new(),
            regional_cache: RateCache::new(),
        }
    }

    /// Market USD-to-fiat rate, or None when no fresh rate is available.
    pub async fn market_rate(&self, currency: Currency) -> Option<f64> {
        if currency.is_identity() {
            return Some(1.0);
        }
        if currency.is_regional() {
            return self
                .regional_cache
                .get(currency, self.regional_fetcher.as_ref())
                .await;
        }
        self.table_cache
            .get(currency, self.table_fetcher.as_ref())
            .await
    }
}

/// Forex table fetcher against an open.er-api.com style endpoint:
/// `GET {base}/v6/latest/USD` returning `{"rates": {"EUR": 0.92, ...}}`.
pub struct ForexTableFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl ForexTableFetcher {
    pub const DEFAULT_BASE_URL: &'static str = "https://open.er-api.com";

    pub fn new(base_url: impl Into<String>) -> Result<Self, RateError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl RateFetcher for ForexTableFetcher {
    async fn fetch(&self, currency: Currency) -> Result<f64, RateError> {
        let url = format!("{}/v6/latest/USD", self.base_url);
        let response: serde_json::Value = self.client.get(&url).send().await?.json().await?;
        response["rates"][currency.code()]
            .as_f64()
            .ok_or(RateError::MissingRate(currency))
    }
}

#[derive(Debug, serde::Deserialize)]
struct RegionalQuote {
    bid: f64,
    ask: f64,
}

/// KRW dealer quote fetcher. Returns the mid of the quoted bid/ask.
pub struct RegionalQuoteFetcher {
    client: reqwest::Client,
    url: String,
}

impl RegionalQuoteFetcher {
    pub fn new(url: impl Into<String>) -> Result<Self, RateError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RateFetcher for RegionalQuoteFetcher {
    async fn fetch(&self, currency: Currency) -> Result<f64, RateError> {
        if !currency.is_regional() {
            return Err(RateError::MissingRate(currency));
        }
        let quote: RegionalQuote = self.client.get(&self.url).send().await?.json().await?;
        if quote.bid <= 0.0 || quote.ask <= 0.0 {
            return Err(RateError::Malformed(format!(
                "non-positive quote: bid={} ask={}",
                quote.bid, quote.ask
            )));
        }
        Ok((quote.bid + quote.ask) / 2.0)
    }
}
