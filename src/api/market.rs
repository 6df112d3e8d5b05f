use crate::models::{Asset, Candle, MarketSnapshot};
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{sleep, Duration};

const DEFAULT_API_BASE: &str = "https://api.coingecko.com/api/v3";
const RATE_LIMIT_RPM: u32 = 30;
const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 30;

// Type alias for the rate limiter to simplify signatures
type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Market-data failures, split so callers can back off on rate limits
/// instead of treating them like hard errors
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("rate limited by market data provider")]
    RateLimited,
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("market data provider error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("malformed market data: {0}")]
    Malformed(String),
}

/// HTTP client for the market-data collaborator
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct MarketClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: Arc<DirectRateLimiter>,
}

/// Row from the batch markets endpoint
#[derive(Debug, Deserialize)]
struct MarketRow {
    id: String,
    symbol: String,
    name: String,
    current_price: Option<f64>,
    high_24h: Option<f64>,
    low_24h: Option<f64>,
    #[serde(rename = "price_change_percentage_1h_in_currency")]
    chg_1h: Option<f64>,
    #[serde(rename = "price_change_percentage_24h_in_currency")]
    chg_24h: Option<f64>,
}

impl MarketClient {
    pub fn new(api_key: Option<String>) -> Result<Self, MarketError> {
        Self::with_base_url(api_key, DEFAULT_API_BASE.to_string())
    }

    /// Base URL override, used by tests against a local mock server
    pub fn with_base_url(api_key: Option<String>, base_url: String) -> Result<Self, MarketError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).expect("nonzero quota"));

        Ok(Self {
            client,
            base_url,
            api_key,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Rate-limited request with bounded exponential backoff
    ///
    /// A 429 that survives all retries surfaces as `RateLimited` so the
    /// caller can put the collaborator on cooldown instead of retrying.
    async fn make_request(&self, url: &str) -> Result<reqwest::Response, MarketError> {
        let mut last_network: Option<reqwest::Error> = None;

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if status.as_u16() == 429 {
                        if attempt == MAX_RETRIES {
                            return Err(MarketError::RateLimited);
                        }
                        let backoff_secs = 2u64.pow(attempt);
                        tracing::warn!(
                            "Rate limited by market data provider, backing off {}s (attempt {}/{})",
                            backoff_secs,
                            attempt,
                            MAX_RETRIES
                        );
                        sleep(Duration::from_secs(backoff_secs)).await;
                        continue;
                    }

                    if status.is_server_error() && attempt < MAX_RETRIES {
                        let backoff_secs = 2u64.pow(attempt);
                        tracing::warn!(
                            "Server error {} from market data provider, retrying in {}s (attempt {}/{})",
                            status,
                            backoff_secs,
                            attempt,
                            MAX_RETRIES
                        );
                        sleep(Duration::from_secs(backoff_secs)).await;
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    return Err(MarketError::Api {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) if attempt < MAX_RETRIES => {
                    let backoff_secs = 2u64.pow(attempt);
                    tracing::warn!(
                        "Network error: {}, retrying in {}s (attempt {}/{})",
                        e,
                        backoff_secs,
                        attempt,
                        MAX_RETRIES
                    );
                    last_network = Some(e);
                    sleep(Duration::from_secs(backoff_secs)).await;
                }
                Err(e) => return Err(MarketError::Network(e)),
            }
        }

        match last_network {
            Some(e) => Err(MarketError::Network(e)),
            None => Err(MarketError::Malformed("retry loop exhausted".to_string())),
        }
    }

    fn key_param(&self) -> String {
        match &self.api_key {
            Some(key) => format!("&x_cg_demo_api_key={}", key),
            None => String::new(),
        }
    }

    /// Batch snapshot for the whitelist, in the provider's returned order
    ///
    /// Rows without a usable current price are skipped; missing change or
    /// range fields stay None and are handled downstream.
    pub async fn snapshots(&self, assets: &[Asset]) -> Result<Vec<MarketSnapshot>, MarketError> {
        if assets.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = assets.iter().map(|a| a.asset_id.as_str()).collect();
        let url = format!(
            "{}/coins/markets?vs_currency=usd&ids={}&price_change_percentage=1h,24h{}",
            self.base_url,
            ids.join(","),
            self.key_param()
        );

        let response = self.make_request(&url).await?;
        let rows: Vec<MarketRow> = response
            .json()
            .await
            .map_err(|e| MarketError::Malformed(format!("markets payload: {}", e)))?;

        let by_id: HashMap<&str, &Asset> =
            assets.iter().map(|a| (a.asset_id.as_str(), a)).collect();

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            let price = match row.current_price {
                Some(p) if p.is_finite() && p > 0.0 => p,
                _ => {
                    tracing::warn!("No usable price for {}, skipping this cycle", row.id);
                    continue;
                }
            };

            // Prefer the configured symbol/name so display stays stable
            let (symbol, name) = match by_id.get(row.id.as_str()) {
                Some(asset) => (asset.symbol.clone(), asset.name.clone()),
                None => (row.symbol.to_uppercase(), row.name.clone()),
            };

            snapshots.push(MarketSnapshot {
                symbol,
                asset_id: row.id,
                name,
                price,
                chg_1h: row.chg_1h.filter(|v| v.is_finite()),
                chg_24h: row.chg_24h.filter(|v| v.is_finite()),
                high_24h: row.high_24h.filter(|v| v.is_finite()),
                low_24h: row.low_24h.filter(|v| v.is_finite()),
            });
        }

        tracing::debug!("Fetched {} market snapshots", snapshots.len());
        Ok(snapshots)
    }

    /// Recent OHLC candle series for one asset, oldest first
    pub async fn candles(&self, asset_id: &str, days: u32) -> Result<Vec<Candle>, MarketError> {
        let url = format!(
            "{}/coins/{}/ohlc?vs_currency=usd&days={}{}",
            self.base_url,
            asset_id,
            days,
            self.key_param()
        );

        let response = self.make_request(&url).await?;
        let raw: Vec<[f64; 5]> = response
            .json()
            .await
            .map_err(|e| MarketError::Malformed(format!("ohlc payload: {}", e)))?;

        let mut candles: Vec<Candle> = raw
            .into_iter()
            .filter_map(|[ts_ms, open, high, low, close]| {
                let timestamp = DateTime::<Utc>::from_timestamp_millis(ts_ms as i64)?;
                Some(Candle {
                    timestamp,
                    open,
                    high,
                    low,
                    close,
                })
            })
            .collect();
        candles.sort_by_key(|c| c.timestamp);

        tracing::debug!("Fetched {} candles for {}", candles.len(), asset_id);
        Ok(candles)
    }

    /// Spot prices for a set of asset ids (outcome tracking)
    pub async fn current_prices(
        &self,
        asset_ids: &[String],
    ) -> Result<HashMap<String, f64>, MarketError> {
        if asset_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd{}",
            self.base_url,
            asset_ids.join(","),
            self.key_param()
        );

        let response = self.make_request(&url).await?;
        let raw: HashMap<String, HashMap<String, f64>> = response
            .json()
            .await
            .map_err(|e| MarketError::Malformed(format!("price payload: {}", e)))?;

        Ok(raw
            .into_iter()
            .filter_map(|(id, quote)| quote.get("usd").copied().map(|p| (id, p)))
            .collect())
    }
}
