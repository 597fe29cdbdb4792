/// Market data collaborator
///
/// `MarketDataSource` is the interface the decision loop depends on; the
/// bundled implementation reads the public perpetual-futures REST endpoints
/// (no auth required). Every successful fetch refreshes a process-wide cache
/// so a failed refresh can fall back to the last good snapshot.
pub mod indicators;
pub mod types;

pub use types::{IntradayMetrics, Kline, LongerTermMetrics, MarketData, OpenInterest};

use crate::errors::MarketError;
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const HTTP_TIMEOUT_SECS: u64 = 10;
const KLINE_FETCH_LIMIT: usize = 100;

// ============================================================================
// SOURCE TRAIT
// ============================================================================

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetch a fresh snapshot for one symbol (price, indicators, candles, OI)
    async fn get_fresh(&self, symbol: &str) -> Result<MarketData, MarketError>;

    /// Fetch raw candles for one symbol and interval, oldest first
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, MarketError>;
}

// ============================================================================
// SNAPSHOT CACHE
// ============================================================================

static SNAPSHOT_CACHE: Lazy<Mutex<HashMap<String, MarketData>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn cache_put(data: &MarketData) {
    if let Ok(mut cache) = SNAPSHOT_CACHE.lock() {
        cache.insert(data.symbol.clone(), data.clone());
    }
}

/// Last good snapshot for a symbol, if any fetch ever succeeded
pub fn cached_snapshot(symbol: &str) -> Option<MarketData> {
    SNAPSHOT_CACHE.lock().ok()?.get(symbol).cloned()
}

/// Fresh fetch with fallback to the cached snapshot on failure
pub async fn get_with_fallback(
    source: &dyn MarketDataSource,
    symbol: &str,
) -> Result<MarketData, MarketError> {
    match source.get_fresh(symbol).await {
        Ok(data) => Ok(data),
        Err(err) => match cached_snapshot(symbol) {
            Some(cached) => {
                logger::warning(
                    LogTag::Market,
                    &format!("{} fresh fetch failed ({}), using cached snapshot", symbol, err),
                );
                Ok(cached)
            }
            None => Err(err),
        },
    }
}

// ============================================================================
// REST IMPLEMENTATION
// ============================================================================

#[derive(Debug, Deserialize)]
struct OpenInterestReply {
    #[serde(rename = "openInterest")]
    open_interest: String,
}

/// Public-data REST client for USDT-margined perpetuals
pub struct FuturesRestSource {
    client: Client,
    base_url: String,
}

impl FuturesRestSource {
    pub fn new() -> Self {
        Self::with_base_url(FUTURES_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_json<T: for<'de> Deserialize<'de>>(
        &self,
        symbol: &str,
        path_and_query: &str,
    ) -> Result<T, MarketError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| MarketError::Fetch {
                symbol: symbol.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MarketError::Fetch {
                symbol: symbol.to_string(),
                message: format!("HTTP {}", status),
            });
        }

        response.json::<T>().await.map_err(|e| MarketError::Fetch {
            symbol: symbol.to_string(),
            message: format!("decode: {}", e),
        })
    }

    async fn fetch_open_interest(&self, symbol: &str) -> Option<OpenInterest> {
        let path = format!("/fapi/v1/openInterest?symbol={}", symbol);
        let reply: OpenInterestReply = self.fetch_json(symbol, &path).await.ok()?;
        let latest = reply.open_interest.parse::<f64>().ok()?;
        Some(OpenInterest { latest })
    }
}

impl Default for FuturesRestSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw kline rows come back as mixed-type JSON arrays
fn parse_kline_row(row: &serde_json::Value) -> Option<Kline> {
    let arr = row.as_array()?;
    let num = |v: &serde_json::Value| -> Option<f64> {
        if let Some(s) = v.as_str() {
            s.parse::<f64>().ok()
        } else {
            v.as_f64()
        }
    };
    Some(Kline {
        open_time: arr.first()?.as_i64()?,
        open: num(arr.get(1)?)?,
        high: num(arr.get(2)?)?,
        low: num(arr.get(3)?)?,
        close: num(arr.get(4)?)?,
        volume: num(arr.get(5)?)?,
        close_time: arr.get(6)?.as_i64()?,
    })
}

#[async_trait]
impl MarketDataSource for FuturesRestSource {
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, MarketError> {
        let path = format!(
            "/fapi/v1/klines?symbol={}&interval={}&limit={}",
            symbol, interval, limit
        );
        let rows: Vec<serde_json::Value> = self.fetch_json(symbol, &path).await?;
        Ok(rows.iter().filter_map(parse_kline_row).collect())
    }

    async fn get_fresh(&self, symbol: &str) -> Result<MarketData, MarketError> {
        let klines_1h = self.get_klines(symbol, "1h", KLINE_FETCH_LIMIT).await?;
        if klines_1h.len() < 30 {
            return Err(MarketError::InsufficientData {
                symbol: symbol.to_string(),
                needed: 30,
                got: klines_1h.len(),
            });
        }

        let closes: Vec<f64> = klines_1h.iter().map(|k| k.close).collect();
        let current_price = *closes.last().unwrap_or(&0.0);

        // Short and long horizon volatility context; failures leave the
        // metric absent rather than failing the snapshot
        let intraday = self
            .get_klines(symbol, "15m", KLINE_FETCH_LIMIT)
            .await
            .ok()
            .map(|klines| IntradayMetrics {
                atr14: indicators::atr(&klines, 14),
            });

        let longer_term = self
            .get_klines(symbol, "4h", KLINE_FETCH_LIMIT)
            .await
            .ok()
            .map(|klines| {
                let volumes: Vec<f64> = klines.iter().map(|k| k.volume).collect();
                let current_volume = volumes.last().copied().unwrap_or(0.0);
                let average_volume = if volumes.is_empty() {
                    0.0
                } else {
                    volumes.iter().sum::<f64>() / volumes.len() as f64
                };
                LongerTermMetrics {
                    atr14: indicators::atr(&klines, 14),
                    current_volume,
                    average_volume,
                }
            });

        let data = MarketData {
            symbol: symbol.to_string(),
            current_price,
            price_change_1h: indicators::percent_change(&closes, 1),
            price_change_4h: indicators::percent_change(&closes, 4),
            current_ema20: indicators::ema(&closes, 20),
            current_macd: indicators::macd(&closes),
            current_rsi7: indicators::rsi(&closes, 7),
            intraday,
            longer_term,
            open_interest: self.fetch_open_interest(symbol).await,
            klines_1h,
            fetched_at: Utc::now(),
        };

        cache_put(&data);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kline_row() {
        let row = serde_json::json!([
            1700000000000i64,
            "100.5",
            "101.0",
            "99.8",
            "100.9",
            "1234.5",
            1700003599999i64,
            "0",
            10,
            "0",
            "0",
            "0"
        ]);
        let kline = parse_kline_row(&row).unwrap();
        assert_eq!(kline.open, 100.5);
        assert_eq!(kline.close, 100.9);
        assert_eq!(kline.close_time, 1700003599999);
    }

    #[test]
    fn test_parse_kline_row_rejects_garbage() {
        assert!(parse_kline_row(&serde_json::json!("not an array")).is_none());
        assert!(parse_kline_row(&serde_json::json!([1, "bad"])).is_none());
    }

    #[test]
    fn test_snapshot_cache_roundtrip() {
        let data = MarketData {
            symbol: "CACHETEST".to_string(),
            current_price: 42.0,
            price_change_1h: 0.0,
            price_change_4h: 0.0,
            current_ema20: 0.0,
            current_macd: 0.0,
            current_rsi7: 50.0,
            intraday: None,
            longer_term: None,
            open_interest: None,
            klines_1h: vec![],
            fetched_at: Utc::now(),
        };
        cache_put(&data);
        let cached = cached_snapshot("CACHETEST").unwrap();
        assert_eq!(cached.current_price, 42.0);
        assert!(cached_snapshot("NEVERSEEN").is_none());
    }
}
