/// Market data types shared by the context builder and pattern analysis
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One candle
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

/// Outstanding contracts for a perpetual symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OpenInterest {
    /// Latest open interest in contracts (multiply by price for notional)
    pub latest: f64,
}

/// Short-horizon volatility metrics (15m candles)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntradayMetrics {
    pub atr14: f64,
}

/// Longer-horizon context metrics (4h candles)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LongerTermMetrics {
    pub atr14: f64,
    pub current_volume: f64,
    pub average_volume: f64,
}

/// Snapshot of one symbol's market state, freshly fetched each cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: String,
    pub current_price: f64,
    /// Percent change over the last hour
    pub price_change_1h: f64,
    /// Percent change over the last four hours
    pub price_change_4h: f64,
    pub current_ema20: f64,
    pub current_macd: f64,
    pub current_rsi7: f64,
    pub intraday: Option<IntradayMetrics>,
    pub longer_term: Option<LongerTermMetrics>,
    pub open_interest: Option<OpenInterest>,
    /// Raw 1h candles, oldest first (reused for pattern analysis)
    pub klines_1h: Vec<Kline>,
    pub fetched_at: DateTime<Utc>,
}

impl MarketData {
    /// Open-interest notional in millions of USDT, if available
    pub fn oi_notional_millions(&self) -> Option<f64> {
        let oi = self.open_interest.as_ref()?;
        if self.current_price <= 0.0 {
            return None;
        }
        Some(oi.latest * self.current_price / 1_000_000.0)
    }

    /// Compact one-line indicator summary for prompts and logs
    pub fn format_line(&self) -> String {
        format!(
            "{}: {:.4} (1h: {:+.2}%, 4h: {:+.2}%) | MACD: {:.4} | RSI: {:.2}",
            self.symbol,
            self.current_price,
            self.price_change_1h,
            self.price_change_4h,
            self.current_macd,
            self.current_rsi7
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oi_notional() {
        let data = MarketData {
            symbol: "SOLUSDT".to_string(),
            current_price: 100.0,
            price_change_1h: 0.0,
            price_change_4h: 0.0,
            current_ema20: 0.0,
            current_macd: 0.0,
            current_rsi7: 50.0,
            intraday: None,
            longer_term: None,
            open_interest: Some(OpenInterest { latest: 500_000.0 }),
            klines_1h: vec![],
            fetched_at: Utc::now(),
        };
        assert_eq!(data.oi_notional_millions(), Some(50.0));
    }
}
