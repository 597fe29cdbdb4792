/// Coarse per-cycle market state used as a prompt hint and by the risk guards
///
/// Scored deterministically from the primary symbol's snapshot: BTC when
/// available, otherwise the lexicographically smallest symbol so repeated
/// runs stay predictable.
use crate::market::MarketData;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::types::AccountInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    StrongBull,
    Bull,
    Range,
    Bear,
    StrongBear,
    Unknown,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::StrongBull => "strong_bull",
            Trend::Bull => "bull",
            Trend::Range => "range",
            Trend::Bear => "bear",
            Trend::StrongBear => "strong_bear",
            Trend::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Volatility {
    Low,
    Normal,
    High,
    Extreme,
    Unknown,
}

impl Volatility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Volatility::Low => "low",
            Volatility::Normal => "normal",
            Volatility::High => "high",
            Volatility::Extreme => "extreme",
            Volatility::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liquidity {
    Low,
    Normal,
    High,
    Unknown,
}

impl Liquidity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liquidity::Low => "low",
            Liquidity::Normal => "normal",
            Liquidity::High => "high",
            Liquidity::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    pub trend: Trend,
    pub volatility: Volatility,
    pub liquidity: Liquidity,
    pub suggested_action: String,
    pub notes: Vec<String>,
}

impl Default for MarketSummary {
    fn default() -> Self {
        Self {
            trend: Trend::Unknown,
            volatility: Volatility::Normal,
            liquidity: Liquidity::Normal,
            suggested_action: "wait".to_string(),
            notes: vec![],
        }
    }
}

/// Score the market from the primary symbol and attach account advisories
pub fn analyze_market_summary(
    market_data: &HashMap<String, MarketData>,
    account: &AccountInfo,
) -> MarketSummary {
    let mut summary = MarketSummary::default();
    if market_data.is_empty() {
        return summary;
    }

    let data = select_primary(market_data);
    summary.trend = evaluate_trend(data);
    summary.volatility = evaluate_volatility(data);
    summary.liquidity = evaluate_liquidity(data);
    summary.suggested_action = suggest_action(summary.trend, summary.volatility).to_string();
    summary.notes = account_notes(account);
    summary
}

fn select_primary<'a>(market_data: &'a HashMap<String, MarketData>) -> &'a MarketData {
    if let Some(btc) = market_data.get("BTCUSDT") {
        return btc;
    }
    let mut symbols: Vec<&String> = market_data.keys().collect();
    symbols.sort();
    &market_data[symbols[0]]
}

fn evaluate_trend(data: &MarketData) -> Trend {
    let mut score = 0.0;

    if data.price_change_4h >= 2.0 {
        score += 1.0;
    } else if data.price_change_4h <= -2.0 {
        score -= 1.0;
    }

    if data.price_change_1h >= 0.8 {
        score += 0.5;
    } else if data.price_change_1h <= -0.8 {
        score -= 0.5;
    }

    if data.current_ema20 > 0.0 {
        if data.current_price > data.current_ema20 {
            score += 0.5;
        } else {
            score -= 0.5;
        }
    }

    if data.current_macd > 0.0 {
        score += 0.5;
    } else if data.current_macd < 0.0 {
        score -= 0.5;
    }

    if data.current_rsi7 >= 65.0 {
        score += 0.5;
    } else if data.current_rsi7 <= 35.0 {
        score -= 0.5;
    }

    if score >= 2.0 {
        Trend::StrongBull
    } else if score >= 0.5 {
        Trend::Bull
    } else if score <= -2.0 {
        Trend::StrongBear
    } else if score <= -0.5 {
        Trend::Bear
    } else {
        Trend::Range
    }
}

fn evaluate_volatility(data: &MarketData) -> Volatility {
    let atr_fast = data.intraday.map(|m| m.atr14).unwrap_or(0.0);
    let atr_base = data.longer_term.map(|m| m.atr14).unwrap_or(0.0);

    let ratio = if atr_fast > 0.0 && atr_base > 0.0 {
        atr_fast / atr_base
    } else if atr_fast > 0.0 && data.current_price > 0.0 {
        // No long-horizon baseline: compare against 1 % of price
        atr_fast / (data.current_price * 0.01)
    } else {
        1.0
    };

    if ratio >= 1.8 {
        Volatility::Extreme
    } else if ratio >= 1.3 {
        Volatility::High
    } else if ratio <= 0.7 {
        Volatility::Low
    } else {
        Volatility::Normal
    }
}

fn evaluate_liquidity(data: &MarketData) -> Liquidity {
    let metrics = match data.longer_term {
        Some(m) => m,
        None => return Liquidity::Unknown,
    };
    if metrics.current_volume <= 0.0 || metrics.average_volume <= 0.0 {
        return Liquidity::Unknown;
    }

    let ratio = metrics.current_volume / metrics.average_volume;
    if ratio >= 1.4 {
        Liquidity::High
    } else if ratio <= 0.6 {
        Liquidity::Low
    } else {
        Liquidity::Normal
    }
}

fn suggest_action(trend: Trend, volatility: Volatility) -> &'static str {
    match trend {
        Trend::StrongBull => {
            if volatility == Volatility::Extreme {
                "strong uptrend but extreme volatility, stand aside or trim until it settles"
            } else {
                "strong uptrend, look for pullback entries on the long side"
            }
        }
        Trend::Bull => {
            if volatility == Volatility::High {
                "mild uptrend with elevated volatility, scale in with reduced size"
            } else {
                "mild uptrend, favor longs with the trend"
            }
        }
        Trend::Bear => "mild downtrend, short cautiously or stand aside",
        Trend::StrongBear => "strong downtrend, consider shorting rallies or holding defensively",
        Trend::Range | Trend::Unknown => "no clear structure, wait for a cleaner setup",
    }
}

fn account_notes(account: &AccountInfo) -> Vec<String> {
    let mut notes = Vec::new();

    if account.margin_used_pct >= 60.0 {
        notes.push(format!(
            "margin usage {:.1}% is elevated, add cautiously and keep headroom for adjustments",
            account.margin_used_pct
        ));
    }
    if account.total_pnl_pct <= -8.0 {
        notes.push(format!(
            "account drawdown {:.1}%, reduce size or wait for recovery",
            account.total_pnl_pct
        ));
    } else if account.total_pnl_pct >= 6.0 {
        notes.push(format!(
            "account up {:.1}%, consider locking in profits gradually",
            account.total_pnl_pct
        ));
    }
    if account.position_count >= 3 {
        notes.push(format!(
            "{} positions open, prioritize managing existing exposure",
            account.position_count
        ));
    }

    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{IntradayMetrics, LongerTermMetrics};
    use chrono::Utc;

    fn data(symbol: &str) -> MarketData {
        MarketData {
            symbol: symbol.to_string(),
            current_price: 100.0,
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
        }
    }

    #[test]
    fn test_empty_map_gives_unknown() {
        let summary = analyze_market_summary(&HashMap::new(), &AccountInfo::default());
        assert_eq!(summary.trend, Trend::Unknown);
    }

    #[test]
    fn test_strong_bull_scoring() {
        let mut d = data("BTCUSDT");
        d.price_change_4h = 3.0;
        d.price_change_1h = 1.0;
        d.current_ema20 = 90.0;
        d.current_macd = 0.5;
        d.current_rsi7 = 70.0;
        let mut map = HashMap::new();
        map.insert("BTCUSDT".to_string(), d);

        let summary = analyze_market_summary(&map, &AccountInfo::default());
        assert_eq!(summary.trend, Trend::StrongBull);
    }

    #[test]
    fn test_extreme_volatility_from_atr_ratio() {
        let mut d = data("BTCUSDT");
        d.intraday = Some(IntradayMetrics { atr14: 2.0 });
        d.longer_term = Some(LongerTermMetrics {
            atr14: 1.0,
            current_volume: 100.0,
            average_volume: 100.0,
        });
        let mut map = HashMap::new();
        map.insert("BTCUSDT".to_string(), d);

        let summary = analyze_market_summary(&map, &AccountInfo::default());
        assert_eq!(summary.volatility, Volatility::Extreme);
        assert_eq!(summary.liquidity, Liquidity::Normal);
    }

    #[test]
    fn test_primary_symbol_is_deterministic() {
        // No BTC present: lexicographically smallest wins
        let mut bearish = data("AAVEUSDT");
        bearish.price_change_4h = -3.0;
        bearish.current_macd = -1.0;
        bearish.current_rsi7 = 30.0;
        bearish.current_ema20 = 110.0;
        let mut map = HashMap::new();
        map.insert("ZRXUSDT".to_string(), data("ZRXUSDT"));
        map.insert("AAVEUSDT".to_string(), bearish);

        let summary = analyze_market_summary(&map, &AccountInfo::default());
        assert_eq!(summary.trend, Trend::StrongBear);
    }

    #[test]
    fn test_account_notes() {
        let account = AccountInfo {
            margin_used_pct: 65.0,
            total_pnl_pct: -9.0,
            position_count: 3,
            ..Default::default()
        };
        let notes = account_notes(&account);
        assert_eq!(notes.len(), 3);
    }
}
