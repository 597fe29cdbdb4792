/// Candlestick pattern analysis
///
/// Produces the per-(symbol, timeframe) blocks the prompt builder embeds:
/// recent candle shapes, clustered support/resistance, trend lines and key
/// levels. All numeric cutoffs are local conventions, tuned for readability
/// of the resulting prompt rather than statistical rigor.
use crate::market::Kline;
use serde::{Deserialize, Serialize};

const MIN_CANDLES: usize = 20;
const CLUSTER_TOLERANCE_PCT: f64 = 0.5;
const MAX_LEVELS_PER_SIDE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Bullish,
    Bearish,
    Neutral,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Bullish => "bullish",
            SignalType::Bearish => "bearish",
            SignalType::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSignal {
    pub name: String,
    pub signal: SignalType,
    pub confidence: f64,
    pub description: String,
    /// Index into the analyzed candle sequence
    pub position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendLineKind {
    Support,
    Resistance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendLine {
    pub kind: TrendLineKind,
    pub start_idx: usize,
    pub end_idx: usize,
    pub start_price: f64,
    pub end_price: f64,
    pub slope: f64,
    pub strength: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct KeyLevels {
    pub current_price: f64,
    pub high_20: f64,
    pub low_20: f64,
    /// Where the current price sits inside the 20-bar range, 0..100
    pub range_position_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub symbol: String,
    pub interval: String,
    pub patterns: Vec<PatternSignal>,
    pub support_levels: Vec<f64>,
    pub resistance_levels: Vec<f64>,
    pub trend_lines: Vec<TrendLine>,
    pub key_levels: KeyLevels,
    pub summary: String,
    pub recommendation: String,
}

/// Analyze one candle sequence (oldest first)
pub fn analyze_patterns(klines: &[Kline], symbol: &str, interval: &str) -> PatternAnalysis {
    if klines.len() < MIN_CANDLES {
        return PatternAnalysis {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            patterns: vec![],
            support_levels: vec![],
            resistance_levels: vec![],
            trend_lines: vec![],
            key_levels: KeyLevels::default(),
            summary: "insufficient candle history for pattern analysis".to_string(),
            recommendation: String::new(),
        };
    }

    let patterns = detect_candle_patterns(klines);
    let (support_levels, resistance_levels) = detect_support_resistance(klines);
    let trend_lines = detect_trend_lines(klines);
    let key_levels = detect_key_levels(klines);
    let (summary, recommendation) = summarize(&patterns, key_levels);

    PatternAnalysis {
        symbol: symbol.to_string(),
        interval: interval.to_string(),
        patterns,
        support_levels,
        resistance_levels,
        trend_lines,
        key_levels,
        summary,
        recommendation,
    }
}

// =============================================================================
// CANDLE SHAPES
// =============================================================================

fn body(k: &Kline) -> f64 {
    (k.close - k.open).abs()
}

fn range(k: &Kline) -> f64 {
    k.high - k.low
}

fn lower_shadow(k: &Kline) -> f64 {
    k.open.min(k.close) - k.low
}

fn upper_shadow(k: &Kline) -> f64 {
    k.high - k.open.max(k.close)
}

fn is_hammer(k: &Kline) -> bool {
    let r = range(k);
    r > 0.0 && body(k) < r * 0.35 && lower_shadow(k) > body(k) * 2.0 && upper_shadow(k) < body(k)
}

fn is_inverted_hammer(k: &Kline) -> bool {
    let r = range(k);
    r > 0.0 && body(k) < r * 0.35 && upper_shadow(k) > body(k) * 2.0 && lower_shadow(k) < body(k)
}

fn is_doji(k: &Kline) -> bool {
    let r = range(k);
    r > 0.0 && body(k) < r * 0.1
}

fn is_bullish_engulfing(prev: &Kline, k: &Kline) -> bool {
    prev.close < prev.open && k.close > k.open && k.open <= prev.close && k.close >= prev.open
}

fn is_bearish_engulfing(prev: &Kline, k: &Kline) -> bool {
    prev.close > prev.open && k.close < k.open && k.open >= prev.close && k.close <= prev.open
}

/// Scan the last few candles for classic shapes
fn detect_candle_patterns(klines: &[Kline]) -> Vec<PatternSignal> {
    let n = klines.len();
    let mut patterns = Vec::new();

    let start = n.saturating_sub(5);
    for i in start..n {
        let k = &klines[i];

        if is_hammer(k) {
            patterns.push(PatternSignal {
                name: "hammer".to_string(),
                signal: SignalType::Bullish,
                confidence: 65.0,
                description: "long lower shadow with a small body, possible bottom reversal"
                    .to_string(),
                position: i,
            });
        }
        if is_inverted_hammer(k) {
            patterns.push(PatternSignal {
                name: "inverted hammer".to_string(),
                signal: SignalType::Bearish,
                confidence: 65.0,
                description: "long upper shadow with a small body, possible top reversal"
                    .to_string(),
                position: i,
            });
        }
        if is_doji(k) {
            patterns.push(PatternSignal {
                name: "doji".to_string(),
                signal: SignalType::Neutral,
                confidence: 50.0,
                description: "open and close nearly equal, indecision".to_string(),
                position: i,
            });
        }

        if i > 0 {
            let prev = &klines[i - 1];
            if is_bullish_engulfing(prev, k) {
                patterns.push(PatternSignal {
                    name: "bullish engulfing".to_string(),
                    signal: SignalType::Bullish,
                    confidence: 75.0,
                    description: "green body engulfs the prior red candle, strong buy signal"
                        .to_string(),
                    position: i,
                });
            }
            if is_bearish_engulfing(prev, k) {
                patterns.push(PatternSignal {
                    name: "bearish engulfing".to_string(),
                    signal: SignalType::Bearish,
                    confidence: 75.0,
                    description: "red body engulfs the prior green candle, strong sell signal"
                        .to_string(),
                    position: i,
                });
            }
        }
    }

    patterns
}

// =============================================================================
// SUPPORT / RESISTANCE
// =============================================================================

fn local_extrema(klines: &[Kline]) -> (Vec<(usize, f64)>, Vec<(usize, f64)>) {
    let mut lows = Vec::new();
    let mut highs = Vec::new();
    for i in 2..klines.len().saturating_sub(2) {
        let low = klines[i].low;
        if low < klines[i - 1].low
            && low < klines[i - 2].low
            && low < klines[i + 1].low
            && low < klines[i + 2].low
        {
            lows.push((i, low));
        }
        let high = klines[i].high;
        if high > klines[i - 1].high
            && high > klines[i - 2].high
            && high > klines[i + 1].high
            && high > klines[i + 2].high
        {
            highs.push((i, high));
        }
    }
    (lows, highs)
}

/// Cluster nearby levels and keep the strongest few on each side
fn detect_support_resistance(klines: &[Kline]) -> (Vec<f64>, Vec<f64>) {
    let (lows, highs) = local_extrema(klines);
    (
        cluster_levels(lows.iter().map(|(_, p)| *p).collect()),
        cluster_levels(highs.iter().map(|(_, p)| *p).collect()),
    )
}

fn cluster_levels(mut prices: Vec<f64>) -> Vec<f64> {
    if prices.is_empty() {
        return vec![];
    }
    prices.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let mut clusters: Vec<Vec<f64>> = vec![vec![prices[0]]];
    for price in prices.into_iter().skip(1) {
        let current = clusters.last_mut().unwrap();
        let anchor = current[0];
        if (price - anchor).abs() / anchor * 100.0 <= CLUSTER_TOLERANCE_PCT {
            current.push(price);
        } else {
            clusters.push(vec![price]);
        }
    }

    // Bigger clusters are stronger levels
    clusters.sort_by_key(|c| std::cmp::Reverse(c.len()));
    clusters
        .into_iter()
        .take(MAX_LEVELS_PER_SIDE)
        .map(|c| c.iter().sum::<f64>() / c.len() as f64)
        .collect()
}

// =============================================================================
// TREND LINES
// =============================================================================

fn detect_trend_lines(klines: &[Kline]) -> Vec<TrendLine> {
    let (lows, highs) = local_extrema(klines);
    let mut lines = Vec::new();

    if let Some(line) = fit_line(&lows, TrendLineKind::Support) {
        lines.push(line);
    }
    if let Some(line) = fit_line(&highs, TrendLineKind::Resistance) {
        lines.push(line);
    }
    lines
}

fn fit_line(points: &[(usize, f64)], kind: TrendLineKind) -> Option<TrendLine> {
    if points.len() < 2 {
        return None;
    }
    let (start_idx, start_price) = points[0];
    let (end_idx, end_price) = points[points.len() - 1];
    if end_idx == start_idx {
        return None;
    }
    let slope = (end_price - start_price) / (end_idx - start_idx) as f64;

    // Count how many extrema sit close to the line
    let touches = points
        .iter()
        .filter(|(idx, price)| {
            let expected = start_price + slope * (*idx - start_idx) as f64;
            (price - expected).abs() / expected.max(f64::EPSILON) * 100.0 <= CLUSTER_TOLERANCE_PCT
        })
        .count();

    Some(TrendLine {
        kind,
        start_idx,
        end_idx,
        start_price,
        end_price,
        slope,
        strength: (touches as f64 / points.len() as f64 * 100.0).min(100.0),
    })
}

// =============================================================================
// KEY LEVELS AND SUMMARY
// =============================================================================

fn detect_key_levels(klines: &[Kline]) -> KeyLevels {
    let tail = &klines[klines.len() - MIN_CANDLES..];
    let current_price = klines.last().map(|k| k.close).unwrap_or(0.0);
    let high_20 = tail.iter().map(|k| k.high).fold(f64::MIN, f64::max);
    let low_20 = tail.iter().map(|k| k.low).fold(f64::MAX, f64::min);
    let range_position_pct = if high_20 > low_20 {
        (current_price - low_20) / (high_20 - low_20) * 100.0
    } else {
        50.0
    };
    KeyLevels {
        current_price,
        high_20,
        low_20,
        range_position_pct,
    }
}

fn summarize(patterns: &[PatternSignal], levels: KeyLevels) -> (String, String) {
    let bullish = patterns
        .iter()
        .filter(|p| p.signal == SignalType::Bullish)
        .count();
    let bearish = patterns
        .iter()
        .filter(|p| p.signal == SignalType::Bearish)
        .count();

    let summary = if patterns.is_empty() {
        format!(
            "no notable candle patterns, price at {:.1}% of the 20-bar range",
            levels.range_position_pct
        )
    } else {
        format!(
            "{} bullish / {} bearish signals, price at {:.1}% of the 20-bar range",
            bullish, bearish, levels.range_position_pct
        )
    };

    let recommendation = if bullish > bearish && levels.range_position_pct < 70.0 {
        "bullish bias with room above, longs favored on confirmation".to_string()
    } else if bearish > bullish && levels.range_position_pct > 30.0 {
        "bearish bias with room below, shorts favored on confirmation".to_string()
    } else {
        "mixed signals, wait for confirmation".to_string()
    };

    (summary, recommendation)
}

// =============================================================================
// PROMPT FORMATTING
// =============================================================================

impl PatternAnalysis {
    /// Render the analysis as a prompt block
    pub fn format_for_prompt(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "[{} {}] {}\n",
            self.symbol, self.interval, self.summary
        ));

        for pattern in &self.patterns {
            out.push_str(&format!(
                "  - {} ({}, confidence {:.0}): {}\n",
                pattern.name,
                pattern.signal.as_str(),
                pattern.confidence,
                pattern.description
            ));
        }

        if !self.support_levels.is_empty() {
            let levels: Vec<String> = self
                .support_levels
                .iter()
                .map(|l| format!("{:.4}", l))
                .collect();
            out.push_str(&format!("  support: {}\n", levels.join(", ")));
        }
        if !self.resistance_levels.is_empty() {
            let levels: Vec<String> = self
                .resistance_levels
                .iter()
                .map(|l| format!("{:.4}", l))
                .collect();
            out.push_str(&format!("  resistance: {}\n", levels.join(", ")));
        }

        for line in &self.trend_lines {
            let kind = match line.kind {
                TrendLineKind::Support => "support line",
                TrendLineKind::Resistance => "resistance line",
            };
            out.push_str(&format!(
                "  {}: {:.4} -> {:.4} (strength {:.0})\n",
                kind, line.start_price, line.end_price, line.strength
            ));
        }

        out.push_str(&format!(
            "  key levels: price {:.4} | 20-bar high {:.4} / low {:.4} | range position {:.1}%\n",
            self.key_levels.current_price,
            self.key_levels.high_20,
            self.key_levels.low_20,
            self.key_levels.range_position_pct
        ));
        if !self.recommendation.is_empty() {
            out.push_str(&format!("  read: {}\n", self.recommendation));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kline(open: f64, high: f64, low: f64, close: f64) -> Kline {
        Kline {
            open_time: 0,
            open,
            high,
            low,
            close,
            volume: 1.0,
            close_time: 0,
        }
    }

    fn flat_series(n: usize) -> Vec<Kline> {
        (0..n).map(|_| kline(100.0, 101.0, 99.0, 100.0)).collect()
    }

    #[test]
    fn test_insufficient_data() {
        let analysis = analyze_patterns(&flat_series(5), "BTCUSDT", "1h");
        assert!(analysis.patterns.is_empty());
        assert!(analysis.summary.contains("insufficient"));
    }

    #[test]
    fn test_hammer_detection() {
        let mut series = flat_series(25);
        // Small body at the top of a long lower shadow
        series.push(kline(100.0, 100.5, 94.0, 100.3));
        let analysis = analyze_patterns(&series, "BTCUSDT", "1h");
        assert!(analysis.patterns.iter().any(|p| p.name == "hammer"));
    }

    #[test]
    fn test_bullish_engulfing_detection() {
        let mut series = flat_series(25);
        series.push(kline(101.0, 101.5, 98.5, 99.0)); // red
        series.push(kline(98.8, 102.5, 98.5, 102.0)); // green engulfing
        let analysis = analyze_patterns(&series, "ETHUSDT", "4h");
        let engulfing = analysis
            .patterns
            .iter()
            .find(|p| p.name == "bullish engulfing")
            .expect("engulfing pattern");
        assert_eq!(engulfing.signal, SignalType::Bullish);
        assert_eq!(engulfing.position, series.len() - 1);
    }

    #[test]
    fn test_key_levels_range_position() {
        let mut series = flat_series(30);
        for k in series.iter_mut() {
            k.high = 110.0;
            k.low = 90.0;
        }
        series.last_mut().unwrap().close = 105.0;
        let analysis = analyze_patterns(&series, "BTCUSDT", "1h");
        assert_eq!(analysis.key_levels.high_20, 110.0);
        assert_eq!(analysis.key_levels.low_20, 90.0);
        assert!((analysis.key_levels.range_position_pct - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_support_resistance_clustering() {
        let mut series = Vec::new();
        // Alternate valleys near 95 and peaks near 105
        for i in 0..40 {
            if i % 8 == 4 {
                series.push(kline(100.0, 101.0, 95.0 + (i % 3) as f64 * 0.02, 100.0));
            } else if i % 8 == 0 && i > 0 {
                series.push(kline(100.0, 105.0 + (i % 3) as f64 * 0.02, 99.0, 100.0));
            } else {
                series.push(kline(100.0, 101.0, 99.0, 100.0));
            }
        }
        let analysis = analyze_patterns(&series, "SOLUSDT", "15m");
        assert!(!analysis.support_levels.is_empty());
        assert!(analysis.support_levels[0] < 96.0);
        assert!(!analysis.resistance_levels.is_empty());
        assert!(analysis.resistance_levels[0] > 104.0);
    }

    #[test]
    fn test_format_for_prompt_mentions_key_levels() {
        let analysis = analyze_patterns(&flat_series(30), "BTCUSDT", "1h");
        let text = analysis.format_for_prompt();
        assert!(text.contains("BTCUSDT 1h"));
        assert!(text.contains("key levels"));
    }
}
