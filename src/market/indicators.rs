/// Indicator math over candle closes
///
/// Plain rolling computations; callers feed candles oldest-first.
use super::types::Kline;

/// Exponential moving average; returns the final EMA value
pub fn ema(values: &[f64], period: usize) -> f64 {
    if values.is_empty() || period == 0 {
        return 0.0;
    }
    if values.len() < period {
        return values.iter().sum::<f64>() / values.len() as f64;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    // Seed with the SMA of the first window
    let mut current = values[..period].iter().sum::<f64>() / period as f64;
    for value in &values[period..] {
        current = (value - current) * multiplier + current;
    }
    current
}

/// Full EMA series (same length as input) used by MACD
fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() || period == 0 {
        return vec![];
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut current = values[0];
    for value in values {
        current = (value - current) * multiplier + current;
        out.push(current);
    }
    out
}

/// MACD line value (12/26 EMA difference) for the latest close
pub fn macd(closes: &[f64]) -> f64 {
    if closes.len() < 26 {
        return 0.0;
    }
    let fast = ema_series(closes, 12);
    let slow = ema_series(closes, 26);
    fast.last().copied().unwrap_or(0.0) - slow.last().copied().unwrap_or(0.0)
}

/// Wilder RSI for the latest close
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() <= period || period == 0 {
        return 50.0;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;

    for i in (period + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Average true range over the last `period` candles
pub fn atr(klines: &[Kline], period: usize) -> f64 {
    if klines.len() < 2 || period == 0 {
        return 0.0;
    }

    let mut true_ranges = Vec::with_capacity(klines.len() - 1);
    for pair in klines.windows(2) {
        let prev_close = pair[0].close;
        let k = pair[1];
        let tr = (k.high - k.low)
            .max((k.high - prev_close).abs())
            .max((k.low - prev_close).abs());
        true_ranges.push(tr);
    }

    let window = period.min(true_ranges.len());
    let tail = &true_ranges[true_ranges.len() - window..];
    tail.iter().sum::<f64>() / window as f64
}

/// Percent change between the close `bars_back` candles ago and the latest
pub fn percent_change(closes: &[f64], bars_back: usize) -> f64 {
    if closes.len() <= bars_back {
        return 0.0;
    }
    let old = closes[closes.len() - 1 - bars_back];
    let new = closes[closes.len() - 1];
    if old == 0.0 {
        return 0.0;
    }
    (new - old) / old * 100.0
}
