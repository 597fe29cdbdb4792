/// Trade reconstruction and aggregate statistics over journal history
///
/// Opens and closes are matched by (symbol, side) in record order. Leverage
/// and PnL percentages come from the recorded actions, so the numbers reflect
/// what actually executed, not what the model asked for.
use super::types::{DecisionAction, DecisionRecord, PerformanceAnalysis, TradeOutcome};
use chrono::DateTime;
use chrono::Utc;
use std::collections::HashMap;

const RECENT_TRADES_SHOWN: usize = 10;

#[derive(Clone)]
struct OpenTrade {
    open_time: DateTime<Utc>,
    open_price: f64,
    quantity: f64,
    leverage: u32,
}

/// Build aggregate stats from journal records (oldest first)
pub fn analyze_performance(records: &[DecisionRecord]) -> PerformanceAnalysis {
    let mut open_trades: HashMap<String, OpenTrade> = HashMap::new();
    let mut outcomes: Vec<TradeOutcome> = Vec::new();

    for record in records {
        for action in record.actions.iter().filter(|a| a.success) {
            if action.is_open() {
                let side = side_of(&action.action);
                open_trades.insert(
                    trade_key(&action.symbol, side),
                    OpenTrade {
                        open_time: action.timestamp,
                        open_price: action.price,
                        quantity: action.quantity,
                        leverage: action.leverage,
                    },
                );
            } else if action.is_close() {
                // partial_close carries no direction in its tag; probe both
                let sides: &[&str] = if action.action == "partial_close" {
                    &["long", "short"]
                } else {
                    &[side_of(&action.action)]
                };
                for side in sides.iter().copied() {
                    let key = trade_key(&action.symbol, side);
                    if let Some(open) = open_trades.get(&key).cloned() {
                        outcomes.push(build_outcome(&open, action, side));
                        // Partial closes keep the remainder running
                        if action.action != "partial_close" {
                            open_trades.remove(&key);
                        }
                        break;
                    }
                }
            }
        }
    }

    let total_trades = outcomes.len();
    let winning_trades = outcomes.iter().filter(|t| t.pnl > 0.0).count();
    let win_rate = if total_trades > 0 {
        winning_trades as f64 / total_trades as f64 * 100.0
    } else {
        0.0
    };
    let average_pnl = if total_trades > 0 {
        outcomes.iter().map(|t| t.pnl).sum::<f64>() / total_trades as f64
    } else {
        0.0
    };
    let sharpe_ratio = sharpe_like(&outcomes);

    let recent_trades = outcomes
        .iter()
        .rev()
        .take(RECENT_TRADES_SHOWN)
        .rev()
        .cloned()
        .collect();

    PerformanceAnalysis {
        total_trades,
        winning_trades,
        win_rate,
        average_pnl,
        sharpe_ratio,
        recent_trades,
    }
}

fn trade_key(symbol: &str, side: &str) -> String {
    format!("{}_{}", symbol, side)
}

fn side_of(action: &str) -> &'static str {
    if action.ends_with("short") {
        "short"
    } else {
        "long"
    }
}

fn build_outcome(open: &OpenTrade, close: &DecisionAction, side: &str) -> TradeOutcome {
    let margin = if open.leverage > 0 {
        open.open_price * open.quantity / open.leverage as f64
    } else {
        0.0
    };
    let pnl_pct = if margin > 0.0 {
        close.pnl / margin * 100.0
    } else {
        0.0
    };
    let was_stop_loss = close.close_reason.as_deref() == Some("stop_loss");

    TradeOutcome {
        symbol: close.symbol.clone(),
        side: side.to_string(),
        open_time: open.open_time,
        close_time: close.timestamp,
        open_price: open.open_price,
        close_price: close.price,
        pnl: close.pnl,
        pnl_pct,
        leverage: open.leverage,
        was_stop_loss,
        duration: humanize_duration(close.timestamp - open.open_time),
    }
}

fn humanize_duration(delta: chrono::Duration) -> String {
    let minutes = delta.num_minutes().max(0);
    if minutes < 60 {
        format!("{}m", minutes)
    } else {
        format!("{}h{}m", minutes / 60, minutes % 60)
    }
}

/// Mean over standard deviation of per-trade PnL percentages
fn sharpe_like(outcomes: &[TradeOutcome]) -> f64 {
    if outcomes.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = outcomes.iter().map(|t| t.pnl_pct).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    let std_dev = variance.sqrt();
    if std_dev > 0.0 {
        mean / std_dev
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record_with(actions: Vec<DecisionAction>) -> DecisionRecord {
        let mut record = DecisionRecord::new("binance");
        record.actions = actions;
        record
    }

    fn open_action(symbol: &str, action: &str, price: f64, qty: f64, leverage: u32) -> DecisionAction {
        let mut a = DecisionAction::new(action, symbol);
        a.price = price;
        a.quantity = qty;
        a.leverage = leverage;
        a.success = true;
        a
    }

    fn close_action(symbol: &str, action: &str, price: f64, pnl: f64) -> DecisionAction {
        let mut a = DecisionAction::new(action, symbol);
        a.price = price;
        a.pnl = pnl;
        a.success = true;
        a.timestamp = Utc::now() + Duration::minutes(90);
        a
    }

    #[test]
    fn test_round_trip_reconstruction() {
        let records = vec![
            record_with(vec![open_action("BTCUSDT", "open_long", 40_000.0, 0.01, 10)]),
            record_with(vec![close_action("BTCUSDT", "close_long", 41_000.0, 10.0)]),
        ];
        let analysis = analyze_performance(&records);
        assert_eq!(analysis.total_trades, 1);
        assert_eq!(analysis.winning_trades, 1);
        assert_eq!(analysis.win_rate, 100.0);

        let trade = &analysis.recent_trades[0];
        assert_eq!(trade.side, "long");
        assert_eq!(trade.leverage, 10);
        // margin = 40000*0.01/10 = 40, pnl_pct = 10/40*100
        assert!((trade.pnl_pct - 25.0).abs() < 1e-9);
        assert_eq!(trade.duration, "1h30m");
    }

    #[test]
    fn test_stop_loss_flag_from_close_reason() {
        let mut close = close_action("ETHUSDT", "auto_close_short", 3_200.0, -15.0);
        close.close_reason = Some("stop_loss".to_string());
        let records = vec![
            record_with(vec![open_action("ETHUSDT", "open_short", 3_100.0, 0.1, 5)]),
            record_with(vec![close]),
        ];
        let analysis = analyze_performance(&records);
        assert!(analysis.recent_trades[0].was_stop_loss);
        assert_eq!(analysis.win_rate, 0.0);
    }

    #[test]
    fn test_close_without_open_ignored() {
        let records = vec![record_with(vec![close_action(
            "SOLUSDT",
            "close_long",
            150.0,
            5.0,
        )])];
        let analysis = analyze_performance(&records);
        assert_eq!(analysis.total_trades, 0);
    }

    #[test]
    fn test_sharpe_zero_for_single_trade() {
        let records = vec![
            record_with(vec![open_action("BTCUSDT", "open_long", 40_000.0, 0.01, 10)]),
            record_with(vec![close_action("BTCUSDT", "close_long", 41_000.0, 10.0)]),
        ];
        assert_eq!(analyze_performance(&records).sharpe_ratio, 0.0);
    }
}
