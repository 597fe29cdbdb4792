/// Decision journal record types
///
/// One `DecisionRecord` is appended per cycle, parse failures included, so
/// the journal is a complete replay of what the model saw and what the
/// engine did about it.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub total_balance: f64,
    pub available_balance: f64,
    pub total_unrealized_profit: f64,
    pub position_count: usize,
    pub margin_used_pct: f64,
    /// Baseline the PnL percentages were computed against at record time
    pub initial_balance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub side: String,
    pub position_amt: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_profit: f64,
    pub leverage: f64,
    pub liquidation_price: f64,
}

/// One executed (or attempted, or inferred) action within a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionAction {
    /// Action tag; passive closes use auto_close_long / auto_close_short
    pub action: String,
    pub symbol: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub leverage: u32,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub order_id: i64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub pnl: f64,
    /// stop_loss / take_profit / liquidation / manual_close / unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    /// Model reasoning, possibly suffixed with normalizer notes
    #[serde(default)]
    pub reason: String,
}

impl DecisionAction {
    pub fn new(action: &str, symbol: &str) -> Self {
        Self {
            action: action.to_string(),
            symbol: symbol.to_string(),
            quantity: 0.0,
            leverage: 0,
            price: 0.0,
            order_id: 0,
            timestamp: Utc::now(),
            success: false,
            error: None,
            pnl: 0.0,
            close_reason: None,
            reason: String::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.action == "open_long" || self.action == "open_short"
    }

    pub fn is_close(&self) -> bool {
        matches!(
            self.action.as_str(),
            "close_long" | "close_short" | "auto_close_long" | "auto_close_short" | "partial_close"
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Exchange backend tag, used for fee assumptions during analysis
    pub exchange: String,
    pub account: AccountSnapshot,
    #[serde(default)]
    pub positions: Vec<PositionSnapshot>,
    #[serde(default)]
    pub candidate_symbols: Vec<String>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub user_prompt: String,
    #[serde(default)]
    pub cot_trace: String,
    /// Serialized validated decision list, for replay/debugging
    #[serde(default)]
    pub decisions_json: String,
    #[serde(default)]
    pub actions: Vec<DecisionAction>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub execution_log: Vec<String>,
    #[serde(default)]
    pub ai_request_duration_ms: u64,
}

impl DecisionRecord {
    pub fn new(exchange: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            exchange: exchange.to_string(),
            account: AccountSnapshot::default(),
            positions: vec![],
            candidate_symbols: vec![],
            system_prompt: String::new(),
            user_prompt: String::new(),
            cot_trace: String::new(),
            decisions_json: String::new(),
            actions: vec![],
            success: true,
            error_message: None,
            execution_log: vec![],
            ai_request_duration_ms: 0,
        }
    }

    pub fn log_line(&mut self, line: impl Into<String>) {
        self.execution_log.push(line.into());
    }
}

// =============================================================================
// PERFORMANCE
// =============================================================================

/// One round-trip trade reconstructed from journal actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub symbol: String,
    pub side: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open_price: f64,
    pub close_price: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub leverage: u32,
    pub was_stop_loss: bool,
    /// Humanized holding duration, e.g. "2h15m"
    pub duration: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceAnalysis {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub win_rate: f64,
    pub average_pnl: f64,
    pub sharpe_ratio: f64,
    pub recent_trades: Vec<TradeOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_classification() {
        assert!(DecisionAction::new("open_long", "BTCUSDT").is_open());
        assert!(DecisionAction::new("auto_close_short", "BTCUSDT").is_close());
        assert!(!DecisionAction::new("wait", "ALL").is_close());
    }

    #[test]
    fn test_record_roundtrip() {
        let mut record = DecisionRecord::new("binance");
        record.log_line("executed close_long ETHUSDT");
        let json = serde_json::to_string(&record).unwrap();
        let back: DecisionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.exchange, "binance");
        assert_eq!(back.execution_log.len(), 1);
        assert!(back.success);
    }
}
