/// Core decision-loop data model
///
/// `Context` is rebuilt from scratch every cycle and handed to the prompt
/// builder; `Decision` is the validated form of one model action. The wire
/// shape the model actually emits is `RawDecision` in the parser, which is
/// permissive; everything here is already validated.
use crate::exchange::{OpenOrder, Side};
use crate::journal::PerformanceAnalysis;
use crate::market::MarketData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::patterns::PatternAnalysis;
use super::summary::MarketSummary;

// =============================================================================
// ACCOUNT AND POSITIONS
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    pub total_equity: f64,
    pub available_balance: f64,
    pub unrealized_pnl: f64,
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    pub margin_used: f64,
    pub margin_used_pct: f64,
    pub position_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub mark_price: f64,
    /// Always positive; direction lives in `side`
    pub quantity: f64,
    pub leverage: u32,
    pub unrealized_pnl: f64,
    /// PnL over margin, leverage included
    pub unrealized_pnl_pct: f64,
    /// High-water mark kept by the trader across cycles
    pub peak_pnl_pct: f64,
    pub liquidation_price: f64,
    pub margin_used: f64,
    /// First-seen local timestamp in ms (not the venue entry time)
    pub update_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
}

impl PositionInfo {
    /// Map key distinguishing long and short on the same symbol
    pub fn key(&self) -> String {
        position_key(&self.symbol, self.side)
    }
}

pub fn position_key(symbol: &str, side: Side) -> String {
    format!("{}_{}", symbol, side)
}

/// PnL percent over margin; leverage is implicit in the margin figure
pub fn pnl_percentage(unrealized_pnl: f64, margin_used: f64) -> f64 {
    if margin_used > 0.0 {
        unrealized_pnl / margin_used * 100.0
    } else {
        0.0
    }
}

// =============================================================================
// CANDIDATES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolSource {
    UserSelected,
    Default,
    Ai500,
    OiTop,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSymbol {
    pub symbol: String,
    pub sources: Vec<SymbolSource>,
}

/// Open-interest leaderboard context attached to candidates when available
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OiTopData {
    pub rank: u32,
    pub oi_delta_percent: f64,
    pub oi_delta_value: f64,
    pub price_delta_percent: f64,
    pub net_long: f64,
    pub net_short: f64,
}

/// Uppercase and append USDT when missing ("sol" -> "SOLUSDT")
pub fn normalize_symbol(symbol: &str) -> String {
    let mut s = symbol.trim().to_uppercase();
    if !s.ends_with("USDT") {
        s.push_str("USDT");
    }
    s
}

// =============================================================================
// CYCLE CONTEXT
// =============================================================================

/// Everything the model sees for one cycle. Rebuilt each tick, dropped after
/// execution.
#[derive(Debug, Clone)]
pub struct Context {
    pub current_time: String,
    pub runtime_minutes: i64,
    pub cycle_index: u64,
    pub account: AccountInfo,
    pub positions: Vec<PositionInfo>,
    pub open_orders: Vec<OpenOrder>,
    pub candidates: Vec<CandidateSymbol>,
    pub market_data: HashMap<String, MarketData>,
    pub oi_top: HashMap<String, OiTopData>,
    /// symbol -> timeframe -> analysis
    pub pattern_analyses: HashMap<String, HashMap<String, PatternAnalysis>>,
    pub market_summary: MarketSummary,
    pub timeframes: Vec<String>,
    pub btc_eth_leverage: u32,
    pub altcoin_leverage: u32,
    pub taker_fee_rate: f64,
    pub maker_fee_rate: f64,
    pub performance: Option<PerformanceAnalysis>,
}

impl Context {
    pub fn leverage_cap(&self, symbol: &str) -> u32 {
        if is_btc_eth(symbol) {
            self.btc_eth_leverage
        } else {
            self.altcoin_leverage
        }
    }
}

pub fn is_btc_eth(symbol: &str) -> bool {
    let base = symbol.strip_suffix("USDT").unwrap_or(symbol);
    base == "BTC" || base == "ETH"
}

// =============================================================================
// DECISIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenParams {
    pub leverage: u32,
    pub position_size_usd: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub confidence: u8,
    pub risk_usd: f64,
}

/// Validated model action. Fields that only exist for some actions live on
/// the variant, so downstream code never sees a half-filled struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    OpenLong {
        #[serde(flatten)]
        params: OpenParams,
    },
    OpenShort {
        #[serde(flatten)]
        params: OpenParams,
    },
    CloseLong,
    CloseShort,
    UpdateStopLoss {
        new_stop_loss: f64,
    },
    UpdateTakeProfit {
        new_take_profit: f64,
    },
    PartialClose {
        close_percentage: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_stop_loss: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_take_profit: Option<f64>,
    },
    Hold {
        #[serde(skip_serializing_if = "Option::is_none")]
        new_stop_loss: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_take_profit: Option<f64>,
    },
    Wait,
}

impl Action {
    pub fn tag(&self) -> &'static str {
        match self {
            Action::OpenLong { .. } => "open_long",
            Action::OpenShort { .. } => "open_short",
            Action::CloseLong => "close_long",
            Action::CloseShort => "close_short",
            Action::UpdateStopLoss { .. } => "update_stop_loss",
            Action::UpdateTakeProfit { .. } => "update_take_profit",
            Action::PartialClose { .. } => "partial_close",
            Action::Hold { .. } => "hold",
            Action::Wait => "wait",
        }
    }

    /// Execution priority: closes flatten exposure before updates and opens,
    /// so a swap within one cycle never stacks positions past the limits
    pub fn priority(&self) -> u8 {
        match self {
            Action::CloseLong | Action::CloseShort | Action::PartialClose { .. } => 1,
            Action::UpdateStopLoss { .. } | Action::UpdateTakeProfit { .. } => 2,
            Action::OpenLong { .. } | Action::OpenShort { .. } => 3,
            Action::Hold { .. } | Action::Wait => 4,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Action::OpenLong { .. } | Action::OpenShort { .. })
    }

    /// Actions whose handlers need the current position snapshot
    pub fn needs_positions(&self) -> bool {
        matches!(
            self,
            Action::CloseLong
                | Action::CloseShort
                | Action::PartialClose { .. }
                | Action::UpdateStopLoss { .. }
                | Action::UpdateTakeProfit { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: String,
    #[serde(flatten)]
    pub action: Action,
    pub reasoning: String,
    /// Normalizer/validator adjustment notes, surfaced in the execution log
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adjustment_notes: Vec<String>,
}

/// One complete model round-trip
#[derive(Debug, Clone)]
pub struct FullDecision {
    pub system_prompt: String,
    pub user_prompt: String,
    pub cot_trace: String,
    pub decisions: Vec<Decision>,
    pub timestamp: DateTime<Utc>,
    pub ai_request_duration_ms: u64,
}
