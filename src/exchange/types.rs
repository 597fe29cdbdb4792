/// Wire-level types shared by all exchange drivers
use serde::{Deserialize, Serialize};

// ============================================================================
// SIDES
// ============================================================================

/// Direction of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    /// Venue position-side parameter ("LONG"/"SHORT")
    pub fn as_position_side(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "long" => Some(Side::Long),
            "short" => Some(Side::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ACCOUNT / POSITIONS / ORDERS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AccountBalance {
    pub wallet_balance: f64,
    pub unrealized_profit: f64,
    pub available_balance: f64,
}

impl AccountBalance {
    /// Wallet balance plus unrealized PnL
    pub fn total_equity(&self) -> f64 {
        self.wallet_balance + self.unrealized_profit
    }
}

/// One position as reported by the venue. `position_amt` is signed:
/// negative for shorts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub mark_price: f64,
    pub position_amt: f64,
    pub unrealized_profit: f64,
    pub liquidation_price: f64,
    pub leverage: u32,
}

impl ExchangePosition {
    pub fn quantity(&self) -> f64 {
        self.position_amt.abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    StopMarket,
    TakeProfitMarket,
    Other,
}

impl OrderType {
    pub fn from_venue_str(s: &str) -> Self {
        match s {
            "LIMIT" => OrderType::Limit,
            "MARKET" => OrderType::Market,
            "STOP_MARKET" | "STOP" => OrderType::StopMarket,
            "TAKE_PROFIT_MARKET" | "TAKE_PROFIT" => OrderType::TakeProfitMarket,
            _ => OrderType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            OrderType::Other => "OTHER",
        }
    }
}

/// One working order on the venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub symbol: String,
    pub order_id: i64,
    pub order_type: OrderType,
    /// BUY or SELL
    pub side: String,
    /// LONG, SHORT or BOTH
    pub position_side: String,
    pub quantity: f64,
    pub price: f64,
    pub stop_price: f64,
}

/// Acknowledgement returned by order-placing calls
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: i64,
    pub symbol: String,
    pub status: String,
}

// ============================================================================
// PER-SYMBOL ROUNDING RULES
// ============================================================================

/// Price tick and quantity step for a symbol; all outgoing orders are
/// rounded to these before dispatch
#[derive(Debug, Clone, Copy)]
pub struct SymbolRules {
    pub tick_size: f64,
    pub step_size: f64,
}

impl Default for SymbolRules {
    fn default() -> Self {
        Self {
            tick_size: 0.01,
            step_size: 0.001,
        }
    }
}

impl SymbolRules {
    /// Round a price down to the tick grid
    pub fn round_price(&self, price: f64) -> f64 {
        round_to_step(price, self.tick_size)
    }

    /// Round a quantity down to the step grid
    pub fn round_quantity(&self, quantity: f64) -> f64 {
        round_to_step(quantity, self.step_size)
    }
}

fn round_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    let steps = (value / step).floor();
    // Re-quantize to kill float noise like 0.30000000000000004
    let decimals = decimals_for_step(step);
    let factor = 10f64.powi(decimals as i32);
    ((steps * step) * factor).round() / factor
}

fn decimals_for_step(step: f64) -> usize {
    let mut decimals = 0;
    let mut s = step;
    while s.fract() > 1e-9 && decimals < 12 {
        s *= 10.0;
        decimals += 1;
    }
    decimals
}
