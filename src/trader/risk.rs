/// Pre-trade risk guards and sizing normalization
///
/// Guards run per action after parsing and before execution; the first
/// failing guard aborts that action with a human-readable note while the
/// rest of the cycle proceeds. The normalizer then fits the requested size
/// to what the account can actually carry.
use crate::decision::sizing::min_position_size;
use crate::decision::summary::Volatility;
use crate::decision::types::{is_btc_eth, Context, OpenParams};
use crate::exchange::Side;

const MARGIN_USAGE_LIMIT_PCT: f64 = 70.0;
const MAX_CONCURRENT_POSITIONS: usize = 3;
const DRAWDOWN_LIMIT_PCT: f64 = -8.0;
const DRAWDOWN_CONFIDENCE_FLOOR: u8 = 85;

/// Minimum buffer kept out of play regardless of account size
const BUFFER_FLOOR_USD: f64 = 3.0;
/// Buffer never exceeds this share of the available balance
const BUFFER_CAP_RATIO: f64 = 0.12;

// =============================================================================
// OPEN-POSITION GUARDS
// =============================================================================

/// Check the hard open guards in order. Returns the blocking note on the
/// first failure; non-open actions always pass.
pub fn check_open_guards(ctx: &Context, confidence: u8) -> Result<(), String> {
    let account = &ctx.account;

    if account.margin_used_pct >= MARGIN_USAGE_LIMIT_PCT {
        return Err(format!(
            "margin usage {:.1}% >= {:.0}%, no free margin headroom for new positions",
            account.margin_used_pct, MARGIN_USAGE_LIMIT_PCT
        ));
    }

    if account.position_count >= MAX_CONCURRENT_POSITIONS {
        return Err(format!(
            "{} positions already open, max {} concurrent",
            account.position_count, MAX_CONCURRENT_POSITIONS
        ));
    }

    if account.total_pnl_pct <= DRAWDOWN_LIMIT_PCT && confidence < DRAWDOWN_CONFIDENCE_FLOOR {
        return Err(format!(
            "account drawdown {:.1}% with confidence {} below {}, require higher conviction until performance recovers",
            account.total_pnl_pct, confidence, DRAWDOWN_CONFIDENCE_FLOOR
        ));
    }

    if ctx.market_summary.volatility == Volatility::Extreme {
        return Err("extreme market volatility, observation only".to_string());
    }

    Ok(())
}

// =============================================================================
// SIZE / LEVERAGE NORMALIZATION
// =============================================================================

/// Leverage fallback when the model omitted it
pub fn default_leverage_for(symbol: &str, btc_eth_leverage: u32, altcoin_leverage: u32) -> u32 {
    let configured = if is_btc_eth(symbol) {
        btc_eth_leverage
    } else {
        altcoin_leverage
    };
    if configured > 0 {
        configured
    } else {
        3
    }
}

/// Fit the requested size to the account: safety buffer, fee-aware maximum,
/// minimum notional, and an opportunistic bump for confident sizing.
/// Mutates the params in place; returns adjustment notes.
pub fn normalize_position_size(
    params: &mut OpenParams,
    symbol: &str,
    account_equity: f64,
    available_balance: f64,
    taker_fee_rate: f64,
    btc_eth_leverage: u32,
    altcoin_leverage: u32,
) -> Result<Vec<String>, String> {
    if available_balance <= 0.0 {
        return Err(format!(
            "available balance {:.2} USDT cannot support a new position",
            available_balance
        ));
    }

    let mut notes = Vec::new();

    if params.leverage == 0 {
        params.leverage = default_leverage_for(symbol, btc_eth_leverage, altcoin_leverage);
        notes.push(format!(
            "leverage missing, defaulted to {}x for {}",
            params.leverage, symbol
        ));
    }

    // Safety buffer scales down as equity grows and conviction rises
    let mut buffer_ratio = if account_equity < 200.0 {
        0.10
    } else if account_equity < 500.0 {
        0.07
    } else if account_equity < 1000.0 {
        0.05
    } else {
        0.03
    };
    if params.confidence >= 90 {
        buffer_ratio *= 0.7;
    } else if params.confidence >= 85 {
        buffer_ratio *= 0.8;
    }

    let buffer = (available_balance * buffer_ratio)
        .max(BUFFER_FLOOR_USD)
        .min(available_balance * BUFFER_CAP_RATIO);
    let mut effective_balance = available_balance - buffer;
    if effective_balance <= 0.0 {
        effective_balance = available_balance * 0.85;
    }
    if effective_balance <= 0.0 {
        return Err(format!(
            "available balance {:.2} USDT cannot satisfy the safety buffer",
            available_balance
        ));
    }

    let denominator = 1.0 / params.leverage as f64 + taker_fee_rate;
    if denominator <= 0.0 {
        return Err("invalid leverage or fee configuration".to_string());
    }

    let min_notional = min_position_size(symbol, account_equity);
    let mut max_position_usd = effective_balance / denominator;
    if max_position_usd < min_notional {
        return Err(format!(
            "available balance {:.2} USDT cannot cover the {:.2} USDT minimum notional for {}",
            available_balance, min_notional, symbol
        ));
    }
    max_position_usd = (max_position_usd * 100.0).floor() / 100.0;
    if max_position_usd < min_notional {
        max_position_usd = min_notional;
    }

    // Bump modest sizings when conviction is high and headroom is wide
    if params.confidence >= 85 && max_position_usd > params.position_size_usd * 1.5 {
        let suggested = params.position_size_usd * 1.2;
        if suggested <= max_position_usd {
            let original = params.position_size_usd;
            params.position_size_usd = (suggested * 100.0).floor() / 100.0;
            notes.push(format!(
                "high-confidence sizing, raised {:.2} -> {:.2} USDT to use available capital",
                original, params.position_size_usd
            ));
        }
    }

    if params.position_size_usd > max_position_usd {
        let original = params.position_size_usd;
        params.position_size_usd = max_position_usd;
        notes.push(format!(
            "margin limit, clamped {:.2} -> {:.2} USDT (available {:.2} USDT)",
            original, params.position_size_usd, available_balance
        ));
    }

    if params.position_size_usd < min_notional {
        let original = params.position_size_usd;
        params.position_size_usd = min_notional;
        notes.push(format!(
            "raised {:.2} -> {:.2} USDT to meet the minimum notional",
            original, params.position_size_usd
        ));
    }

    if params.position_size_usd <= 0.0 {
        return Err("position size invalid after normalization".to_string());
    }

    Ok(notes)
}

/// Margin must cover the position plus the estimated entry fee
pub fn check_open_margin(
    params: &OpenParams,
    taker_fee_rate: f64,
    available_balance: f64,
) -> Result<(), String> {
    let required_margin = params.position_size_usd / params.leverage.max(1) as f64;
    let estimated_fee = params.position_size_usd * taker_fee_rate;
    let total_required = required_margin + estimated_fee;
    if total_required > available_balance {
        return Err(format!(
            "insufficient margin: need {:.2} USDT (margin {:.2} + fee {:.2}), available {:.2} USDT",
            total_required, required_margin, estimated_fee, available_balance
        ));
    }
    Ok(())
}

// =============================================================================
// STOP-LOSS SANITY
// =============================================================================

/// Repair stop prices that sit on the wrong side of the market.
///
/// A small overshoot (within the tolerance) is kept with a warning since it
/// is usually price movement between model call and execution; a large one
/// is replaced with a stop just inside the current price.
pub fn normalize_stop_loss(
    side: Side,
    requested_stop: f64,
    current_price: f64,
    tolerance_pct: f64,
    safety_buffer_pct: f64,
) -> (f64, Option<String>) {
    if current_price <= 0.0 || requested_stop <= 0.0 {
        return (requested_stop, None);
    }

    match side {
        Side::Long => {
            if requested_stop > current_price {
                let gap_pct = (requested_stop - current_price) / current_price * 100.0;
                if gap_pct > tolerance_pct {
                    let safe_stop = current_price * (1.0 - safety_buffer_pct / 100.0);
                    return (
                        safe_stop,
                        Some(format!(
                            "long stop {:.4} sits {:.2}% above mark {:.4}, moved to {:.4}",
                            requested_stop, gap_pct, current_price, safe_stop
                        )),
                    );
                }
                return (
                    requested_stop,
                    Some(format!(
                        "long stop {:.4} slightly above mark {:.4} ({:.2}%), keeping; likely price drift",
                        requested_stop, current_price, gap_pct
                    )),
                );
            }
        }
        Side::Short => {
            if requested_stop < current_price {
                let gap_pct = (current_price - requested_stop) / current_price * 100.0;
                if gap_pct > tolerance_pct {
                    let safe_stop = current_price * (1.0 + safety_buffer_pct / 100.0);
                    return (
                        safe_stop,
                        Some(format!(
                            "short stop {:.4} sits {:.2}% below mark {:.4}, moved to {:.4}",
                            requested_stop, gap_pct, current_price, safe_stop
                        )),
                    );
                }
                return (
                    requested_stop,
                    Some(format!(
                        "short stop {:.4} slightly below mark {:.4} ({:.2}%), keeping; likely price drift",
                        requested_stop, current_price, gap_pct
                    )),
                );
            }
        }
    }

    (requested_stop, None)
}
