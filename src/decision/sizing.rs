/// Minimum position sizing rules
///
/// Venue minimum notionals make tiny BTC/ETH orders unfillable, so the floor
/// scales with account equity: small accounts get the absolute minimum,
/// mid-size accounts interpolate linearly up to the standard BTC/ETH floor.
/// Altcoins always use the absolute minimum.
use super::types::is_btc_eth;

/// Exchange absolute minimum (10 USDT) plus a 20 % safety margin
pub const ABSOLUTE_MINIMUM_USD: f64 = 12.0;
/// Standard BTC/ETH floor for accounts at or above 100 USDT equity
pub const STANDARD_BTC_ETH_USD: f64 = 60.0;

const LADDER_LOW_EQUITY: f64 = 20.0;
const LADDER_HIGH_EQUITY: f64 = 100.0;

/// Smallest allowed position value for a symbol at the given account equity
pub fn min_position_size(symbol: &str, account_equity: f64) -> f64 {
    if !is_btc_eth(symbol) {
        return ABSOLUTE_MINIMUM_USD;
    }

    if account_equity < LADDER_LOW_EQUITY {
        ABSOLUTE_MINIMUM_USD
    } else if account_equity >= LADDER_HIGH_EQUITY {
        STANDARD_BTC_ETH_USD
    } else {
        let span = LADDER_HIGH_EQUITY - LADDER_LOW_EQUITY;
        let size_span = STANDARD_BTC_ETH_USD - ABSOLUTE_MINIMUM_USD;
        ABSOLUTE_MINIMUM_USD + size_span * (account_equity - LADDER_LOW_EQUITY) / span
    }
}
