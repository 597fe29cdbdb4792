/// Exchange adapter layer
///
/// One capability set over every supported venue. Drivers own their auth
/// (API-key HMAC or wallet signing), their per-symbol rounding rules and
/// their snapshot caches; the trader addresses them all through `Exchange`.
pub mod aster;
pub mod binance;
pub mod cache;
pub mod hyperliquid;
pub mod types;

pub use types::{
    AccountBalance, ExchangePosition, OpenOrder, OrderAck, OrderType, Side, SymbolRules,
};

use crate::config::TraderConfig;
use crate::errors::{ConfigError, ExchangeError};
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// CAPABILITY SET
// ============================================================================

#[async_trait]
pub trait Exchange: Send + Sync {
    /// Venue tag used in logs and decision records
    fn venue(&self) -> &'static str;

    async fn get_balance(&self) -> Result<AccountBalance, ExchangeError>;

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError>;

    /// Open orders; empty symbol means all symbols
    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError>;

    async fn get_market_price(&self, symbol: &str) -> Result<f64, ExchangeError>;

    async fn open_long(
        &self,
        symbol: &str,
        quantity: f64,
        leverage: u32,
    ) -> Result<OrderAck, ExchangeError>;

    async fn open_short(
        &self,
        symbol: &str,
        quantity: f64,
        leverage: u32,
    ) -> Result<OrderAck, ExchangeError>;

    /// quantity 0 closes the whole position
    async fn close_long(&self, symbol: &str, quantity: f64) -> Result<OrderAck, ExchangeError>;

    /// quantity 0 closes the whole position
    async fn close_short(&self, symbol: &str, quantity: f64) -> Result<OrderAck, ExchangeError>;

    async fn set_stop_loss(
        &self,
        symbol: &str,
        position_side: Side,
        quantity: f64,
        price: f64,
    ) -> Result<(), ExchangeError>;

    async fn set_take_profit(
        &self,
        symbol: &str,
        position_side: Side,
        quantity: f64,
        price: f64,
    ) -> Result<(), ExchangeError>;

    /// Cancel only stop-loss orders for a symbol
    async fn cancel_stop_loss_orders(&self, symbol: &str) -> Result<(), ExchangeError>;

    /// Cancel only take-profit orders for a symbol
    async fn cancel_take_profit_orders(&self, symbol: &str) -> Result<(), ExchangeError>;

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError>;

    async fn set_margin_mode(&self, symbol: &str, is_cross: bool) -> Result<(), ExchangeError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;
}

// ============================================================================
// FACTORY
// ============================================================================

/// Build the configured exchange driver for a trader
pub fn create_exchange(config: &TraderConfig) -> Result<Arc<dyn Exchange>, ConfigError> {
    match config.exchange.as_str() {
        "binance" => {
            if config.binance_api_key.is_empty() || config.binance_secret_key.is_empty() {
                return Err(ConfigError::MissingField {
                    field: "binance_api_key/binance_secret_key".to_string(),
                });
            }
            Ok(Arc::new(binance::BinanceFutures::new(
                config.binance_api_key.clone(),
                config.binance_secret_key.clone(),
                config.order_strategy,
                config.limit_price_offset_pct,
                config.limit_timeout_secs,
            )))
        }
        "hyperliquid" => {
            if config.hyperliquid_private_key.is_empty() {
                return Err(ConfigError::MissingField {
                    field: "hyperliquid_private_key".to_string(),
                });
            }
            Ok(Arc::new(hyperliquid::HyperliquidDex::new(
                config.hyperliquid_private_key.clone(),
                config.hyperliquid_wallet_addr.clone(),
                config.hyperliquid_testnet,
            )))
        }
        "aster" => {
            if config.aster_user.is_empty()
                || config.aster_signer.is_empty()
                || config.aster_private_key.is_empty()
            {
                return Err(ConfigError::MissingField {
                    field: "aster_user/aster_signer/aster_private_key".to_string(),
                });
            }
            Ok(Arc::new(aster::AsterDex::new(
                config.aster_user.clone(),
                config.aster_signer.clone(),
                config.aster_private_key.clone(),
            )))
        }
        other => Err(ConfigError::UnknownExchange {
            name: other.to_string(),
        }),
    }
}

// ============================================================================
// RETRY WRAPPER
// ============================================================================

const CANCEL_RETRY_ATTEMPTS: u32 = 3;

/// Retry a bulk-cancel style operation with linear backoff (1s, 2s, 3s...).
/// Only cancels go through here; everything else surfaces its first error.
pub async fn cancel_with_retry<F, Fut>(label: &str, mut operation: F) -> Result<(), ExchangeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ExchangeError>>,
{
    let mut last_err = None;
    for attempt in 1..=CANCEL_RETRY_ATTEMPTS {
        match operation().await {
            Ok(()) => return Ok(()),
            Err(err) => {
                logger::warning(
                    LogTag::Exchange,
                    &format!(
                        "{} attempt {}/{} failed: {}",
                        label, attempt, CANCEL_RETRY_ATTEMPTS, err
                    ),
                );
                last_err = Some(err);
                if attempt < CANCEL_RETRY_ATTEMPTS {
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or(ExchangeError::Transient {
        venue: "unknown".to_string(),
        message: format!("{} failed with no recorded error", label),
    }))
}
