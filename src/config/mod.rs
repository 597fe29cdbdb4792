/// Operator configuration for traders and AI providers
///
/// Loaded read-only from a JSON file; credential material is carried as
/// opaque strings and never logged.
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// =============================================================================
// AI PROVIDER CONFIG
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    DeepSeek,
    Qwen,
    Custom,
}

impl AiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiProvider::DeepSeek => "deepseek",
            AiProvider::Qwen => "qwen",
            AiProvider::Custom => "custom",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deepseek" => Some(AiProvider::DeepSeek),
            "qwen" => Some(AiProvider::Qwen),
            "custom" => Some(AiProvider::Custom),
            _ => None,
        }
    }
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-trader AI model configuration, hot-swappable at runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiModelConfig {
    pub provider: AiProvider,
    pub api_key: String,
    /// Custom endpoint base URL; empty uses the provider default
    #[serde(default)]
    pub base_url: String,
    /// Model name override; empty uses the provider default
    #[serde(default)]
    pub model_name: String,
}

// =============================================================================
// ORDER EXECUTION STRATEGY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStrategy {
    /// Submit market orders directly
    MarketOnly,
    /// Try a limit order at a small offset; convert to market on timeout
    ConservativeHybrid,
    /// Place the limit order and leave it working
    LimitOnly,
}

impl Default for OrderStrategy {
    fn default() -> Self {
        OrderStrategy::MarketOnly
    }
}

// =============================================================================
// TRADER CONFIG
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderConfig {
    /// Unique trader id (journal directory name, registry key)
    pub id: String,
    /// Display name for logs
    pub name: String,

    pub ai: AiModelConfig,

    /// Exchange backend: "binance", "hyperliquid" or "aster"
    pub exchange: String,

    // Binance credentials
    #[serde(default)]
    pub binance_api_key: String,
    #[serde(default)]
    pub binance_secret_key: String,

    // Hyperliquid credentials
    #[serde(default)]
    pub hyperliquid_private_key: String,
    #[serde(default)]
    pub hyperliquid_wallet_addr: String,
    #[serde(default)]
    pub hyperliquid_testnet: bool,

    // Aster agent-wallet credentials
    #[serde(default)]
    pub aster_user: String,
    #[serde(default)]
    pub aster_signer: String,
    #[serde(default)]
    pub aster_private_key: String,

    /// Seconds between decision cycles
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    /// Balance baseline for total-PnL accounting. Must be > 0.
    pub initial_balance: f64,

    #[serde(default = "default_btc_eth_leverage")]
    pub btc_eth_leverage: u32,
    #[serde(default = "default_altcoin_leverage")]
    pub altcoin_leverage: u32,

    #[serde(default = "default_taker_fee_rate")]
    pub taker_fee_rate: f64,
    #[serde(default = "default_maker_fee_rate")]
    pub maker_fee_rate: f64,

    /// true = cross margin, false = isolated
    #[serde(default = "default_true")]
    pub is_cross_margin: bool,

    /// Fallback coin list when the operator selected none
    #[serde(default)]
    pub default_coins: Vec<String>,
    /// Operator-selected coins (take precedence over default_coins)
    #[serde(default)]
    pub trading_coins: Vec<String>,

    /// System prompt template name ("default", "adaptive", ...)
    #[serde(default = "default_prompt_template")]
    pub system_prompt_template: String,

    #[serde(default)]
    pub order_strategy: OrderStrategy,
    /// Limit order price offset in percent (e.g. -0.03 for -0.03 %)
    #[serde(default)]
    pub limit_price_offset_pct: f64,
    /// Seconds before an unfilled limit order is converted to market
    #[serde(default = "default_limit_timeout_secs")]
    pub limit_timeout_secs: u64,

    /// Candle timeframes for pattern analysis (e.g. ["15m", "1h", "4h"])
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,

    /// Stop-loss price anomaly tolerance in percent of mark price
    #[serde(default = "default_stop_gap_tolerance")]
    pub stop_gap_tolerance_pct: f64,
    /// Peak-PnL retrace that trips the drawdown monitor, in percent
    #[serde(default = "default_drawdown_retrace")]
    pub drawdown_retrace_pct: f64,
    /// Open-interest notional floor for candidate symbols, in millions USDT
    #[serde(default = "default_min_oi_millions")]
    pub min_oi_notional_millions: f64,
}

fn default_scan_interval_secs() -> u64 {
    180
}
fn default_btc_eth_leverage() -> u32 {
    10
}
fn default_altcoin_leverage() -> u32 {
    5
}
fn default_taker_fee_rate() -> f64 {
    0.0004
}
fn default_maker_fee_rate() -> f64 {
    0.0002
}
fn default_true() -> bool {
    true
}
fn default_prompt_template() -> String {
    "adaptive".to_string()
}
fn default_limit_timeout_secs() -> u64 {
    30
}
fn default_timeframes() -> Vec<String> {
    vec!["15m".to_string(), "1h".to_string(), "4h".to_string()]
}
fn default_stop_gap_tolerance() -> f64 {
    0.5
}
fn default_drawdown_retrace() -> f64 {
    40.0
}
fn default_min_oi_millions() -> f64 {
    15.0
}

impl TraderConfig {
    /// Validate the fields the engine cannot run without.
    /// A failure here prevents trader creation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "id".to_string(),
            });
        }
        if self.initial_balance <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "initial_balance".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        match self.exchange.as_str() {
            "binance" | "hyperliquid" | "aster" => {}
            other => {
                return Err(ConfigError::UnknownExchange {
                    name: other.to_string(),
                });
            }
        }
        if self.scan_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scan_interval_secs".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Effective taker fee rate (config value, or the venue default)
    pub fn effective_taker_fee_rate(&self) -> f64 {
        if self.taker_fee_rate > 0.0 {
            self.taker_fee_rate
        } else {
            0.0004
        }
    }
}

/// Load a list of trader configurations from a JSON file
pub fn load_trader_configs<P: AsRef<Path>>(path: P) -> Result<Vec<TraderConfig>, ConfigError> {
    let path_str = path.as_ref().display().to_string();
    let data = fs::read_to_string(&path).map_err(|_| ConfigError::FileNotFound {
        path: path_str.clone(),
    })?;
    let configs: Vec<TraderConfig> =
        serde_json::from_str(&data).map_err(|e| ConfigError::InvalidValue {
            field: path_str,
            reason: e.to_string(),
        })?;
    for config in &configs {
        config.validate()?;
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> TraderConfig {
        serde_json::from_value(serde_json::json!({
            "id": "alpha",
            "name": "Alpha",
            "ai": {"provider": "deepseek", "api_key": "sk-test"},
            "exchange": "binance",
            "initial_balance": 1000.0
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = base_config();
        assert_eq!(config.scan_interval_secs, 180);
        assert_eq!(config.btc_eth_leverage, 10);
        assert_eq!(config.altcoin_leverage, 5);
        assert_eq!(config.order_strategy, OrderStrategy::MarketOnly);
        assert_eq!(config.timeframes, vec!["15m", "1h", "4h"]);
        assert_eq!(config.drawdown_retrace_pct, 40.0);
        assert_eq!(config.min_oi_notional_millions, 15.0);
    }

    #[test]
    fn test_validate_rejects_zero_balance() {
        let mut config = base_config();
        config.initial_balance = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_exchange() {
        let mut config = base_config();
        config.exchange = "mtgox".to_string();
        match config.validate() {
            Err(ConfigError::UnknownExchange { name }) => assert_eq!(name, "mtgox"),
            other => panic!("expected UnknownExchange, got {:?}", other),
        }
    }

    #[test]
    fn test_effective_taker_fee_fallback() {
        let mut config = base_config();
        config.taker_fee_rate = 0.0;
        assert_eq!(config.effective_taker_fee_rate(), 0.0004);
    }
}
