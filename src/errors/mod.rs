/// Structured error types for the trading engine
///
/// Errors are grouped by subsystem so callers can tell a transient venue
/// failure from a semantic rejection or an operator configuration mistake.
/// Recovery policy lives with the callers: transient exchange errors are only
/// retried by explicit wrappers, semantic ones may be converted to no-ops by
/// the execution orchestrator, config errors abort trader creation.

// =============================================================================
// TOP-LEVEL ERROR TYPE
// =============================================================================

#[derive(Debug, Clone)]
pub enum BotError {
    // Exchange API failures
    Exchange(ExchangeError),

    // LLM reply parsing / decision validation failures
    Decision(DecisionError),

    // Operator configuration errors (prevent trader creation)
    Config(ConfigError),

    // Decision journal I/O
    Journal(JournalError),

    // Market data collaborator failures
    Market(MarketError),
}

impl std::fmt::Display for BotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotError::Exchange(e) => write!(f, "Exchange error: {}", e),
            BotError::Decision(e) => write!(f, "Decision error: {}", e),
            BotError::Config(e) => write!(f, "Config error: {}", e),
            BotError::Journal(e) => write!(f, "Journal error: {}", e),
            BotError::Market(e) => write!(f, "Market data error: {}", e),
        }
    }
}

impl std::error::Error for BotError {}

// =============================================================================
// EXCHANGE ERRORS
// =============================================================================

#[derive(Debug, Clone)]
pub enum ExchangeError {
    /// I/O failure, rate limit, 5xx. Retried only by explicit retry wrappers.
    Transient { venue: String, message: String },

    /// Venue accepted the request but rejected it semantically
    /// ("no open position", "order would trigger immediately").
    Semantic { venue: String, message: String },

    /// Signature or API-key rejection.
    Auth { venue: String, message: String },

    /// The venue has no trading rules for this symbol.
    UnknownSymbol { venue: String, symbol: String },
}

impl ExchangeError {
    /// True when the error means the position is already gone on the venue.
    /// The orchestrator converts these into no-op successes for update/close
    /// handlers.
    pub fn is_position_gone(&self) -> bool {
        match self {
            ExchangeError::Semantic { message, .. } => {
                let m = message.to_lowercase();
                m.contains("no open position")
                    || m.contains("position does not exist")
                    || m.contains("reduceonly order is rejected")
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeError::Transient { venue, message } => {
                write!(f, "[{}] transient failure: {}", venue, message)
            }
            ExchangeError::Semantic { venue, message } => {
                write!(f, "[{}] rejected: {}", venue, message)
            }
            ExchangeError::Auth { venue, message } => {
                write!(f, "[{}] auth failure: {}", venue, message)
            }
            ExchangeError::UnknownSymbol { venue, symbol } => {
                write!(f, "[{}] unknown symbol: {}", venue, symbol)
            }
        }
    }
}

impl std::error::Error for ExchangeError {}

// =============================================================================
// DECISION ERRORS
// =============================================================================

#[derive(Debug, Clone)]
pub enum DecisionError {
    /// Parser could not recover any JSON from the model reply.
    /// Handled locally by synthesizing a single wait action.
    BadModelReply { message: String },

    /// A single action failed validation; other actions proceed.
    ValidationFailed { index: usize, reason: String },

    /// The account cannot afford the exchange minimum notional for this
    /// symbol. Distinct from bad input: the decision was well-formed.
    InsufficientEquity {
        symbol: String,
        min_notional: f64,
        available: f64,
    },
}

impl std::fmt::Display for DecisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionError::BadModelReply { message } => {
                write!(f, "unparseable model reply: {}", message)
            }
            DecisionError::ValidationFailed { index, reason } => {
                write!(f, "decision #{} failed validation: {}", index + 1, reason)
            }
            DecisionError::InsufficientEquity {
                symbol,
                min_notional,
                available,
            } => write!(
                f,
                "{} minimum notional {:.2} USDT exceeds available balance {:.2} USDT",
                symbol, min_notional, available
            ),
        }
    }
}

impl std::error::Error for DecisionError {}

// =============================================================================
// CONFIG ERRORS
// =============================================================================

#[derive(Debug, Clone)]
pub enum ConfigError {
    MissingField { field: String },
    InvalidValue { field: String, reason: String },
    UnknownExchange { name: String },
    UnknownAiProvider { name: String },
    FileNotFound { path: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingField { field } => write!(f, "missing field '{}'", field),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "invalid value for '{}': {}", field, reason)
            }
            ConfigError::UnknownExchange { name } => write!(f, "unknown exchange backend: {}", name),
            ConfigError::UnknownAiProvider { name } => write!(f, "unknown AI provider: {}", name),
            ConfigError::FileNotFound { path } => write!(f, "config file not found: {}", path),
        }
    }
}

impl std::error::Error for ConfigError {}

// =============================================================================
// JOURNAL / MARKET ERRORS
// =============================================================================

#[derive(Debug, Clone)]
pub enum JournalError {
    Io { path: String, message: String },
    Corrupt { path: String, message: String },
}

impl std::fmt::Display for JournalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JournalError::Io { path, message } => write!(f, "journal I/O ({}): {}", path, message),
            JournalError::Corrupt { path, message } => {
                write!(f, "corrupt journal record ({}): {}", path, message)
            }
        }
    }
}

impl std::error::Error for JournalError {}

#[derive(Debug, Clone)]
pub enum MarketError {
    Fetch { symbol: String, message: String },
    InsufficientData {
        symbol: String,
        needed: usize,
        got: usize,
    },
}

impl std::fmt::Display for MarketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketError::Fetch { symbol, message } => {
                write!(f, "failed to fetch {}: {}", symbol, message)
            }
            MarketError::InsufficientData {
                symbol,
                needed,
                got,
            } => write!(f, "{}: need {} candles, got {}", symbol, needed, got),
        }
    }
}

impl std::error::Error for MarketError {}

// =============================================================================
// CONVERSIONS
// =============================================================================

impl From<ExchangeError> for BotError {
    fn from(err: ExchangeError) -> Self {
        BotError::Exchange(err)
    }
}

impl From<DecisionError> for BotError {
    fn from(err: DecisionError) -> Self {
        BotError::Decision(err)
    }
}

impl From<ConfigError> for BotError {
    fn from(err: ConfigError) -> Self {
        BotError::Config(err)
    }
}

impl From<JournalError> for BotError {
    fn from(err: JournalError) -> Self {
        BotError::Journal(err)
    }
}

impl From<MarketError> for BotError {
    fn from(err: MarketError) -> Self {
        BotError::Market(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_gone_detection() {
        let gone = ExchangeError::Semantic {
            venue: "binance".to_string(),
            message: "No open position for BTCUSDT".to_string(),
        };
        assert!(gone.is_position_gone());

        let other = ExchangeError::Semantic {
            venue: "binance".to_string(),
            message: "Order would immediately trigger".to_string(),
        };
        assert!(!other.is_position_gone());

        let transient = ExchangeError::Transient {
            venue: "binance".to_string(),
            message: "no open position".to_string(),
        };
        assert!(!transient.is_position_gone());
    }

    #[test]
    fn test_display_formats() {
        let err = DecisionError::ValidationFailed {
            index: 2,
            reason: "confidence below 80".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "decision #3 failed validation: confidence below 80"
        );
    }
}
