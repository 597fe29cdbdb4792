/// Trader lifecycle management
///
/// Holds the registry of running traders keyed by id. Each trader owns two
/// long-lived tasks (decision loop, drawdown monitor) wired to one shutdown
/// channel; stopping waits for both to drain. Traders share nothing mutable,
/// so one blowing up never corrupts another.
use super::auto::AutoTrader;
use crate::apis::llm::{self, LlmClient};
use crate::config::{AiModelConfig, TraderConfig};
use crate::errors::{BotError, ConfigError};
use crate::exchange::{self, Exchange};
use crate::journal::DecisionJournal;
use crate::logger::{self, LogTag};
use crate::market::MarketDataSource;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

const DEFAULT_JOURNAL_ROOT: &str = "decision_logs";

struct TraderHandle {
    trader: Arc<AutoTrader>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct TraderManager {
    journal_root: PathBuf,
    traders: Mutex<HashMap<String, TraderHandle>>,
}

impl TraderManager {
    pub fn new() -> Self {
        Self::with_journal_root(DEFAULT_JOURNAL_ROOT)
    }

    pub fn with_journal_root(journal_root: impl Into<PathBuf>) -> Self {
        Self {
            journal_root: journal_root.into(),
            traders: Mutex::new(HashMap::new()),
        }
    }

    /// Create and launch a trader from configuration. Fails without side
    /// effects on invalid config, unknown backends or a duplicate id.
    pub async fn start(&self, config: TraderConfig) -> Result<(), BotError> {
        config.validate()?;
        let exchange = exchange::create_exchange(&config)?;
        let llm_client = llm::build_client(&config.ai).map_err(|reason| {
            BotError::Config(ConfigError::InvalidValue {
                field: "ai".to_string(),
                reason,
            })
        })?;
        let market: Arc<dyn MarketDataSource> = Arc::new(crate::market::FuturesRestSource::new());
        self.start_with(config, exchange, market, llm_client).await
    }

    /// Launch a trader with explicit collaborators. This is the seam the
    /// integration tests use to run cycles against stub venues.
    pub async fn start_with(
        &self,
        config: TraderConfig,
        exchange: Arc<dyn Exchange>,
        market: Arc<dyn MarketDataSource>,
        llm_client: Arc<dyn LlmClient>,
    ) -> Result<(), BotError> {
        config.validate()?;

        let mut traders = self.traders.lock().await;
        if traders.contains_key(&config.id) {
            return Err(BotError::Config(ConfigError::InvalidValue {
                field: "id".to_string(),
                reason: format!("trader '{}' is already running", config.id),
            }));
        }

        let journal = Arc::new(DecisionJournal::open(&self.journal_root, &config.id)?);
        let trader_id = config.id.clone();
        let trader = Arc::new(AutoTrader::new(
            config,
            exchange,
            market,
            llm_client,
            journal,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(Arc::clone(&trader).run_loop(shutdown_rx.clone())),
            tokio::spawn(Arc::clone(&trader).run_drawdown_monitor(shutdown_rx)),
        ];

        logger::info(
            LogTag::Trader,
            &format!("trader '{}' started", trader.name()),
        );
        traders.insert(
            trader_id,
            TraderHandle {
                trader,
                shutdown: shutdown_tx,
                tasks,
            },
        );
        Ok(())
    }

    /// Signal shutdown and wait for both trader tasks to finish.
    /// Stopping an unknown or already-stopped trader is a no-op.
    pub async fn stop(&self, id: &str) {
        let handle = {
            let mut traders = self.traders.lock().await;
            traders.remove(id)
        };
        let Some(handle) = handle else {
            logger::debug(
                LogTag::Trader,
                &format!("stop for '{}' ignored: not running", id),
            );
            return;
        };

        // Receivers observe the change at their next select point;
        // in-flight exchange calls finish first
        let _ = handle.shutdown.send(true);
        for task in handle.tasks {
            if let Err(err) = task.await {
                logger::warning(
                    LogTag::Trader,
                    &format!("trader '{}' task ended abnormally: {}", id, err),
                );
            }
        }
        logger::info(LogTag::Trader, &format!("trader '{}' stopped", id));
    }

    /// Stop every running trader
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.traders.lock().await.keys().cloned().collect();
        for id in ids {
            self.stop(&id).await;
        }
    }

    /// Hot-swap a trader's model credentials without restarting its loop
    pub async fn reload_ai_config(
        &self,
        id: &str,
        model_config: &AiModelConfig,
    ) -> Result<(), BotError> {
        let traders = self.traders.lock().await;
        let handle = traders.get(id).ok_or_else(|| {
            BotError::Config(ConfigError::InvalidValue {
                field: "id".to_string(),
                reason: format!("trader '{}' is not running", id),
            })
        })?;
        handle
            .trader
            .reload_ai_config(model_config)
            .await
            .map_err(|reason| {
                BotError::Config(ConfigError::InvalidValue {
                    field: "ai".to_string(),
                    reason,
                })
            })
    }

    /// Status snapshots for all running traders
    pub async fn status_all(&self) -> Vec<serde_json::Value> {
        let traders = self.traders.lock().await;
        let mut out = Vec::with_capacity(traders.len());
        for handle in traders.values() {
            out.push(handle.trader.status().await);
        }
        out
    }

    pub async fn running_ids(&self) -> Vec<String> {
        self.traders.lock().await.keys().cloned().collect()
    }
}

impl Default for TraderManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_config() -> TraderConfig {
        serde_json::from_value(serde_json::json!({
            "id": "x",
            "name": "X",
            "ai": {"provider": "deepseek", "api_key": "sk"},
            "exchange": "mtgox",
            "initial_balance": 100.0
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_rejects_unknown_exchange() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = TraderManager::with_journal_root(tmp.path());
        let err = manager.start(invalid_config()).await.unwrap_err();
        assert!(matches!(
            err,
            BotError::Config(ConfigError::UnknownExchange { .. })
        ));
        assert!(manager.running_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_trader_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = TraderManager::with_journal_root(tmp.path());
        manager.stop("ghost").await;
        manager.stop("ghost").await;
    }

    #[tokio::test]
    async fn test_reload_requires_running_trader() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = TraderManager::with_journal_root(tmp.path());
        let model = AiModelConfig {
            provider: crate::config::AiProvider::DeepSeek,
            api_key: "sk-new".to_string(),
            base_url: String::new(),
            model_name: String::new(),
        };
        assert!(manager.reload_ai_config("ghost", &model).await.is_err());
    }
}
