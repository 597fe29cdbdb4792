//! End-to-end decision cycles against a stub venue and a scripted model.
//!
//! Exercises the full loop: context assembly, prompt construction, reply
//! parsing, ordered execution, passive-close reconciliation and journaling.
use async_trait::async_trait;
use chrono::Utc;
use futuresbot::apis::llm::{ChatRequest, ChatResponse, LlmClient, LlmError, Provider, Usage};
use futuresbot::config::TraderConfig;
use futuresbot::errors::{ExchangeError, MarketError};
use futuresbot::exchange::{
    AccountBalance, Exchange, ExchangePosition, OpenOrder, OrderAck, Side,
};
use futuresbot::journal::DecisionJournal;
use futuresbot::market::{Kline, MarketData, MarketDataSource};
use futuresbot::trader::AutoTrader;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

// =============================================================================
// STUBS
// =============================================================================

/// Scripted model: returns canned replies in order, then waits forever
struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedModel {
    fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(String::from).collect()),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedModel {
    fn provider(&self) -> Provider {
        Provider::Custom
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn call(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let content = self
            .replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| "<reasoning>nothing to do</reasoning>".to_string());
        Ok(ChatResponse {
            content,
            usage: Usage::new(1000, 200),
            finish_reason: Some("stop".to_string()),
            model: "scripted".to_string(),
            latency_ms: 12,
        })
    }
}

/// In-memory venue. Opens add positions, closes remove them, and tests can
/// mutate the position set directly to simulate venue-side closes.
struct StubVenue {
    positions: Mutex<Vec<ExchangePosition>>,
    calls: Mutex<Vec<String>>,
    price: f64,
}

impl StubVenue {
    fn new(price: f64) -> Self {
        Self {
            positions: Mutex::new(vec![]),
            calls: Mutex::new(vec![]),
            price,
        }
    }

    async fn record(&self, call: impl Into<String>) {
        self.calls.lock().await.push(call.into());
    }

    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn remove_position(&self, symbol: &str, side: Side) {
        self.positions
            .lock()
            .await
            .retain(|p| !(p.symbol == symbol && p.side == side));
    }
}

#[async_trait]
impl Exchange for StubVenue {
    fn venue(&self) -> &'static str {
        "stub"
    }

    async fn get_balance(&self) -> Result<AccountBalance, ExchangeError> {
        Ok(AccountBalance {
            wallet_balance: 1000.0,
            unrealized_profit: 0.0,
            available_balance: 900.0,
        })
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        Ok(self.positions.lock().await.clone())
    }

    async fn get_open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        Ok(vec![])
    }

    async fn get_market_price(&self, _symbol: &str) -> Result<f64, ExchangeError> {
        Ok(self.price)
    }

    async fn open_long(
        &self,
        symbol: &str,
        quantity: f64,
        leverage: u32,
    ) -> Result<OrderAck, ExchangeError> {
        self.record(format!("open_long {}", symbol)).await;
        self.positions.lock().await.push(ExchangePosition {
            symbol: symbol.to_string(),
            side: Side::Long,
            entry_price: self.price,
            mark_price: self.price,
            position_amt: quantity,
            unrealized_profit: 0.0,
            liquidation_price: self.price * 0.5,
            leverage,
        });
        Ok(OrderAck {
            order_id: 42,
            symbol: symbol.to_string(),
            status: "FILLED".to_string(),
        })
    }

    async fn open_short(
        &self,
        symbol: &str,
        quantity: f64,
        leverage: u32,
    ) -> Result<OrderAck, ExchangeError> {
        self.record(format!("open_short {}", symbol)).await;
        self.positions.lock().await.push(ExchangePosition {
            symbol: symbol.to_string(),
            side: Side::Short,
            entry_price: self.price,
            mark_price: self.price,
            position_amt: -quantity,
            unrealized_profit: 0.0,
            liquidation_price: self.price * 1.5,
            leverage,
        });
        Ok(OrderAck {
            order_id: 43,
            symbol: symbol.to_string(),
            status: "FILLED".to_string(),
        })
    }

    async fn close_long(&self, symbol: &str, _quantity: f64) -> Result<OrderAck, ExchangeError> {
        self.record(format!("close_long {}", symbol)).await;
        self.remove_position(symbol, Side::Long).await;
        Ok(OrderAck {
            order_id: 44,
            symbol: symbol.to_string(),
            status: "FILLED".to_string(),
        })
    }

    async fn close_short(&self, symbol: &str, _quantity: f64) -> Result<OrderAck, ExchangeError> {
        self.record(format!("close_short {}", symbol)).await;
        self.remove_position(symbol, Side::Short).await;
        Ok(OrderAck {
            order_id: 45,
            symbol: symbol.to_string(),
            status: "FILLED".to_string(),
        })
    }

    async fn set_stop_loss(
        &self,
        symbol: &str,
        _position_side: Side,
        _quantity: f64,
        price: f64,
    ) -> Result<(), ExchangeError> {
        self.record(format!("set_stop_loss {} {:.4}", symbol, price))
            .await;
        Ok(())
    }

    async fn set_take_profit(
        &self,
        symbol: &str,
        _position_side: Side,
        _quantity: f64,
        price: f64,
    ) -> Result<(), ExchangeError> {
        self.record(format!("set_take_profit {} {:.4}", symbol, price))
            .await;
        Ok(())
    }

    async fn cancel_stop_loss_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        self.record(format!("cancel_stop_loss_orders {}", symbol))
            .await;
        Ok(())
    }

    async fn cancel_take_profit_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        self.record(format!("cancel_take_profit_orders {}", symbol))
            .await;
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        self.record(format!("cancel_all_orders {}", symbol)).await;
        Ok(())
    }

    async fn set_margin_mode(&self, _symbol: &str, _is_cross: bool) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<(), ExchangeError> {
        Ok(())
    }
}

struct StubMarket;

#[async_trait]
impl MarketDataSource for StubMarket {
    async fn get_fresh(&self, symbol: &str) -> Result<MarketData, MarketError> {
        Ok(MarketData {
            symbol: symbol.to_string(),
            current_price: 100.0,
            price_change_1h: 0.5,
            price_change_4h: 1.5,
            current_ema20: 98.0,
            current_macd: 0.2,
            current_rsi7: 55.0,
            intraday: None,
            longer_term: None,
            open_interest: None,
            klines_1h: flat_klines(40),
            fetched_at: Utc::now(),
        })
    }

    async fn get_klines(
        &self,
        _symbol: &str,
        _interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, MarketError> {
        Ok(flat_klines(limit.min(40)))
    }
}

fn flat_klines(n: usize) -> Vec<Kline> {
    (0..n)
        .map(|i| Kline {
            open_time: i as i64 * 60_000,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.0,
            volume: 50.0,
            close_time: (i as i64 + 1) * 60_000,
        })
        .collect()
}

fn config() -> TraderConfig {
    serde_json::from_value(serde_json::json!({
        "id": "itest",
        "name": "Integration",
        "ai": {"provider": "custom", "api_key": "sk", "base_url": "http://stub", "model_name": "scripted"},
        "exchange": "binance",
        "initial_balance": 1000.0,
        "trading_coins": ["SOL"],
        "timeframes": ["1h"]
    }))
    .unwrap()
}

fn build_trader(
    venue: Arc<StubVenue>,
    model: Arc<ScriptedModel>,
    journal: Arc<DecisionJournal>,
) -> AutoTrader {
    AutoTrader::new(
        config(),
        venue,
        Arc::new(StubMarket),
        model,
        journal,
    )
}

// =============================================================================
// SCENARIOS
// =============================================================================

const OPEN_LONG_REPLY: &str = r#"<reasoning>clean breakout with volume</reasoning>
<decision>
```json
[{"symbol": "SOLUSDT", "action": "open_long", "leverage": 5, "position_size_usd": 200, "stop_loss": 92, "take_profit": 130, "confidence": 90, "risk_usd": 16, "reasoning": "breakout"}]
```
</decision>"#;

#[tokio::test(flavor = "multi_thread")]
async fn open_cycle_places_position_with_protection() {
    let tmp = tempfile::tempdir().unwrap();
    let venue = Arc::new(StubVenue::new(100.0));
    let model = Arc::new(ScriptedModel::new(vec![OPEN_LONG_REPLY]));
    let journal = Arc::new(DecisionJournal::open(tmp.path(), "itest").unwrap());

    let trader = build_trader(Arc::clone(&venue), model, Arc::clone(&journal));
    trader.run_once().await.unwrap();

    let calls = venue.calls().await;
    assert!(calls.iter().any(|c| c.starts_with("open_long SOLUSDT")));
    assert!(calls.iter().any(|c| c.starts_with("set_stop_loss SOLUSDT 92")));
    assert!(calls.iter().any(|c| c.starts_with("set_take_profit SOLUSDT 130")));

    let positions = venue.get_positions().await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].side, Side::Long);

    let records = journal.read_recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert_eq!(records[0].actions.len(), 1);
    assert_eq!(records[0].actions[0].action, "open_long");
    assert!(records[0].actions[0].success);
    assert!(records[0].cot_trace.contains("clean breakout"));
    assert!(!records[0].system_prompt.is_empty());
    assert!(!records[0].user_prompt.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn same_side_reopen_is_rejected_within_and_across_cycles() {
    let tmp = tempfile::tempdir().unwrap();
    let venue = Arc::new(StubVenue::new(100.0));
    let model = Arc::new(ScriptedModel::new(vec![OPEN_LONG_REPLY, OPEN_LONG_REPLY]));
    let journal = Arc::new(DecisionJournal::open(tmp.path(), "itest").unwrap());

    let trader = build_trader(Arc::clone(&venue), model, Arc::clone(&journal));
    trader.run_once().await.unwrap();
    trader.run_once().await.unwrap();

    // Still exactly one long; the second open failed
    let positions = venue.get_positions().await.unwrap();
    assert_eq!(positions.len(), 1);

    let records = journal.read_recent(10).await.unwrap();
    assert_eq!(records.len(), 2);
    let second_open = &records[1].actions[0];
    assert!(!second_open.success);
    assert!(second_open.error.as_ref().unwrap().contains("already holds"));
}

#[tokio::test(flavor = "multi_thread")]
async fn venue_side_close_is_reconciled_with_stop_reason() {
    let tmp = tempfile::tempdir().unwrap();
    let venue = Arc::new(StubVenue::new(100.0));
    let model = Arc::new(ScriptedModel::new(vec![
        OPEN_LONG_REPLY,
        "<reasoning>holding through the dip</reasoning>",
        "<reasoning>market unclear</reasoning>",
    ]));
    let journal = Arc::new(DecisionJournal::open(tmp.path(), "itest").unwrap());

    let trader = build_trader(Arc::clone(&venue), model, Arc::clone(&journal));
    trader.run_once().await.unwrap();

    // Price drifts down toward the stop; the trader observes it once more
    {
        let mut positions = venue.positions.lock().await;
        positions[0].mark_price = 91.8;
    }
    trader.run_once().await.unwrap();

    // The venue stop triggers between cycles and the position disappears
    venue.remove_position("SOLUSDT", Side::Long).await;
    trader.run_once().await.unwrap();

    let records = journal.read_recent(10).await.unwrap();
    assert_eq!(records.len(), 3);
    let last = &records[2];
    assert!(last.success);

    let auto_close = last
        .actions
        .iter()
        .find(|a| a.action == "auto_close_long")
        .expect("synthetic auto close recorded");
    assert_eq!(auto_close.symbol, "SOLUSDT");
    assert_eq!(auto_close.close_reason.as_deref(), Some("stop_loss"));
    assert_eq!(auto_close.price, 92.0);

    // The no-JSON reply degraded to a single safe wait
    let wait = last
        .actions
        .iter()
        .find(|a| a.action == "wait")
        .expect("wait fallback recorded");
    assert_eq!(wait.symbol, "ALL");
    assert!(wait.reason.contains("market unclear"));
}

#[tokio::test(flavor = "multi_thread")]
async fn swap_cycle_closes_before_opening() {
    let tmp = tempfile::tempdir().unwrap();
    let venue = Arc::new(StubVenue::new(100.0));
    let swap_reply = r#"<decision>
```json
[
  {"symbol": "SOLUSDT", "action": "open_long", "leverage": 5, "position_size_usd": 200, "stop_loss": 92, "take_profit": 130, "confidence": 90, "reasoning": "rotate in"},
  {"symbol": "ETHUSDT", "action": "close_short", "reasoning": "rotate out"}
]
```
</decision>"#;
    let model = Arc::new(ScriptedModel::new(vec![swap_reply]));
    let journal = Arc::new(DecisionJournal::open(tmp.path(), "itest").unwrap());

    // Pre-existing short that the model wants to rotate out of
    venue.open_short("ETHUSDT", 1.0, 5).await.unwrap();
    venue.calls.lock().await.clear();

    let trader = build_trader(Arc::clone(&venue), model, Arc::clone(&journal));
    trader.run_once().await.unwrap();

    let calls = venue.calls().await;
    let close_idx = calls
        .iter()
        .position(|c| c.starts_with("close_short ETHUSDT"))
        .expect("close executed");
    let open_idx = calls
        .iter()
        .position(|c| c.starts_with("open_long SOLUSDT"))
        .expect("open executed");
    assert!(close_idx < open_idx, "close must run before open");
}
