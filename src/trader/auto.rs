/// Per-trader decision loop
///
/// Each tick: honor the risk pause, reset daily accounting, rebuild the
/// cycle context, reconcile positions the venue closed on its own, drive
/// the model, execute the validated actions and journal the whole round.
/// A separate once-a-minute monitor protects unrealized profits by
/// flattening positions that retrace too far from their peak.
use super::executor::Executor;
use crate::apis::llm::{self, LlmClient};
use crate::config::{AiModelConfig, TraderConfig};
use crate::decision::{self, ContextBuilder, PositionBook};
use crate::decision::types::{position_key, PositionInfo};
use crate::exchange::{Exchange, Side};
use crate::journal::{analyze_performance, DecisionAction, DecisionJournal, DecisionRecord};
use crate::journal::{AccountSnapshot, PositionSnapshot};
use crate::logger::{self, LogTag};
use crate::market::MarketDataSource;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};

const DRAWDOWN_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// Only positions above this profit are drawdown-protected
const DRAWDOWN_MIN_PROFIT_PCT: f64 = 5.0;
/// Journal depth used for performance feedback
const PERFORMANCE_LOOKBACK: usize = 100;

/// Price proximity for stop/take close-reason inference
const CLOSE_REASON_PRICE_TOLERANCE: f64 = 0.01;
/// Wider proximity for liquidation inference
const LIQUIDATION_PRICE_TOLERANCE: f64 = 0.02;

// =============================================================================
// LOOP STATE
// =============================================================================

/// State mutated only by the main loop between cycles
struct LoopState {
    cycle_count: u64,
    start_time: DateTime<Utc>,
    last_reset_time: DateTime<Utc>,
    daily_pnl: f64,
    stop_until: Option<DateTime<Utc>>,
    /// Previous cycle's positions keyed by symbol_side, for passive-close
    /// detection
    last_positions: HashMap<String, PositionInfo>,
}

/// Operator-adjustable knobs, settable while the loop runs
#[derive(Default, Clone)]
struct PromptSettings {
    custom_prompt: String,
    override_base: bool,
    template_name: String,
}

pub struct AutoTrader {
    config: TraderConfig,
    exchange: Arc<dyn Exchange>,
    llm: RwLock<Arc<dyn LlmClient>>,
    journal: Arc<DecisionJournal>,
    book: Arc<RwLock<PositionBook>>,
    context_builder: ContextBuilder,
    executor: Executor,
    state: Mutex<LoopState>,
    prompt_settings: RwLock<PromptSettings>,
}

impl AutoTrader {
    pub fn new(
        config: TraderConfig,
        exchange: Arc<dyn Exchange>,
        market: Arc<dyn MarketDataSource>,
        llm_client: Arc<dyn LlmClient>,
        journal: Arc<DecisionJournal>,
    ) -> Self {
        let book = Arc::new(RwLock::new(PositionBook::default()));
        let context_builder =
            ContextBuilder::new(Arc::clone(&exchange), market, Arc::clone(&book));
        let executor = Executor::new(
            Arc::clone(&exchange),
            Arc::clone(&book),
            config.is_cross_margin,
            config.stop_gap_tolerance_pct,
        );
        let template_name = config.system_prompt_template.clone();

        Self {
            config,
            exchange,
            llm: RwLock::new(llm_client),
            journal,
            book,
            context_builder,
            executor,
            state: Mutex::new(LoopState {
                cycle_count: 0,
                start_time: Utc::now(),
                last_reset_time: Utc::now(),
                daily_pnl: 0.0,
                stop_until: None,
                last_positions: HashMap::new(),
            }),
            prompt_settings: RwLock::new(PromptSettings {
                custom_prompt: String::new(),
                override_base: false,
                template_name,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    // ------------------------------------------------------------------
    // MAIN LOOP
    // ------------------------------------------------------------------

    /// Run the decision loop until the shutdown channel fires. The first
    /// cycle runs immediately; later ones follow the scan interval.
    pub async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        logger::info(
            LogTag::Trader,
            &format!(
                "[{}] trader loop started (interval {}s, exchange {})",
                self.config.name,
                self.config.scan_interval_secs,
                self.exchange.venue()
            ),
        );

        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.scan_interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Shutdown also interrupts a cycle at its next await
                    // point, so a slow model or market call cannot hold the
                    // trader open
                    tokio::select! {
                        result = self.run_cycle() => {
                            if let Err(err) = result {
                                logger::error(
                                    LogTag::Trader,
                                    &format!("[{}] cycle failed: {}", self.config.name, err),
                                );
                            }
                        }
                        _ = shutdown.changed() => {
                            logger::info(
                                LogTag::Trader,
                                &format!("[{}] shutdown during cycle, leaving trader loop", self.config.name),
                            );
                            return;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    logger::info(
                        LogTag::Trader,
                        &format!("[{}] shutdown signal received, leaving trader loop", self.config.name),
                    );
                    return;
                }
            }
        }
    }

    /// Drive exactly one decision cycle. The loop calls this on every tick;
    /// it is public so operators and tests can trigger a cycle by hand.
    pub async fn run_once(&self) -> anyhow::Result<()> {
        self.run_cycle().await
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        let cycle_index = {
            let mut state = self.state.lock().await;
            state.cycle_count += 1;
            state.cycle_count
        };
        logger::info(
            LogTag::Trader,
            &format!("[{}] decision cycle #{}", self.config.name, cycle_index),
        );

        let mut record = DecisionRecord::new(&self.config.exchange);

        // 1. Risk pause active?
        {
            let state = self.state.lock().await;
            if let Some(stop_until) = state.stop_until {
                if Utc::now() < stop_until {
                    let remaining = (stop_until - Utc::now()).num_minutes();
                    let msg = format!("risk pause active, {} minutes remaining", remaining);
                    logger::warning(LogTag::Trader, &msg);
                    record.success = false;
                    record.error_message = Some(msg);
                    self.append_record(record).await;
                    return Ok(());
                }
            }
        }

        // 2. Daily PnL accumulator reset
        {
            let mut state = self.state.lock().await;
            if Utc::now() - state.last_reset_time > ChronoDuration::hours(24) {
                state.daily_pnl = 0.0;
                state.last_reset_time = Utc::now();
                logger::info(LogTag::Trader, "daily PnL accumulator reset");
            }
        }

        // 3. Build context; the only cycle-wide fatal
        let performance = match self.journal.read_recent(PERFORMANCE_LOOKBACK).await {
            Ok(records) => Some(analyze_performance(&records)),
            Err(err) => {
                logger::warning(
                    LogTag::Journal,
                    &format!("performance analysis unavailable: {}", err),
                );
                None
            }
        };

        let runtime_minutes = {
            let state = self.state.lock().await;
            (Utc::now() - state.start_time).num_minutes()
        };

        let ctx = match self
            .context_builder
            .build(
                &self.config,
                cycle_index,
                runtime_minutes,
                performance,
                HashMap::new(),
            )
            .await
        {
            Ok(ctx) => ctx,
            Err(err) => {
                record.success = false;
                record.error_message = Some(format!("context build failed: {}", err));
                logger::error(LogTag::Trader, record.error_message.as_deref().unwrap());
                self.append_record(record).await;
                return Ok(());
            }
        };

        record.account = AccountSnapshot {
            total_balance: ctx.account.total_equity - ctx.account.unrealized_pnl,
            available_balance: ctx.account.available_balance,
            total_unrealized_profit: ctx.account.unrealized_pnl,
            position_count: ctx.account.position_count,
            margin_used_pct: ctx.account.margin_used_pct,
            initial_balance: self.config.initial_balance,
        };
        for pos in &ctx.positions {
            record.positions.push(PositionSnapshot {
                symbol: pos.symbol.clone(),
                side: pos.side.as_str().to_string(),
                position_amt: pos.quantity,
                entry_price: pos.entry_price,
                mark_price: pos.mark_price,
                unrealized_profit: pos.unrealized_pnl,
                leverage: pos.leverage as f64,
                liquidation_price: pos.liquidation_price,
            });
        }
        record.candidate_symbols = ctx.candidates.iter().map(|c| c.symbol.clone()).collect();

        // 4. Passive-close reconciliation
        let last_keys: HashSet<String> = {
            let state = self.state.lock().await;
            state.last_positions.keys().cloned().collect()
        };
        let closed = {
            let state = self.state.lock().await;
            detect_closed_positions(&state.last_positions, &ctx.positions)
        };
        if !closed.is_empty() {
            logger::info(
                LogTag::Trader,
                &format!("detected {} passive closes", closed.len()),
            );
            for pos in &closed {
                let action = generate_auto_close_action(pos);
                logger::info(
                    LogTag::Trader,
                    &format!(
                        "  {} {} entry {:.4} -> close {:.4} ({})",
                        pos.symbol,
                        pos.side,
                        pos.entry_price,
                        action.price,
                        action.close_reason.as_deref().unwrap_or("unknown")
                    ),
                );
                record.actions.push(action);
            }
        }

        // 5. Model round-trip
        let settings = self.prompt_settings.read().await.clone();
        let llm_client = Arc::clone(&*self.llm.read().await);
        let round = match decision::request_full_decision(
            &ctx,
            llm_client.as_ref(),
            &settings.custom_prompt,
            settings.override_base,
            &settings.template_name,
        )
        .await
        {
            Ok(round) => round,
            Err(err) => {
                record.success = false;
                record.error_message = Some(format!("model request failed: {}", err));
                logger::error(LogTag::Ai, record.error_message.as_deref().unwrap());
                self.append_record(record).await;
                return Ok(());
            }
        };

        record.system_prompt = round.full.system_prompt.clone();
        record.user_prompt = round.full.user_prompt.clone();
        record.cot_trace = round.full.cot_trace.clone();
        record.ai_request_duration_ms = round.full.ai_request_duration_ms;
        record.log_line(format!(
            "model call took {} ms",
            round.full.ai_request_duration_ms
        ));
        if !round.full.decisions.is_empty() {
            record.decisions_json =
                serde_json::to_string_pretty(&round.full.decisions).unwrap_or_default();
        }
        for note in &round.notes {
            record.log_line(note.clone());
        }

        // 6. Parse failure still journals the trace; nothing executes
        if let Some(parse_error) = round.parse_error {
            record.success = false;
            record.error_message = Some(parse_error.to_string());
            logger::error(LogTag::Decision, &parse_error.to_string());
            self.append_record(record).await;
            return Ok(());
        }

        // 7. Ordered execution with per-action guards
        self.executor
            .execute_cycle(&ctx, round.full.decisions, &last_keys, &mut record)
            .await;

        // 8. Snapshot for the next cycle's passive-close diff
        {
            let mut state = self.state.lock().await;
            state.last_positions = ctx
                .positions
                .iter()
                .map(|p| (p.key(), p.clone()))
                .collect();
        }

        // 9. Journal the cycle
        self.append_record(record).await;
        Ok(())
    }

    async fn append_record(&self, record: DecisionRecord) {
        if let Err(err) = self.journal.append(&record).await {
            logger::error(
                LogTag::Journal,
                &format!("failed to append decision record: {}", err),
            );
        }
    }

    // ------------------------------------------------------------------
    // DRAWDOWN MONITOR
    // ------------------------------------------------------------------

    /// Minute-interval profit protection running beside the main loop
    pub async fn run_drawdown_monitor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        logger::info(
            LogTag::Trader,
            &format!(
                "[{}] drawdown monitor started (profit > {:.0}%, retrace >= {:.0}%)",
                self.config.name, DRAWDOWN_MIN_PROFIT_PCT, self.config.drawdown_retrace_pct
            ),
        );

        let mut ticker = tokio::time::interval(DRAWDOWN_CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_position_drawdown().await,
                _ = shutdown.changed() => {
                    logger::info(
                        LogTag::Trader,
                        &format!("[{}] drawdown monitor stopped", self.config.name),
                    );
                    return;
                }
            }
        }
    }

    async fn check_position_drawdown(&self) {
        let positions = match self.exchange.get_positions().await {
            Ok(positions) => positions,
            Err(err) => {
                logger::warning(
                    LogTag::Trader,
                    &format!("drawdown check skipped, positions unavailable: {}", err),
                );
                return;
            }
        };
        if positions.is_empty() {
            return;
        }

        for pos in &positions {
            let current_pnl_pct =
                leveraged_pnl_pct(pos.side, pos.entry_price, pos.mark_price, pos.leverage);
            let key = position_key(&pos.symbol, pos.side);

            let peak_pnl_pct = {
                let mut book = self.book.write().await;
                book.update_peak(&key, current_pnl_pct)
            };

            let drawdown = retrace_pct(peak_pnl_pct, current_pnl_pct);
            if current_pnl_pct > DRAWDOWN_MIN_PROFIT_PCT
                && drawdown >= self.config.drawdown_retrace_pct
            {
                logger::warning(
                    LogTag::Risk,
                    &format!(
                        "{} {} retraced {:.1}% from peak {:.2}% (now {:.2}%), emergency close",
                        pos.symbol, pos.side, drawdown, peak_pnl_pct, current_pnl_pct
                    ),
                );
                if let Err(err) = self.emergency_close(&pos.symbol, pos.side).await {
                    logger::error(
                        LogTag::Trader,
                        &format!("emergency close {} {} failed: {}", pos.symbol, pos.side, err),
                    );
                } else {
                    logger::info(
                        LogTag::Trader,
                        &format!(
                            "{} {} closed, locked in {:.2}%",
                            pos.symbol, pos.side, current_pnl_pct
                        ),
                    );
                    self.book.write().await.clear_key(&key);
                }
            }
        }
    }

    async fn emergency_close(&self, symbol: &str, side: Side) -> anyhow::Result<()> {
        if let Err(err) = self.exchange.cancel_all_orders(symbol).await {
            logger::warning(
                LogTag::Exchange,
                &format!("{} cancel before emergency close failed: {}", symbol, err),
            );
        }
        match side {
            Side::Long => self.exchange.close_long(symbol, 0.0).await?,
            Side::Short => self.exchange.close_short(symbol, 0.0).await?,
        };
        Ok(())
    }

    // ------------------------------------------------------------------
    // RUNTIME CONTROL
    // ------------------------------------------------------------------

    /// Swap model credentials and client in place; the loop picks the new
    /// handle up on its next cycle
    pub async fn reload_ai_config(&self, model_config: &AiModelConfig) -> Result<(), String> {
        let client = llm::build_client(model_config)?;
        *self.llm.write().await = client;
        logger::info(
            LogTag::Ai,
            &format!(
                "[{}] AI config reloaded: provider={} model={}",
                self.config.name,
                model_config.provider,
                if model_config.model_name.is_empty() {
                    "(default)"
                } else {
                    &model_config.model_name
                }
            ),
        );
        Ok(())
    }

    /// Pause decision cycles until the given number of minutes has passed.
    /// Used by risk tripwires and operators; the loop logs and skips cycles
    /// while the pause is active.
    pub async fn pause_for_minutes(&self, minutes: i64) {
        let mut state = self.state.lock().await;
        state.stop_until = Some(Utc::now() + ChronoDuration::minutes(minutes));
        logger::warning(
            LogTag::Risk,
            &format!("[{}] trading paused for {} minutes", self.config.name, minutes),
        );
    }

    pub async fn set_custom_prompt(&self, prompt: String, override_base: bool) {
        let mut settings = self.prompt_settings.write().await;
        settings.custom_prompt = prompt;
        settings.override_base = override_base;
    }

    pub async fn set_prompt_template(&self, template_name: String) {
        self.prompt_settings.write().await.template_name = template_name;
    }

    /// Snapshot of runtime status for operators
    pub async fn status(&self) -> serde_json::Value {
        let state = self.state.lock().await;
        let settings = self.prompt_settings.read().await;
        serde_json::json!({
            "trader_id": self.config.id,
            "trader_name": self.config.name,
            "exchange": self.config.exchange,
            "ai_provider": self.config.ai.provider.as_str(),
            "prompt_template": settings.template_name,
            "cycle_count": state.cycle_count,
            "start_time": state.start_time.to_rfc3339(),
            "runtime_minutes": (Utc::now() - state.start_time).num_minutes(),
            "scan_interval_secs": self.config.scan_interval_secs,
            "initial_balance": self.config.initial_balance,
            "daily_pnl": state.daily_pnl,
            "stop_until": state.stop_until.map(|t| t.to_rfc3339()),
        })
    }
}

// =============================================================================
// PASSIVE-CLOSE DETECTION
// =============================================================================

/// Positions present last cycle and absent now were closed by the venue
pub fn detect_closed_positions(
    last_positions: &HashMap<String, PositionInfo>,
    current_positions: &[PositionInfo],
) -> Vec<PositionInfo> {
    if last_positions.is_empty() {
        return vec![];
    }
    let current_keys: HashSet<String> = current_positions.iter().map(|p| p.key()).collect();
    let mut closed: Vec<PositionInfo> = last_positions
        .iter()
        .filter(|(key, _)| !current_keys.contains(*key))
        .map(|(_, pos)| pos.clone())
        .collect();
    closed.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    closed
}

/// Synthesize the journal action for one passive close
pub fn generate_auto_close_action(pos: &PositionInfo) -> DecisionAction {
    let action_tag = match pos.side {
        Side::Long => "auto_close_long",
        Side::Short => "auto_close_short",
    };
    let (price, reason) = infer_close_details(pos);

    let mut action = DecisionAction::new(action_tag, &pos.symbol);
    action.quantity = pos.quantity;
    action.leverage = pos.leverage;
    action.price = price;
    action.success = true;
    action.close_reason = Some(reason.to_string());
    action
}

/// Infer why the venue closed a position from its last known mark against
/// the recorded liquidation/stop/take bands. Liquidation is checked first
/// since it is the most severe explanation.
pub fn infer_close_details(pos: &PositionInfo) -> (f64, &'static str) {
    let mark = pos.mark_price;

    if pos.liquidation_price > 0.0 {
        let hit = match pos.side {
            Side::Long => mark <= pos.liquidation_price * (1.0 + LIQUIDATION_PRICE_TOLERANCE),
            Side::Short => mark >= pos.liquidation_price * (1.0 - LIQUIDATION_PRICE_TOLERANCE),
        };
        if hit {
            return (pos.liquidation_price, "liquidation");
        }
    }

    if let Some(stop) = pos.stop_loss {
        if stop > 0.0 {
            let hit = match pos.side {
                Side::Long => mark <= stop * (1.0 + CLOSE_REASON_PRICE_TOLERANCE),
                Side::Short => mark >= stop * (1.0 - CLOSE_REASON_PRICE_TOLERANCE),
            };
            if hit {
                return (stop, "stop_loss");
            }
        }
    }

    if let Some(take) = pos.take_profit {
        if take > 0.0 {
            let hit = match pos.side {
                Side::Long => mark >= take * (1.0 - CLOSE_REASON_PRICE_TOLERANCE),
                Side::Short => mark <= take * (1.0 + CLOSE_REASON_PRICE_TOLERANCE),
            };
            if hit {
                return (take, "take_profit");
            }
        }
    }

    (mark, "unknown")
}

// =============================================================================
// DRAWDOWN MATH
// =============================================================================

/// Leveraged PnL percent from entry and mark
pub fn leveraged_pnl_pct(side: Side, entry_price: f64, mark_price: f64, leverage: u32) -> f64 {
    if entry_price <= 0.0 {
        return 0.0;
    }
    let raw = match side {
        Side::Long => (mark_price - entry_price) / entry_price,
        Side::Short => (entry_price - mark_price) / entry_price,
    };
    raw * leverage as f64 * 100.0
}

/// Percent given back from the peak; zero when not in profit or not below
/// the peak
pub fn retrace_pct(peak_pnl_pct: f64, current_pnl_pct: f64) -> f64 {
    if peak_pnl_pct > 0.0 && current_pnl_pct < peak_pnl_pct {
        (peak_pnl_pct - current_pnl_pct) / peak_pnl_pct * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(symbol: &str, side: Side) -> PositionInfo {
        PositionInfo {
            symbol: symbol.to_string(),
            side,
            entry_price: 40_000.0,
            mark_price: 39_000.0,
            quantity: 0.5,
            leverage: 5,
            unrealized_pnl: -500.0,
            unrealized_pnl_pct: -12.5,
            peak_pnl_pct: 3.0,
            liquidation_price: 0.0,
            margin_used: 4_000.0,
            update_time: 0,
            stop_loss: None,
            take_profit: None,
        }
    }

    #[test]
    fn test_detect_closed_positions_exact_diff() {
        let mut last = HashMap::new();
        last.insert("BTCUSDT_long".to_string(), position("BTCUSDT", Side::Long));
        last.insert("ETHUSDT_short".to_string(), position("ETHUSDT", Side::Short));

        let current = vec![position("ETHUSDT", Side::Short)];
        let closed = detect_closed_positions(&last, &current);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].symbol, "BTCUSDT");

        // First cycle (no snapshot) never reports closes
        assert!(detect_closed_positions(&HashMap::new(), &[]).is_empty());
    }

    #[test]
    fn test_same_symbol_opposite_side_not_confused() {
        let mut last = HashMap::new();
        last.insert("BTCUSDT_long".to_string(), position("BTCUSDT", Side::Long));
        // Long flipped to short between cycles: the long is gone
        let current = vec![position("BTCUSDT", Side::Short)];
        let closed = detect_closed_positions(&last, &current);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].side, Side::Long);
    }

    #[test]
    fn test_infer_stop_loss_close() {
        // Long at 40000, mark fell to 38750 with a stop recorded at 38800
        let mut pos = position("BTCUSDT", Side::Long);
        pos.mark_price = 38_750.0;
        pos.stop_loss = Some(38_800.0);
        let (price, reason) = infer_close_details(&pos);
        assert_eq!(reason, "stop_loss");
        assert_eq!(price, 38_800.0);
    }

    #[test]
    fn test_infer_take_profit_close() {
        let mut pos = position("ETHUSDT", Side::Short);
        pos.entry_price = 3_200.0;
        pos.mark_price = 3_010.0;
        pos.take_profit = Some(3_000.0);
        let (price, reason) = infer_close_details(&pos);
        assert_eq!(reason, "take_profit");
        assert_eq!(price, 3_000.0);
    }

    #[test]
    fn test_infer_liquidation_takes_precedence() {
        let mut pos = position("BTCUSDT", Side::Long);
        pos.mark_price = 36_500.0;
        pos.liquidation_price = 36_000.0;
        pos.stop_loss = Some(36_600.0);
        let (price, reason) = infer_close_details(&pos);
        assert_eq!(reason, "liquidation");
        assert_eq!(price, 36_000.0);
    }

    #[test]
    fn test_infer_unknown_close() {
        let mut pos = position("BTCUSDT", Side::Long);
        pos.mark_price = 41_000.0;
        pos.stop_loss = Some(38_000.0);
        pos.take_profit = Some(45_000.0);
        let (price, reason) = infer_close_details(&pos);
        assert_eq!(reason, "unknown");
        assert_eq!(price, 41_000.0);
    }

    #[test]
    fn test_auto_close_action_shape() {
        let mut pos = position("BTCUSDT", Side::Short);
        pos.mark_price = 41_000.0;
        let action = generate_auto_close_action(&pos);
        assert_eq!(action.action, "auto_close_short");
        assert!(action.success);
        assert_eq!(action.close_reason.as_deref(), Some("unknown"));
        assert_eq!(action.quantity, 0.5);
    }

    #[test]
    fn test_leveraged_pnl_pct() {
        // XRP long entry 0.50, mark 0.60, 5x -> +100%
        assert!((leveraged_pnl_pct(Side::Long, 0.50, 0.60, 5) - 100.0).abs() < 1e-9);
        assert!((leveraged_pnl_pct(Side::Short, 0.50, 0.60, 5) + 100.0).abs() < 1e-9);
        assert_eq!(leveraged_pnl_pct(Side::Long, 0.0, 1.0, 5), 0.0);
    }

    #[test]
    fn test_retrace_triggers_at_forty_percent() {
        // Peak 100%, now 55% -> 45% retrace, above the 40% default
        let drawdown = retrace_pct(100.0, 55.0);
        assert!((drawdown - 45.0).abs() < 1e-9);
        assert!(drawdown >= 40.0);

        // Not in profit: no retrace accounting
        assert_eq!(retrace_pct(-5.0, -10.0), 0.0);
        assert_eq!(retrace_pct(50.0, 60.0), 0.0);
    }
}
