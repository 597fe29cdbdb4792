/// Decision execution orchestrator
///
/// Executes one cycle's validated decisions in priority order: closes first
/// so capital frees up before new opens, protective updates in between,
/// opens next, hold/wait last. Handlers share one position snapshot per
/// cycle instead of hammering the venue, and venue-side "position already
/// gone" rejections on updates degrade to no-op successes because the
/// exchange simply got there first.
use super::risk;
use crate::decision::types::{position_key, Action, Context, Decision, OpenParams};
use crate::decision::PositionBook;
use crate::errors::ExchangeError;
use crate::exchange::{Exchange, ExchangePosition, Side};
use crate::journal::{DecisionAction, DecisionRecord};
use crate::logger::{self, LogTag};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Remaining notional at or below this is rewritten into a full close
const MIN_REMAINING_NOTIONAL_USD: f64 = 10.0;
/// Cycle position cache validity
const CYCLE_CACHE_TTL: Duration = Duration::from_secs(30);
/// Pause between successful executions to stay under venue rate limits
const POST_EXECUTION_PAUSE: Duration = Duration::from_secs(1);

/// Stable priority reorder; equal priorities keep their model-given order
pub fn sort_decisions_by_priority(mut decisions: Vec<Decision>) -> Vec<Decision> {
    decisions.sort_by_key(|d| d.action.priority());
    decisions
}

/// Close-reason inference from the model's own words, falling back to the
/// PnL sign
pub fn infer_close_reason(reasoning: &str, pnl: f64, fallback: &str) -> String {
    let text = reasoning.to_lowercase();
    if text.contains("take profit") || text.contains("take-profit") || text.contains(" tp") {
        return "take_profit".to_string();
    }
    if text.contains("stop loss") || text.contains("stop-loss") || text.contains(" sl") {
        return "stop_loss".to_string();
    }
    if !fallback.is_empty() {
        return fallback.to_string();
    }
    if pnl > 0.0 {
        "take_profit".to_string()
    } else if pnl < 0.0 {
        "stop_loss".to_string()
    } else {
        "manual_close".to_string()
    }
}

// =============================================================================
// CYCLE POSITION CACHE
// =============================================================================

/// One position snapshot shared by every handler in a cycle
struct CyclePositions {
    inner: Mutex<Option<(Vec<ExchangePosition>, Instant)>>,
}

impl CyclePositions {
    fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    async fn get_or_fetch(
        &self,
        exchange: &dyn Exchange,
    ) -> Result<Vec<ExchangePosition>, ExchangeError> {
        let mut guard = self.inner.lock().await;
        if let Some((positions, fetched_at)) = guard.as_ref() {
            if fetched_at.elapsed() < CYCLE_CACHE_TTL {
                return Ok(positions.clone());
            }
        }
        let positions = exchange.get_positions().await?;
        *guard = Some((positions.clone(), Instant::now()));
        Ok(positions)
    }

    async fn prefetch(&self, exchange: &dyn Exchange) {
        if let Err(err) = self.get_or_fetch(exchange).await {
            logger::warning(
                LogTag::Trader,
                &format!("position prefetch failed, handlers will refetch: {}", err),
            );
        }
    }
}

// =============================================================================
// EXECUTOR
// =============================================================================

pub struct Executor {
    exchange: Arc<dyn Exchange>,
    book: Arc<RwLock<PositionBook>>,
    is_cross_margin: bool,
    stop_gap_tolerance_pct: f64,
    stop_safety_buffer_pct: f64,
}

impl Executor {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        book: Arc<RwLock<PositionBook>>,
        is_cross_margin: bool,
        stop_gap_tolerance_pct: f64,
    ) -> Self {
        Self {
            exchange,
            book,
            is_cross_margin,
            stop_gap_tolerance_pct,
            stop_safety_buffer_pct: 0.2,
        }
    }

    /// Execute one cycle's decisions, appending a DecisionAction per
    /// executed action. `last_keys` are the previous cycle's (symbol, side)
    /// keys, used to tell "already auto-closed" apart from "never existed".
    pub async fn execute_cycle(
        &self,
        ctx: &Context,
        decisions: Vec<Decision>,
        last_keys: &HashSet<String>,
        record: &mut DecisionRecord,
    ) {
        let sorted = sort_decisions_by_priority(decisions);

        logger::info(LogTag::Trader, "execution order (closes before opens):");
        for (i, d) in sorted.iter().enumerate() {
            logger::info(
                LogTag::Trader,
                &format!("  [{}] {} {}", i + 1, d.symbol, d.action.tag()),
            );
        }

        // One snapshot serves every handler that needs positions
        let cycle_positions = CyclePositions::new();
        if sorted.iter().any(|d| d.action.needs_positions()) {
            cycle_positions.prefetch(self.exchange.as_ref()).await;
        }

        for decision in sorted {
            // hold/wait may smuggle protective updates; route them through
            // the regular handlers as synthetic actions, then record the
            // hold/wait itself as a no-op
            if let Action::Hold {
                new_stop_loss,
                new_take_profit,
            } = &decision.action
            {
                if let Some(stop) = new_stop_loss {
                    let synthetic = Decision {
                        symbol: decision.symbol.clone(),
                        action: Action::UpdateStopLoss {
                            new_stop_loss: *stop,
                        },
                        reasoning: format!("AUTO: {}", decision.reasoning),
                        adjustment_notes: vec![],
                    };
                    self.execute_one(ctx, &synthetic, &cycle_positions, last_keys, record)
                        .await;
                }
                if let Some(take) = new_take_profit {
                    let synthetic = Decision {
                        symbol: decision.symbol.clone(),
                        action: Action::UpdateTakeProfit {
                            new_take_profit: *take,
                        },
                        reasoning: format!("AUTO: {}", decision.reasoning),
                        adjustment_notes: vec![],
                    };
                    self.execute_one(ctx, &synthetic, &cycle_positions, last_keys, record)
                        .await;
                }
            }

            // Hard risk guards gate opens before any venue call
            if let Action::OpenLong { params } | Action::OpenShort { params } = &decision.action {
                if let Err(note) = risk::check_open_guards(ctx, params.confidence) {
                    let line = format!(
                        "risk guard blocked {} {}: {}",
                        decision.symbol,
                        decision.action.tag(),
                        note
                    );
                    logger::warning(LogTag::Risk, &line);
                    record.log_line(line);
                    continue;
                }
            }

            self.execute_one(ctx, &decision, &cycle_positions, last_keys, record)
                .await;
        }
    }

    async fn execute_one(
        &self,
        ctx: &Context,
        decision: &Decision,
        cycle_positions: &CyclePositions,
        last_keys: &HashSet<String>,
        record: &mut DecisionRecord,
    ) {
        let mut action_record = DecisionAction::new(decision.action.tag(), &decision.symbol);
        action_record.reason = decision.reasoning.clone();
        for note in &decision.adjustment_notes {
            action_record.reason = format!("{} | AUTO: {}", action_record.reason, note);
        }

        let result = match &decision.action {
            Action::OpenLong { params } => {
                self.execute_open(ctx, decision, params.clone(), Side::Long, &mut action_record)
                    .await
            }
            Action::OpenShort { params } => {
                self.execute_open(ctx, decision, params.clone(), Side::Short, &mut action_record)
                    .await
            }
            Action::CloseLong => {
                self.execute_close(decision, Side::Long, cycle_positions, &mut action_record)
                    .await
            }
            Action::CloseShort => {
                self.execute_close(decision, Side::Short, cycle_positions, &mut action_record)
                    .await
            }
            Action::UpdateStopLoss { new_stop_loss } => {
                self.execute_update_stop(
                    decision,
                    *new_stop_loss,
                    cycle_positions,
                    last_keys,
                    &mut action_record,
                )
                .await
            }
            Action::UpdateTakeProfit { new_take_profit } => {
                self.execute_update_take(
                    decision,
                    *new_take_profit,
                    cycle_positions,
                    last_keys,
                    &mut action_record,
                )
                .await
            }
            Action::PartialClose {
                close_percentage,
                new_stop_loss,
                new_take_profit,
            } => {
                self.execute_partial_close(
                    decision,
                    *close_percentage,
                    *new_stop_loss,
                    *new_take_profit,
                    cycle_positions,
                    last_keys,
                    &mut action_record,
                )
                .await
            }
            Action::Hold { .. } | Action::Wait => Ok(()),
        };

        match result {
            Ok(()) => {
                action_record.success = true;
                record.log_line(format!(
                    "ok {} {}",
                    decision.symbol,
                    action_record.action
                ));
                tokio::time::sleep(POST_EXECUTION_PAUSE).await;
            }
            Err(message) => {
                logger::error(
                    LogTag::Trader,
                    &format!(
                        "execution failed {} {}: {}",
                        decision.symbol,
                        action_record.action,
                        message
                    ),
                );
                action_record.error = Some(message.clone());
                record.log_line(format!(
                    "failed {} {}: {}",
                    decision.symbol, action_record.action, message
                ));
            }
        }

        record.actions.push(action_record);
    }

    // ------------------------------------------------------------------
    // OPEN
    // ------------------------------------------------------------------

    async fn execute_open(
        &self,
        ctx: &Context,
        decision: &Decision,
        mut params: OpenParams,
        side: Side,
        action_record: &mut DecisionAction,
    ) -> Result<(), String> {
        let symbol = &decision.symbol;
        logger::info(
            LogTag::Trader,
            &format!("opening {} {}", symbol, side.as_str()),
        );

        // Same-side duplicate check: swapping positions requires an explicit
        // close first
        let positions = self
            .exchange
            .get_positions()
            .await
            .map_err(|e| e.to_string())?;
        if positions
            .iter()
            .any(|p| &p.symbol == symbol && p.side == side && p.quantity() > 0.0)
        {
            return Err(format!(
                "{} already holds a {} position; close it explicitly before re-opening",
                symbol, side
            ));
        }

        let price = self
            .exchange
            .get_market_price(symbol)
            .await
            .map_err(|e| e.to_string())?;
        let balance = self
            .exchange
            .get_balance()
            .await
            .map_err(|e| e.to_string())?;

        let notes = risk::normalize_position_size(
            &mut params,
            symbol,
            ctx.account.total_equity,
            balance.available_balance,
            ctx.taker_fee_rate,
            ctx.btc_eth_leverage,
            ctx.altcoin_leverage,
        )?;
        for note in notes {
            logger::info(LogTag::Risk, &note);
            action_record.reason = format!("{} | AUTO: {}", action_record.reason, note);
        }

        risk::check_open_margin(&params, ctx.taker_fee_rate, balance.available_balance)?;

        let quantity = params.position_size_usd / price;
        action_record.quantity = quantity;
        action_record.price = price;
        action_record.leverage = params.leverage;

        // Margin mode failure is survivable; the venue keeps its last mode
        if let Err(err) = self
            .exchange
            .set_margin_mode(symbol, self.is_cross_margin)
            .await
        {
            logger::warning(
                LogTag::Exchange,
                &format!("{} set_margin_mode failed: {}", symbol, err),
            );
        }

        let ack = match side {
            Side::Long => self.exchange.open_long(symbol, quantity, params.leverage),
            Side::Short => self.exchange.open_short(symbol, quantity, params.leverage),
        }
        .await
        .map_err(|e| e.to_string())?;
        action_record.order_id = ack.order_id;
        logger::info(
            LogTag::Trader,
            &format!(
                "opened {} {} qty {:.6} (order {})",
                symbol, side, quantity, ack.order_id
            ),
        );

        let key = position_key(symbol, side);
        {
            let mut book = self.book.write().await;
            book.first_seen_ms
                .insert(key.clone(), chrono::Utc::now().timestamp_millis());
        }

        // Protective orders are best-effort: the position stands even if
        // they fail, and the failure is visible in the log
        match self
            .exchange
            .set_stop_loss(symbol, side, quantity, params.stop_loss)
            .await
        {
            Ok(()) => {
                self.book
                    .write()
                    .await
                    .stop_prices
                    .insert(key.clone(), params.stop_loss);
            }
            Err(err) => logger::warning(
                LogTag::Exchange,
                &format!("{} set_stop_loss failed: {}", symbol, err),
            ),
        }
        match self
            .exchange
            .set_take_profit(symbol, side, quantity, params.take_profit)
            .await
        {
            Ok(()) => {
                self.book
                    .write()
                    .await
                    .take_prices
                    .insert(key, params.take_profit);
            }
            Err(err) => logger::warning(
                LogTag::Exchange,
                &format!("{} set_take_profit failed: {}", symbol, err),
            ),
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // CLOSE
    // ------------------------------------------------------------------

    async fn execute_close(
        &self,
        decision: &Decision,
        side: Side,
        cycle_positions: &CyclePositions,
        action_record: &mut DecisionAction,
    ) -> Result<(), String> {
        let symbol = &decision.symbol;
        logger::info(
            LogTag::Trader,
            &format!("closing {} {}", symbol, side.as_str()),
        );

        // PnL snapshot before flattening; purely informational
        if let Ok(positions) = cycle_positions.get_or_fetch(self.exchange.as_ref()).await {
            if let Some(pos) = positions
                .iter()
                .find(|p| &p.symbol == symbol && p.side == side)
            {
                action_record.pnl = pos.unrealized_profit;
            }
        }

        if let Ok(price) = self.exchange.get_market_price(symbol).await {
            action_record.price = price;
        }

        let ack = match side {
            Side::Long => self.exchange.close_long(symbol, 0.0),
            Side::Short => self.exchange.close_short(symbol, 0.0),
        }
        .await
        .map_err(|e| e.to_string())?;
        action_record.order_id = ack.order_id;
        action_record.close_reason =
            Some(infer_close_reason(&decision.reasoning, action_record.pnl, ""));

        self.book.write().await.clear_key(&position_key(symbol, side));
        Ok(())
    }

    // ------------------------------------------------------------------
    // PROTECTIVE UPDATES
    // ------------------------------------------------------------------

    /// Locate the symbol's live position in the cycle cache. Ok(None) means
    /// "recently disappeared": it existed last cycle, so the venue closed it
    /// between decisions and the update becomes a no-op success.
    async fn locate_position(
        &self,
        symbol: &str,
        cycle_positions: &CyclePositions,
        last_keys: &HashSet<String>,
    ) -> Result<Option<ExchangePosition>, String> {
        let positions = cycle_positions
            .get_or_fetch(self.exchange.as_ref())
            .await
            .map_err(|e| e.to_string())?;

        let target = positions
            .iter()
            .find(|p| p.symbol == symbol && p.position_amt != 0.0)
            .cloned();

        if let Some(pos) = target {
            // Both sides open on one symbol breaks the strategy invariant;
            // flag it loudly but leave resolution to the operator
            let opposite = positions
                .iter()
                .any(|p| p.symbol == symbol && p.position_amt != 0.0 && p.side != pos.side);
            if opposite {
                logger::warning(
                    LogTag::Trader,
                    &format!(
                        "{} holds both long and short positions; protective order changes will affect both sides",
                        symbol
                    ),
                );
            }
            return Ok(Some(pos));
        }

        let was_recently_open = last_keys.iter().any(|k| k.starts_with(&format!("{}_", symbol)));
        if was_recently_open {
            logger::info(
                LogTag::Trader,
                &format!(
                    "{} position already closed by the venue between cycles, skipping update",
                    symbol
                ),
            );
            return Ok(None);
        }

        Err(format!(
            "no position for {}: never opened or closed in an earlier cycle",
            symbol
        ))
    }

    async fn execute_update_stop(
        &self,
        decision: &Decision,
        new_stop_loss: f64,
        cycle_positions: &CyclePositions,
        last_keys: &HashSet<String>,
        action_record: &mut DecisionAction,
    ) -> Result<(), String> {
        let symbol = &decision.symbol;
        let price = self
            .exchange
            .get_market_price(symbol)
            .await
            .map_err(|e| e.to_string())?;
        action_record.price = price;

        let position = match self
            .locate_position(symbol, cycle_positions, last_keys)
            .await?
        {
            Some(position) => position,
            None => return Ok(()), // already auto-closed
        };
        action_record.pnl = position.unrealized_profit;

        let (stop_price, note) = risk::normalize_stop_loss(
            position.side,
            new_stop_loss,
            price,
            self.stop_gap_tolerance_pct,
            self.stop_safety_buffer_pct,
        );
        if let Some(note) = note {
            logger::warning(LogTag::Risk, &note);
            action_record.reason = format!("{} | AUTO: {}", action_record.reason, note);
        }

        // The old stop must be gone before the new one goes in, or the
        // position ends up double-covered
        self.exchange
            .cancel_stop_loss_orders(symbol)
            .await
            .map_err(|e| format!("cancel of existing stop orders failed, aborting update: {}", e))?;

        let quantity = position.quantity();
        self.exchange
            .set_stop_loss(symbol, position.side, quantity, stop_price)
            .await
            .map_err(|e| e.to_string())?;

        self.book
            .write()
            .await
            .stop_prices
            .insert(position_key(symbol, position.side), stop_price);
        logger::info(
            LogTag::Trader,
            &format!("{} stop moved to {:.4} (mark {:.4})", symbol, stop_price, price),
        );
        Ok(())
    }

    async fn execute_update_take(
        &self,
        decision: &Decision,
        new_take_profit: f64,
        cycle_positions: &CyclePositions,
        last_keys: &HashSet<String>,
        action_record: &mut DecisionAction,
    ) -> Result<(), String> {
        let symbol = &decision.symbol;
        let price = self
            .exchange
            .get_market_price(symbol)
            .await
            .map_err(|e| e.to_string())?;
        action_record.price = price;

        let position = match self
            .locate_position(symbol, cycle_positions, last_keys)
            .await?
        {
            Some(position) => position,
            None => return Ok(()),
        };
        action_record.pnl = position.unrealized_profit;

        // A take on the wrong side of the market would fill immediately;
        // small overshoots are price drift, large ones are rejected
        let gap_pct = match position.side {
            Side::Long => (price - new_take_profit) / price * 100.0,
            Side::Short => (new_take_profit - price) / price * 100.0,
        };
        if gap_pct > self.stop_gap_tolerance_pct {
            return Err(format!(
                "{} take price {:.4} is {:.2}% through mark {:.4}, would trigger immediately",
                position.side, new_take_profit, gap_pct, price
            ));
        }
        if gap_pct > 0.0 {
            logger::warning(
                LogTag::Risk,
                &format!(
                    "{} take {:.4} within {:.2}% of mark {:.4}, keeping; likely price drift",
                    symbol, new_take_profit, gap_pct, price
                ),
            );
        }

        self.exchange
            .cancel_take_profit_orders(symbol)
            .await
            .map_err(|e| format!("cancel of existing take orders failed, aborting update: {}", e))?;

        let quantity = position.quantity();
        self.exchange
            .set_take_profit(symbol, position.side, quantity, new_take_profit)
            .await
            .map_err(|e| e.to_string())?;

        self.book
            .write()
            .await
            .take_prices
            .insert(position_key(symbol, position.side), new_take_profit);
        logger::info(
            LogTag::Trader,
            &format!(
                "{} take moved to {:.4} (mark {:.4})",
                symbol, new_take_profit, price
            ),
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // PARTIAL CLOSE
    // ------------------------------------------------------------------

    async fn execute_partial_close(
        &self,
        decision: &Decision,
        close_percentage: f64,
        new_stop_loss: Option<f64>,
        new_take_profit: Option<f64>,
        cycle_positions: &CyclePositions,
        last_keys: &HashSet<String>,
        action_record: &mut DecisionAction,
    ) -> Result<(), String> {
        let symbol = &decision.symbol;
        logger::info(
            LogTag::Trader,
            &format!("partial close {} {:.1}%", symbol, close_percentage),
        );

        if let Ok(price) = self.exchange.get_market_price(symbol).await {
            action_record.price = price;
        }

        let position = match self
            .locate_position(symbol, cycle_positions, last_keys)
            .await?
        {
            Some(position) => position,
            None => return Ok(()),
        };
        action_record.pnl = position.unrealized_profit;

        let total_quantity = position.quantity();
        let close_quantity = total_quantity * close_percentage / 100.0;
        let remaining_quantity = total_quantity - close_quantity;
        let mark_price = if position.mark_price > 0.0 {
            position.mark_price
        } else {
            action_record.price
        };
        let remaining_value = remaining_quantity * mark_price;
        action_record.quantity = close_quantity;

        // A dust remainder cannot be closed later; flatten everything now
        if remaining_value > 0.0 && remaining_value <= MIN_REMAINING_NOTIONAL_USD {
            logger::info(
                LogTag::Trader,
                &format!(
                    "{} remainder {:.2} USDT at or below {:.0} USDT, converting to full close",
                    symbol, remaining_value, MIN_REMAINING_NOTIONAL_USD
                ),
            );
            action_record.action = match position.side {
                Side::Long => "close_long".to_string(),
                Side::Short => "close_short".to_string(),
            };
            return self
                .execute_close(decision, position.side, cycle_positions, action_record)
                .await;
        }

        let ack = match position.side {
            Side::Long => self.exchange.close_long(symbol, close_quantity),
            Side::Short => self.exchange.close_short(symbol, close_quantity),
        }
        .await
        .map_err(|e| format!("partial close failed: {}", e))?;
        action_record.order_id = ack.order_id;
        action_record.close_reason = Some(infer_close_reason(
            &decision.reasoning,
            action_record.pnl,
            "partial_close",
        ));

        // Venues drop the old TP/SL when the quantity changes; re-arming the
        // remainder is mandatory whenever the model supplied new prices
        let key = position_key(symbol, position.side);
        if let Some(stop) = new_stop_loss {
            match self
                .exchange
                .set_stop_loss(symbol, position.side, remaining_quantity, stop)
                .await
            {
                Ok(()) => {
                    self.book.write().await.stop_prices.insert(key.clone(), stop);
                }
                Err(err) => logger::warning(
                    LogTag::Exchange,
                    &format!("{} stop re-arm after partial close failed: {}", symbol, err),
                ),
            }
        }
        if let Some(take) = new_take_profit {
            match self
                .exchange
                .set_take_profit(symbol, position.side, remaining_quantity, take)
                .await
            {
                Ok(()) => {
                    self.book.write().await.take_prices.insert(key, take);
                }
                Err(err) => logger::warning(
                    LogTag::Exchange,
                    &format!("{} take re-arm after partial close failed: {}", symbol, err),
                ),
            }
        }
        if new_stop_loss.is_none() && new_take_profit.is_none() {
            logger::warning(
                LogTag::Risk,
                &format!(
                    "{} remainder {:.4} has no protective orders; include new_stop_loss/new_take_profit with partial_close",
                    symbol, remaining_quantity
                ),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::summary::MarketSummary;
    use crate::decision::types::AccountInfo;
    use crate::errors::ExchangeError;
    use crate::exchange::{AccountBalance, OpenOrder, OrderAck};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Scriptable venue double that records every call in order
    struct RecordingExchange {
        positions: Mutex<Vec<ExchangePosition>>,
        calls: Mutex<Vec<String>>,
        balance: AccountBalance,
    }

    impl RecordingExchange {
        fn new(positions: Vec<ExchangePosition>) -> Self {
            Self {
                positions: Mutex::new(positions),
                calls: Mutex::new(vec![]),
                balance: AccountBalance {
                    wallet_balance: 1000.0,
                    unrealized_profit: 0.0,
                    available_balance: 800.0,
                },
            }
        }

        async fn log(&self, call: String) {
            self.calls.lock().await.push(call);
        }

        async fn calls(&self) -> Vec<String> {
            self.calls.lock().await.clone()
        }
    }

    fn pos(symbol: &str, side: Side, qty: f64, mark: f64) -> ExchangePosition {
        ExchangePosition {
            symbol: symbol.to_string(),
            side,
            entry_price: mark,
            mark_price: mark,
            position_amt: if side == Side::Long { qty } else { -qty },
            unrealized_profit: 5.0,
            liquidation_price: mark * 0.5,
            leverage: 5,
        }
    }

    #[async_trait]
    impl Exchange for RecordingExchange {
        fn venue(&self) -> &'static str {
            "recording"
        }
        async fn get_balance(&self) -> Result<AccountBalance, ExchangeError> {
            Ok(self.balance)
        }
        async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
            Ok(self.positions.lock().await.clone())
        }
        async fn get_open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
            Ok(vec![])
        }
        async fn get_market_price(&self, _symbol: &str) -> Result<f64, ExchangeError> {
            Ok(100.0)
        }
        async fn open_long(
            &self,
            symbol: &str,
            quantity: f64,
            _leverage: u32,
        ) -> Result<OrderAck, ExchangeError> {
            self.log(format!("open_long {}", symbol)).await;
            self.positions
                .lock()
                .await
                .push(pos(symbol, Side::Long, quantity, 100.0));
            Ok(OrderAck {
                order_id: 11,
                symbol: symbol.to_string(),
                status: "FILLED".to_string(),
            })
        }
        async fn open_short(
            &self,
            symbol: &str,
            quantity: f64,
            _leverage: u32,
        ) -> Result<OrderAck, ExchangeError> {
            self.log(format!("open_short {}", symbol)).await;
            self.positions
                .lock()
                .await
                .push(pos(symbol, Side::Short, quantity, 100.0));
            Ok(OrderAck {
                order_id: 12,
                symbol: symbol.to_string(),
                status: "FILLED".to_string(),
            })
        }
        async fn close_long(&self, symbol: &str, quantity: f64) -> Result<OrderAck, ExchangeError> {
            self.log(format!("close_long {} {:.4}", symbol, quantity)).await;
            Ok(OrderAck {
                order_id: 13,
                symbol: symbol.to_string(),
                status: "FILLED".to_string(),
            })
        }
        async fn close_short(&self, symbol: &str, quantity: f64) -> Result<OrderAck, ExchangeError> {
            self.log(format!("close_short {} {:.4}", symbol, quantity)).await;
            Ok(OrderAck {
                order_id: 14,
                symbol: symbol.to_string(),
                status: "FILLED".to_string(),
            })
        }
        async fn set_stop_loss(
            &self,
            symbol: &str,
            _position_side: Side,
            quantity: f64,
            price: f64,
        ) -> Result<(), ExchangeError> {
            self.log(format!("set_stop_loss {} {:.4} {:.4}", symbol, quantity, price))
                .await;
            Ok(())
        }
        async fn set_take_profit(
            &self,
            symbol: &str,
            _position_side: Side,
            quantity: f64,
            price: f64,
        ) -> Result<(), ExchangeError> {
            self.log(format!("set_take_profit {} {:.4} {:.4}", symbol, quantity, price))
                .await;
            Ok(())
        }
        async fn cancel_stop_loss_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
            self.log(format!("cancel_stop_loss_orders {}", symbol)).await;
            Ok(())
        }
        async fn cancel_take_profit_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
            self.log(format!("cancel_take_profit_orders {}", symbol)).await;
            Ok(())
        }
        async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
            self.log(format!("cancel_all_orders {}", symbol)).await;
            Ok(())
        }
        async fn set_margin_mode(&self, _symbol: &str, _is_cross: bool) -> Result<(), ExchangeError> {
            Ok(())
        }
        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<(), ExchangeError> {
            Ok(())
        }
    }

    fn test_context(position_count: usize) -> Context {
        Context {
            current_time: String::new(),
            runtime_minutes: 0,
            cycle_index: 0,
            account: AccountInfo {
                total_equity: 1000.0,
                available_balance: 800.0,
                unrealized_pnl: 0.0,
                total_pnl: 0.0,
                total_pnl_pct: 0.0,
                margin_used: 100.0,
                margin_used_pct: 10.0,
                position_count,
            },
            positions: vec![],
            open_orders: vec![],
            candidates: vec![],
            market_data: HashMap::new(),
            oi_top: HashMap::new(),
            pattern_analyses: HashMap::new(),
            market_summary: MarketSummary::default(),
            timeframes: vec![],
            btc_eth_leverage: 10,
            altcoin_leverage: 5,
            taker_fee_rate: 0.0004,
            maker_fee_rate: 0.0002,
            performance: None,
        }
    }

    fn open_decision(symbol: &str) -> Decision {
        Decision {
            symbol: symbol.to_string(),
            action: Action::OpenLong {
                params: OpenParams {
                    leverage: 5,
                    position_size_usd: 200.0,
                    stop_loss: 95.0,
                    take_profit: 120.0,
                    confidence: 90,
                    risk_usd: 10.0,
                },
            },
            reasoning: "breakout".to_string(),
            adjustment_notes: vec![],
        }
    }

    fn simple(symbol: &str, action: Action) -> Decision {
        Decision {
            symbol: symbol.to_string(),
            action,
            reasoning: "test".to_string(),
            adjustment_notes: vec![],
        }
    }

    fn executor(exchange: Arc<RecordingExchange>) -> Executor {
        Executor::new(
            exchange,
            Arc::new(RwLock::new(PositionBook::default())),
            true,
            0.5,
        )
    }

    #[test]
    fn test_sort_is_stable_priority_permutation() {
        let input = vec![
            open_decision("BTCUSDT"),
            simple("ETHUSDT", Action::CloseLong),
            simple("SOLUSDT", Action::UpdateStopLoss { new_stop_loss: 1.0 }),
            simple("XRPUSDT", Action::CloseShort),
        ];
        let sorted = sort_decisions_by_priority(input);
        let tags: Vec<&str> = sorted.iter().map(|d| d.action.tag()).collect();
        assert_eq!(
            tags,
            vec!["close_long", "close_short", "update_stop_loss", "open_long"]
        );
        // Stability: ETH close stays ahead of XRP close
        assert_eq!(sorted[0].symbol, "ETHUSDT");
        assert_eq!(sorted[1].symbol, "XRPUSDT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_runs_before_open() {
        let exchange = Arc::new(RecordingExchange::new(vec![pos(
            "ETHUSDT",
            Side::Long,
            1.0,
            100.0,
        )]));
        let ex = executor(Arc::clone(&exchange));
        let mut record = DecisionRecord::new("recording");

        ex.execute_cycle(
            &test_context(1),
            vec![open_decision("BTCUSDT"), simple("ETHUSDT", Action::CloseLong)],
            &HashSet::new(),
            &mut record,
        )
        .await;

        let calls = exchange.calls().await;
        let close_idx = calls.iter().position(|c| c.starts_with("close_long")).unwrap();
        let open_idx = calls.iter().position(|c| c.starts_with("open_long")).unwrap();
        assert!(close_idx < open_idx);
        assert_eq!(record.actions.len(), 2);
        assert!(record.actions.iter().all(|a| a.success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_same_side_open_rejected() {
        let exchange = Arc::new(RecordingExchange::new(vec![pos(
            "BTCUSDT",
            Side::Long,
            1.0,
            100.0,
        )]));
        let ex = executor(Arc::clone(&exchange));
        let mut record = DecisionRecord::new("recording");

        ex.execute_cycle(
            &test_context(1),
            vec![open_decision("BTCUSDT")],
            &HashSet::new(),
            &mut record,
        )
        .await;

        assert_eq!(record.actions.len(), 1);
        assert!(!record.actions[0].success);
        assert!(record.actions[0].error.as_ref().unwrap().contains("already holds"));
        assert!(exchange.calls().await.iter().all(|c| !c.starts_with("open_long")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_sets_protective_orders_and_book() {
        let exchange = Arc::new(RecordingExchange::new(vec![]));
        let book = Arc::new(RwLock::new(PositionBook::default()));
        let ex = Executor::new(Arc::clone(&exchange) as Arc<dyn Exchange>, Arc::clone(&book), true, 0.5);
        let mut record = DecisionRecord::new("recording");

        ex.execute_cycle(
            &test_context(0),
            vec![open_decision("SOLUSDT")],
            &HashSet::new(),
            &mut record,
        )
        .await;

        let calls = exchange.calls().await;
        assert!(calls.iter().any(|c| c.starts_with("set_stop_loss SOLUSDT")));
        assert!(calls.iter().any(|c| c.starts_with("set_take_profit SOLUSDT")));
        let book = book.read().await;
        assert_eq!(book.stop_prices.get("SOLUSDT_long"), Some(&95.0));
        assert_eq!(book.take_prices.get("SOLUSDT_long"), Some(&120.0));
        assert!(book.first_seen_ms.contains_key("SOLUSDT_long"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_blocks_open_without_venue_call() {
        let exchange = Arc::new(RecordingExchange::new(vec![]));
        let ex = executor(Arc::clone(&exchange));
        let mut record = DecisionRecord::new("recording");
        let ctx = test_context(3); // at the position cap

        ex.execute_cycle(&ctx, vec![open_decision("BTCUSDT")], &HashSet::new(), &mut record)
            .await;

        assert!(record.actions.is_empty());
        assert!(record.execution_log.iter().any(|l| l.contains("risk guard blocked")));
        assert!(exchange.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_stop_on_vanished_position_is_noop_success() {
        let exchange = Arc::new(RecordingExchange::new(vec![]));
        let ex = executor(Arc::clone(&exchange));
        let mut record = DecisionRecord::new("recording");

        let mut last_keys = HashSet::new();
        last_keys.insert("BTCUSDT_long".to_string());

        ex.execute_cycle(
            &test_context(0),
            vec![simple(
                "BTCUSDT",
                Action::UpdateStopLoss { new_stop_loss: 95.0 },
            )],
            &last_keys,
            &mut record,
        )
        .await;

        assert_eq!(record.actions.len(), 1);
        assert!(record.actions[0].success);
        assert!(exchange
            .calls()
            .await
            .iter()
            .all(|c| !c.starts_with("set_stop_loss")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_stop_on_unknown_position_fails() {
        let exchange = Arc::new(RecordingExchange::new(vec![]));
        let ex = executor(Arc::clone(&exchange));
        let mut record = DecisionRecord::new("recording");

        ex.execute_cycle(
            &test_context(0),
            vec![simple(
                "BTCUSDT",
                Action::UpdateStopLoss { new_stop_loss: 95.0 },
            )],
            &HashSet::new(),
            &mut record,
        )
        .await;

        assert!(!record.actions[0].success);
        assert!(record.actions[0].error.as_ref().unwrap().contains("no position"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_stop_cancels_only_stop_orders() {
        let exchange = Arc::new(RecordingExchange::new(vec![pos(
            "BTCUSDT",
            Side::Long,
            1.0,
            100.0,
        )]));
        let ex = executor(Arc::clone(&exchange));
        let mut record = DecisionRecord::new("recording");

        ex.execute_cycle(
            &test_context(1),
            vec![simple(
                "BTCUSDT",
                Action::UpdateStopLoss { new_stop_loss: 95.0 },
            )],
            &HashSet::new(),
            &mut record,
        )
        .await;

        let calls = exchange.calls().await;
        assert!(calls.iter().any(|c| c.starts_with("cancel_stop_loss_orders")));
        assert!(calls.iter().all(|c| !c.starts_with("cancel_take_profit_orders")));
        assert!(calls.iter().any(|c| c.starts_with("set_stop_loss BTCUSDT 1.0000 95.0000")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_close_executes_and_rearms_protection() {
        // 60 USDT notional, close 80% -> remaining 12 USDT, above the floor
        let exchange = Arc::new(RecordingExchange::new(vec![pos(
            "BTCUSDT",
            Side::Long,
            0.6,
            100.0,
        )]));
        let ex = executor(Arc::clone(&exchange));
        let mut record = DecisionRecord::new("recording");

        ex.execute_cycle(
            &test_context(1),
            vec![simple(
                "BTCUSDT",
                Action::PartialClose {
                    close_percentage: 80.0,
                    new_stop_loss: Some(92.0),
                    new_take_profit: Some(130.0),
                },
            )],
            &HashSet::new(),
            &mut record,
        )
        .await;

        let calls = exchange.calls().await;
        assert!(calls.iter().any(|c| c.starts_with("close_long BTCUSDT 0.4800")));
        // Remainder 0.12 re-armed with both protective orders
        assert!(calls
            .iter()
            .any(|c| c.starts_with("set_stop_loss BTCUSDT 0.1200 92.0000")));
        assert!(calls
            .iter()
            .any(|c| c.starts_with("set_take_profit BTCUSDT 0.1200 130.0000")));
        assert_eq!(record.actions[0].action, "partial_close");
        assert!(record.actions[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_close_dust_remainder_becomes_full_close() {
        // 60 USDT notional, close 85% -> remaining 9 USDT, under the floor
        let exchange = Arc::new(RecordingExchange::new(vec![pos(
            "BTCUSDT",
            Side::Long,
            0.6,
            100.0,
        )]));
        let ex = executor(Arc::clone(&exchange));
        let mut record = DecisionRecord::new("recording");

        ex.execute_cycle(
            &test_context(1),
            vec![simple(
                "BTCUSDT",
                Action::PartialClose {
                    close_percentage: 85.0,
                    new_stop_loss: None,
                    new_take_profit: None,
                },
            )],
            &HashSet::new(),
            &mut record,
        )
        .await;

        let calls = exchange.calls().await;
        // Full close (quantity 0) instead of the partial quantity
        assert!(calls.iter().any(|c| c == "close_long BTCUSDT 0.0000"));
        assert_eq!(record.actions[0].action, "close_long");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_with_new_stop_emits_synthetic_update() {
        let exchange = Arc::new(RecordingExchange::new(vec![pos(
            "ETHUSDT",
            Side::Short,
            1.0,
            100.0,
        )]));
        let ex = executor(Arc::clone(&exchange));
        let mut record = DecisionRecord::new("recording");

        ex.execute_cycle(
            &test_context(1),
            vec![simple(
                "ETHUSDT",
                Action::Hold {
                    new_stop_loss: Some(105.0),
                    new_take_profit: None,
                },
            )],
            &HashSet::new(),
            &mut record,
        )
        .await;

        // Synthetic update first, then the hold itself as a no-op
        assert_eq!(record.actions.len(), 2);
        assert_eq!(record.actions[0].action, "update_stop_loss");
        assert!(record.actions[0].reason.starts_with("AUTO:"));
        assert!(record.actions[0].success);
        assert_eq!(record.actions[1].action, "hold");
        assert!(record.actions[1].success);
        assert!(exchange
            .calls()
            .await
            .iter()
            .any(|c| c.starts_with("set_stop_loss ETHUSDT 1.0000 105.0000")));
    }

    #[test]
    fn test_infer_close_reason() {
        assert_eq!(infer_close_reason("taking profit at target tp", 0.0, ""), "take_profit");
        assert_eq!(infer_close_reason("stop loss hit", 1.0, ""), "stop_loss");
        assert_eq!(infer_close_reason("momentum gone", 5.0, ""), "take_profit");
        assert_eq!(infer_close_reason("momentum gone", -5.0, ""), "stop_loss");
        assert_eq!(infer_close_reason("momentum gone", 0.0, ""), "manual_close");
        assert_eq!(
            infer_close_reason("momentum gone", 0.0, "partial_close"),
            "partial_close"
        );
    }
}
