/// Cycle context assembly
///
/// Snapshots the account and positions, picks the working symbol set, pulls
/// fresh market data (OI-filtered), fans pattern analysis out across
/// (symbol, timeframe) pairs under a hard deadline, and folds in the
/// trader's cross-cycle position bookkeeping. A cycle can only die here if
/// balance or positions are unavailable; everything else degrades.
use super::patterns::{analyze_patterns, PatternAnalysis};
use super::summary::analyze_market_summary;
use super::types::{
    normalize_symbol, pnl_percentage, position_key, AccountInfo, CandidateSymbol, Context,
    OiTopData, PositionInfo, SymbolSource,
};
use crate::config::TraderConfig;
use crate::errors::BotError;
use crate::exchange::Exchange;
use crate::journal::PerformanceAnalysis;
use crate::logger::{self, LogTag};
use crate::market::{self, MarketData, MarketDataSource};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Hard ceiling on the pattern-analysis fan-out
const PATTERN_ANALYSIS_DEADLINE: Duration = Duration::from_secs(5);
const PATTERN_MIN_CANDLES: usize = 20;
const KLINE_LIMIT: usize = 100;

// =============================================================================
// CROSS-CYCLE POSITION BOOKKEEPING
// =============================================================================

/// Per-trader observation state that survives across cycles: peak-PnL
/// high-water marks, first-seen timestamps and the protective prices the
/// engine last placed. Keys are `symbol_side`. Entries are cleared the first
/// cycle their position is gone from the venue snapshot.
///
/// The drawdown monitor is the only writer of `peak_pnl`; it tracks the
/// leveraged price-return metric its retrace math is defined over. Everyone
/// else (the context builder included) only reads the mark.
#[derive(Debug, Default)]
pub struct PositionBook {
    pub peak_pnl: HashMap<String, f64>,
    pub first_seen_ms: HashMap<String, i64>,
    pub stop_prices: HashMap<String, f64>,
    pub take_prices: HashMap<String, f64>,
}

impl PositionBook {
    /// Raise (never lower) the peak-PnL mark for a key
    pub fn update_peak(&mut self, key: &str, current_pnl_pct: f64) -> f64 {
        let entry = self
            .peak_pnl
            .entry(key.to_string())
            .or_insert(current_pnl_pct);
        if current_pnl_pct > *entry {
            *entry = current_pnl_pct;
        }
        *entry
    }

    /// Current high-water mark for a key; zero before the monitor has
    /// observed the position
    pub fn peak(&self, key: &str) -> f64 {
        self.peak_pnl.get(key).copied().unwrap_or(0.0)
    }

    /// First-seen timestamp, stamping now on the first observation
    pub fn first_seen(&mut self, key: &str) -> i64 {
        *self
            .first_seen_ms
            .entry(key.to_string())
            .or_insert_with(|| Utc::now().timestamp_millis())
    }

    /// Drop every record for keys no longer present on the venue
    pub fn retain_keys(&mut self, live_keys: &HashSet<String>) {
        self.peak_pnl.retain(|k, _| live_keys.contains(k));
        self.first_seen_ms.retain(|k, _| live_keys.contains(k));
        self.stop_prices.retain(|k, _| live_keys.contains(k));
        self.take_prices.retain(|k, _| live_keys.contains(k));
    }

    pub fn clear_key(&mut self, key: &str) {
        self.peak_pnl.remove(key);
        self.first_seen_ms.remove(key);
        self.stop_prices.remove(key);
        self.take_prices.remove(key);
    }
}

// =============================================================================
// BUILDER
// =============================================================================

pub struct ContextBuilder {
    pub exchange: Arc<dyn Exchange>,
    pub market: Arc<dyn MarketDataSource>,
    pub book: Arc<RwLock<PositionBook>>,
}

impl ContextBuilder {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        market: Arc<dyn MarketDataSource>,
        book: Arc<RwLock<PositionBook>>,
    ) -> Self {
        Self {
            exchange,
            market,
            book,
        }
    }

    /// Assemble the full cycle context
    pub async fn build(
        &self,
        config: &TraderConfig,
        cycle_index: u64,
        runtime_minutes: i64,
        performance: Option<PerformanceAnalysis>,
        oi_top: HashMap<String, OiTopData>,
    ) -> Result<Context, BotError> {
        // Balance and positions are the only hard dependencies of a cycle
        let balance = self.exchange.get_balance().await?;
        let raw_positions = self.exchange.get_positions().await?;

        let total_equity = balance.total_equity();
        let mut positions = Vec::with_capacity(raw_positions.len());
        let mut total_margin_used = 0.0;
        let mut live_keys = HashSet::new();

        {
            let mut book = self.book.write().await;
            for raw in &raw_positions {
                let quantity = raw.quantity();
                if quantity == 0.0 {
                    continue;
                }
                let leverage = raw.leverage.max(1);
                let margin_used = quantity * raw.mark_price / leverage as f64;
                total_margin_used += margin_used;

                let key = position_key(&raw.symbol, raw.side);
                live_keys.insert(key.clone());
                let update_time = book.first_seen(&key);
                let pnl_pct = pnl_percentage(raw.unrealized_profit, margin_used);
                // Read-only: the drawdown monitor owns the peak cache and
                // tracks it in its own metric; writing the margin-based
                // percentage here would corrupt the high-water mark
                let peak_pnl_pct = book.peak(&key);

                positions.push(PositionInfo {
                    symbol: raw.symbol.clone(),
                    side: raw.side,
                    entry_price: raw.entry_price,
                    mark_price: raw.mark_price,
                    quantity,
                    leverage,
                    unrealized_pnl: raw.unrealized_profit,
                    unrealized_pnl_pct: pnl_pct,
                    peak_pnl_pct,
                    liquidation_price: raw.liquidation_price,
                    margin_used,
                    update_time,
                    stop_loss: book.stop_prices.get(&key).copied(),
                    take_profit: book.take_prices.get(&key).copied(),
                });
            }
            book.retain_keys(&live_keys);
        }

        let total_pnl = total_equity - config.initial_balance;
        let total_pnl_pct = if config.initial_balance > 0.0 {
            total_pnl / config.initial_balance * 100.0
        } else {
            0.0
        };
        let margin_used_pct = if total_equity > 0.0 {
            total_margin_used / total_equity * 100.0
        } else {
            0.0
        };

        let account = AccountInfo {
            total_equity,
            available_balance: balance.available_balance,
            unrealized_pnl: balance.unrealized_profit,
            total_pnl,
            total_pnl_pct,
            margin_used: total_margin_used,
            margin_used_pct,
            position_count: positions.len(),
        };

        // Open orders enrich the prompt; their absence is not fatal
        let open_orders = match self.exchange.get_open_orders("").await {
            Ok(orders) => orders,
            Err(err) => {
                logger::warning(
                    LogTag::Trader,
                    &format!("open orders unavailable this cycle: {}", err),
                );
                vec![]
            }
        };

        let candidates = candidate_symbols(config);
        let market_data = self
            .fetch_market_data(config, &positions, &candidates)
            .await;
        let pattern_analyses = self
            .fetch_pattern_analyses(config, &positions, &market_data)
            .await;
        let market_summary = analyze_market_summary(&market_data, &account);

        Ok(Context {
            current_time: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            runtime_minutes,
            cycle_index,
            account,
            positions,
            open_orders,
            candidates,
            market_data,
            oi_top,
            pattern_analyses,
            market_summary,
            timeframes: config.timeframes.clone(),
            btc_eth_leverage: config.btc_eth_leverage,
            altcoin_leverage: config.altcoin_leverage,
            taker_fee_rate: config.effective_taker_fee_rate(),
            maker_fee_rate: config.maker_fee_rate,
            performance,
        })
    }

    /// Fresh data for BTC, every held symbol, and the capped candidate list.
    /// Candidates below the OI notional floor are dropped; held symbols and
    /// BTC always survive.
    async fn fetch_market_data(
        &self,
        config: &TraderConfig,
        positions: &[PositionInfo],
        candidates: &[CandidateSymbol],
    ) -> HashMap<String, MarketData> {
        let held: HashSet<String> = positions.iter().map(|p| p.symbol.clone()).collect();

        let mut symbols: Vec<String> = vec!["BTCUSDT".to_string()];
        symbols.extend(held.iter().cloned());
        let cap = candidate_cap(positions.len());
        for candidate in candidates.iter().take(cap) {
            symbols.push(candidate.symbol.clone());
        }
        let symbols: HashSet<String> = symbols.into_iter().collect();

        let mut out = HashMap::new();
        for symbol in symbols {
            let data = match market::get_with_fallback(self.market.as_ref(), &symbol).await {
                Ok(data) => data,
                Err(err) => {
                    logger::warning(
                        LogTag::Market,
                        &format!("{} market data unavailable: {}", symbol, err),
                    );
                    continue;
                }
            };

            let is_held = held.contains(&symbol);
            let is_btc = symbol == "BTCUSDT";
            if !is_held && !is_btc {
                if let Some(oi_millions) = data.oi_notional_millions() {
                    if oi_millions < config.min_oi_notional_millions {
                        logger::debug(
                            LogTag::Market,
                            &format!(
                                "{} filtered out: OI notional {:.2}M below the {:.1}M floor",
                                symbol, oi_millions, config.min_oi_notional_millions
                            ),
                        );
                        continue;
                    }
                }
            }

            out.insert(symbol, data);
        }
        out
    }

    /// Fan out one analysis task per (symbol, timeframe), joined under the
    /// 5 s deadline. Missing analyses simply do not appear in the prompt.
    async fn fetch_pattern_analyses(
        &self,
        config: &TraderConfig,
        positions: &[PositionInfo],
        market_data: &HashMap<String, MarketData>,
    ) -> HashMap<String, HashMap<String, PatternAnalysis>> {
        let mut timeframes = config.timeframes.clone();
        if timeframes.is_empty() {
            timeframes = vec!["15m".to_string(), "1h".to_string(), "4h".to_string()];
        }

        let mut symbols: HashSet<String> = market_data.keys().cloned().collect();
        symbols.insert("BTCUSDT".to_string());
        for pos in positions {
            symbols.insert(pos.symbol.clone());
        }

        let results: Arc<Mutex<HashMap<String, HashMap<String, PatternAnalysis>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let mut handles = Vec::new();

        for symbol in symbols {
            for timeframe in &timeframes {
                let symbol = symbol.clone();
                let timeframe = timeframe.clone();
                let market = Arc::clone(&self.market);
                let results = Arc::clone(&results);
                // 1h candles were already fetched with the snapshot
                let prefetched = if timeframe == "1h" {
                    market_data.get(&symbol).map(|d| d.klines_1h.clone())
                } else {
                    None
                };

                handles.push(tokio::spawn(async move {
                    let klines = match prefetched {
                        Some(klines) if klines.len() >= PATTERN_MIN_CANDLES => klines,
                        _ => match market.get_klines(&symbol, &timeframe, KLINE_LIMIT).await {
                            Ok(klines) => klines,
                            Err(err) => {
                                logger::debug(
                                    LogTag::Market,
                                    &format!("{} {} klines unavailable: {}", symbol, timeframe, err),
                                );
                                return;
                            }
                        },
                    };
                    if klines.len() < PATTERN_MIN_CANDLES {
                        return;
                    }
                    let analysis = analyze_patterns(&klines, &symbol, &timeframe);
                    let mut map = results.lock().await;
                    map.entry(symbol).or_default().insert(timeframe, analysis);
                }));
            }
        }

        let joined = tokio::time::timeout(
            PATTERN_ANALYSIS_DEADLINE,
            futures::future::join_all(handles),
        )
        .await;
        if joined.is_err() {
            logger::warning(
                LogTag::Market,
                "pattern analysis deadline hit, continuing with partial results",
            );
        }

        let map = results.lock().await;
        map.clone()
    }
}

// =============================================================================
// CANDIDATE SELECTION
// =============================================================================

/// Candidate cap shrinks as the trader holds more positions, keeping the
/// prompt bounded when attention should be on management
pub fn candidate_cap(position_count: usize) -> usize {
    match position_count {
        0 => 30,
        1 => 25,
        2 => 20,
        _ => 15,
    }
}

/// Operator-selected coins win; the configured default list is the fallback
pub fn candidate_symbols(config: &TraderConfig) -> Vec<CandidateSymbol> {
    let (coins, source) = if !config.trading_coins.is_empty() {
        (&config.trading_coins, SymbolSource::UserSelected)
    } else {
        (&config.default_coins, SymbolSource::Default)
    };

    coins
        .iter()
        .map(|coin| CandidateSymbol {
            symbol: normalize_symbol(coin),
            sources: vec![source],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ExchangeError, MarketError};
    use crate::exchange::{
        AccountBalance, ExchangePosition, OpenOrder, OrderAck, Side,
    };
    use crate::market::Kline;
    use async_trait::async_trait;

    struct StubExchange {
        positions: Vec<ExchangePosition>,
    }

    #[async_trait]
    impl Exchange for StubExchange {
        fn venue(&self) -> &'static str {
            "stub"
        }
        async fn get_balance(&self) -> Result<AccountBalance, ExchangeError> {
            Ok(AccountBalance {
                wallet_balance: 1000.0,
                unrealized_profit: 20.0,
                available_balance: 700.0,
            })
        }
        async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
            Ok(self.positions.clone())
        }
        async fn get_open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
            Ok(vec![])
        }
        async fn get_market_price(&self, _symbol: &str) -> Result<f64, ExchangeError> {
            Ok(100.0)
        }
        async fn open_long(&self, s: &str, _q: f64, _l: u32) -> Result<OrderAck, ExchangeError> {
            Ok(OrderAck {
                order_id: 1,
                symbol: s.to_string(),
                status: "FILLED".to_string(),
            })
        }
        async fn open_short(&self, s: &str, _q: f64, _l: u32) -> Result<OrderAck, ExchangeError> {
            Ok(OrderAck {
                order_id: 1,
                symbol: s.to_string(),
                status: "FILLED".to_string(),
            })
        }
        async fn close_long(&self, s: &str, _q: f64) -> Result<OrderAck, ExchangeError> {
            Ok(OrderAck {
                order_id: 1,
                symbol: s.to_string(),
                status: "FILLED".to_string(),
            })
        }
        async fn close_short(&self, s: &str, _q: f64) -> Result<OrderAck, ExchangeError> {
            Ok(OrderAck {
                order_id: 1,
                symbol: s.to_string(),
                status: "FILLED".to_string(),
            })
        }
        async fn set_stop_loss(
            &self,
            _s: &str,
            _ps: Side,
            _q: f64,
            _p: f64,
        ) -> Result<(), ExchangeError> {
            Ok(())
        }
        async fn set_take_profit(
            &self,
            _s: &str,
            _ps: Side,
            _q: f64,
            _p: f64,
        ) -> Result<(), ExchangeError> {
            Ok(())
        }
        async fn cancel_stop_loss_orders(&self, _s: &str) -> Result<(), ExchangeError> {
            Ok(())
        }
        async fn cancel_take_profit_orders(&self, _s: &str) -> Result<(), ExchangeError> {
            Ok(())
        }
        async fn cancel_all_orders(&self, _s: &str) -> Result<(), ExchangeError> {
            Ok(())
        }
        async fn set_margin_mode(&self, _s: &str, _c: bool) -> Result<(), ExchangeError> {
            Ok(())
        }
        async fn set_leverage(&self, _s: &str, _l: u32) -> Result<(), ExchangeError> {
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
                price_change_1h: 1.0,
                price_change_4h: 2.0,
                current_ema20: 95.0,
                current_macd: 0.5,
                current_rsi7: 60.0,
                intraday: None,
                longer_term: None,
                open_interest: None,
                klines_1h: stub_klines(40),
                fetched_at: Utc::now(),
            })
        }

        async fn get_klines(
            &self,
            _symbol: &str,
            _interval: &str,
            limit: usize,
        ) -> Result<Vec<Kline>, MarketError> {
            Ok(stub_klines(limit.min(40)))
        }
    }

    fn stub_klines(n: usize) -> Vec<Kline> {
        (0..n)
            .map(|i| Kline {
                open_time: i as i64,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 10.0,
                close_time: i as i64 + 1,
            })
            .collect()
    }

    fn stub_position(symbol: &str, side: Side, unrealized: f64) -> ExchangePosition {
        ExchangePosition {
            symbol: symbol.to_string(),
            side,
            entry_price: 100.0,
            mark_price: 100.0,
            position_amt: if side == Side::Long { 1.0 } else { -1.0 },
            unrealized_profit: unrealized,
            liquidation_price: 50.0,
            leverage: 10,
        }
    }

    fn config() -> TraderConfig {
        serde_json::from_value(serde_json::json!({
            "id": "t1",
            "name": "T1",
            "ai": {"provider": "deepseek", "api_key": "sk"},
            "exchange": "binance",
            "initial_balance": 1000.0,
            "trading_coins": ["sol", "DOGE"],
            "timeframes": ["1h"]
        }))
        .unwrap()
    }

    #[test]
    fn test_candidate_cap_shrinks() {
        assert_eq!(candidate_cap(0), 30);
        assert_eq!(candidate_cap(1), 25);
        assert_eq!(candidate_cap(2), 20);
        assert_eq!(candidate_cap(3), 15);
        assert_eq!(candidate_cap(7), 15);
    }

    #[test]
    fn test_candidate_symbols_prefer_user_selection() {
        let candidates = candidate_symbols(&config());
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].symbol, "SOLUSDT");
        assert_eq!(candidates[0].sources, vec![SymbolSource::UserSelected]);
    }

    #[test]
    fn test_position_book_peak_is_monotonic() {
        let mut book = PositionBook::default();
        assert_eq!(book.update_peak("BTCUSDT_long", 10.0), 10.0);
        assert_eq!(book.update_peak("BTCUSDT_long", 25.0), 25.0);
        assert_eq!(book.update_peak("BTCUSDT_long", 5.0), 25.0);
    }

    #[test]
    fn test_position_book_retain() {
        let mut book = PositionBook::default();
        book.update_peak("A_long", 1.0);
        book.update_peak("B_short", 2.0);
        book.stop_prices.insert("A_long".to_string(), 10.0);

        let mut live = HashSet::new();
        live.insert("B_short".to_string());
        book.retain_keys(&live);

        assert!(!book.peak_pnl.contains_key("A_long"));
        assert!(!book.stop_prices.contains_key("A_long"));
        assert!(book.peak_pnl.contains_key("B_short"));
    }

    #[tokio::test]
    async fn test_build_context_core_fields() {
        let exchange = Arc::new(StubExchange {
            positions: vec![stub_position("ETHUSDT", Side::Long, 5.0)],
        });
        let market = Arc::new(StubMarket);
        let book = Arc::new(RwLock::new(PositionBook::default()));
        // Monitor previously recorded a high-water mark in its own metric
        book.write().await.update_peak("ETHUSDT_long", 80.0);
        let builder = ContextBuilder::new(exchange, market, Arc::clone(&book));

        let ctx = builder
            .build(&config(), 3, 12, None, HashMap::new())
            .await
            .unwrap();

        assert_eq!(ctx.cycle_index, 3);
        assert_eq!(ctx.account.total_equity, 1020.0);
        assert_eq!(ctx.account.position_count, 1);
        assert_eq!(ctx.positions[0].symbol, "ETHUSDT");
        // margin = 1 * 100 / 10 = 10, pnl_pct = 5/10*100 = 50
        assert_eq!(ctx.positions[0].unrealized_pnl_pct, 50.0);
        // The peak is reported as recorded by the monitor, and the build
        // must not overwrite it with the margin-based percentage
        assert_eq!(ctx.positions[0].peak_pnl_pct, 80.0);
        // BTC always fetched, held symbol fetched, both user candidates fetched
        assert!(ctx.market_data.contains_key("BTCUSDT"));
        assert!(ctx.market_data.contains_key("ETHUSDT"));
        assert!(ctx.market_data.contains_key("SOLUSDT"));

        // First-seen timestamp persisted in the book; peak untouched
        let book = book.read().await;
        assert!(book.first_seen_ms.contains_key("ETHUSDT_long"));
        assert_eq!(book.peak("ETHUSDT_long"), 80.0);
    }

    #[tokio::test]
    async fn test_context_build_never_writes_peak() {
        let exchange = Arc::new(StubExchange {
            positions: vec![stub_position("ETHUSDT", Side::Long, 5.0)],
        });
        let book = Arc::new(RwLock::new(PositionBook::default()));
        let builder = ContextBuilder::new(exchange, Arc::new(StubMarket), Arc::clone(&book));

        let ctx = builder
            .build(&config(), 1, 1, None, HashMap::new())
            .await
            .unwrap();

        // Before the monitor has seen the position there is no peak at all
        assert_eq!(ctx.positions[0].peak_pnl_pct, 0.0);
        assert!(book.read().await.peak_pnl.is_empty());
    }

    #[tokio::test]
    async fn test_book_cleared_when_position_disappears() {
        let market = Arc::new(StubMarket);
        let book = Arc::new(RwLock::new(PositionBook::default()));
        book.write().await.update_peak("ETHUSDT_long", 40.0);

        let with_position = ContextBuilder::new(
            Arc::new(StubExchange {
                positions: vec![stub_position("ETHUSDT", Side::Long, 5.0)],
            }),
            Arc::clone(&market) as Arc<dyn MarketDataSource>,
            Arc::clone(&book),
        );
        with_position
            .build(&config(), 1, 1, None, HashMap::new())
            .await
            .unwrap();
        // Live position keeps its monitor-recorded peak through the build
        assert!(book.read().await.peak_pnl.contains_key("ETHUSDT_long"));

        let without_position = ContextBuilder::new(
            Arc::new(StubExchange { positions: vec![] }),
            market,
            Arc::clone(&book),
        );
        without_position
            .build(&config(), 2, 2, None, HashMap::new())
            .await
            .unwrap();
        assert!(book.read().await.peak_pnl.is_empty());
    }
}
