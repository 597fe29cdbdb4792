/// Prompt assembly
///
/// The system prompt is template text (picked from a named registry) plus a
/// dynamically generated hard-constraint section and the output contract.
/// The user prompt carries only volatile state: account, positions, market
/// snapshots, pattern blocks, recent trades. Keeping rules and state in
/// separate messages keeps the rules cacheable on the provider side.
use super::sizing::min_position_size;
use super::types::{Context, PositionInfo, SymbolSource};
use crate::exchange::OrderType;
use chrono::Utc;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Canonical display order for timeframe blocks, shortest first
const TIMEFRAME_ORDER: [&str; 15] = [
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];

pub struct PromptTemplate {
    pub name: &'static str,
    pub content: &'static str,
}

static TEMPLATES: Lazy<HashMap<&'static str, PromptTemplate>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(
        "default",
        PromptTemplate {
            name: "default",
            content: "You are a professional crypto perpetual futures trader. You manage the \
account end to end: you pick entries, size positions, place protective orders \
and decide when to exit. Trade only high-conviction setups where trend, \
momentum and structure agree across timeframes. Capital preservation comes \
before profit: skip marginal setups, respect every hard constraint below, and \
prefer waiting over forcing trades in unclear conditions.",
        },
    );
    map.insert(
        "adaptive",
        PromptTemplate {
            name: "adaptive",
            content: "You are a professional crypto perpetual futures trader who adapts position \
management to live conditions. Beyond picking entries, actively manage open \
positions: trail stops behind structure as trades move in your favor, take \
partial profits into strength, and tighten protection when momentum fades. \
Use update_stop_loss, update_take_profit and partial_close as first-class \
tools rather than waiting for the original targets. Trade only \
high-conviction setups; capital preservation comes before profit.",
        },
    );
    map
});

/// Look up a template by name
pub fn get_prompt_template(name: &str) -> Option<&'static PromptTemplate> {
    TEMPLATES.get(name)
}

// =============================================================================
// SYSTEM PROMPT
// =============================================================================

/// Base template + hard constraints + output contract
pub fn build_system_prompt(
    account_equity: f64,
    btc_eth_leverage: u32,
    altcoin_leverage: u32,
    template_name: &str,
) -> String {
    let mut out = String::new();

    // Template, falling back to default, then a built-in stub
    let name = if template_name.is_empty() {
        "default"
    } else {
        template_name
    };
    match get_prompt_template(name).or_else(|| get_prompt_template("default")) {
        Some(template) => {
            out.push_str(template.content);
            out.push_str("\n\n");
        }
        None => {
            out.push_str("You are a crypto futures trading AI. Decide based on the market data provided.\n\n");
        }
    }

    // Hard constraints, computed from live account numbers
    out.push_str("# Hard constraints (risk control)\n\n");
    out.push_str("1. Reward/risk ratio: must be >= 3:1 (risk 1% to make 3%+)\n");
    out.push_str("2. Max concurrent positions: 3 (quality over quantity)\n");
    out.push_str(&format!(
        "3. Per-asset position value: altcoins {:.0}-{:.0} USDT | BTC/ETH {:.0}-{:.0} USDT\n",
        account_equity * 2.5,
        account_equity * 5.0,
        account_equity * 5.0,
        account_equity * 10.0
    ));
    out.push_str(&format!(
        "4. Leverage caps: altcoins max {}x | BTC/ETH max {}x (strictly enforced)\n",
        altcoin_leverage, btc_eth_leverage
    ));
    out.push_str("5. Total margin usage ceiling: 90%\n");
    out.push_str(
        "6. Opens require confidence >= 80 (85+ preferred). Below 80, answer wait or hold.\n",
    );

    let min_btc_eth = min_position_size("BTCUSDT", account_equity);
    out.push_str(&format!(
        "7. Minimum position value: altcoins >= 12 USDT | BTC/ETH >= {:.0} USDT (scaled to account size)\n\n",
        min_btc_eth
    ));

    out.push_str("How to size position_size_usd:\n");
    out.push_str(&format!("- Current account equity: {:.2} USDT\n", account_equity));
    out.push_str(&format!(
        "- Altcoin range: {:.0}-{:.0} USDT | BTC/ETH range: {:.0}-{:.0} USDT; prefer the upper half of the range when conviction is high\n",
        account_equity * 2.5,
        account_equity * 5.0,
        account_equity * 5.0,
        account_equity * 10.0
    ));
    out.push_str("- Never copy numbers from the market data (open interest, volume, prices) into position_size_usd\n\n");

    // Output contract
    out.push_str("# Output format (strict)\n\n");
    out.push_str(
        "Wrap your analysis in <reasoning> tags and your decisions in <decision> tags around a fenced JSON array:\n\n",
    );
    out.push_str("<reasoning>\nyour concise analysis\n</reasoning>\n\n");
    out.push_str("<decision>\n```json\n[\n");
    out.push_str(&format!(
        "  {{\"symbol\": \"BTCUSDT\", \"action\": \"open_short\", \"leverage\": {}, \"position_size_usd\": {:.0}, \"stop_loss\": 97000, \"take_profit\": 91000, \"confidence\": 85, \"risk_usd\": 300, \"reasoning\": \"downtrend confirmed\"}},\n",
        btc_eth_leverage,
        account_equity * 7.5
    ));
    out.push_str("  {\"symbol\": \"SOLUSDT\", \"action\": \"update_stop_loss\", \"new_stop_loss\": 155, \"reasoning\": \"trail to breakeven\"},\n");
    out.push_str("  {\"symbol\": \"ETHUSDT\", \"action\": \"close_long\", \"reasoning\": \"target reached\"}\n");
    out.push_str("]\n```\n</decision>\n\n");
    out.push_str("## Fields per action\n\n");
    out.push_str("- action: open_long | open_short | close_long | close_short | update_stop_loss | update_take_profit | partial_close | hold | wait\n");
    out.push_str("- open_long / open_short require: leverage, position_size_usd, stop_loss, take_profit, confidence (>= 80), risk_usd, reasoning\n");
    out.push_str("- update_stop_loss requires: new_stop_loss (not stop_loss)\n");
    out.push_str("- update_take_profit requires: new_take_profit (not take_profit)\n");
    out.push_str("- partial_close requires: close_percentage in (0, 100]; include new_stop_loss/new_take_profit to re-arm protection for the remainder\n");
    out.push_str("- close_long / close_short / hold / wait require: reasoning only\n\n");
    out.push_str("## Protective order status\n\n");
    out.push_str("Each position below lists its working stop/take orders. If a position shows no stop-loss protection, set one immediately with update_stop_loss. Do not resend an identical update for an order that already exists.\n");

    out
}

/// Apply the operator's personal strategy: replace the base entirely when
/// override_base is set, otherwise append after it
pub fn build_system_prompt_with_custom(
    account_equity: f64,
    btc_eth_leverage: u32,
    altcoin_leverage: u32,
    custom_prompt: &str,
    override_base: bool,
    template_name: &str,
) -> String {
    if override_base && !custom_prompt.is_empty() {
        return custom_prompt.to_string();
    }

    let base = build_system_prompt(
        account_equity,
        btc_eth_leverage,
        altcoin_leverage,
        template_name,
    );
    if custom_prompt.is_empty() {
        return base;
    }

    format!(
        "{}\n\n# Personal strategy\n\n{}\n\nNote: the personal strategy supplements the base rules and cannot override the hard risk constraints.\n",
        base, custom_prompt
    )
}

// =============================================================================
// USER PROMPT
// =============================================================================

pub fn build_user_prompt(ctx: &Context) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "Time: {} | Cycle: #{} | Runtime: {} minutes\n\n",
        ctx.current_time, ctx.cycle_index, ctx.runtime_minutes
    ));

    // BTC overview with its pattern blocks
    if let Some(btc) = ctx.market_data.get("BTCUSDT") {
        out.push_str(&btc.format_line());
        out.push('\n');
        if let Some(analyses) = ctx.pattern_analyses.get("BTCUSDT") {
            if !analyses.is_empty() {
                out.push_str("\n### BTC multi-timeframe patterns\n\n");
                push_pattern_blocks(&mut out, analyses);
            }
        }
        out.push('\n');
    }

    // Account line with an advisory when plenty of balance sits idle
    let account = &ctx.account;
    let available_pct = if account.total_equity > 0.0 {
        account.available_balance / account.total_equity * 100.0
    } else {
        0.0
    };
    out.push_str(&format!(
        "Account: equity {:.2} | available {:.2} ({:.1}%) | PnL {:+.2}% | margin {:.1}% | positions {}\n",
        account.total_equity,
        account.available_balance,
        available_pct,
        account.total_pnl_pct,
        account.margin_used_pct,
        account.position_count
    ));
    if available_pct > 50.0 {
        out.push_str(&format!(
            "Note: {:.1}% of equity is idle; if a high-conviction setup appears, size toward the upper end of the allowed range\n",
            available_pct
        ));
    }
    out.push('\n');

    // Market summary
    let summary = &ctx.market_summary;
    out.push_str(&format!(
        "Market state: trend={} | volatility={} | liquidity={}\n",
        summary.trend.as_str(),
        summary.volatility.as_str(),
        summary.liquidity.as_str()
    ));
    if !summary.suggested_action.is_empty() {
        out.push_str(&format!("Suggested stance: {}\n", summary.suggested_action));
    }
    for note in &summary.notes {
        out.push_str(&format!("- {}\n", note));
    }
    out.push('\n');

    // Positions
    if ctx.positions.is_empty() {
        out.push_str("Open positions: none\n\n");
    } else {
        out.push_str("## Open positions\n\n");
        for (i, pos) in ctx.positions.iter().enumerate() {
            push_position_block(&mut out, ctx, i, pos);
        }
    }

    // Candidates
    out.push_str(&format!(
        "## Candidate symbols ({} with data)\n\n",
        ctx.candidates
            .iter()
            .filter(|c| ctx.market_data.contains_key(&c.symbol))
            .count()
    ));
    let mut shown = 0;
    for candidate in &ctx.candidates {
        let data = match ctx.market_data.get(&candidate.symbol) {
            Some(data) => data,
            None => continue,
        };
        shown += 1;
        out.push_str(&format!(
            "### {}. {}{}\n\n",
            shown,
            candidate.symbol,
            source_tags(&candidate.sources)
        ));
        out.push_str(&data.format_line());
        out.push('\n');
        if let Some(oi) = ctx.oi_top.get(&candidate.symbol) {
            out.push_str(&format!(
                "OI leaderboard #{}: OI {:+.1}% | price {:+.1}% | net long {:.0} / net short {:.0}\n",
                oi.rank, oi.oi_delta_percent, oi.price_delta_percent, oi.net_long, oi.net_short
            ));
        }
        if let Some(analyses) = ctx.pattern_analyses.get(&candidate.symbol) {
            if !analyses.is_empty() {
                out.push('\n');
                push_pattern_blocks(&mut out, analyses);
            }
        }
        out.push('\n');
    }

    // Performance feedback
    if let Some(performance) = &ctx.performance {
        out.push_str(&format!("## Sharpe ratio: {:.2}\n\n", performance.sharpe_ratio));

        if !performance.recent_trades.is_empty() {
            out.push_str("## Recent trades\n\n");
            for (i, trade) in performance.recent_trades.iter().enumerate() {
                let result = if trade.pnl >= 0.0 { "WIN " } else { "LOSS" };
                let stop_tag = if trade.was_stop_loss { " [stopped out]" } else { "" };
                out.push_str(&format!(
                    "{} {}. [{} -> {}] {} {} ({}x){}\n",
                    result,
                    i + 1,
                    trade.open_time.format("%m-%d %H:%M"),
                    trade.close_time.format("%H:%M"),
                    trade.symbol,
                    trade.side.to_uppercase(),
                    trade.leverage,
                    stop_tag
                ));
                out.push_str(&format!(
                    "   open @ {:.4} -> close @ {:.4} ({:+.2}%) | PnL {:+.2} USDT | held {}\n",
                    trade.open_price, trade.close_price, trade.pnl_pct, trade.pnl, trade.duration
                ));
            }
            out.push('\n');
        }
    }

    out.push_str("---\n\nAnalyze and output your decisions (reasoning + JSON).\n");
    out
}

fn push_position_block(out: &mut String, ctx: &Context, index: usize, pos: &PositionInfo) {
    let holding = holding_duration(pos.update_time);
    let position_value = pos.quantity * pos.mark_price;
    out.push_str(&format!(
        "{}. {} {} | entry {:.4} mark {:.4} | qty {:.4} | value {:.2} USDT | PnL {:+.2}% ({:+.2} USDT) | peak {:.2}% | {}x | margin {:.0} | liq {:.4}{}\n",
        index + 1,
        pos.symbol,
        pos.side.as_str().to_uppercase(),
        pos.entry_price,
        pos.mark_price,
        pos.quantity,
        position_value,
        pos.unrealized_pnl_pct,
        pos.unrealized_pnl,
        pos.peak_pnl_pct,
        pos.leverage,
        pos.margin_used,
        pos.liquidation_price,
        holding
    ));

    // Working protective orders so the model does not double-place
    let mut has_stop = false;
    for order in ctx.open_orders.iter().filter(|o| o.symbol == pos.symbol) {
        match order.order_type {
            OrderType::StopMarket => {
                out.push_str(&format!(
                    "   stop order: {:.4} ({})\n",
                    order.stop_price, order.side
                ));
                has_stop = true;
            }
            OrderType::TakeProfitMarket => {
                out.push_str(&format!(
                    "   take order: {:.4} ({})\n",
                    order.stop_price, order.side
                ));
            }
            _ => {}
        }
    }
    if !has_stop {
        out.push_str("   WARNING: this position has no stop-loss protection\n");
    }
    out.push('\n');

    if let Some(data) = ctx.market_data.get(&pos.symbol) {
        out.push_str(&data.format_line());
        out.push('\n');
    }
    if let Some(analyses) = ctx.pattern_analyses.get(&pos.symbol) {
        if !analyses.is_empty() {
            out.push_str("\n#### Multi-timeframe patterns\n\n");
            push_pattern_blocks(out, analyses);
        }
    }
    out.push('\n');
}

fn push_pattern_blocks(
    out: &mut String,
    analyses: &HashMap<String, super::patterns::PatternAnalysis>,
) {
    for timeframe in TIMEFRAME_ORDER {
        if let Some(analysis) = analyses.get(timeframe) {
            out.push_str(&analysis.format_for_prompt());
        }
    }
}

fn source_tags(sources: &[SymbolSource]) -> String {
    if sources.len() > 1 {
        " (ai500 + oi_top dual signal)".to_string()
    } else {
        match sources.first() {
            Some(SymbolSource::OiTop) => " (oi_top inflow)".to_string(),
            Some(SymbolSource::UserSelected) => " (user selected)".to_string(),
            _ => String::new(),
        }
    }
}

fn holding_duration(first_seen_ms: i64) -> String {
    if first_seen_ms <= 0 {
        return String::new();
    }
    let minutes = (Utc::now().timestamp_millis() - first_seen_ms) / 60_000;
    if minutes < 0 {
        return String::new();
    }
    if minutes < 60 {
        format!(" | held {}m", minutes)
    } else {
        format!(" | held {}h{}m", minutes / 60, minutes % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::summary::MarketSummary;
    use crate::decision::types::{AccountInfo, CandidateSymbol};
    use crate::exchange::Side;

    fn empty_context() -> Context {
        Context {
            current_time: "2026-08-02 12:00:00".to_string(),
            runtime_minutes: 42,
            cycle_index: 7,
            account: AccountInfo {
                total_equity: 1000.0,
                available_balance: 800.0,
                unrealized_pnl: 0.0,
                total_pnl: 0.0,
                total_pnl_pct: 0.0,
                margin_used: 200.0,
                margin_used_pct: 20.0,
                position_count: 0,
            },
            positions: vec![],
            open_orders: vec![],
            candidates: vec![],
            market_data: HashMap::new(),
            oi_top: HashMap::new(),
            pattern_analyses: HashMap::new(),
            market_summary: MarketSummary::default(),
            timeframes: vec!["1h".to_string()],
            btc_eth_leverage: 10,
            altcoin_leverage: 5,
            taker_fee_rate: 0.0004,
            maker_fee_rate: 0.0002,
            performance: None,
        }
    }

    #[test]
    fn test_system_prompt_enumerates_all_actions() {
        let prompt = build_system_prompt(1000.0, 10, 5, "default");
        for tag in [
            "open_long",
            "open_short",
            "close_long",
            "close_short",
            "update_stop_loss",
            "update_take_profit",
            "partial_close",
            "hold",
            "wait",
        ] {
            assert!(prompt.contains(tag), "missing action tag {}", tag);
        }
        assert!(prompt.contains(">= 3:1"));
        assert!(prompt.contains("max 10x"));
        assert!(prompt.contains("confidence >= 80"));
        assert!(prompt.contains("90%"));
    }

    #[test]
    fn test_system_prompt_position_bands_scale_with_equity() {
        let prompt = build_system_prompt(100.0, 10, 5, "default");
        assert!(prompt.contains("altcoins 250-500 USDT"));
        assert!(prompt.contains("BTC/ETH 500-1000 USDT"));
    }

    #[test]
    fn test_unknown_template_falls_back_to_default() {
        let from_unknown = build_system_prompt(1000.0, 10, 5, "nonexistent");
        let from_default = build_system_prompt(1000.0, 10, 5, "default");
        assert_eq!(from_unknown, from_default);
    }

    #[test]
    fn test_custom_prompt_override_and_append() {
        let replaced =
            build_system_prompt_with_custom(1000.0, 10, 5, "only trade BTC", true, "default");
        assert_eq!(replaced, "only trade BTC");

        let appended =
            build_system_prompt_with_custom(1000.0, 10, 5, "only trade BTC", false, "default");
        assert!(appended.contains("# Personal strategy"));
        assert!(appended.contains("only trade BTC"));
        assert!(appended.contains("# Hard constraints"));
    }

    #[test]
    fn test_user_prompt_idle_balance_note() {
        let ctx = empty_context();
        let prompt = build_user_prompt(&ctx);
        assert!(prompt.contains("80.0%"));
        assert!(prompt.contains("idle"));
        assert!(prompt.contains("Open positions: none"));
    }

    #[test]
    fn test_user_prompt_flags_unprotected_position() {
        let mut ctx = empty_context();
        ctx.positions.push(PositionInfo {
            symbol: "ETHUSDT".to_string(),
            side: Side::Long,
            entry_price: 3000.0,
            mark_price: 3050.0,
            quantity: 0.5,
            leverage: 5,
            unrealized_pnl: 25.0,
            unrealized_pnl_pct: 8.3,
            peak_pnl_pct: 12.0,
            liquidation_price: 2500.0,
            margin_used: 300.0,
            update_time: Utc::now().timestamp_millis(),
            stop_loss: None,
            take_profit: None,
        });
        let prompt = build_user_prompt(&ctx);
        assert!(prompt.contains("no stop-loss protection"));
    }

    #[test]
    fn test_user_prompt_candidate_source_tags() {
        let mut ctx = empty_context();
        ctx.candidates.push(CandidateSymbol {
            symbol: "SOLUSDT".to_string(),
            sources: vec![SymbolSource::Ai500, SymbolSource::OiTop],
        });
        // No market data for SOL: candidate should be skipped entirely
        let prompt = build_user_prompt(&ctx);
        assert!(!prompt.contains("SOLUSDT"));
    }
}
