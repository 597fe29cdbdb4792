/// Decision engine: context -> prompts -> model -> validated actions
pub mod context;
pub mod parser;
pub mod patterns;
pub mod prompts;
pub mod sizing;
pub mod summary;
pub mod types;

pub use context::{candidate_cap, ContextBuilder, PositionBook};
pub use parser::{parse_full_reply, ParsedReply};
pub use patterns::{analyze_patterns, PatternAnalysis};
pub use summary::{MarketSummary, Trend, Volatility};
pub use types::{
    normalize_symbol, position_key, Action, CandidateSymbol, Context, Decision, FullDecision,
    OpenParams, PositionInfo,
};

use crate::apis::llm::{system_user_request, LlmClient};
use crate::errors::{BotError, DecisionError};
use crate::logger::{self, LogTag};
use chrono::Utc;

/// One model round-trip plus parse outcome. `parse_error` is set when JSON
/// was present but unusable; the trace and prompts are still captured so the
/// journal keeps a full record of the failed cycle.
pub struct DecisionRound {
    pub full: FullDecision,
    /// Per-action validation rejections, for the execution log
    pub notes: Vec<String>,
    pub parse_error: Option<DecisionError>,
}

/// Build both prompts, call the model, and parse the reply.
///
/// A transport-level model failure is the only hard error; parse failures
/// come back inside the round so the caller can journal them.
pub async fn request_full_decision(
    ctx: &Context,
    llm: &dyn LlmClient,
    custom_prompt: &str,
    override_base: bool,
    template_name: &str,
) -> Result<DecisionRound, BotError> {
    let system_prompt = prompts::build_system_prompt_with_custom(
        ctx.account.total_equity,
        ctx.btc_eth_leverage,
        ctx.altcoin_leverage,
        custom_prompt,
        override_base,
        template_name,
    );
    let user_prompt = prompts::build_user_prompt(ctx);

    let request = system_user_request("", system_prompt.clone(), user_prompt.clone());
    let response = llm
        .call(request)
        .await
        .map_err(|e| BotError::Decision(DecisionError::BadModelReply {
            message: format!("model call failed: {}", e),
        }))?;

    logger::debug(
        LogTag::Ai,
        &format!(
            "model replied in {}ms ({} tokens)",
            response.latency_ms, response.usage.total_tokens
        ),
    );

    let (cot_trace, decisions, notes, parse_error) = match parse_full_reply(
        &response.content,
        ctx.account.total_equity,
        ctx.btc_eth_leverage,
        ctx.altcoin_leverage,
    ) {
        Ok(parsed) => (parsed.cot_trace, parsed.decisions, parsed.notes, None),
        Err(err) => {
            // Keep whatever trace we can recover for the journal
            let trace = response.content.trim().to_string();
            (trace, vec![], vec![], Some(err))
        }
    };

    Ok(DecisionRound {
        full: FullDecision {
            system_prompt,
            user_prompt,
            cot_trace,
            decisions,
            timestamp: Utc::now(),
            ai_request_duration_ms: response.latency_ms,
        },
        notes,
        parse_error,
    })
}
