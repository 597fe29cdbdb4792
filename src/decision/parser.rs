/// Model reply parsing
///
/// The reply is expected to carry a `<reasoning>` block and a `<decision>`
/// block wrapping a fenced JSON array, but models drift: tags go missing,
/// punctuation comes back full-width, numbers grow thousands separators.
/// Extraction therefore walks a fallback ladder, sanitizes before parsing,
/// and degrades to a single safe `wait` action when no JSON can be found at
/// all, so a bad reply never kills the cycle.
use super::sizing::min_position_size;
use super::types::{is_btc_eth, Action, Decision, OpenParams};
use crate::errors::DecisionError;
use crate::logger::{self, LogTag};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

const MIN_OPEN_CONFIDENCE: f64 = 80.0;
const MIN_REWARD_RISK_RATIO: f64 = 3.0;
/// Assumed entry location between stop and take when estimating reward/risk
const ENTRY_FRACTION: f64 = 0.2;
const FALLBACK_TRACE_CHARS: usize = 240;

static RE_REASONING_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<reasoning>(.*?)</reasoning>").unwrap());
static RE_DECISION_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<decision>(.*?)</decision>").unwrap());
static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```json\s*(\[\s*\{.*?\}\s*\])\s*```").unwrap());
static RE_JSON_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)\[\s*\{.*?\}\s*\]").unwrap());
static RE_ARRAY_HEAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[\s*\{").unwrap());
static RE_ARRAY_OPEN_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[\s+\{").unwrap());
static RE_INVISIBLE: Lazy<Regex> =
    Lazy::new(|| Regex::new("[\u{200B}\u{200C}\u{200D}\u{FEFF}]").unwrap());

// =============================================================================
// RESULT TYPES
// =============================================================================

/// Parsed and validated reply. Rejected actions are dropped; their reasons
/// land in `notes` for the execution log.
#[derive(Debug, Clone)]
pub struct ParsedReply {
    pub cot_trace: String,
    pub decisions: Vec<Decision>,
    pub notes: Vec<String>,
}

/// Wire shape of one model action. Everything optional; the validator
/// decides what each action tag actually requires.
#[derive(Debug, Clone, Deserialize)]
struct RawDecision {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    leverage: Option<f64>,
    #[serde(default)]
    position_size_usd: Option<f64>,
    #[serde(default)]
    stop_loss: Option<f64>,
    #[serde(default)]
    take_profit: Option<f64>,
    #[serde(default)]
    new_stop_loss: Option<f64>,
    #[serde(default)]
    new_take_profit: Option<f64>,
    #[serde(default)]
    close_percentage: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    risk_usd: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

// =============================================================================
// ENTRY POINT
// =============================================================================

/// Parse a raw model reply into a reasoning trace plus validated decisions.
///
/// Equity and leverage caps drive numeric validation of open actions.
pub fn parse_full_reply(
    reply: &str,
    account_equity: f64,
    btc_eth_leverage: u32,
    altcoin_leverage: u32,
) -> Result<ParsedReply, DecisionError> {
    let cot_trace = extract_cot_trace(reply);
    let raw_decisions = extract_raw_decisions(reply)?;

    let mut decisions = Vec::new();
    let mut notes = Vec::new();
    for (index, raw) in raw_decisions.into_iter().enumerate() {
        match validate_raw(raw, index, account_equity, btc_eth_leverage, altcoin_leverage) {
            Ok(decision) => decisions.push(decision),
            Err(err) => {
                logger::warning(LogTag::Decision, &err.to_string());
                notes.push(err.to_string());
            }
        }
    }

    Ok(ParsedReply {
        cot_trace,
        decisions,
        notes,
    })
}

// =============================================================================
// EXTRACTION
// =============================================================================

/// Reasoning trace fallback ladder: <reasoning> tag, then everything before
/// <decision>, then everything before the first '[', then the whole reply.
fn extract_cot_trace(reply: &str) -> String {
    if let Some(captures) = RE_REASONING_TAG.captures(reply) {
        return captures[1].trim().to_string();
    }

    if let Some(idx) = reply.find("<decision>") {
        if idx > 0 {
            return reply[..idx].trim().to_string();
        }
    }

    if let Some(idx) = reply.find('[') {
        if idx > 0 {
            return reply[..idx].trim().to_string();
        }
    }

    reply.trim().to_string()
}

fn extract_raw_decisions(reply: &str) -> Result<Vec<RawDecision>, DecisionError> {
    // Sanitize before any regex runs: ASCII patterns cannot match full-width
    // brackets
    let cleaned = sanitize_punctuation(&strip_invisible(reply));
    let cleaned = cleaned.trim();

    let json_part = match RE_DECISION_TAG.captures(cleaned) {
        Some(captures) => captures[1].trim().to_string(),
        None => cleaned.to_string(),
    };

    // Fenced block first, bare array second
    if let Some(captures) = RE_JSON_FENCE.captures(&json_part) {
        let content = sanitize_punctuation(&compact_array_open(captures[1].trim()));
        return parse_decision_array(&content, reply);
    }

    let found = RE_JSON_ARRAY
        .find(&json_part)
        .map(|m| m.as_str().trim().to_string());
    match found {
        Some(content) => {
            let content = sanitize_punctuation(&compact_array_open(&content));
            parse_decision_array(&content, reply)
        }
        None => {
            // Nothing JSON-shaped anywhere: degrade to a safe wait so the
            // cycle continues
            logger::warning(
                LogTag::Decision,
                "model reply carried no JSON decisions, entering safe wait",
            );
            let summary: String = json_part.chars().take(FALLBACK_TRACE_CHARS).collect();
            let suffix = if json_part.chars().count() > FALLBACK_TRACE_CHARS {
                "..."
            } else {
                ""
            };
            Ok(vec![RawDecision {
                symbol: Some("ALL".to_string()),
                action: Some("wait".to_string()),
                leverage: None,
                position_size_usd: None,
                stop_loss: None,
                take_profit: None,
                new_stop_loss: None,
                new_take_profit: None,
                close_percentage: None,
                confidence: None,
                risk_usd: None,
                reasoning: Some(format!(
                    "model emitted no structured decisions, waiting; summary: {}{}",
                    summary, suffix
                )),
            }])
        }
    }
}

fn parse_decision_array(content: &str, full_reply: &str) -> Result<Vec<RawDecision>, DecisionError> {
    validate_json_format(content).map_err(|reason| DecisionError::BadModelReply {
        message: format!("{}; content: {}", reason, truncate(content, 120)),
    })?;

    serde_json::from_str::<Vec<RawDecision>>(content).map_err(|e| {
        logger::debug(
            LogTag::Decision,
            &format!("JSON parse failed: {}; reply: {}", e, truncate(full_reply, 400)),
        );
        DecisionError::BadModelReply {
            message: format!("JSON parse failed: {}", e),
        }
    })
}

// =============================================================================
// SANITIZATION
// =============================================================================

/// Strip zero-width characters and BOM
fn strip_invisible(s: &str) -> String {
    RE_INVISIBLE.replace_all(s, "").into_owned()
}

/// Replace full-width/CJK punctuation and curly quotes with ASCII.
/// Idempotent: running it twice is the same as running it once.
fn sanitize_punctuation(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '［' => out.push('['),
            '］' => out.push(']'),
            '｛' => out.push('{'),
            '｝' => out.push('}'),
            '：' => out.push(':'),
            '，' => out.push(','),
            '【' | '〔' => out.push('['),
            '】' | '〕' => out.push(']'),
            '、' => out.push(','),
            '\u{3000}' => out.push(' '),
            other => out.push(other),
        }
    }
    out
}

/// Normalize a leading "[ {" to "[{"
fn compact_array_open(s: &str) -> String {
    RE_ARRAY_OPEN_SPACE
        .replace(s.trim(), "[{")
        .into_owned()
}

/// Reject shapes serde would happily mangle: non-object arrays, range
/// notation, thousands separators in numbers.
fn validate_json_format(s: &str) -> Result<(), String> {
    let trimmed = s.trim();

    if !RE_ARRAY_HEAD.is_match(trimmed) {
        let head: String = trimmed.chars().take(20).collect();
        if trimmed.starts_with('[') && !head.contains('{') {
            return Err(format!(
                "not a decision array (must contain objects), starts with: {}",
                head
            ));
        }
        return Err(format!("JSON must start with [{{, starts with: {}", head));
    }

    if contains_tilde_outside_strings(trimmed) {
        return Err("numbers cannot use range notation '~'".to_string());
    }

    check_thousands_separators(trimmed)
}

/// Character-level scan for `d,ddd` patterns outside string literals,
/// honoring \" escapes
fn check_thousands_separators(s: &str) -> Result<(), String> {
    let bytes = s.as_bytes();
    let mut in_string = false;
    let mut escaped = false;

    for i in 0..bytes.len() {
        let b = bytes[i];
        if b == b'"' && !escaped {
            in_string = !in_string;
        }
        escaped = b == b'\\' && !escaped;

        if in_string || i + 4 >= bytes.len() {
            continue;
        }

        if bytes[i].is_ascii_digit()
            && bytes[i + 1] == b','
            && bytes[i + 2].is_ascii_digit()
            && bytes[i + 3].is_ascii_digit()
            && bytes[i + 4].is_ascii_digit()
        {
            let end = (i + 10).min(s.len());
            return Err(format!(
                "numbers cannot contain thousands separators, found: {}",
                &s[i..end]
            ));
        }
    }
    Ok(())
}

fn contains_tilde_outside_strings(s: &str) -> bool {
    let mut in_string = false;
    let mut escaped = false;
    for b in s.bytes() {
        if b == b'"' && !escaped {
            in_string = !in_string;
        }
        escaped = b == b'\\' && !escaped;
        if b == b'~' && !in_string {
            return true;
        }
    }
    false
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

fn validate_raw(
    raw: RawDecision,
    index: usize,
    account_equity: f64,
    btc_eth_leverage: u32,
    altcoin_leverage: u32,
) -> Result<Decision, DecisionError> {
    let reject = |reason: String| DecisionError::ValidationFailed { index, reason };

    let symbol = raw
        .symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| reject("missing symbol".to_string()))?
        .to_uppercase();
    let action_tag = raw
        .action
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| reject("missing action".to_string()))?
        .to_lowercase();
    let reasoning = raw.reasoning.clone().unwrap_or_default();
    let mut adjustment_notes = Vec::new();

    let action = match action_tag.as_str() {
        "open_long" | "open_short" => {
            let is_long = action_tag == "open_long";
            let params = validate_open_params(
                &raw,
                &symbol,
                index,
                is_long,
                account_equity,
                btc_eth_leverage,
                altcoin_leverage,
                &mut adjustment_notes,
            )?;
            if is_long {
                Action::OpenLong { params }
            } else {
                Action::OpenShort { params }
            }
        }
        "close_long" => Action::CloseLong,
        "close_short" => Action::CloseShort,
        "update_stop_loss" => {
            let new_stop_loss = raw.new_stop_loss.unwrap_or(0.0);
            if new_stop_loss <= 0.0 {
                return Err(reject(format!(
                    "new_stop_loss must be greater than 0: {:.4}",
                    new_stop_loss
                )));
            }
            Action::UpdateStopLoss { new_stop_loss }
        }
        "update_take_profit" => {
            let new_take_profit = raw.new_take_profit.unwrap_or(0.0);
            if new_take_profit <= 0.0 {
                return Err(reject(format!(
                    "new_take_profit must be greater than 0: {:.4}",
                    new_take_profit
                )));
            }
            Action::UpdateTakeProfit { new_take_profit }
        }
        "partial_close" => {
            let close_percentage = raw.close_percentage.unwrap_or(0.0);
            if close_percentage <= 0.0 || close_percentage > 100.0 {
                return Err(reject(format!(
                    "close_percentage must be in (0, 100]: {:.1}",
                    close_percentage
                )));
            }
            Action::PartialClose {
                close_percentage,
                new_stop_loss: raw.new_stop_loss.filter(|v| *v > 0.0),
                new_take_profit: raw.new_take_profit.filter(|v| *v > 0.0),
            }
        }
        "hold" => Action::Hold {
            new_stop_loss: raw.new_stop_loss.filter(|v| *v > 0.0),
            new_take_profit: raw.new_take_profit.filter(|v| *v > 0.0),
        },
        "wait" => Action::Wait,
        other => return Err(reject(format!("unknown action: {}", other))),
    };

    Ok(Decision {
        symbol,
        action,
        reasoning,
        adjustment_notes,
    })
}

fn validate_open_params(
    raw: &RawDecision,
    symbol: &str,
    index: usize,
    is_long: bool,
    account_equity: f64,
    btc_eth_leverage: u32,
    altcoin_leverage: u32,
    notes: &mut Vec<String>,
) -> Result<OpenParams, DecisionError> {
    let reject = |reason: String| DecisionError::ValidationFailed { index, reason };

    let confidence = raw.confidence.unwrap_or(0.0);
    if confidence < MIN_OPEN_CONFIDENCE {
        return Err(reject(format!(
            "confidence {:.0} below {}; opens require high-conviction setups",
            confidence, MIN_OPEN_CONFIDENCE
        )));
    }

    let cap = if is_btc_eth(symbol) {
        btc_eth_leverage
    } else {
        altcoin_leverage
    };

    let mut leverage = raw.leverage.unwrap_or(0.0);
    if leverage <= 0.0 {
        return Err(reject(format!(
            "leverage must be greater than 0: {:.0}",
            leverage
        )));
    }
    if leverage > cap as f64 {
        notes.push(format!(
            "leverage {:.0}x over the {}x cap for {}, clamped",
            leverage, cap, symbol
        ));
        leverage = cap as f64;
    }

    let mut position_size_usd = raw.position_size_usd.unwrap_or(0.0);
    if position_size_usd <= 0.0 {
        return Err(reject(format!(
            "position_size_usd must be greater than 0: {:.2}",
            position_size_usd
        )));
    }

    // Position-value band cap with 1 % float tolerance
    let max_position_value = if is_btc_eth(symbol) {
        account_equity * 10.0
    } else {
        account_equity * 5.0
    };
    if position_size_usd > max_position_value * 1.01 {
        return Err(reject(format!(
            "position value {:.0} exceeds the {:.0} USDT band for {}",
            position_size_usd, max_position_value, symbol
        )));
    }

    let min_size = min_position_size(symbol, account_equity);
    if min_size > max_position_value && max_position_value > 0.0 {
        // The account cannot hold even the minimum: not a model error
        return Err(DecisionError::InsufficientEquity {
            symbol: symbol.to_string(),
            min_notional: min_size,
            available: account_equity,
        });
    }
    if position_size_usd < min_size {
        notes.push(format!(
            "position size {:.2} raised to the {:.2} USDT minimum notional",
            position_size_usd, min_size
        ));
        position_size_usd = min_size;
    }

    let stop_loss = raw.stop_loss.unwrap_or(0.0);
    let take_profit = raw.take_profit.unwrap_or(0.0);
    if stop_loss <= 0.0 || take_profit <= 0.0 {
        return Err(reject(
            "stop_loss and take_profit must both be greater than 0".to_string(),
        ));
    }

    if is_long && stop_loss >= take_profit {
        return Err(reject("long stop_loss must sit below take_profit".to_string()));
    }
    if !is_long && stop_loss <= take_profit {
        return Err(reject("short stop_loss must sit above take_profit".to_string()));
    }

    // Reward/risk under the assumed entry between stop and take
    let (risk_pct, reward_pct) = if is_long {
        let entry = stop_loss + (take_profit - stop_loss) * ENTRY_FRACTION;
        (
            (entry - stop_loss) / entry * 100.0,
            (take_profit - entry) / entry * 100.0,
        )
    } else {
        let entry = stop_loss - (stop_loss - take_profit) * ENTRY_FRACTION;
        (
            (stop_loss - entry) / entry * 100.0,
            (entry - take_profit) / entry * 100.0,
        )
    };
    let ratio = if risk_pct > 0.0 {
        reward_pct / risk_pct
    } else {
        0.0
    };
    if ratio < MIN_REWARD_RISK_RATIO {
        return Err(reject(format!(
            "reward/risk {:.2}:1 below {:.1}:1 [risk {:.2}% reward {:.2}%] [stop {:.4} take {:.4}]",
            ratio, MIN_REWARD_RISK_RATIO, risk_pct, reward_pct, stop_loss, take_profit
        )));
    }

    Ok(OpenParams {
        leverage: leverage.round() as u32,
        position_size_usd,
        stop_loss,
        take_profit,
        confidence: confidence.round() as u8,
        risk_usd: raw.risk_usd.unwrap_or(0.0),
    })
}
