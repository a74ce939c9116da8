use rust_decimal::Decimal;
use serde::Deserialize;
use tradesim_models::agent_message::{MarketSnapshot, TradeAction};
use tradesim_models::ledger::ActionType;

use crate::error::AgentError;

/// Trading decision as the model writes it. Prices are not trusted from the model;
/// they are filled in from the day's opening prices.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AgentDecision {
    #[serde(default)]
    pub actions: Vec<DecisionAction>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DecisionAction {
    #[serde(alias = "type", alias = "action_type")]
    pub action: ActionType,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub quantity: Decimal,
}

/// Pull the first JSON object out of free-form model output.
///
/// Accepts bare JSON, fenced code blocks (with or without a `json` tag), and objects
/// embedded in surrounding prose.
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    let candidates = std::iter::once(Some(trimmed.to_string()))
        .chain(std::iter::once(fenced_block(trimmed)))
        .chain(std::iter::once(first_balanced_object(trimmed)))
        .flatten();
    for candidate in candidates {
        if candidate.starts_with('{')
            && serde_json::from_str::<serde_json::Value>(&candidate).is_ok()
        {
            return Ok(candidate);
        }
    }

    Err(AgentError::Parse(format!(
        "No valid JSON object found in response (length={})",
        text.len()
    )))
}

fn fenced_block(text: &str) -> Option<String> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim().to_string())
}

fn first_balanced_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=start + offset].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse an `AgentDecision` from raw Claude CLI output.
pub fn parse_decision(raw: &str) -> Result<AgentDecision, AgentError> {
    let json_str = extract_json(raw)?;
    serde_json::from_str(&json_str)
        .map_err(|e| AgentError::Parse(format!("Failed to parse decision: {e}\nJSON: {json_str}")))
}

/// Turn a decision into priced trade actions. An empty decision becomes one `NoTrade`.
pub fn priced_actions(
    decision: &AgentDecision,
    snapshot: &MarketSnapshot,
) -> Result<Vec<TradeAction>, AgentError> {
    let mut actions = Vec::with_capacity(decision.actions.len().max(1));
    for entry in &decision.actions {
        if entry.action == ActionType::NoTrade {
            actions.push(TradeAction::no_trade());
            continue;
        }
        let symbol = entry
            .symbol
            .as_deref()
            .ok_or_else(|| AgentError::Rejected(format!("{} without a symbol", entry.action)))?;
        let price = snapshot.price(symbol).ok_or_else(|| {
            AgentError::Rejected(format!("{symbol} is not tradable on {}", snapshot.date))
        })?;
        actions.push(TradeAction {
            action_type: entry.action,
            symbol: Some(symbol.to_string()),
            quantity: entry.quantity,
            price,
        });
    }
    if actions.is_empty() {
        actions.push(TradeAction::no_trade());
    }
    Ok(actions)
}
