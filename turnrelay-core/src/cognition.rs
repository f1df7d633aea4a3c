//! Thinking-level and reasoning-flag inference.
//!
//! A turn's cognition settings are scattered across event, context, usage
//! counters, and model identity, and no single source is reliable. The
//! resolution here layers those signals by trustworthiness: an explicit
//! setting beats a derived token count, which beats the static
//! model-capability table, which beats carried-over prior state, which beats
//! the hardcoded default. The ordering is part of the wire contract and must
//! not be rearranged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extract::{as_bool, as_int, as_str, first_defined};
use crate::snapshot::Snapshot;

/// Candidate paths for an explicit thinking level on the event object.
pub const THINKING_EVENT_PATHS: &[&str] = &[
    "thinking",
    "thinkingLevel",
    "reasoningEffort",
    "reasoning.effort",
    "reasoning.level",
    "settings.reasoningEffort",
    "metadata.thinking",
    "metadata.reasoningEffort",
    "config.reasoningEffort",
    "options.reasoningEffort",
];

/// Candidate paths for an explicit thinking level on the context object.
pub const THINKING_CTX_PATHS: &[&str] = &[
    "thinking",
    "thinkingLevel",
    "reasoningEffort",
    "reasoning.effort",
    "settings.reasoningEffort",
    "metadata.thinking",
    "metadata.reasoningEffort",
    "modelSettings.reasoningEffort",
    "session.modelSettings.reasoningEffort",
];

/// Candidate paths for an explicit reasoning flag on the event object.
pub const REASONING_EVENT_PATHS: &[&str] = &[
    "reasoning.enabled",
    "reasoning",
    "reasoningEnabled",
    "settings.reasoning",
    "settings.reasoningEnabled",
    "metadata.reasoning",
    "modelInfo.reasoning",
    "model.reasoning",
    "agent.modelInfo.reasoning",
    "capabilities.reasoning",
    "config.reasoning",
    "options.reasoning",
    "options.reasoningEnabled",
];

/// Candidate paths for an explicit reasoning flag on the context object.
pub const REASONING_CTX_PATHS: &[&str] = &[
    "reasoning.enabled",
    "reasoning",
    "reasoningEnabled",
    "settings.reasoning",
    "settings.reasoningEnabled",
    "metadata.reasoning",
    "modelInfo.reasoning",
    "model.reasoning",
    "agent.modelInfo.reasoning",
    "capabilities.reasoning",
    "modelSettings.reasoning",
    "modelSettings.reasoningEnabled",
    "session.modelSettings.reasoning",
    "session.modelSettings.reasoningEnabled",
];

/// Candidate paths for a reasoning-token count on the event object.
pub const REASONING_TOKEN_PATHS: &[&str] = &[
    "usage.reasoning_tokens",
    "usage.reasoningTokens",
    "result.usage.reasoning_tokens",
    "result.usage.reasoningTokens",
];

/// Candidate paths for the model reference used in capability lookups.
pub const MODEL_REF_PATHS: &[&str] = &[
    "modelRef",
    "model_key",
    "modelKey",
    "model",
    "agent.model",
    "metadata.model",
];

/// Known model ids and whether they run with extended reasoning.
///
/// Provider-qualified ids are authoritative; bare model ids are ambiguous
/// across providers and deliberately absent so they resolve to "unknown".
const MODEL_REASONING: &[(&str, bool)] = &[
    ("nvidia/moonshotai/kimi-k2.5", true),
    ("openrouter/moonshotai/kimi-k2.5", false),
];

/// Normalized thinking level for a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThinkingLevel::Low => "low",
            ThinkingLevel::Medium => "medium",
            ThinkingLevel::High => "high",
        }
    }
}

impl std::fmt::Display for ThinkingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inferred cognition settings for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cognition {
    pub thinking: ThinkingLevel,
    pub reasoning: bool,
}

/// Normalize a loose thinking value to a level.
///
/// Numeric effort buckets: `<= 1` low, `>= 3` high, otherwise medium.
/// Strings match exact levels first, then known aliases, then substrings.
/// Unrecognized values return `None` (absent, not an error).
pub fn normalize_thinking(value: &Value) -> Option<ThinkingLevel> {
    if let Value::Number(n) = value {
        let effort = n.as_f64().filter(|f| f.is_finite())?;
        return Some(if effort <= 1.0 {
            ThinkingLevel::Low
        } else if effort >= 3.0 {
            ThinkingLevel::High
        } else {
            ThinkingLevel::Medium
        });
    }

    let normalized = as_str(Some(value), "").to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    match normalized.as_str() {
        "low" => return Some(ThinkingLevel::Low),
        "medium" => return Some(ThinkingLevel::Medium),
        "high" => return Some(ThinkingLevel::High),
        "minimal" | "min" | "none" | "off" => return Some(ThinkingLevel::Low),
        "default" | "normal" | "std" => return Some(ThinkingLevel::Medium),
        _ => {}
    }
    if normalized.contains("high") {
        Some(ThinkingLevel::High)
    } else if normalized.contains("med") {
        Some(ThinkingLevel::Medium)
    } else if normalized.contains("low") {
        Some(ThinkingLevel::Low)
    } else {
        None
    }
}

/// Look up whether a model id is known to support extended reasoning.
///
/// Returns `None` for unknown or unqualified ids: ambiguity must not force
/// the flag either way.
pub fn model_supports_reasoning(model_ref: &str) -> Option<bool> {
    let normalized = model_ref.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    MODEL_REASONING
        .iter()
        .find(|(id, _)| *id == normalized)
        .map(|(_, reasoning)| *reasoning)
}

fn thinking_from(source: &Value, paths: &[&str]) -> Option<ThinkingLevel> {
    first_defined(source, paths).and_then(normalize_thinking)
}

fn capability_from(source: &Value) -> Option<bool> {
    let model_ref = as_str(first_defined(source, MODEL_REF_PATHS), "");
    model_supports_reasoning(&model_ref)
}

/// Infer cognition settings from an event, its context, and prior state.
pub fn infer(event: &Value, ctx: &Value, prior: Option<&Snapshot>) -> Cognition {
    let thinking = thinking_from(event, THINKING_EVENT_PATHS)
        .or_else(|| thinking_from(ctx, THINKING_CTX_PATHS))
        .or_else(|| prior.map(|p| p.thinking))
        .unwrap_or_default();

    let reasoning_tokens = as_int(first_defined(event, REASONING_TOKEN_PATHS), 0);

    let reasoning = as_bool(first_defined(event, REASONING_EVENT_PATHS))
        .or_else(|| as_bool(first_defined(ctx, REASONING_CTX_PATHS)))
        .or(if reasoning_tokens > 0 { Some(true) } else { None })
        .or_else(|| capability_from(event))
        .or_else(|| capability_from(ctx))
        .unwrap_or_else(|| prior.map(|p| p.reasoning).unwrap_or(false));

    Cognition { thinking, reasoning }
}
