//! Tolerant field extraction from loose hook event/context objects.
//!
//! Hook payloads arrive as framework-defined JSON whose shape varies by host
//! version and by which subsystem emitted the event. Every consumer in this
//! crate goes through this module instead of touching raw shapes directly:
//! each field has an ordered list of candidate dotted paths (kept as `const`
//! data so the lookup order is inspectable and testable), and extraction
//! never fails: a missing or malformed field degrades to the caller's
//! fallback.
//!
//! Coercion rules:
//! - integers round to nearest and reject non-finite values;
//! - strings are trimmed, an empty result counts as absent, and numbers or
//!   booleans are accepted by stringifying them;
//! - booleans accept `true/1/yes/on/enabled` and `false/0/no/off/disabled`
//!   string forms, and nonzero numbers.

use serde_json::Value;

/// Candidate paths for the channel identifier on the context object.
pub const CHANNEL_CTX_PATHS: &[&str] = &["channelId", "messageProvider", "commandSource"];

/// Candidate paths for the channel identifier on the event object.
pub const CHANNEL_EVENT_PATHS: &[&str] = &["channelId", "to"];

/// Candidate paths for the session key on the context object.
pub const SESSION_CTX_PATHS: &[&str] = &["sessionKey", "conversationId", "session.key", "threadId"];

/// Candidate paths for the session key on the event object.
pub const SESSION_EVENT_PATHS: &[&str] =
    &["sessionKey", "conversationId", "threadId", "session.key"];

/// Candidate paths for the model identifier on the event object.
pub const MODEL_EVENT_PATHS: &[&str] = &[
    "model",
    "result.model",
    "modelInfo.id",
    "agent.model",
    "metadata.model",
];

/// Candidate paths for the model identifier on the context object.
pub const MODEL_CTX_PATHS: &[&str] = &["model", "metadata.model", "agent.model"];

/// Candidate paths for the token-usage container on the event object.
pub const USAGE_CONTAINER_PATHS: &[&str] = &["usage", "result.usage", "tokenUsage", "metrics.usage"];

/// Input-token keys within a usage container.
pub const TOKENS_IN_KEYS: &[&str] = &["input", "input_tokens", "prompt_tokens"];

/// Output-token keys within a usage container.
pub const TOKENS_OUT_KEYS: &[&str] = &["output", "output_tokens", "completion_tokens"];

/// Candidate paths for the tool list on the event object.
pub const TOOLS_EVENT_PATHS: &[&str] = &[
    "tools_used",
    "toolsUsed",
    "tools",
    "turn.tools",
    "result.tools",
    "metrics.tools",
];

/// Walk a dotted path through nested JSON objects.
///
/// Returns `None` on any missing intermediate key, on non-object
/// intermediates, and on an explicit `null` leaf; `null` means "absent"
/// everywhere in this pipeline.
pub fn lookup<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = source;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Return the first defined, non-null value found by walking `paths` in order.
pub fn first_defined<'a>(source: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths.iter().find_map(|path| lookup(source, path))
}

/// Coerce a value to an integer, rounding to nearest.
///
/// Numeric strings are accepted; non-finite results and everything else fall
/// back.
pub fn as_int(value: Option<&Value>, fallback: i64) -> i64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    match parsed {
        Some(f) if f.is_finite() => f.round() as i64,
        _ => fallback,
    }
}

/// Coerce a value to a trimmed string.
///
/// A string that trims to empty counts as absent. Numbers and booleans are
/// stringified; other shapes fall back.
pub fn as_str(value: Option<&Value>, fallback: &str) -> String {
    match value {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                fallback.to_string()
            } else {
                trimmed.to_string()
            }
        }
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => fallback.to_string(),
    }
}

/// Coerce a value to a boolean, returning `None` when the value does not
/// express one. `None` lets callers distinguish "explicitly false" from
/// "not provided", which the cognition fallback chain depends on.
pub fn as_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" | "enabled" => Some(true),
            "false" | "0" | "no" | "off" | "disabled" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Best-known token counts for a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub tokens_in: i64,
    pub tokens_out: i64,
}

/// Extract token usage from whichever usage container the event carries.
pub fn usage(event: &Value) -> TokenUsage {
    let container = first_defined(event, USAGE_CONTAINER_PATHS);
    let Some(container) = container else {
        return TokenUsage::default();
    };
    TokenUsage {
        tokens_in: as_int(first_defined(container, TOKENS_IN_KEYS), 0),
        tokens_out: as_int(first_defined(container, TOKENS_OUT_KEYS), 0),
    }
}

/// Resolve the channel identifier, context first, then event.
pub fn channel_key(event: &Value, ctx: &Value) -> String {
    let found = first_defined(ctx, CHANNEL_CTX_PATHS).or_else(|| first_defined(event, CHANNEL_EVENT_PATHS));
    as_str(found, crate::snapshot::UNKNOWN_CHANNEL)
}

/// Resolve the session key, context first, then event. Empty means unknown.
pub fn session_key(event: &Value, ctx: &Value) -> String {
    let from_ctx = as_str(first_defined(ctx, SESSION_CTX_PATHS), "");
    if !from_ctx.is_empty() {
        return from_ctx;
    }
    as_str(first_defined(event, SESSION_EVENT_PATHS), "")
}

/// Resolve the model identifier, event first, then context.
pub fn model(event: &Value, ctx: &Value) -> String {
    let found = first_defined(event, MODEL_EVENT_PATHS).or_else(|| first_defined(ctx, MODEL_CTX_PATHS));
    as_str(found, crate::snapshot::UNKNOWN_MODEL)
}

/// Latest known turn duration in milliseconds.
pub fn duration_ms(event: &Value) -> i64 {
    as_int(lookup(event, "durationMs"), 0)
}

/// Extract the tool list from an event.
///
/// Accepts an array of names, a string holding a JSON array, or a single
/// bare name.
pub fn tools_used(event: &Value) -> Vec<String> {
    match first_defined(event, TOOLS_EVENT_PATHS) {
        Some(Value::Array(items)) => collect_tool_names(items),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Vec::new();
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Array(items)) => collect_tool_names(&items),
                _ => vec![trimmed.to_string()],
            }
        }
        _ => Vec::new(),
    }
}

fn collect_tool_names(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .map(|item| as_str(Some(item), ""))
        .filter(|name| !name.is_empty())
        .collect()
}

/// Last user message text from an `event.messages` array.
pub fn user_text(event: &Value) -> String {
    last_text_for_role(event, "user")
}

/// Last assistant message text from an `event.messages` array.
pub fn assistant_text(event: &Value) -> String {
    last_text_for_role(event, "assistant")
}

fn last_text_for_role(event: &Value, role: &str) -> String {
    let Some(messages) = lookup(event, "messages").and_then(Value::as_array) else {
        return String::new();
    };
    for entry in messages.iter().rev() {
        if as_str(lookup(entry, "role"), "") != role {
            continue;
        }
        match entry.get("content") {
            Some(Value::String(text)) if !text.trim().is_empty() => return text.clone(),
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    if lookup(block, "type").and_then(Value::as_str) != Some("text") {
                        continue;
                    }
                    if let Some(text) = lookup(block, "text").and_then(Value::as_str) {
                        if !text.trim().is_empty() {
                            return text.to_string();
                        }
                    }
                }
            }
            _ => {}
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_walks_nested_objects() {
        let source = json!({"a": {"b": {"c": 42}}});
        assert_eq!(lookup(&source, "a.b.c"), Some(&json!(42)));
        assert_eq!(lookup(&source, "a.b.missing"), None);
        assert_eq!(lookup(&source, "a.missing.c"), None);
    }

    #[test]
    fn test_lookup_treats_null_as_absent() {
        let source = json!({"a": null});
        assert_eq!(lookup(&source, "a"), None);
    }

    #[test]
    fn test_first_defined_respects_priority_order() {
        let source = json!({"second": "b", "first": "a"});
        assert_eq!(
            first_defined(&source, &["first", "second"]),
            Some(&json!("a"))
        );
        assert_eq!(
            first_defined(&source, &["missing", "second"]),
            Some(&json!("b"))
        );
        assert_eq!(first_defined(&source, &["missing"]), None);
    }

    #[test]
    fn test_as_int_rounds_and_rejects_non_numeric() {
        assert_eq!(as_int(Some(&json!(3.6)), 0), 4);
        assert_eq!(as_int(Some(&json!("12")), 0), 12);
        assert_eq!(as_int(Some(&json!("nope")), 7), 7);
        assert_eq!(as_int(Some(&json!({})), 7), 7);
        assert_eq!(as_int(None, 7), 7);
    }

    #[test]
    fn test_as_str_trims_and_stringifies() {
        assert_eq!(as_str(Some(&json!("  hi  ")), "x"), "hi");
        assert_eq!(as_str(Some(&json!("   ")), "x"), "x");
        assert_eq!(as_str(Some(&json!(12)), "x"), "12");
        assert_eq!(as_str(Some(&json!(true)), "x"), "true");
        assert_eq!(as_str(None, "x"), "x");
    }

    #[test]
    fn test_as_bool_accepts_string_and_numeric_forms() {
        assert_eq!(as_bool(Some(&json!(true))), Some(true));
        assert_eq!(as_bool(Some(&json!("yes"))), Some(true));
        assert_eq!(as_bool(Some(&json!("off"))), Some(false));
        assert_eq!(as_bool(Some(&json!(0))), Some(false));
        assert_eq!(as_bool(Some(&json!(2))), Some(true));
        assert_eq!(as_bool(Some(&json!("maybe"))), None);
        assert_eq!(as_bool(Some(&json!({}))), None);
        assert_eq!(as_bool(None), None);
    }

    #[test]
    fn test_usage_supports_multiple_container_shapes() {
        let direct = json!({"usage": {"input": 10, "output": 20}});
        assert_eq!(
            usage(&direct),
            TokenUsage {
                tokens_in: 10,
                tokens_out: 20
            }
        );

        let snake = json!({"usage": {"input_tokens": 7, "output_tokens": 9}});
        assert_eq!(
            usage(&snake),
            TokenUsage {
                tokens_in: 7,
                tokens_out: 9
            }
        );

        let openai = json!({"result": {"usage": {"prompt_tokens": 3, "completion_tokens": 4}}});
        assert_eq!(
            usage(&openai),
            TokenUsage {
                tokens_in: 3,
                tokens_out: 4
            }
        );

        assert_eq!(usage(&json!({})), TokenUsage::default());
    }

    #[test]
    fn test_channel_key_prefers_context_fields() {
        let ctx = json!({"channelId": "telegram", "messageProvider": "discord"});
        assert_eq!(channel_key(&json!({}), &ctx), "telegram");

        let ctx = json!({"messageProvider": "discord"});
        assert_eq!(channel_key(&json!({}), &ctx), "discord");

        let event = json!({"to": "user-1"});
        assert_eq!(channel_key(&event, &json!({})), "user-1");

        assert_eq!(channel_key(&json!({}), &json!({})), "unknown-channel");
    }

    #[test]
    fn test_session_key_context_wins_over_event() {
        let ctx = json!({"conversationId": "conv-1"});
        let event = json!({"sessionKey": "sess-1"});
        assert_eq!(session_key(&event, &ctx), "conv-1");
        assert_eq!(session_key(&event, &json!({})), "sess-1");
        assert_eq!(session_key(&json!({}), &json!({})), "");
    }

    #[test]
    fn test_model_falls_back_to_sentinel() {
        let event = json!({"result": {"model": "gpt-5"}});
        assert_eq!(model(&event, &json!({})), "gpt-5");
        assert_eq!(model(&json!({}), &json!({})), "unknown-model");
    }

    #[test]
    fn test_tools_used_accepts_array_string_and_bare_name() {
        assert_eq!(
            tools_used(&json!({"tools": ["read", "write"]})),
            vec!["read", "write"]
        );
        assert_eq!(
            tools_used(&json!({"toolsUsed": "[\"exec\"]"})),
            vec!["exec"]
        );
        assert_eq!(tools_used(&json!({"tools": "browser"})), vec!["browser"]);
        assert!(tools_used(&json!({})).is_empty());
    }

    #[test]
    fn test_message_text_handles_string_and_block_content() {
        let event = json!({
            "messages": [
                {"role": "user", "content": "first ask"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "name": "read"},
                    {"type": "text", "text": "the answer"}
                ]},
                {"role": "user", "content": "latest ask"}
            ]
        });
        assert_eq!(user_text(&event), "latest ask");
        assert_eq!(assistant_text(&event), "the answer");
        assert_eq!(user_text(&json!({})), "");
    }
}
