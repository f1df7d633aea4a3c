//! Wire-format activity records.
//!
//! An [`ActivityPayload`] is built fresh per delivery attempt from a
//! coalesced snapshot plus per-call overrides, and is immutable once built.
//! Construction is total: every field has a typed default, so a payload can
//! be produced from arbitrarily sparse input without ever being dropped for
//! a missing field. Session keys that cannot be resolved fall back to a
//! synthetic but distinguishable `channel:<channel>:<seed>` form.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cognition::{normalize_thinking, ThinkingLevel};
use crate::extract::{as_bool, as_int, as_str, first_defined, tools_used};
use crate::snapshot::{is_fresh, resolve_user_id, Snapshot, UNKNOWN_CHANNEL, UNKNOWN_MODEL};

/// Default project tag when no workspace label can be resolved.
pub const UNKNOWN_PROJECT: &str = "unknown-project";

/// Activity record in collector wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityPayload {
    pub session_key: String,
    pub model: String,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub cost_estimate: f64,
    pub duration_ms: i64,
    pub project_tag: String,
    pub external_ref: String,
    pub category: String,
    pub thinking: ThinkingLevel,
    pub reasoning: bool,
    pub channel: String,
    pub status: String,
    pub user_id: String,
    pub tools_used: Vec<String>,
    pub prompt_text: String,
    pub assistant_text: String,
    pub created_at: String,
}

/// Inputs to [`build_payload`]; every field may be left at its default.
#[derive(Debug, Clone, Default)]
pub struct PayloadFields {
    pub session_key: String,
    pub model: String,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub duration_ms: i64,
    pub project_tag: String,
    pub channel: String,
    pub user_id: String,
    pub status: String,
    pub tools_used: Vec<String>,
    pub prompt_text: String,
    pub assistant_text: String,
    pub thinking: Option<ThinkingLevel>,
    pub reasoning: Option<bool>,
    /// Explicit creation timestamp; `None` stamps the current instant.
    pub created_at: Option<String>,
    /// Seed for the synthetic session key when none is known; callers vary
    /// this (conversation id, timestamp-qualified marker) so repeated
    /// failures stay distinguishable.
    pub fallback_session_seed: String,
}

/// Current instant in RFC 3339 with millisecond precision.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current instant in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Map a turn-success flag to an activity status.
///
/// Only an explicit `false` marks failure.
pub fn status_from_success(success: Option<bool>) -> &'static str {
    match success {
        Some(false) => "failed",
        _ => "success",
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.trim().to_string()
    }
}

/// Build a wire payload, applying defaults for every field.
///
/// Idempotent: identical inputs (including an explicit `created_at`) yield
/// identical payloads.
pub fn build_payload(fields: PayloadFields) -> ActivityPayload {
    let channel = non_empty_or(&fields.channel, UNKNOWN_CHANNEL);
    let seed = non_empty_or(
        &fields.fallback_session_seed,
        &format!("unknown:{}", now_ms()),
    );
    let session_key = non_empty_or(
        &fields.session_key,
        &format!("channel:{}:{}", channel, seed),
    );
    let user_id = resolve_user_id(&fields.user_id, &channel, &session_key);

    ActivityPayload {
        session_key,
        model: non_empty_or(&fields.model, UNKNOWN_MODEL),
        tokens_in: fields.tokens_in,
        tokens_out: fields.tokens_out,
        cost_estimate: 0.0,
        duration_ms: fields.duration_ms,
        project_tag: non_empty_or(&fields.project_tag, UNKNOWN_PROJECT),
        external_ref: String::new(),
        category: "general".to_string(),
        thinking: fields.thinking.unwrap_or_default(),
        reasoning: fields.reasoning.unwrap_or(false),
        channel,
        status: non_empty_or(&fields.status, "success"),
        user_id,
        tools_used: fields.tools_used,
        prompt_text: fields.prompt_text,
        assistant_text: fields.assistant_text,
        created_at: fields.created_at.unwrap_or_else(now_iso),
    }
}

/// Inputs to [`merge_recent_by_channel`].
#[derive(Debug, Clone, Default)]
pub struct ChannelMerge<'a> {
    pub channel_id: &'a str,
    pub event_to: &'a str,
    pub conversation_id: &'a str,
    pub success: Option<bool>,
    pub recent: Option<&'a Snapshot>,
    pub now_ms: i64,
    pub freshness_ms: i64,
    /// Operator override for the project tag; empty means unset.
    pub project_tag: &'a str,
    /// Operator override for the user identity; empty means unset.
    pub user_id: &'a str,
    /// Workspace-derived project tag used when no recent snapshot applies.
    pub default_project_tag: &'a str,
}

/// Legacy message-driven delivery path: fold a channel's recent snapshot
/// into a payload, but only when the snapshot is inside the freshness
/// window; otherwise defaults apply as if no context existed.
pub fn merge_recent_by_channel(merge: &ChannelMerge) -> ActivityPayload {
    let fresh = is_fresh(merge.recent, merge.now_ms, merge.freshness_ms);
    let recent = merge.recent.filter(|_| fresh);

    let seed = non_empty_or(
        merge.conversation_id,
        &non_empty_or(merge.event_to, "unknown-target"),
    );

    let (session_key, model, tokens_in, tokens_out, duration_ms) = match recent {
        Some(r) => (
            r.session_key.clone(),
            r.model.clone(),
            r.tokens_in,
            r.tokens_out,
            r.duration_ms,
        ),
        None => (String::new(), String::new(), 0, 0, 0),
    };

    let project_tag = non_empty_or(
        merge.project_tag,
        &recent
            .map(|r| r.project_tag.clone())
            .unwrap_or_else(|| merge.default_project_tag.to_string()),
    );

    let fallback_user = match recent {
        Some(r) => r.user_id.clone(),
        None => non_empty_or(merge.conversation_id, merge.event_to),
    };
    let user_session = match recent {
        Some(r) => r.session_key.clone(),
        None => merge.conversation_id.trim().to_string(),
    };
    let user_id = resolve_user_id(
        &non_empty_or(merge.user_id, &fallback_user),
        merge.channel_id,
        &user_session,
    );

    build_payload(PayloadFields {
        session_key,
        model,
        tokens_in,
        tokens_out,
        duration_ms,
        project_tag,
        channel: merge.channel_id.to_string(),
        user_id,
        status: status_from_success(merge.success).to_string(),
        fallback_session_seed: seed,
        ..PayloadFields::default()
    })
}

/// Candidate paths for each field of a loose, already-flattened activity
/// record, as delivered to the standalone CLI on stdin.
mod loose {
    pub const SESSION: &[&str] = &["session_key", "sessionKey", "session_id", "context.sessionKey"];
    pub const MODEL: &[&str] = &["model", "result.model", "context.model"];
    pub const TOKENS_IN: &[&str] = &[
        "tokens_in",
        "tokensIn",
        "usage.input_tokens",
        "usage.prompt_tokens",
        "usage.tokens_in",
        "metrics.tokens_in",
    ];
    pub const TOKENS_OUT: &[&str] = &[
        "tokens_out",
        "tokensOut",
        "usage.output_tokens",
        "usage.completion_tokens",
        "usage.tokens_out",
        "metrics.tokens_out",
    ];
    pub const DURATION: &[&str] = &["duration_ms", "durationMs", "metrics.duration_ms"];
    pub const CHANNEL: &[&str] = &["channel", "context.channel", "context.commandSource"];
    pub const USER: &[&str] = &["user_id", "userId", "context.senderId", "senderId"];
    pub const PROJECT: &[&str] = &["project_tag", "projectTag"];
    pub const STATUS: &[&str] = &["status", "result.status"];
    pub const PROMPT: &[&str] = &["prompt_text", "promptText"];
    pub const ASSISTANT: &[&str] = &["assistant_text", "assistantText"];
    pub const CREATED: &[&str] = &["created_at", "createdAt"];
}

/// Normalize a loose record (CLI stdin shape) into payload fields.
///
/// Tolerates any missing or malformed field; `default_project_tag` is the
/// workspace-derived label applied when the record carries none.
pub fn normalize_record(raw: &Value, default_project_tag: &str) -> PayloadFields {
    PayloadFields {
        session_key: as_str(first_defined(raw, loose::SESSION), "unknown-session"),
        model: as_str(first_defined(raw, loose::MODEL), UNKNOWN_MODEL),
        tokens_in: as_int(first_defined(raw, loose::TOKENS_IN), 0),
        tokens_out: as_int(first_defined(raw, loose::TOKENS_OUT), 0),
        duration_ms: as_int(first_defined(raw, loose::DURATION), 0),
        project_tag: as_str(first_defined(raw, loose::PROJECT), default_project_tag),
        channel: as_str(first_defined(raw, loose::CHANNEL), "webchat"),
        user_id: as_str(first_defined(raw, loose::USER), "unknown-user"),
        status: as_str(first_defined(raw, loose::STATUS), "success"),
        tools_used: tools_used(raw),
        prompt_text: as_str(first_defined(raw, loose::PROMPT), ""),
        assistant_text: as_str(first_defined(raw, loose::ASSISTANT), ""),
        thinking: first_defined(raw, &["thinking"]).and_then(normalize_thinking),
        reasoning: as_bool(first_defined(raw, &["reasoning"])),
        created_at: {
            let created = as_str(first_defined(raw, loose::CREATED), "");
            if created.is_empty() {
                None
            } else {
                Some(created)
            }
        },
        fallback_session_seed: String::new(),
    }
}
