//! Per-turn snapshot state and coalescing.
//!
//! A [`Snapshot`] is the reconstructed, always-valid view of a turn's known
//! attributes: every field has a non-null default, and sentinel values
//! (`unknown-model`, empty session key) rather than nulls mark "not yet
//! known". Partial information arriving from a hook event is expressed as a
//! [`SnapshotDraft`] and merged into the prior state by [`coalesce`], whose
//! field-by-field precedence rules make token counters monotonic and let
//! stronger identity data win over sentinels.

use serde::{Deserialize, Serialize};

use crate::cognition::ThinkingLevel;

/// Sentinel model id meaning "not yet known".
pub const UNKNOWN_MODEL: &str = "unknown-model";

/// Sentinel channel id meaning "not yet known".
pub const UNKNOWN_CHANNEL: &str = "unknown-channel";

/// In-memory reconstructed state of one turn's known attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// When this snapshot was last updated (epoch millis).
    pub ts: i64,
    /// Opaque session identifier; empty until first resolved.
    pub session_key: String,
    /// Logical inbound/outbound channel identifier.
    pub channel: String,
    /// Model identifier; [`UNKNOWN_MODEL`] until known.
    pub model: String,
    /// Cumulative best-known input tokens, monotonic under coalescing.
    pub tokens_in: i64,
    /// Cumulative best-known output tokens, monotonic under coalescing.
    pub tokens_out: i64,
    /// Latest known turn duration.
    pub duration_ms: i64,
    /// Normalized thinking level.
    pub thinking: ThinkingLevel,
    /// Whether extended reasoning was used.
    pub reasoning: bool,
    /// Workspace/project label.
    pub project_tag: String,
    /// Resolved end-user identity.
    pub user_id: String,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            ts: 0,
            session_key: String::new(),
            channel: UNKNOWN_CHANNEL.to_string(),
            model: UNKNOWN_MODEL.to_string(),
            tokens_in: 0,
            tokens_out: 0,
            duration_ms: 0,
            thinking: ThinkingLevel::Low,
            reasoning: false,
            project_tag: String::new(),
            user_id: String::new(),
        }
    }
}

impl Snapshot {
    /// Express this snapshot as the "current" side of a coalesce.
    ///
    /// Used by the settle step, where a late-arriving stored snapshot is
    /// merged on top of the one being finalized.
    pub fn to_draft(&self) -> SnapshotDraft {
        SnapshotDraft {
            session_key: self.session_key.clone(),
            channel: self.channel.clone(),
            model: self.model.clone(),
            tokens_in: self.tokens_in,
            tokens_out: self.tokens_out,
            duration_ms: self.duration_ms,
            thinking: Some(self.thinking),
            reasoning: Some(self.reasoning),
            project_tag: self.project_tag.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

/// Partial snapshot built from a single hook event.
///
/// Absence is encoded the same way the wire shapes encode it: empty strings
/// and the [`UNKNOWN_MODEL`] sentinel for identity fields, `None` for the
/// cognition fields where "explicitly provided" matters to coalescing.
#[derive(Debug, Clone, Default)]
pub struct SnapshotDraft {
    pub session_key: String,
    pub channel: String,
    pub model: String,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub duration_ms: i64,
    pub thinking: Option<ThinkingLevel>,
    pub reasoning: Option<bool>,
    pub project_tag: String,
    pub user_id: String,
}

fn pick_non_empty<'a>(current: &'a str, prior: &'a str) -> &'a str {
    if current.is_empty() {
        prior
    } else {
        current
    }
}

/// Merge prior state with a newer partial snapshot.
///
/// Field precedence:
/// - `ts` is always `now_ms`;
/// - `session_key`, `channel`, `project_tag`: current's value if non-empty,
///   else prior's;
/// - `model`: current's value unless it is the unknown sentinel;
/// - `tokens_in`, `tokens_out`, `duration_ms`: max of both sides, since
///   these are monotonically discovered quantities within one turn;
/// - `thinking`/`reasoning`: current's value if explicitly provided, else
///   prior's;
/// - `user_id` additionally passes through [`resolve_user_id`].
///
/// Pure: neither input is mutated.
pub fn coalesce(prior: Option<&Snapshot>, current: &SnapshotDraft, now_ms: i64) -> Snapshot {
    let fallback = Snapshot::default();
    let prior = prior.unwrap_or(&fallback);

    let session_key = pick_non_empty(&current.session_key, &prior.session_key).to_string();
    let channel = pick_non_empty(&current.channel, &prior.channel).to_string();
    let model = if current.model.is_empty() || current.model.eq_ignore_ascii_case(UNKNOWN_MODEL) {
        prior.model.clone()
    } else {
        current.model.clone()
    };

    let explicit_user = pick_non_empty(&current.user_id, &prior.user_id);
    let user_id = resolve_user_id(explicit_user, &channel, &session_key);

    Snapshot {
        ts: now_ms,
        session_key,
        channel,
        model,
        tokens_in: current.tokens_in.max(prior.tokens_in),
        tokens_out: current.tokens_out.max(prior.tokens_out),
        duration_ms: current.duration_ms.max(prior.duration_ms),
        thinking: current.thinking.unwrap_or(prior.thinking),
        reasoning: current.reasoning.unwrap_or(prior.reasoning),
        project_tag: pick_non_empty(&current.project_tag, &prior.project_tag).to_string(),
        user_id,
    }
}

/// Whether a stored snapshot is still usable context for payload merging.
pub fn is_fresh(snapshot: Option<&Snapshot>, now_ms: i64, freshness_ms: i64) -> bool {
    match snapshot {
        Some(snapshot) => now_ms - snapshot.ts <= freshness_ms,
        None => false,
    }
}

/// Resolve a deterministic, non-empty user identity.
///
/// An explicit value wins; otherwise `<channel>:<session_key>` when a
/// session is known, else `<channel>:agent:main`.
pub fn resolve_user_id(explicit: &str, channel: &str, session_key: &str) -> String {
    let explicit = explicit.trim();
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    let channel = if channel.trim().is_empty() {
        UNKNOWN_CHANNEL
    } else {
        channel.trim()
    };
    let session_key = session_key.trim();
    if !session_key.is_empty() {
        format!("{}:{}", channel, session_key)
    } else {
        format!("{}:agent:main", channel)
    }
}
