//! Session/channel correlation store.
//!
//! Hook callbacks arrive independently, out of order, and partially
//! overlapping; this store holds the most recent known [`Snapshot`] per
//! session and per channel and reconciles each new event against it. The
//! channel mapping always carries the resolved session key once known, so
//! lookups that arrive with only a channel identity still find the turn. A
//! third mapping remembers the last user identity seen per channel from
//! inbound/outbound message events; it is consulted only as a final
//! fallback.
//!
//! The maps are unbounded for the process lifetime: stale entries are
//! superseded in place or ignored via the freshness check, never evicted.
//! A `Mutex` guards them because handlers may run concurrently around the
//! settle suspension; the lock is only ever held across map operations,
//! never across an await.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::cognition;
use crate::extract::{self, as_str, lookup};
use crate::payload::now_ms;
use crate::snapshot::{coalesce, Snapshot, SnapshotDraft};

/// Which way a message event was headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

/// Ambient defaults injected at construction instead of read from process
/// globals: operator overrides and the workspace-derived project label.
#[derive(Debug, Clone, Default)]
pub struct StoreDefaults {
    /// Operator override for the project tag; empty means unset.
    pub project_tag: String,
    /// Operator override for the user identity; empty means unset.
    pub user_id: String,
    /// Base name of the workspace root, used when the context carries no
    /// workspace directory of its own.
    pub workspace_tag: String,
}

#[derive(Default)]
struct Maps {
    by_session: HashMap<String, Snapshot>,
    by_channel: HashMap<String, Snapshot>,
    user_by_channel: HashMap<String, String>,
}

/// In-memory correlation state for all in-flight turns.
pub struct CorrelationStore {
    defaults: StoreDefaults,
    inner: Mutex<Maps>,
}

/// Result of recording a terminal event, before settling.
#[derive(Debug, Clone)]
pub struct TurnEnd {
    pub snapshot: Snapshot,
    pub channel: String,
}

fn base_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl CorrelationStore {
    pub fn new(defaults: StoreDefaults) -> Self {
        Self {
            defaults,
            inner: Mutex::new(Maps::default()),
        }
    }

    pub fn defaults(&self) -> &StoreDefaults {
        &self.defaults
    }

    /// Most recent snapshot stored for a session key.
    pub fn session_snapshot(&self, session_key: &str) -> Option<Snapshot> {
        if session_key.is_empty() {
            return None;
        }
        self.inner.lock().unwrap().by_session.get(session_key).cloned()
    }

    /// Most recent snapshot stored for a channel.
    pub fn channel_snapshot(&self, channel: &str) -> Option<Snapshot> {
        self.inner.lock().unwrap().by_channel.get(channel).cloned()
    }

    /// Last known user identity for a channel.
    pub fn channel_user(&self, channel: &str) -> Option<String> {
        self.inner.lock().unwrap().user_by_channel.get(channel).cloned()
    }

    /// Store a snapshot under its session key (when resolved) and channel.
    pub fn store_snapshot(&self, snapshot: &Snapshot) {
        let mut maps = self.inner.lock().unwrap();
        if !snapshot.session_key.is_empty() {
            maps.by_session
                .insert(snapshot.session_key.clone(), snapshot.clone());
        }
        maps.by_channel
            .insert(snapshot.channel.clone(), snapshot.clone());
    }

    fn draft_project_tag(&self, ctx: &Value) -> String {
        if !self.defaults.project_tag.is_empty() {
            return self.defaults.project_tag.clone();
        }
        let workspace = as_str(lookup(ctx, "workspaceDir"), "");
        if !workspace.is_empty() {
            let tag = base_name(&workspace);
            if !tag.is_empty() {
                return tag;
            }
        }
        self.defaults.workspace_tag.clone()
    }

    fn draft_user_id(&self, channel: &str) -> String {
        if !self.defaults.user_id.is_empty() {
            return self.defaults.user_id.clone();
        }
        self.channel_user(channel).unwrap_or_default()
    }

    /// Record a model-output event.
    ///
    /// Requires a resolvable session key (context first, event second); an
    /// event without one is ignored entirely and no snapshot is created.
    pub fn record_llm_output(&self, event: &Value, ctx: &Value) -> Option<Snapshot> {
        let session_key = extract::session_key(event, ctx);
        if session_key.is_empty() {
            return None;
        }
        let channel = extract::channel_key(event, ctx);
        let prior = self.session_snapshot(&session_key);
        let usage = extract::usage(event);
        let cog = cognition::infer(event, ctx, prior.as_ref());

        let draft = SnapshotDraft {
            session_key,
            model: extract::model(event, ctx),
            tokens_in: usage.tokens_in,
            tokens_out: usage.tokens_out,
            duration_ms: extract::duration_ms(event),
            thinking: Some(cog.thinking),
            reasoning: Some(cog.reasoning),
            project_tag: self.draft_project_tag(ctx),
            user_id: self.draft_user_id(&channel),
            channel,
        };

        let snapshot = coalesce(prior.as_ref(), &draft, now_ms());
        self.store_snapshot(&snapshot);
        Some(snapshot)
    }

    /// Record the user identity seen on an inbound or outbound message.
    ///
    /// Touches only the channel→user mapping, never the snapshots.
    pub fn record_message_direction(
        &self,
        event: &Value,
        ctx: &Value,
        direction: MessageDirection,
    ) {
        let channel = extract::channel_key(event, ctx);
        let field = match direction {
            MessageDirection::Inbound => "from",
            MessageDirection::Outbound => "to",
        };
        let identity = as_str(lookup(event, field), "");
        if identity.is_empty() {
            return;
        }
        self.inner
            .lock()
            .unwrap()
            .user_by_channel
            .insert(channel, identity);
    }

    /// Record the terminal event for a turn.
    ///
    /// Looks up prior state by session key first, channel second; coalesces
    /// the event on top; back-fills a missing session key from the channel's
    /// prior snapshot; and stores the result under both keys. The returned
    /// snapshot is the pre-settle state; callers settle it before building
    /// the payload.
    pub fn record_agent_end(&self, event: &Value, ctx: &Value) -> TurnEnd {
        let channel = extract::channel_key(event, ctx);
        let session_key = extract::session_key(event, ctx);

        let recent = self
            .session_snapshot(&session_key)
            .or_else(|| self.channel_snapshot(&channel));
        let usage = extract::usage(event);
        let cog = cognition::infer(event, ctx, recent.as_ref());

        let draft = SnapshotDraft {
            session_key,
            channel: channel.clone(),
            model: extract::model(event, ctx),
            tokens_in: usage.tokens_in,
            tokens_out: usage.tokens_out,
            duration_ms: extract::duration_ms(event),
            thinking: Some(cog.thinking),
            reasoning: Some(cog.reasoning),
            project_tag: self.draft_project_tag(ctx),
            user_id: self.draft_user_id(&channel),
        };

        let mut snapshot = coalesce(recent.as_ref(), &draft, now_ms());
        if snapshot.session_key.is_empty() {
            if let Some(prior_channel) = self.channel_snapshot(&channel) {
                snapshot.session_key = prior_channel.session_key;
            }
        }
        self.store_snapshot(&snapshot);

        TurnEnd { snapshot, channel }
    }

    /// Absorb late-arriving richer data before finalizing a turn.
    ///
    /// With a non-positive delay this returns the input unchanged without
    /// suspending. Otherwise it sleeps cooperatively, re-reads the session
    /// and channel stores, and coalesces any snapshot that changed during
    /// the wait on top of `current`. The settled snapshot is re-stored so
    /// subsequent lookups see the final state.
    pub async fn settle(&self, current: Snapshot, settle_ms: i64) -> Snapshot {
        if settle_ms <= 0 {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(settle_ms as u64)).await;

        let late = self
            .session_snapshot(&current.session_key)
            .or_else(|| self.channel_snapshot(&current.channel));
        let settled = match late {
            Some(late) if late != current => coalesce(Some(&current), &late.to_draft(), now_ms()),
            _ => current,
        };
        self.store_snapshot(&settled);
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cognition::ThinkingLevel;
    use serde_json::json;

    fn store() -> CorrelationStore {
        CorrelationStore::new(StoreDefaults {
            workspace_tag: "workspace".to_string(),
            ..StoreDefaults::default()
        })
    }

    #[test]
    fn test_llm_output_without_session_key_is_ignored() {
        let store = store();
        let event = json!({"usage": {"input": 10, "output": 5}});
        assert!(store.record_llm_output(&event, &json!({})).is_none());
        assert!(store.channel_snapshot("unknown-channel").is_none());
    }

    #[test]
    fn test_llm_output_stores_under_session_and_channel() {
        let store = store();
        let event = json!({
            "model": "gpt-5",
            "usage": {"input": 120, "output": 45},
            "durationMs": 900
        });
        let ctx = json!({"sessionKey": "sess-1", "channelId": "telegram"});

        let snapshot = store.record_llm_output(&event, &ctx).unwrap();
        assert_eq!(snapshot.model, "gpt-5");
        assert_eq!(snapshot.tokens_in, 120);

        let by_session = store.session_snapshot("sess-1").unwrap();
        let by_channel = store.channel_snapshot("telegram").unwrap();
        assert_eq!(by_session.session_key, "sess-1");
        assert_eq!(by_channel.session_key, "sess-1");
        assert_eq!(by_channel.project_tag, "workspace");
    }

    #[test]
    fn test_llm_output_coalesces_with_prior_state() {
        let store = store();
        let ctx = json!({"sessionKey": "sess-2", "channelId": "discord"});
        store.record_llm_output(
            &json!({"model": "gpt-5", "usage": {"input": 100, "output": 40}}),
            &ctx,
        );
        let merged = store
            .record_llm_output(&json!({"usage": {"input": 30, "output": 90}}), &ctx)
            .unwrap();

        assert_eq!(merged.model, "gpt-5");
        assert_eq!(merged.tokens_in, 100);
        assert_eq!(merged.tokens_out, 90);
    }

    #[test]
    fn test_message_direction_populates_user_map_only() {
        let store = store();
        let ctx = json!({"channelId": "telegram"});
        store.record_message_direction(&json!({"from": "alice"}), &ctx, MessageDirection::Inbound);
        assert_eq!(store.channel_user("telegram").unwrap(), "alice");
        assert!(store.channel_snapshot("telegram").is_none());

        store.record_message_direction(&json!({"to": "bob"}), &ctx, MessageDirection::Outbound);
        assert_eq!(store.channel_user("telegram").unwrap(), "bob");

        store.record_message_direction(&json!({}), &ctx, MessageDirection::Inbound);
        assert_eq!(store.channel_user("telegram").unwrap(), "bob");
    }

    #[test]
    fn test_agent_end_backfills_session_key_from_channel() {
        let store = store();
        let llm_ctx = json!({"sessionKey": "sess-3", "channelId": "discord"});
        store.record_llm_output(
            &json!({"model": "gpt-5", "usage": {"input": 50, "output": 20}}),
            &llm_ctx,
        );

        // Terminal event arrives with only a channel identity.
        let end = store.record_agent_end(
            &json!({"durationMs": 4000}),
            &json!({"channelId": "discord"}),
        );
        assert_eq!(end.snapshot.session_key, "sess-3");
        assert_eq!(end.snapshot.model, "gpt-5");
        assert_eq!(end.snapshot.duration_ms, 4000);
        assert_eq!(end.channel, "discord");
    }

    #[test]
    fn test_agent_end_uses_operator_overrides() {
        let store = CorrelationStore::new(StoreDefaults {
            project_tag: "ops-project".to_string(),
            user_id: "operator".to_string(),
            workspace_tag: "workspace".to_string(),
        });
        let end = store.record_agent_end(&json!({}), &json!({"channelId": "webchat"}));
        assert_eq!(end.snapshot.project_tag, "ops-project");
        assert_eq!(end.snapshot.user_id, "operator");
    }

    #[test]
    fn test_context_workspace_dir_drives_project_tag() {
        let store = store();
        let end = store.record_agent_end(
            &json!({}),
            &json!({"channelId": "webchat", "workspaceDir": "/home/dev/projects/relay-lab"}),
        );
        assert_eq!(end.snapshot.project_tag, "relay-lab");
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_zero_delay_returns_unchanged() {
        let store = store();
        let current = Snapshot {
            session_key: "sess-4".to_string(),
            channel: "telegram".to_string(),
            ts: 123,
            ..Snapshot::default()
        };
        let settled = store.settle(current.clone(), 0).await;
        assert_eq!(settled, current);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_adopts_late_richer_snapshot() {
        let store = std::sync::Arc::new(store());
        let ctx = json!({"sessionKey": "sess-5", "channelId": "telegram"});
        let end = store.record_agent_end(&json!({"durationMs": 1000}), &ctx);
        assert_eq!(end.snapshot.model, "unknown-model");

        // A richer model-output event lands during the settle window.
        let late_store = store.clone();
        let late_ctx = ctx.clone();
        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            late_store.record_llm_output(
                &json!({
                    "model": "moonshotai/kimi-k2.5",
                    "usage": {"input": 321, "output": 44}
                }),
                &late_ctx,
            );
        });

        let settled = store.settle(end.snapshot, 250).await;
        late.await.unwrap();

        assert_eq!(settled.model, "moonshotai/kimi-k2.5");
        assert_eq!(settled.tokens_in, 321);
        assert_eq!(settled.tokens_out, 44);
        assert_eq!(settled.duration_ms, 1000);
        assert_eq!(settled.thinking, ThinkingLevel::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_without_late_arrival_keeps_snapshot() {
        let store = store();
        let ctx = json!({"sessionKey": "sess-6", "channelId": "telegram"});
        let end = store.record_agent_end(&json!({"durationMs": 500}), &ctx);

        let settled = store.settle(end.snapshot.clone(), 250).await;
        assert_eq!(settled, end.snapshot);
    }
}
