//! Host hook seam.
//!
//! The host framework dispatches named hook events, each carrying a loose
//! event payload and context object. [`ActivityRelay`] is the in-process
//! consumer: it wires those events through the correlation store and, on a
//! terminal event, settles the turn's snapshot, builds the wire payload,
//! and hands it to delivery. Every handler is fail-open: telemetry
//! problems are logged and never surface to the host.

use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;

use crate::config::RelayConfig;
use crate::deliver::{
    CommandSink, Delivery, DeliveryOutcome, DurableQueue, HttpSink, Sink, Transport,
};
use crate::error::Result;
use crate::extract::{self, as_bool, lookup};
use crate::payload::{build_payload, now_ms, status_from_success, ActivityPayload, PayloadFields};
use crate::store::{CorrelationStore, MessageDirection, StoreDefaults};

/// Hook events the relay consumes, parsed from the host's event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Model produced output (usage, model id, cognition signals).
    LlmOutput,
    /// Inbound message observed on a channel.
    MessageReceived,
    /// Outbound message about to be sent on a channel.
    MessageSending,
    /// Turn ended; terminal event that triggers delivery.
    AgentEnd,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::LlmOutput => "llm_output",
            HookKind::MessageReceived => "message_received",
            HookKind::MessageSending => "message_sending",
            HookKind::AgentEnd => "agent_end",
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HookKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "llm_output" => Ok(HookKind::LlmOutput),
            "message_received" => Ok(HookKind::MessageReceived),
            "message_sending" | "message_sent" => Ok(HookKind::MessageSending),
            "agent_end" => Ok(HookKind::AgentEnd),
            _ => Err(format!("unknown hook event: {}", s)),
        }
    }
}

/// In-process hook consumer: correlation, settling, delivery.
pub struct ActivityRelay<S> {
    store: CorrelationStore,
    delivery: Delivery<S>,
    settle_ms: i64,
}

impl ActivityRelay<Transport> {
    /// Build a relay with the transport the configuration selects: the
    /// external command when `skill_path` is set, HTTP otherwise.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        config.validate()?;
        let sink = match &config.skill_path {
            Some(path) => Transport::Command(CommandSink::new(path, &config.api_url)),
            None => Transport::Http(HttpSink::new(
                &config.api_url,
                Duration::from_secs(config.timeout_secs),
            )?),
        };
        Ok(Self::new(config, sink))
    }
}

impl<S: Sink> ActivityRelay<S> {
    /// Build a relay over an explicit sink.
    pub fn new(config: &RelayConfig, sink: S) -> Self {
        let store = CorrelationStore::new(StoreDefaults {
            project_tag: config.project_tag.clone(),
            user_id: config.user_id.clone(),
            workspace_tag: config.workspace_tag(),
        });
        let delivery = Delivery::new(sink, &config.backoff_ms, DurableQueue::new(config.queue_root()));
        Self {
            store,
            delivery,
            settle_ms: config.settle_ms,
        }
    }

    pub fn store(&self) -> &CorrelationStore {
        &self.store
    }

    pub fn delivery(&self) -> &Delivery<S> {
        &self.delivery
    }

    /// Route one hook event to its handler.
    pub async fn dispatch(&self, kind: HookKind, event: &Value, ctx: &Value) {
        match kind {
            HookKind::LlmOutput => self.on_llm_output(event, ctx),
            HookKind::MessageReceived => self.on_message_received(event, ctx),
            HookKind::MessageSending => self.on_message_sending(event, ctx),
            HookKind::AgentEnd => {
                self.on_agent_end(event, ctx).await;
            }
        }
    }

    /// Fold a model-output event into the correlation state.
    pub fn on_llm_output(&self, event: &Value, ctx: &Value) {
        match self.store.record_llm_output(event, ctx) {
            Some(snapshot) => tracing::debug!(
                session_key = %snapshot.session_key,
                model = %snapshot.model,
                tokens_in = snapshot.tokens_in,
                tokens_out = snapshot.tokens_out,
                "Recorded model output"
            ),
            None => tracing::debug!("Ignoring model output without session key"),
        }
    }

    /// Remember the sender seen on an inbound message.
    pub fn on_message_received(&self, event: &Value, ctx: &Value) {
        self.store
            .record_message_direction(event, ctx, MessageDirection::Inbound);
    }

    /// Remember the recipient of an outbound message.
    pub fn on_message_sending(&self, event: &Value, ctx: &Value) {
        self.store
            .record_message_direction(event, ctx, MessageDirection::Outbound);
    }

    /// Handle the terminal event: settle, build the payload, deliver.
    pub async fn on_agent_end(&self, event: &Value, ctx: &Value) -> DeliveryOutcome {
        let end = self.store.record_agent_end(event, ctx);
        let settled = self.store.settle(end.snapshot, self.settle_ms).await;

        let payload = self.agent_end_payload(event, &end.channel, &settled);
        let outcome = self.delivery.send(&payload).await;
        tracing::debug!(
            session_key = %payload.session_key,
            channel = %payload.channel,
            outcome = ?outcome,
            "Finalized turn"
        );
        outcome
    }

    fn agent_end_payload(
        &self,
        event: &Value,
        channel: &str,
        settled: &crate::snapshot::Snapshot,
    ) -> ActivityPayload {
        let defaults = self.store.defaults();

        let project_tag = if defaults.project_tag.is_empty() {
            settled.project_tag.clone()
        } else {
            defaults.project_tag.clone()
        };
        let user_id = if defaults.user_id.is_empty() {
            self.store
                .channel_user(channel)
                .unwrap_or_else(|| settled.user_id.clone())
        } else {
            defaults.user_id.clone()
        };

        build_payload(PayloadFields {
            session_key: settled.session_key.clone(),
            model: settled.model.clone(),
            tokens_in: settled.tokens_in,
            tokens_out: settled.tokens_out,
            duration_ms: settled.duration_ms,
            project_tag,
            channel: channel.to_string(),
            user_id,
            status: status_from_success(as_bool(lookup(event, "success"))).to_string(),
            tools_used: extract::tools_used(event),
            prompt_text: extract::user_text(event),
            assistant_text: extract::assistant_text(event),
            thinking: Some(settled.thinking),
            reasoning: Some(settled.reasoning),
            created_at: None,
            fallback_session_seed: format!("agent-end:{}:{}", channel, now_ms()),
        })
    }
}
