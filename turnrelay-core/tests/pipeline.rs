//! End-to-end pipeline tests: hook events in, payloads out.
//!
//! These drive the relay the way a host would (named hook events with
//! loose JSON bodies) and observe what reaches the sink or the durable
//! queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use turnrelay_core::deliver::DurableQueue;
use turnrelay_core::payload::ActivityPayload;
use turnrelay_core::{
    ActivityRelay, DeliveryOutcome, Error, HookKind, RelayConfig, Result, Sink, ThinkingLevel,
};

/// Sink that records everything it accepts.
#[derive(Clone, Default)]
struct RecordingSink {
    delivered: Arc<Mutex<Vec<ActivityPayload>>>,
}

impl Sink for RecordingSink {
    async fn deliver(&self, payload: &ActivityPayload) -> Result<()> {
        self.delivered.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// Sink that always fails.
#[derive(Clone, Default)]
struct DeadSink {
    attempts: Arc<AtomicUsize>,
}

impl Sink for DeadSink {
    async fn deliver(&self, _payload: &ActivityPayload) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::Sink("collector unreachable".to_string()))
    }
}

fn test_config(queue_root: &std::path::Path) -> RelayConfig {
    RelayConfig {
        queue_root: Some(queue_root.to_path_buf()),
        settle_ms: 0,
        backoff_ms: vec![10, 20, 40],
        workspace_root: Some("/home/dev/projects/relay-lab".into()),
        ..RelayConfig::default()
    }
}

#[tokio::test]
async fn turn_pipeline_delivers_coalesced_record() {
    let dir = TempDir::new().unwrap();
    let sink = RecordingSink::default();
    let relay = ActivityRelay::new(&test_config(dir.path()), sink.clone());

    let ctx = json!({"sessionKey": "sess-1", "channelId": "telegram"});

    relay
        .dispatch(
            HookKind::MessageReceived,
            &json!({"from": "alice"}),
            &json!({"channelId": "telegram"}),
        )
        .await;

    relay
        .dispatch(
            HookKind::LlmOutput,
            &json!({
                "model": "nvidia/moonshotai/kimi-k2.5",
                "usage": {"input": 120, "output": 45, "reasoning_tokens": 16},
                "reasoningEffort": "high"
            }),
            &ctx,
        )
        .await;

    relay
        .dispatch(
            HookKind::AgentEnd,
            &json!({
                "durationMs": 5000,
                "success": true,
                "tools": ["read", "exec"],
                "messages": [
                    {"role": "user", "content": "please research options"},
                    {"role": "assistant", "content": [
                        {"type": "text", "text": "here are the findings"}
                    ]}
                ]
            }),
            &ctx,
        )
        .await;

    let delivered = sink.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    let record = &delivered[0];

    assert_eq!(record.session_key, "sess-1");
    assert_eq!(record.model, "nvidia/moonshotai/kimi-k2.5");
    assert_eq!(record.tokens_in, 120);
    assert_eq!(record.tokens_out, 45);
    assert_eq!(record.duration_ms, 5000);
    assert_eq!(record.thinking, ThinkingLevel::High);
    assert!(record.reasoning);
    assert_eq!(record.channel, "telegram");
    assert_eq!(record.status, "success");
    assert_eq!(record.user_id, "alice");
    assert_eq!(record.project_tag, "relay-lab");
    assert_eq!(record.tools_used, vec!["read", "exec"]);
    assert_eq!(record.prompt_text, "please research options");
    assert_eq!(record.assistant_text, "here are the findings");
    assert_eq!(record.cost_estimate, 0.0);
    assert_eq!(record.category, "general");
}

#[tokio::test]
async fn turn_without_session_key_gets_synthetic_one() {
    let dir = TempDir::new().unwrap();
    let sink = RecordingSink::default();
    let relay = ActivityRelay::new(&test_config(dir.path()), sink.clone());

    relay
        .dispatch(
            HookKind::AgentEnd,
            &json!({"success": false}),
            &json!({"channelId": "discord"}),
        )
        .await;

    let delivered = sink.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    let record = &delivered[0];
    assert!(record.session_key.starts_with("channel:discord:agent-end:discord:"));
    assert_eq!(record.status, "failed");
    assert_eq!(record.model, "unknown-model");
}

#[tokio::test(start_paused = true)]
async fn settle_window_absorbs_late_model_output() {
    let dir = TempDir::new().unwrap();
    let sink = RecordingSink::default();
    let mut config = test_config(dir.path());
    config.settle_ms = 250;
    let relay = Arc::new(ActivityRelay::new(&config, sink.clone()));

    let ctx = json!({"sessionKey": "sess-2", "channelId": "telegram"});

    // Model output lands while agent_end is inside its settle window.
    let late_relay = relay.clone();
    let late_ctx = ctx.clone();
    let late = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        late_relay.on_llm_output(
            &json!({
                "model": "moonshotai/kimi-k2.5",
                "usage": {"input": 321, "output": 44}
            }),
            &late_ctx,
        );
    });

    relay
        .on_agent_end(&json!({"durationMs": 1000, "success": true}), &ctx)
        .await;
    late.await.unwrap();

    let delivered = sink.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].model, "moonshotai/kimi-k2.5");
    assert_eq!(delivered[0].tokens_in, 321);
    assert_eq!(delivered[0].tokens_out, 44);
    assert_eq!(delivered[0].duration_ms, 1000);
}

#[tokio::test(start_paused = true)]
async fn dead_sink_retries_then_queues_exactly_one_record() {
    let dir = TempDir::new().unwrap();
    let sink = DeadSink::default();
    let relay = ActivityRelay::new(&test_config(dir.path()), sink.clone());

    let outcome = relay
        .on_agent_end(
            &json!({"durationMs": 10}),
            &json!({"sessionKey": "sess-3", "channelId": "webchat"}),
        )
        .await;

    assert_eq!(outcome, DeliveryOutcome::Queued);
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);

    let files = relay.delivery().queue().files().unwrap();
    assert_eq!(files.len(), 1);
    let queued = DurableQueue::read_payloads(&files[0]).unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].session_key, "sess-3");
}

#[tokio::test]
async fn operator_overrides_win_over_derived_identity() {
    let dir = TempDir::new().unwrap();
    let sink = RecordingSink::default();
    let mut config = test_config(dir.path());
    config.project_tag = "ops-project".to_string();
    config.user_id = "operator".to_string();
    let relay = ActivityRelay::new(&config, sink.clone());

    relay
        .dispatch(
            HookKind::MessageSending,
            &json!({"to": "bob"}),
            &json!({"channelId": "webchat"}),
        )
        .await;
    relay
        .dispatch(
            HookKind::AgentEnd,
            &json!({}),
            &json!({"sessionKey": "sess-4", "channelId": "webchat"}),
        )
        .await;

    let delivered = sink.delivered.lock().unwrap();
    assert_eq!(delivered[0].project_tag, "ops-project");
    assert_eq!(delivered[0].user_id, "operator");
}

#[tokio::test]
async fn channel_identity_feeds_user_id_when_no_override() {
    let dir = TempDir::new().unwrap();
    let sink = RecordingSink::default();
    let relay = ActivityRelay::new(&test_config(dir.path()), sink.clone());

    relay
        .dispatch(
            HookKind::MessageSending,
            &json!({"to": "bob"}),
            &json!({"channelId": "webchat"}),
        )
        .await;
    relay
        .dispatch(
            HookKind::AgentEnd,
            &json!({}),
            &json!({"sessionKey": "sess-5", "channelId": "webchat"}),
        )
        .await;

    let delivered = sink.delivered.lock().unwrap();
    assert_eq!(delivered[0].user_id, "bob");
}
