//! # turnrelay-core
//!
//! Core library for turnrelay - a telemetry relay for agent-hosting
//! runtimes.
//!
//! This library provides:
//! - Tolerant field extraction from loose hook event/context objects
//! - Cognition (thinking/reasoning) inference
//! - A session/channel correlation store with late-arrival settling
//! - Wire-payload construction with total defaults
//! - Delivery with retry, backoff, and a durable fallback queue
//!
//! ## Architecture
//!
//! Hook events flow through one pipeline:
//! extraction → cognition inference → correlation/coalescing → settle →
//! payload construction → delivery (sink, then durable queue on failure).
//!
//! The relay is fail-open by design: malformed input degrades to sentinel
//! values and transport failures end in the durable queue, so the host's
//! turn is never blocked or failed by telemetry.
//!
//! ## Example
//!
//! ```rust,no_run
//! use turnrelay_core::{ActivityRelay, HookKind, RelayConfig};
//!
//! # async fn run() -> turnrelay_core::Result<()> {
//! let config = RelayConfig::default();
//! let relay = ActivityRelay::from_config(&config)?;
//!
//! let event = serde_json::json!({"durationMs": 1200, "success": true});
//! let ctx = serde_json::json!({"sessionKey": "sess-1", "channelId": "webchat"});
//! relay.dispatch(HookKind::AgentEnd, &event, &ctx).await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use cognition::{Cognition, ThinkingLevel};
pub use config::{Config, LoggingConfig, RelayConfig};
pub use deliver::{
    CommandSink, Delivery, DeliveryOutcome, DurableQueue, FlushReport, HttpSink, Sink, Transport,
};
pub use error::{Error, Result};
pub use hooks::{ActivityRelay, HookKind};
pub use payload::{build_payload, ActivityPayload, PayloadFields};
pub use snapshot::{Snapshot, SnapshotDraft};
pub use store::{CorrelationStore, MessageDirection, StoreDefaults};

// Public modules
pub mod cognition;
pub mod config;
pub mod deliver;
pub mod error;
pub mod extract;
pub mod hooks;
pub mod logging;
pub mod payload;
pub mod snapshot;
pub mod store;
