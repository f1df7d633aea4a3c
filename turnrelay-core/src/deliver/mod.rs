//! Payload delivery: bounded retries, backoff, durable fallback.
//!
//! Delivery never fails the caller. A payload is attempted against the sink
//! once per entry in the backoff schedule, sleeping the scheduled duration
//! between attempts; on exhaustion it is appended to the durable queue and
//! a warning is surfaced. The queue is for out-of-band reprocessing:
//! [`Delivery::flush_queue`] replays it on demand, but nothing replays it
//! automatically.

mod queue;
mod sink;

pub use queue::DurableQueue;
pub use sink::{CommandSink, HttpSink, Sink, Transport};

use std::time::Duration;

use crate::error::Result;
use crate::payload::ActivityPayload;

/// Default backoff schedule; attempt count equals its length.
pub const DEFAULT_BACKOFF_MS: &[u64] = &[1000, 2000, 4000];

/// Where a payload ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The sink accepted it.
    Delivered,
    /// All attempts failed; the payload is in the durable queue.
    Queued,
    /// All attempts failed and the queue write also failed.
    Lost,
}

/// What a queue replay accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub remaining: usize,
}

/// Retrying delivery pipeline over one sink.
pub struct Delivery<S> {
    sink: S,
    backoffs: Vec<Duration>,
    queue: DurableQueue,
}

impl<S: Sink> Delivery<S> {
    /// An empty schedule would mean zero attempts, so it falls back to the
    /// default.
    pub fn new(sink: S, backoff_ms: &[u64], queue: DurableQueue) -> Self {
        let schedule = if backoff_ms.is_empty() {
            DEFAULT_BACKOFF_MS
        } else {
            backoff_ms
        };
        Self {
            sink,
            backoffs: schedule.iter().map(|ms| Duration::from_millis(*ms)).collect(),
            queue,
        }
    }

    pub fn queue(&self) -> &DurableQueue {
        &self.queue
    }

    /// Attempt the sink up to schedule-length times, sleeping the scheduled
    /// backoff after every failure but the last. Returns whether any
    /// attempt succeeded.
    pub async fn post_with_retry(&self, payload: &ActivityPayload) -> bool {
        let attempts = self.backoffs.len();
        for (attempt, backoff) in self.backoffs.iter().enumerate() {
            match self.sink.deliver(payload).await {
                Ok(()) => return true,
                Err(e) => {
                    if attempt + 1 < attempts {
                        tracing::debug!(
                            attempt = attempt + 1,
                            attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Delivery attempt failed, backing off"
                        );
                        tokio::time::sleep(*backoff).await;
                    } else {
                        tracing::warn!(
                            attempts,
                            error = %e,
                            "Delivery failed after retries"
                        );
                    }
                }
            }
        }
        false
    }

    /// Deliver a payload, falling back to the durable queue on exhaustion.
    pub async fn send(&self, payload: &ActivityPayload) -> DeliveryOutcome {
        if self.post_with_retry(payload).await {
            return DeliveryOutcome::Delivered;
        }
        match self.queue.append(payload) {
            Ok(path) => {
                tracing::warn!(
                    queue_file = %path.display(),
                    session_key = %payload.session_key,
                    "Payload queued after retries"
                );
                DeliveryOutcome::Queued
            }
            Err(e) => {
                // Queue writes are best-effort; losing a record must not
                // surface beyond a warning.
                tracing::warn!(error = %e, "Failed to queue payload");
                DeliveryOutcome::Lost
            }
        }
    }

    /// Replay every queued record, rewriting each file with only the
    /// records that still fail and deleting files that drain completely.
    pub async fn flush_queue(&self) -> Result<FlushReport> {
        let mut report = FlushReport::default();

        for path in self.queue.files()? {
            let payloads = DurableQueue::read_payloads(&path)?;
            let mut remaining = Vec::new();

            for payload in payloads {
                if self.post_with_retry(&payload).await {
                    report.sent += 1;
                } else {
                    remaining.push(payload);
                }
            }

            report.remaining += remaining.len();
            DurableQueue::rewrite(&path, &remaining)?;
        }

        Ok(report)
    }
}
