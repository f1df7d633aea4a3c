//! Delivery sinks.
//!
//! A sink is the external target for an activity payload. Two transports
//! exist (JSON-over-HTTP POST, and piping the payload to an external
//! command) and both present the same one-operation contract, so the
//! retry/backoff/queue logic depends only on [`Sink`].

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::payload::ActivityPayload;

/// One-operation delivery contract: success, or a transport failure the
/// retry layer may try again.
pub trait Sink {
    fn deliver(&self, payload: &ActivityPayload) -> impl Future<Output = Result<()>> + Send;
}

/// JSON-over-HTTP sink.
pub struct HttpSink {
    http_client: reqwest::Client,
    url: String,
}

impl HttpSink {
    /// Build a client for the configured collector URL.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(Error::Config("sink URL must not be empty".to_string()));
        }
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            url: url.trim().to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Sink for HttpSink {
    async fn deliver(&self, payload: &ActivityPayload) -> Result<()> {
        let response = self
            .http_client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Sink(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Sink(format!("API error ({}): {}", status, error_text)))
        }
    }
}

/// External-command sink: the payload is piped to the command's stdin and
/// the outcome read from its exit code (0 = delivered).
pub struct CommandSink {
    program: PathBuf,
    api_url: String,
}

impl CommandSink {
    pub fn new(program: impl Into<PathBuf>, api_url: &str) -> Self {
        Self {
            program: program.into(),
            api_url: api_url.to_string(),
        }
    }
}

impl Sink for CommandSink {
    async fn deliver(&self, payload: &ActivityPayload) -> Result<()> {
        let body = serde_json::to_vec(payload)?;

        let mut child = Command::new(&self.program)
            .arg("--api-url")
            .arg(&self.api_url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Sink(format!(
                    "failed to spawn {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&body)
                .await
                .map_err(|e| Error::Sink(format!("failed to write payload: {}", e)))?;
            // Dropping closes the pipe so the child sees EOF.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Sink(format!("failed to wait for command: {}", e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::Sink(format!(
                "{} exited {}: {}",
                self.program.display(),
                output
                    .status
                    .code()
                    .map_or_else(|| "by signal".to_string(), |c| c.to_string()),
                stderr.trim()
            )))
        }
    }
}

/// Runtime-selected transport.
pub enum Transport {
    Http(HttpSink),
    Command(CommandSink),
}

impl Sink for Transport {
    async fn deliver(&self, payload: &ActivityPayload) -> Result<()> {
        match self {
            Transport::Http(sink) => sink.deliver(payload).await,
            Transport::Command(sink) => sink.deliver(payload).await,
        }
    }
}
