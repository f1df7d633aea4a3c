//! Durable fallback queue.
//!
//! Payloads that exhaust their delivery attempts are appended to a local
//! queue for out-of-band reprocessing. The queue is one Markdown file per
//! calendar day: a header line on first write, then one block per record,
//! each a `## queued_at:` heading followed by a fenced ```json block
//! holding the single-line payload. The file is opened, appended, and
//! closed per write so concurrent external readers are never locked out.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::{Error, Result};
use crate::payload::{now_iso, ActivityPayload};

/// Append-only dated queue of undelivered payloads.
#[derive(Debug, Clone)]
pub struct DurableQueue {
    root: PathBuf,
}

impl DurableQueue {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Append one payload to today's queue file, creating it (and the queue
    /// directory) on first write. Returns the file written.
    pub fn append(&self, payload: &ActivityPayload) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;

        let date = Local::now().format("%Y-%m-%d").to_string();
        let path = self.root.join(format!("{date}.md"));
        if !path.exists() {
            fs::write(&path, format!("# turnrelay fallback queue ({date})\n\n"))?;
        }

        let block = format!(
            "## queued_at: {}\n```json\n{}\n```\n\n",
            now_iso(),
            serde_json::to_string(payload)?
        );

        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(block.as_bytes())?;
        Ok(path)
    }

    /// All queue files, oldest first.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let pattern = self.root.join("*.md");
        let entries = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::Queue(format!("invalid queue pattern: {}", e)))?;
        let mut files: Vec<PathBuf> = entries.flatten().collect();
        files.sort();
        Ok(files)
    }

    /// Parse the payloads out of one queue file.
    ///
    /// Records that fail to parse are skipped, not errors; a partially
    /// corrupted file must not block replay of the rest.
    pub fn read_payloads(path: &Path) -> Result<Vec<ActivityPayload>> {
        let body = fs::read_to_string(path)?;
        let mut payloads = Vec::new();
        let mut in_block = false;
        let mut block = String::new();

        for line in body.lines() {
            let trimmed = line.trim();
            if !in_block {
                if trimmed == "```json" {
                    in_block = true;
                    block.clear();
                }
                continue;
            }
            if trimmed == "```" {
                in_block = false;
                if let Ok(payload) = serde_json::from_str::<ActivityPayload>(block.trim()) {
                    payloads.push(payload);
                }
                continue;
            }
            if !block.is_empty() {
                block.push('\n');
            }
            block.push_str(line);
        }

        Ok(payloads)
    }

    /// Rewrite a queue file to hold only the given payloads, deleting it
    /// when none remain. Rewritten records are marked `replay_pending` so a
    /// reader can tell them from fresh failures.
    pub fn rewrite(path: &Path, payloads: &[ActivityPayload]) -> Result<()> {
        if payloads.is_empty() {
            match fs::remove_file(path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut body = format!("# turnrelay fallback queue ({stem})\n\n");
        for payload in payloads {
            body.push_str(&format!(
                "## queued_at: replay_pending\n```json\n{}\n```\n\n",
                serde_json::to_string(payload)?
            ));
        }
        fs::write(path, body)?;
        Ok(())
    }
}
