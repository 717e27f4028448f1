use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::submission::BatchResult;
use crate::validation::BatchRequest;

const JOURNAL_FILE_NAME: &str = "run-journal.jsonl";

/// Local JSONL record of batch lifecycles. Identifiers are stored only as a
/// batch fingerprint.
#[derive(Clone)]
pub struct RunJournal {
    enabled: Arc<AtomicBool>,
    queue: Arc<Mutex<Vec<JournalEvent>>>,
    buffer_path: PathBuf,
    max_file_bytes: u64,
    max_file_count: usize,
}

impl RunJournal {
    pub fn new<P: AsRef<Path>>(data_dir: P, config: &AppConfig) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        let buffer_path = data_dir.join(JOURNAL_FILE_NAME);
        if config.journal_enabled {
            fs::create_dir_all(data_dir)?;
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&buffer_path)?;
        }

        Ok(Self {
            enabled: Arc::new(AtomicBool::new(config.journal_enabled)),
            queue: Arc::new(Mutex::new(Vec::new())),
            buffer_path,
            max_file_bytes: config.journal_buffer_max_bytes,
            max_file_count: config.journal_buffer_max_files,
        })
    }

    pub fn record(&self, name: impl Into<String>, payload: Value) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        self.queue.lock().push(JournalEvent::new(name.into(), payload));
    }

    pub fn record_submitted(&self, batch: &BatchRequest, skipped_invalid: usize) {
        self.record(
            "batch_submitted",
            json!({
                "fingerprint": batch_fingerprint(batch),
                "identifier_count": batch.len(),
                "skipped_invalid": skipped_invalid,
            }),
        );
    }

    pub fn record_completed(&self, batch: &BatchRequest, result: &BatchResult) {
        self.record(
            "batch_completed",
            json!({
                "fingerprint": batch_fingerprint(batch),
                "outcome": result.outcome.as_str(),
                "record_count": result.records.len(),
                "dropped_elements": result.dropped_elements,
                "elapsed_ms": result.elapsed_millis,
            }),
        );
    }

    pub fn record_failed(&self, batch: &BatchRequest, err: &AppError) {
        self.record(
            "batch_failed",
            json!({
                "fingerprint": batch_fingerprint(batch),
                "kind": err.kind(),
                "status": err.status(),
            }),
        );
    }

    pub fn flush(&self) -> AppResult<()> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            return Ok(());
        }

        let mut encoded = Vec::with_capacity(queue.len());
        let mut incoming_bytes = 0_u64;
        for event in queue.iter() {
            let line = serde_json::to_vec(event)?;
            incoming_bytes += (line.len() + 1) as u64;
            encoded.push(line);
        }

        self.rotate_if_needed(incoming_bytes)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.buffer_path)?;
        for line in &encoded {
            file.write_all(line)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        queue.clear();
        Ok(())
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn buffer_path(&self) -> &Path {
        &self.buffer_path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn rotate_if_needed(&self, incoming_bytes: u64) -> AppResult<()> {
        let current_size = fs::metadata(&self.buffer_path)
            .map(|m| m.len())
            .unwrap_or(0);
        if current_size == 0 || current_size + incoming_bytes <= self.max_file_bytes {
            return Ok(());
        }

        let parent = self.buffer_path.parent().unwrap_or_else(|| Path::new("."));
        if self.max_file_count > 1 {
            let rotated = parent.join(format!(
                "{}-{}.jsonl",
                self.buffer_stem(),
                Utc::now().format("%Y%m%d%H%M%S%3f")
            ));
            fs::rename(&self.buffer_path, rotated)?;
            self.prune_rotations(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.buffer_path)?;
        Ok(())
    }

    fn prune_rotations(&self, parent: &Path) -> AppResult<()> {
        let prefix = format!("{}-", self.buffer_stem());
        let mut rotations = fs::read_dir(parent)?
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let name = entry.file_name().to_string_lossy().to_string();
                (name.starts_with(&prefix) && name.ends_with(".jsonl")).then(|| entry.path())
            })
            .collect::<Vec<_>>();

        // Timestamp suffixes sort chronologically.
        rotations.sort();
        let allowed = self.max_file_count.saturating_sub(1);
        if rotations.len() > allowed {
            let excess = rotations.len() - allowed;
            for path in rotations.into_iter().take(excess) {
                if let Err(err) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %err, "failed to prune journal rotation");
                }
            }
        }
        Ok(())
    }

    fn buffer_stem(&self) -> String {
        self.buffer_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "run-journal".into())
    }
}

#[derive(Debug, Serialize)]
pub struct JournalEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl JournalEvent {
    fn new(name: String, payload: Value) -> Self {
        Self {
            name,
            timestamp: Utc::now(),
            payload,
        }
    }
}

pub fn batch_fingerprint(batch: &BatchRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(batch.identifiers().join("\n").as_bytes());
    STANDARD_NO_PAD.encode(hasher.finalize())
}
