//! Append-only NDJSON progress log.
//!
//! One JSON object per line with sorted keys. `ts` and `run_id` are filled in
//! when the event does not carry them. Write failures are reported through
//! `tracing` and otherwise ignored so that indexing never stops because the
//! log is unavailable.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Incremental,
    Backfill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    #[serde(rename = "skip_403")]
    Skip403,
    #[serde(rename = "skip_404")]
    Skip404,
    #[serde(rename = "retry_429")]
    Retry429,
    RetryOther,
    Error,
    Done,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub mode: Mode,
    pub status: Status,
    pub channel_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_so_far: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_seen_iso: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(mode: Mode, status: Status, channel_id: u64) -> Self {
        Self {
            ts: None,
            run_id: None,
            mode,
            status,
            channel_id,
            batch_size: None,
            total_so_far: None,
            oldest_seen_iso: None,
            before_id: None,
            message: None,
        }
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = Some(n);
        self
    }

    pub fn total_so_far(mut self, n: usize) -> Self {
        self.total_so_far = Some(n);
        self
    }

    pub fn oldest_seen(mut self, at: chrono::DateTime<Utc>) -> Self {
        self.oldest_seen_iso = Some(iso_seconds(at));
        self
    }

    pub fn before_id(mut self, id: Option<u64>) -> Self {
        self.before_id = id;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Second-precision UTC with a `Z` suffix.
pub fn iso_seconds(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Run id from the environment override, else a fresh ULID.
pub fn resolve_run_id(env_override: Option<&str>) -> String {
    match env_override.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => ulid::Ulid::new().to_string(),
    }
}

/// Progress sink shared by every indexing task of a run.
#[derive(Clone)]
pub struct ProgressLog {
    run_id: String,
    path: Option<PathBuf>,
    file: Arc<Mutex<Option<File>>>,
}

impl ProgressLog {
    /// Opens (creating parent directories) `path` in append mode. An unopenable
    /// path yields a log that drops its events.
    pub fn open(path: impl AsRef<Path>, run_id: String) -> Self {
        let path = path.as_ref().to_path_buf();
        let file = match open_append(&path) {
            Ok(f) => Some(f),
            Err(e) => {
                warn!("Progress log: cannot open {}: {}", path.display(), e);
                None
            }
        };
        Self {
            run_id,
            path: Some(path),
            file: Arc::new(Mutex::new(file)),
        }
    }

    /// A log that discards every event.
    pub fn disabled(run_id: String) -> Self {
        Self {
            run_id,
            path: None,
            file: Arc::new(Mutex::new(None)),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn emit(&self, event: ProgressEvent) {
        let line = match self.render(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Progress log: cannot serialize event: {}", e);
                return;
            }
        };

        let Ok(mut guard) = self.file.lock() else {
            warn!("Progress log: lock poisoned, dropping event");
            return;
        };
        let Some(file) = guard.as_mut() else {
            return;
        };
        // One write per line keeps concurrent appends whole.
        if let Err(e) = file.write_all(line.as_bytes()).and_then(|_| file.flush()) {
            warn!("Progress log: write failed: {}", e);
        }
    }

    fn render(&self, event: ProgressEvent) -> serde_json::Result<String> {
        let mut map: Map<String, Value> = match serde_json::to_value(event)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        map.entry("ts")
            .or_insert_with(|| Value::String(iso_seconds(Utc::now())));
        map.entry("run_id")
            .or_insert_with(|| Value::String(self.run_id.clone()));

        let sorted: BTreeMap<String, Value> = map.into_iter().collect();
        let mut line = serde_json::to_string(&sorted)?;
        line.push('\n');
        Ok(line)
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}
