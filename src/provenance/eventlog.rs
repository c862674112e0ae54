//! SH-015: Append-only JSONL build log under the state directory.

use crate::core::error::{BuildError, Result};
use crate::core::types::{BuildEvent, TimestampedEvent};
use chrono::{SecondsFormat, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};

/// RFC 3339 UTC timestamp with second precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Run id: `r-` plus 12 hex digits from the clock.
pub fn generate_run_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

pub fn event_log_path(state_dir: &Path) -> PathBuf {
    state_dir.join("events.jsonl")
}

/// Append one event as a JSON line.
pub fn append_event(state_dir: &Path, event: BuildEvent) -> Result<()> {
    std::fs::create_dir_all(state_dir).map_err(|e| BuildError::io(state_dir, e))?;
    let path = event_log_path(state_dir);

    let line = serde_json::to_string(&TimestampedEvent {
        ts: now_rfc3339(),
        event,
    })
    .map_err(|e| BuildError::Config(format!("cannot encode event: {}", e)))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| BuildError::io(&path, e))?;
    writeln!(file, "{}", line).map_err(|e| BuildError::io(&path, e))
}

/// Read every event back; malformed lines are skipped with a warning.
pub fn read_events(state_dir: &Path) -> Result<Vec<TimestampedEvent>> {
    let path = event_log_path(state_dir);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BuildError::io(&path, e)),
    };

    let mut events = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TimestampedEvent>(line) {
            Ok(ev) => events.push(ev),
            Err(e) => tracing::warn!(line = n + 1, error = %e, "skipping malformed event"),
        }
    }
    Ok(events)
}

/// Records events for one run; logging failures never abort the build.
#[derive(Debug, Clone)]
pub struct EventRecorder {
    state_dir: PathBuf,
    run_id: String,
}

impl EventRecorder {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
            run_id: generate_run_id(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record(&self, event: BuildEvent) {
        if let Err(e) = append_event(&self.state_dir, event) {
            tracing::warn!(error = %e, "cannot append to build log");
        }
    }
}
