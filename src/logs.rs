//! Append-only log sinks
//!
//! Two files under the configured log directory:
//! - `turns.jsonl`: one JSON record per guard event, tagged by turn id so
//!   the producer side and the speech side of a turn can be correlated.
//! - `error_messages.txt`: timestamped plain-text lines for client-reported
//!   and server-side errors.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::guard::{TurnId, ViolationKind};

/// One line of the turn log.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnRecord {
    /// Producer side: a canonical reply was recorded.
    Turn {
        turn_id: TurnId,
        conversation_id: Uuid,
        len: usize,
        digest: String,
        preview: String,
        timestamp: DateTime<Utc>,
    },
    /// The display path read the reply.
    Display {
        turn_id: TurnId,
        len: usize,
        digest: String,
        preview: String,
        timestamp: DateTime<Utc>,
    },
    /// The speech path read the reply.
    Speech {
        turn_id: TurnId,
        len: usize,
        digest: String,
        preview: String,
        timestamp: DateTime<Utc>,
    },
    /// Display and speech diverged for what should be the same turn.
    Violation {
        kind: ViolationKind,
        turn_id: TurnId,
        displayed_turn: Option<TurnId>,
        expected_len: usize,
        expected_preview: String,
        observed_len: usize,
        observed_preview: String,
        timestamp: DateTime<Utc>,
    },
}

/// Append-only JSONL turn log.
pub struct TurnLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TurnLog {
    /// Open (creating the directory if needed) the turn log under `log_dir`.
    pub fn open(log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
        Ok(Self {
            path: log_dir.join("turns.jsonl"),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single JSON line.
    pub fn append(&self, record: &TurnRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("Failed to serialize turn record")?;
        let _guard = self.write_lock.lock().unwrap();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open turn log {}", self.path.display()))?;
        writeln!(file, "{}", line).context("Failed to append to turn log")?;
        Ok(())
    }
}

/// Append-only plain-text error log, one `[timestamp] [context] message`
/// line per entry.
pub struct ErrorLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ErrorLog {
    pub fn open(log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
        Ok(Self {
            path: log_dir.join("error_messages.txt"),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, context: &str, message: &str) -> Result<()> {
        let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        let _guard = self.write_lock.lock().unwrap();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open error log {}", self.path.display()))?;
        writeln!(file, "[{}] [{}] {}", stamp, context, message)
            .context("Failed to append to error log")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_log_appends_correlatable_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = TurnLog::open(dir.path()).unwrap();
        let conversation_id = Uuid::new_v4();

        log.append(&TurnRecord::Turn {
            turn_id: TurnId(1),
            conversation_id,
            len: 11,
            digest: "deadbeefdeadbeef".to_string(),
            preview: "Hello there".to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();
        log.append(&TurnRecord::Speech {
            turn_id: TurnId(1),
            len: 11,
            digest: "deadbeefdeadbeef".to_string(),
            preview: "Hello there".to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(first["type"], "turn");
        assert_eq!(second["type"], "speech");
        // Both sides carry the same turn id and length, so they correlate.
        assert_eq!(first["turn_id"], second["turn_id"]);
        assert_eq!(first["len"], second["len"]);
        assert_eq!(first["preview"], second["preview"]);
    }

    #[test]
    fn test_error_log_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::open(dir.path()).unwrap();
        log.append("TTS", "no audio generated").unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let line = contents.lines().next().unwrap();
        assert!(line.contains("[TTS] no audio generated"));
        assert!(line.starts_with('['));
    }

    #[test]
    fn test_violation_record_serializes_kind() {
        let dir = tempfile::tempdir().unwrap();
        let log = TurnLog::open(dir.path()).unwrap();
        log.append(&TurnRecord::Violation {
            kind: ViolationKind::StaleTurn,
            turn_id: TurnId(1),
            displayed_turn: Some(TurnId(2)),
            expected_len: 18,
            expected_preview: "second reply".to_string(),
            observed_len: 11,
            observed_preview: "first reply".to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let record: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(record["type"], "violation");
        assert_eq!(record["kind"], "stale_turn");
        assert_eq!(record["displayed_turn"], 2);
    }
}
