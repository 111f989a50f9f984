//! Guard observers
//!
//! The guard reports record/read/violation events through this interface
//! instead of writing to process-wide state. The server installs a tracing
//! observer and a JSONL file observer; tests install capturing observers.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::guard::{ConsistencyViolation, Fingerprint, TurnId};
use crate::logs::{TurnLog, TurnRecord};

/// Receiver for guard events. All methods default to no-ops so observers
/// implement only what they care about. Observers must not fail a request;
/// sink errors are logged and swallowed.
pub trait GuardObserver: Send + Sync {
    fn on_recorded(&self, _turn_id: TurnId, _fingerprint: &Fingerprint) {}
    fn on_display(&self, _turn_id: TurnId, _fingerprint: &Fingerprint) {}
    fn on_speech(&self, _turn_id: TurnId, _fingerprint: &Fingerprint) {}
    fn on_violation(&self, _violation: &ConsistencyViolation) {}
}

/// Structured tracing events for every guard transition.
pub struct TracingObserver;

impl GuardObserver for TracingObserver {
    fn on_recorded(&self, turn_id: TurnId, fingerprint: &Fingerprint) {
        info!(
            turn = %turn_id,
            len = fingerprint.len,
            digest = %fingerprint.digest,
            preview = %fingerprint.preview,
            "reply recorded"
        );
    }

    fn on_display(&self, turn_id: TurnId, fingerprint: &Fingerprint) {
        info!(turn = %turn_id, len = fingerprint.len, "reply read for display");
    }

    fn on_speech(&self, turn_id: TurnId, fingerprint: &Fingerprint) {
        info!(turn = %turn_id, len = fingerprint.len, "reply read for speech");
    }

    fn on_violation(&self, violation: &ConsistencyViolation) {
        warn!(
            kind = violation.kind.as_str(),
            turn = %violation.turn_id,
            expected_len = violation.expected_len,
            observed_len = violation.observed_len,
            "consistency violation: {}",
            violation
        );
    }
}

/// Appends guard events to the JSONL turn log, tagged with the server's
/// conversation id.
pub struct JsonlObserver {
    log: TurnLog,
    conversation_id: Uuid,
}

impl JsonlObserver {
    pub fn new(log: TurnLog, conversation_id: Uuid) -> Self {
        Self {
            log,
            conversation_id,
        }
    }

    fn append(&self, record: TurnRecord) {
        if let Err(e) = self.log.append(&record) {
            warn!("failed to append turn log record: {:#}", e);
        }
    }
}

impl GuardObserver for JsonlObserver {
    fn on_recorded(&self, turn_id: TurnId, fingerprint: &Fingerprint) {
        self.append(TurnRecord::Turn {
            turn_id,
            conversation_id: self.conversation_id,
            len: fingerprint.len,
            digest: fingerprint.digest.clone(),
            preview: fingerprint.preview.clone(),
            timestamp: Utc::now(),
        });
    }

    fn on_display(&self, turn_id: TurnId, fingerprint: &Fingerprint) {
        self.append(TurnRecord::Display {
            turn_id,
            len: fingerprint.len,
            digest: fingerprint.digest.clone(),
            preview: fingerprint.preview.clone(),
            timestamp: Utc::now(),
        });
    }

    fn on_speech(&self, turn_id: TurnId, fingerprint: &Fingerprint) {
        self.append(TurnRecord::Speech {
            turn_id,
            len: fingerprint.len,
            digest: fingerprint.digest.clone(),
            preview: fingerprint.preview.clone(),
            timestamp: Utc::now(),
        });
    }

    fn on_violation(&self, violation: &ConsistencyViolation) {
        self.append(TurnRecord::Violation {
            kind: violation.kind,
            turn_id: violation.turn_id,
            displayed_turn: violation.displayed_turn,
            expected_len: violation.expected_len,
            expected_preview: violation.expected_preview.clone(),
            observed_len: violation.observed_len,
            observed_preview: violation.observed_preview.clone(),
            timestamp: Utc::now(),
        });
    }
}
