//! Reply consistency guard
//!
//! One canonical reply value is produced per turn and every consumer (the
//! on-screen display path and the speech synthesis path) must observe that
//! exact value, byte for byte. The guard is a pure mapping from turn id to
//! an immutable text value; it performs no text transformation.
//!
//! Divergence between the paths is reported as a [`ConsistencyViolation`]
//! through injected [`GuardObserver`]s, never through hidden global state.

pub mod error;
pub mod observer;
pub mod reply;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use error::GuardError;
pub use observer::{GuardObserver, JsonlObserver, TracingObserver};
pub use reply::{ReplyContent, Segment, SegmentKind};

/// Monotonically increasing identifier for one request/response cycle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Log-safe summary of a reply recorded at write time: byte length, a short
/// SHA-256 prefix, and a truncated preview. Full content never enters logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fingerprint {
    /// Exact byte length of the canonical reply
    pub len: usize,
    /// Hex of the first 8 bytes of the SHA-256 digest
    pub digest: String,
    /// Char-boundary-safe prefix of the reply
    pub preview: String,
}

impl Fingerprint {
    pub fn of(text: &str, preview_chars: usize) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        Self {
            len: text.len(),
            digest: hex::encode(&digest[..8]),
            preview: preview(text, preview_chars),
        }
    }
}

/// Truncate to at most `max_chars` characters without splitting a char.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Category of a detected divergence, used for offline triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Speech was requested for a turn other than the one currently
    /// displayed (an out-of-order or stale request).
    StaleTurn,
    /// An observed value differs from the fingerprint recorded at write
    /// time (a diverged copy on a consumption path).
    ContentDrift,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::StaleTurn => "stale_turn",
            ViolationKind::ContentDrift => "content_drift",
        }
    }
}

/// Record of one detected display/speech divergence. Carries both lengths
/// and previews so the failure can be diagnosed from logs alone.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyViolation {
    pub kind: ViolationKind,
    /// Turn the consumer asked for
    pub turn_id: TurnId,
    /// Turn currently displayed, if any
    pub displayed_turn: Option<TurnId>,
    pub expected_len: usize,
    pub expected_preview: String,
    pub observed_len: usize,
    pub observed_preview: String,
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::StaleTurn => write!(
                f,
                "speech requested for turn {} ({} bytes, {:?}) while turn {} is displayed ({} bytes, {:?})",
                self.turn_id,
                self.observed_len,
                self.observed_preview,
                self.displayed_turn
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "none".to_string()),
                self.expected_len,
                self.expected_preview,
            ),
            ViolationKind::ContentDrift => write!(
                f,
                "turn {} diverged: recorded {} bytes ({:?}), observed {} bytes ({:?})",
                self.turn_id,
                self.expected_len,
                self.expected_preview,
                self.observed_len,
                self.observed_preview,
            ),
        }
    }
}

/// What to do with a request once a violation has been detected and logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViolationPolicy {
    /// Log the violation and serve the canonical text anyway.
    #[default]
    Proceed,
    /// Log the violation and fail the request.
    Abort,
}

impl std::str::FromStr for ViolationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "proceed" => Ok(ViolationPolicy::Proceed),
            "abort" => Ok(ViolationPolicy::Abort),
            other => Err(format!("unknown violation policy '{}'", other)),
        }
    }
}

impl fmt::Display for ViolationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationPolicy::Proceed => write!(f, "proceed"),
            ViolationPolicy::Abort => write!(f, "abort"),
        }
    }
}

/// One recorded turn: the immutable canonical reply plus its write-time
/// fingerprint.
struct RecordedTurn {
    text: Arc<str>,
    fingerprint: Fingerprint,
    #[allow(dead_code)]
    recorded_at: DateTime<Utc>,
}

#[derive(Default)]
struct GuardState {
    turns: HashMap<TurnId, RecordedTurn>,
    displayed: Option<TurnId>,
}

/// The reply consistency guard.
///
/// Single writer per turn: `record_reply` stores the canonical value exactly
/// once. Reads clone an `Arc<str>`, so concurrent display/speech consumers
/// of an already-recorded turn never contend on the value itself.
pub struct ReplyGuard {
    state: RwLock<GuardState>,
    next_id: AtomicU64,
    policy: ViolationPolicy,
    preview_chars: usize,
    observers: Vec<Arc<dyn GuardObserver>>,
}

impl ReplyGuard {
    pub fn new(policy: ViolationPolicy, preview_chars: usize) -> Self {
        Self {
            state: RwLock::new(GuardState::default()),
            next_id: AtomicU64::new(1),
            policy,
            preview_chars,
            observers: Vec::new(),
        }
    }

    /// Attach an observer. Observers receive every record/read/violation
    /// event; they must not fail the request.
    pub fn with_observer(mut self, observer: Arc<dyn GuardObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn policy(&self) -> ViolationPolicy {
        self.policy
    }

    /// Allocate the next turn id.
    pub fn begin_turn(&self) -> TurnId {
        TurnId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Store the canonical reply for a turn.
    ///
    /// Idempotent when called again with byte-identical text. Recording the
    /// same turn with different text signals a producer-side inconsistency
    /// and fails with [`GuardError::DuplicateTurn`]; the original value is
    /// never replaced.
    pub fn record_reply(&self, turn_id: TurnId, text: &str) -> Result<Fingerprint, GuardError> {
        let mut state = self.state.write().unwrap();

        if let Some(existing) = state.turns.get(&turn_id) {
            if existing.text.as_ref() == text {
                return Ok(existing.fingerprint.clone());
            }
            return Err(GuardError::DuplicateTurn {
                turn_id,
                existing_len: existing.fingerprint.len,
                existing_preview: existing.fingerprint.preview.clone(),
                incoming_len: text.len(),
                incoming_preview: preview(text, self.preview_chars),
            });
        }

        let fingerprint = Fingerprint::of(text, self.preview_chars);
        state.turns.insert(
            turn_id,
            RecordedTurn {
                text: Arc::from(text),
                fingerprint: fingerprint.clone(),
                recorded_at: Utc::now(),
            },
        );
        drop(state);

        for observer in &self.observers {
            observer.on_recorded(turn_id, &fingerprint);
        }
        Ok(fingerprint)
    }

    /// Read the canonical reply for rendering and mark the turn as the one
    /// currently displayed.
    pub fn get_for_display(&self, turn_id: TurnId) -> Result<Arc<str>, GuardError> {
        let mut state = self.state.write().unwrap();
        let turn = state
            .turns
            .get(&turn_id)
            .ok_or(GuardError::UnknownTurn(turn_id))?;
        let text = turn.text.clone();
        let fingerprint = turn.fingerprint.clone();
        state.displayed = Some(turn_id);
        drop(state);

        self.verify_read(turn_id, &text, &fingerprint)?;
        for observer in &self.observers {
            observer.on_display(turn_id, &fingerprint);
        }
        Ok(text)
    }

    /// Read the canonical reply for speech synthesis.
    ///
    /// Returns the same value as [`get_for_display`](Self::get_for_display)
    /// for the same turn id. A request for a turn other than the currently
    /// displayed one is flagged as a [`ViolationKind::StaleTurn`] violation
    /// rather than silently substituting the latest turn's text.
    pub fn get_for_speech(&self, turn_id: TurnId) -> Result<Arc<str>, GuardError> {
        let state = self.state.read().unwrap();
        let turn = state
            .turns
            .get(&turn_id)
            .ok_or(GuardError::UnknownTurn(turn_id))?;
        let text = turn.text.clone();
        let fingerprint = turn.fingerprint.clone();
        let displayed = state.displayed;
        let displayed_fingerprint = displayed
            .and_then(|id| state.turns.get(&id))
            .map(|t| t.fingerprint.clone());
        drop(state);

        self.verify_read(turn_id, &text, &fingerprint)?;

        if let (Some(displayed_id), Some(displayed_fp)) = (displayed, displayed_fingerprint) {
            if displayed_id != turn_id {
                let violation = ConsistencyViolation {
                    kind: ViolationKind::StaleTurn,
                    turn_id,
                    displayed_turn: Some(displayed_id),
                    expected_len: displayed_fp.len,
                    expected_preview: displayed_fp.preview,
                    observed_len: fingerprint.len,
                    observed_preview: fingerprint.preview.clone(),
                };
                self.report(violation)?;
            }
        }

        for observer in &self.observers {
            observer.on_speech(turn_id, &fingerprint);
        }
        Ok(text)
    }

    /// Compare a consumer-supplied copy of a turn's text against the
    /// canonical value.
    ///
    /// Legacy speech callers send the text they intend to speak alongside
    /// the turn id; any byte difference from the canonical reply is a
    /// [`ViolationKind::ContentDrift`] violation. Synthesis must use only
    /// the value returned by [`get_for_speech`](Self::get_for_speech).
    pub fn check_speech_text(&self, turn_id: TurnId, client_text: &str) -> Result<(), GuardError> {
        let state = self.state.read().unwrap();
        let turn = state
            .turns
            .get(&turn_id)
            .ok_or(GuardError::UnknownTurn(turn_id))?;
        let fingerprint = turn.fingerprint.clone();
        let matches = turn.text.as_ref() == client_text;
        drop(state);

        if matches {
            return Ok(());
        }
        let violation = ConsistencyViolation {
            kind: ViolationKind::ContentDrift,
            turn_id,
            displayed_turn: None,
            expected_len: fingerprint.len,
            expected_preview: fingerprint.preview,
            observed_len: client_text.len(),
            observed_preview: preview(client_text, self.preview_chars),
        };
        self.report(violation)
    }

    /// Re-derive the fingerprint of a value handed to a consumer and compare
    /// it with what was recorded at write time.
    fn verify_read(
        &self,
        turn_id: TurnId,
        text: &str,
        recorded: &Fingerprint,
    ) -> Result<(), GuardError> {
        let observed = Fingerprint::of(text, self.preview_chars);
        if observed == *recorded {
            return Ok(());
        }
        let violation = ConsistencyViolation {
            kind: ViolationKind::ContentDrift,
            turn_id,
            displayed_turn: None,
            expected_len: recorded.len,
            expected_preview: recorded.preview.clone(),
            observed_len: observed.len,
            observed_preview: observed.preview,
        };
        self.report(violation)
    }

    /// Notify observers of a violation and apply the configured policy.
    fn report(&self, violation: ConsistencyViolation) -> Result<(), GuardError> {
        for observer in &self.observers {
            observer.on_violation(&violation);
        }
        match self.policy {
            ViolationPolicy::Proceed => Ok(()),
            ViolationPolicy::Abort => Err(GuardError::Violation(violation)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Observer that captures violations for assertions.
    #[derive(Default)]
    struct Capture {
        violations: Mutex<Vec<ConsistencyViolation>>,
    }

    impl GuardObserver for Capture {
        fn on_violation(&self, violation: &ConsistencyViolation) {
            self.violations.lock().unwrap().push(violation.clone());
        }
    }

    fn guard_with_capture(policy: ViolationPolicy) -> (ReplyGuard, Arc<Capture>) {
        let capture = Arc::new(Capture::default());
        let guard = ReplyGuard::new(policy, 96).with_observer(capture.clone());
        (guard, capture)
    }

    #[test]
    fn test_display_and_speech_read_identical_value() {
        let (guard, capture) = guard_with_capture(ViolationPolicy::Proceed);
        let turn = guard.begin_turn();
        let fp = guard.record_reply(turn, "Hello there").unwrap();

        assert_eq!(fp.len, 11);
        let displayed = guard.get_for_display(turn).unwrap();
        let spoken = guard.get_for_speech(turn).unwrap();
        assert_eq!(displayed.as_ref(), "Hello there");
        assert_eq!(displayed.as_ref(), spoken.as_ref());
        assert_eq!(displayed.len(), spoken.len());
        assert!(capture.violations.lock().unwrap().is_empty());
    }

    #[test]
    fn test_record_is_idempotent_for_identical_text() {
        let (guard, _) = guard_with_capture(ViolationPolicy::Proceed);
        let turn = guard.begin_turn();
        let first = guard.record_reply(turn, "same reply").unwrap();
        let second = guard.record_reply(turn, "same reply").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_record_with_different_text_is_duplicate_error() {
        let (guard, _) = guard_with_capture(ViolationPolicy::Proceed);
        let turn = guard.begin_turn();
        guard.record_reply(turn, "first version").unwrap();
        let err = guard.record_reply(turn, "second version").unwrap_err();
        match err {
            GuardError::DuplicateTurn {
                existing_len,
                incoming_len,
                ..
            } => {
                assert_eq!(existing_len, "first version".len());
                assert_eq!(incoming_len, "second version".len());
            }
            other => panic!("expected DuplicateTurn, got {other:?}"),
        }
        // Original value survives.
        assert_eq!(
            guard.get_for_display(turn).unwrap().as_ref(),
            "first version"
        );
    }

    #[test]
    fn test_unknown_turn_fails_on_both_paths() {
        let (guard, _) = guard_with_capture(ViolationPolicy::Proceed);
        let missing = TurnId(42);
        assert!(matches!(
            guard.get_for_display(missing),
            Err(GuardError::UnknownTurn(TurnId(42)))
        ));
        assert!(matches!(
            guard.get_for_speech(missing),
            Err(GuardError::UnknownTurn(TurnId(42)))
        ));
        assert!(matches!(
            guard.check_speech_text(missing, "anything"),
            Err(GuardError::UnknownTurn(TurnId(42)))
        ));
    }

    #[test]
    fn test_turn_ids_are_monotonic() {
        let (guard, _) = guard_with_capture(ViolationPolicy::Proceed);
        let a = guard.begin_turn();
        let b = guard.begin_turn();
        let c = guard.begin_turn();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_stale_speech_request_is_flagged() {
        let (guard, capture) = guard_with_capture(ViolationPolicy::Proceed);
        let turn1 = guard.begin_turn();
        let turn2 = guard.begin_turn();
        guard.record_reply(turn1, "first reply").unwrap();
        guard.record_reply(turn2, "second reply, newer").unwrap();
        guard.get_for_display(turn2).unwrap();

        // A delayed speech request for turn 1 while turn 2 is displayed.
        let spoken = guard.get_for_speech(turn1).unwrap();
        assert_eq!(spoken.as_ref(), "first reply");

        let violations = capture.violations.lock().unwrap();
        assert_eq!(violations.len(), 1);
        let v = &violations[0];
        assert_eq!(v.kind, ViolationKind::StaleTurn);
        assert_eq!(v.turn_id, turn1);
        assert_eq!(v.displayed_turn, Some(turn2));
        assert_eq!(v.observed_len, "first reply".len());
        assert_eq!(v.expected_len, "second reply, newer".len());
    }

    #[test]
    fn test_abort_policy_rejects_stale_request() {
        let (guard, capture) = guard_with_capture(ViolationPolicy::Abort);
        let turn1 = guard.begin_turn();
        let turn2 = guard.begin_turn();
        guard.record_reply(turn1, "old").unwrap();
        guard.record_reply(turn2, "new").unwrap();
        guard.get_for_display(turn2).unwrap();

        let err = guard.get_for_speech(turn1).unwrap_err();
        assert!(matches!(err, GuardError::Violation(_)));
        // Still logged before rejection.
        assert_eq!(capture.violations.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_client_text_drift_is_flagged() {
        let (guard, capture) = guard_with_capture(ViolationPolicy::Proceed);
        let turn = guard.begin_turn();
        guard.record_reply(turn, "canonical text").unwrap();
        guard.get_for_display(turn).unwrap();

        guard.check_speech_text(turn, "canonical text").unwrap();
        assert!(capture.violations.lock().unwrap().is_empty());

        guard
            .check_speech_text(turn, "canonical text, mangled in transit")
            .unwrap();
        let violations = capture.violations.lock().unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::ContentDrift);
        assert_eq!(violations[0].expected_len, "canonical text".len());
    }

    #[test]
    fn test_speech_before_any_display_is_not_stale() {
        let (guard, capture) = guard_with_capture(ViolationPolicy::Abort);
        let turn = guard.begin_turn();
        guard.record_reply(turn, "spoken first").unwrap();
        // No display yet, so there is no basis for a stale comparison.
        let spoken = guard.get_for_speech(turn).unwrap();
        assert_eq!(spoken.as_ref(), "spoken first");
        assert!(capture.violations.lock().unwrap().is_empty());
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let text = "héllo wörld";
        assert_eq!(preview(text, 4), "héll");
        assert_eq!(preview("short", 96), "short");
    }

    #[test]
    fn test_fingerprint_len_counts_bytes() {
        let fp = Fingerprint::of("héllo", 96);
        assert_eq!(fp.len, 6);
        assert_eq!(fp.preview, "héllo");
        assert_eq!(fp.digest.len(), 16);
    }
}
