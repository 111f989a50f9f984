//! Error types for the reply consistency guard.

use thiserror::Error;

use crate::guard::{ConsistencyViolation, TurnId};

/// Errors surfaced by [`ReplyGuard`](crate::guard::ReplyGuard) operations.
///
/// All of these are local, recoverable conditions. None should take the
/// server down; handlers map them to HTTP status codes.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The same turn id was recorded twice with different text. This is a
    /// producer-side bug and is never resolved by overwriting.
    #[error(
        "turn {turn_id} already recorded with different text: \
         existing {existing_len} bytes ({existing_preview:?}), \
         incoming {incoming_len} bytes ({incoming_preview:?})"
    )]
    DuplicateTurn {
        turn_id: TurnId,
        existing_len: usize,
        existing_preview: String,
        incoming_len: usize,
        incoming_preview: String,
    },

    /// A consumer asked for a turn that was never recorded.
    #[error("turn {0} was never recorded")]
    UnknownTurn(TurnId),

    /// A consistency violation was detected and the configured policy is
    /// to abort the request instead of proceeding with canonical text.
    #[error("request rejected by violation policy: {0}")]
    Violation(ConsistencyViolation),
}
