//! Imagine Studio - Chat Server Library
//!
//! A small web chat server that wraps a third-party conversational and
//! text-to-speech API, with:
//! - A reply consistency guard: one canonical reply per turn, observed
//!   byte-identically by the display and speech paths
//! - Upstream chat completions and realtime speech clients
//! - Append-only turn and error logs for divergence triage
//!
//! # Example
//!
//! ```ignore
//! use imagine_studio::guard::{ReplyGuard, ViolationPolicy};
//!
//! let guard = ReplyGuard::new(ViolationPolicy::Proceed, 96);
//! let turn = guard.begin_turn();
//! guard.record_reply(turn, "Hello there")?;
//! assert_eq!(
//!     guard.get_for_display(turn)?.as_ref(),
//!     guard.get_for_speech(turn)?.as_ref(),
//! );
//! # Ok::<(), imagine_studio::guard::GuardError>(())
//! ```

// Core modules (order matters for cross-module dependencies)
pub mod types;
pub mod guard;
pub mod logs;
pub mod upstream;
pub mod config;
pub mod server;
pub mod cli;

// Re-export commonly used types for convenience
pub use guard::{
    ConsistencyViolation, Fingerprint, GuardError, ReplyContent, ReplyGuard, TurnId,
    ViolationKind, ViolationPolicy,
};

pub use config::Config;

pub use server::{start as start_server, ServerState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Chat Server with Reply Consistency Guard", NAME, VERSION)
}
