//! External collaborators
//!
//! The conversation service and the speech service are opaque network
//! services. They sit behind traits so the server glue and the tests do not
//! depend on the concrete xAI-compatible clients.

pub mod chat;
pub mod speech;

use anyhow::Result;
use async_trait::async_trait;

use crate::guard::ReplyContent;
use crate::types::Message;

pub use chat::XaiChatClient;
pub use speech::XaiSpeechClient;

/// Produces one reply per user turn from the conversation history.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationService: Send + Sync {
    async fn complete(&self, api_key: &str, history: &[Message]) -> Result<ReplyContent>;
}

/// Synthesizes audio for exactly the given text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Returns WAV bytes for browser playback.
    async fn synthesize(&self, api_key: &str, text: &str) -> Result<Vec<u8>>;
}
