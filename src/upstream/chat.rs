//! Chat completions client for the upstream conversational API

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::guard::{preview, ReplyContent, Segment, SegmentKind};
use crate::types::Message;
use crate::upstream::ConversationService;

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct XaiChatClient {
    client: Arc<Client>,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

impl XaiChatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Arc::new(Client::new()),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ConversationService for XaiChatClient {
    async fn complete(&self, api_key: &str, history: &[Message]) -> Result<ReplyContent> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: history
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_wire_str(),
                    content: m.content.clone(),
                })
                .collect(),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await
            .context("Failed to send request to conversation service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!(
                "conversation service error ({}): {}",
                status,
                preview(&body, 500)
            );
        }

        let body = response
            .text()
            .await
            .context("Failed to read conversation service response")?;
        let raw: Value = serde_json::from_str(&body).map_err(|e| {
            anyhow::anyhow!(
                "Failed to parse conversation service response: {} (body: {})",
                e,
                preview(&body, 500)
            )
        })?;

        parse_reply(&raw)
    }
}

/// Extract the reply from a chat-completions response body.
///
/// Models return `message.content` either as a flat string or as an array
/// of typed content parts. The structured shape is preserved as segments;
/// normalization to the canonical string happens later, exactly once.
fn parse_reply(raw: &Value) -> Result<ReplyContent> {
    let content = raw
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"));

    match content {
        Some(Value::String(s)) => Ok(ReplyContent::PlainText(s.clone())),
        Some(Value::Array(parts)) => {
            let segments = parts.iter().map(parse_segment).collect();
            Ok(ReplyContent::Segments(segments))
        }
        _ => bail!("conversation service reply has no content"),
    }
}

fn parse_segment(part: &Value) -> Segment {
    let kind = match part.get("type").and_then(|t| t.as_str()) {
        Some("text") => SegmentKind::Text,
        Some("image_url") | Some("image") => SegmentKind::Image,
        Some("audio") | Some("output_audio") => SegmentKind::Audio,
        _ => SegmentKind::Other,
    };
    let text = match kind {
        SegmentKind::Text => part
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string(),
        SegmentKind::Image => part
            .get("image_url")
            .and_then(|i| i.get("url"))
            .and_then(|u| u.as_str())
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    };
    Segment::of_kind(kind, text)
}
