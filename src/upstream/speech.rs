//! Realtime speech synthesis client
//!
//! Speaks the upstream realtime WebSocket protocol: configure a session
//! with a fixed voice and a verbatim-repeat instruction, send the text as
//! one user item, then collect base64 PCM deltas until the output is done
//! and wrap them into a WAV file for browser playback.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Message as WsMessage, Utf8Bytes};
use tokio_tungstenite::connect_async;
use tracing::debug;
use url::Url;

use crate::upstream::SpeechService;

/// How long to wait for the session to be acknowledged.
const SESSION_SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the full audio response.
const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for the upstream realtime voice endpoint.
#[derive(Clone)]
pub struct XaiSpeechClient {
    realtime_url: String,
    voice: String,
    sample_rate: u32,
}

impl XaiSpeechClient {
    pub fn new(
        realtime_url: impl Into<String>,
        voice: impl Into<String>,
        sample_rate: u32,
    ) -> Result<Self> {
        let realtime_url = realtime_url.into();
        let parsed = Url::parse(&realtime_url)
            .with_context(|| format!("Invalid realtime URL: {}", realtime_url))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            bail!(
                "realtime URL must use the ws or wss scheme, got '{}'",
                parsed.scheme()
            );
        }
        Ok(Self {
            realtime_url,
            voice: voice.into(),
            sample_rate,
        })
    }

    fn session_config(&self) -> Value {
        json!({
            "type": "session.update",
            "session": {
                "voice": self.voice,
                "instructions": "You are a text-to-speech agent. The user will send you text. Reply with exactly that text and nothing else: no additions, no commentary.",
                "turn_detection": null,
                "audio": {
                    "input": { "format": { "type": "audio/pcm", "rate": self.sample_rate } },
                    "output": { "format": { "type": "audio/pcm", "rate": self.sample_rate } },
                },
            },
        })
    }
}

#[async_trait]
impl SpeechService for XaiSpeechClient {
    async fn synthesize(&self, api_key: &str, text: &str) -> Result<Vec<u8>> {
        let mut request = self
            .realtime_url
            .as_str()
            .into_client_request()
            .context("Failed to build realtime request")?;
        let auth_value: HeaderValue = format!("Bearer {}", api_key)
            .parse()
            .context("Failed to build Authorization header")?;
        request.headers_mut().insert(AUTHORIZATION, auth_value);

        let (mut ws, _) = connect_async(request)
            .await
            .context("Failed to connect to speech service")?;

        ws.send(WsMessage::Text(Utf8Bytes::from(
            self.session_config().to_string(),
        )))
        .await
        .context("Failed to send session config")?;

        // The server may emit other events (e.g. conversation.created)
        // before acknowledging the session.
        let deadline = Instant::now() + SESSION_SETUP_TIMEOUT;
        loop {
            let event = next_event(&mut ws, deadline)
                .await
                .context("Waiting for session acknowledgement")?;
            let msg_type = event_type(&event);
            if msg_type == "session.updated" {
                break;
            }
            if msg_type.contains("error") {
                bail!("speech service error: {}", error_message(&event));
            }
            debug!(event = msg_type, "ignoring pre-session event");
        }

        // One user message carrying the exact text, then request a response.
        let item = json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "user",
                "content": [{ "type": "input_text", "text": text }],
            },
        });
        ws.send(WsMessage::Text(Utf8Bytes::from(item.to_string())))
            .await
            .context("Failed to send text item")?;
        let response_create = json!({
            "type": "response.create",
            "response": { "modalities": ["text", "audio"] },
        });
        ws.send(WsMessage::Text(Utf8Bytes::from(response_create.to_string())))
            .await
            .context("Failed to request response")?;

        let mut pcm: Vec<u8> = Vec::new();
        let deadline = Instant::now() + SYNTHESIS_TIMEOUT;
        loop {
            let event = next_event(&mut ws, deadline)
                .await
                .context("Collecting audio output")?;
            match event_type(&event) {
                "response.output_audio.delta" => {
                    if let Some(delta) = event.get("delta").and_then(|d| d.as_str()) {
                        let chunk = BASE64
                            .decode(delta)
                            .context("Failed to decode audio delta")?;
                        pcm.extend_from_slice(&chunk);
                    }
                }
                "response.output_audio.done" => break,
                msg_type if msg_type.contains("error") => {
                    bail!("speech service error: {}", error_message(&event));
                }
                _ => {}
            }
        }

        let _ = ws.close(None).await;

        if pcm.is_empty() {
            bail!("speech service returned no audio");
        }
        pcm_to_wav(&pcm, self.sample_rate)
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Read the next JSON event from the socket, honoring the deadline.
/// Non-text frames and unparseable payloads are skipped.
async fn next_event(ws: &mut WsStream, deadline: Instant) -> Result<Value> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            bail!("timed out waiting for speech service");
        }
        let msg = match tokio::time::timeout(remaining, ws.next()).await {
            Err(_) => bail!("timed out waiting for speech service"),
            Ok(None) => bail!("speech service closed the connection"),
            Ok(Some(msg)) => msg.context("speech websocket error")?,
        };
        match msg {
            WsMessage::Text(text) => {
                if let Ok(event) = serde_json::from_str::<Value>(&text) {
                    return Ok(event);
                }
            }
            WsMessage::Close(_) => bail!("speech service closed the connection"),
            _ => {}
        }
    }
}

fn event_type(event: &Value) -> &str {
    event.get("type").and_then(|t| t.as_str()).unwrap_or_default()
}

fn error_message(event: &Value) -> String {
    event
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .or_else(|| {
            event
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| crate::guard::preview(&event.to_string(), 200))
}

/// Wrap raw PCM (16-bit mono little-endian) in a WAV container.
fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
        for sample in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                .context("Failed to write WAV sample")?;
        }
        writer.finalize().context("Failed to finalize WAV data")?;
    }
    Ok(cursor.into_inner())
}
