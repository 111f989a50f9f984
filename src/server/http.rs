//! HTTP server handlers

use std::sync::Arc;

use anyhow::{bail, Result};
use axum::{
    extract::{Json, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::guard::{Fingerprint, GuardError, ReplyGuard, TurnId};
use crate::server::ServerState;
use crate::types::{Message, Role};
use crate::upstream::ConversationService;

/// Chat request
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Chat query parameters
#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    /// Diagnostic flag: when present, the response includes the recorded
    /// length/preview pair for client-side comparison.
    #[serde(default)]
    pub diag: Option<String>,
}

/// Chat response
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub turn_id: TurnId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Fingerprint>,
}

/// Speech synthesis request
#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    /// Turn whose canonical reply should be spoken
    pub turn_id: u64,
    /// Optional copy of the text the client intends to speak; compared
    /// against the canonical reply to detect consumption-path drift
    #[serde(default)]
    pub text: Option<String>,
}

/// Client-reported error
#[derive(Debug, Deserialize)]
pub struct LogErrorRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub model: String,
    pub violation_policy: String,
}

/// Resolve the API key for a request: per-request header first, then the
/// deployer's environment variable.
pub(crate) fn api_key_from_request(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
    {
        return Some(key.to_string());
    }
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|k| !k.is_empty())
    {
        return Some(token.to_string());
    }
    crate::config::api_key_from_env()
}

fn missing_api_key_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "missing_api_key",
            "message": "Set an API key: send X-Api-Key per request, or configure XAI_API_KEY on the server"
        })),
    )
        .into_response()
}

/// Map guard errors to HTTP responses.
fn guard_error_response(err: &GuardError) -> Response {
    match err {
        GuardError::UnknownTurn(turn_id) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown_turn", "turn_id": turn_id })),
        )
            .into_response(),
        GuardError::Violation(violation) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "consistency_violation",
                "detail": violation.to_string(),
                "violation": violation,
            })),
        )
            .into_response(),
        GuardError::DuplicateTurn { .. } => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "duplicate_turn", "detail": err.to_string() })),
        )
            .into_response(),
    }
}

/// One chat turn: forward history to the conversation service, normalize
/// the reply, record it, and read it back through the display path.
pub(crate) async fn run_chat_turn(
    chat: &dyn ConversationService,
    guard: &ReplyGuard,
    history: &mut Vec<Message>,
    api_key: &str,
    user_input: &str,
) -> Result<(TurnId, Arc<str>, Fingerprint)> {
    history.push(Message::new(Role::User, user_input));

    let content = chat.complete(api_key, history).await?;
    if content.is_empty() {
        bail!("conversation service returned an empty reply");
    }
    // Normalization happens exactly once, before the reply is recorded.
    let canonical = content.canonical_text();

    let turn_id = guard.begin_turn();
    let fingerprint = guard.record_reply(turn_id, &canonical)?;
    let reply = guard.get_for_display(turn_id)?;
    history.push(Message::new(Role::Assistant, reply.as_ref()));

    Ok((turn_id, reply, fingerprint))
}

/// Chat handler
pub async fn chat_handler(
    State(state): State<ServerState>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let user_input = req.message.trim().to_string();
    if user_input.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing or empty message" })),
        )
            .into_response();
    }

    let api_key = match api_key_from_request(&headers) {
        Some(key) => key,
        None => return missing_api_key_response(),
    };

    // The history lock also serializes turns of the single conversation.
    let mut history = state.history.lock().await;
    let result = run_chat_turn(
        state.chat.as_ref(),
        &state.guard,
        &mut history,
        &api_key,
        &user_input,
    )
    .await;
    drop(history);

    match result {
        Ok((turn_id, reply, fingerprint)) => {
            let response = ChatResponse {
                reply: reply.to_string(),
                turn_id,
                diagnostic: query.diag.is_some().then_some(fingerprint),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            if let Some(guard_err) = e.downcast_ref::<GuardError>() {
                return guard_error_response(guard_err);
            }
            if let Err(log_err) = state.error_log.append("Chat", &format!("{:#}", e)) {
                tracing::warn!("failed to append error log: {:#}", log_err);
            }
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "Failed to get reply",
                    "details": e.to_string()
                })),
            )
                .into_response()
        }
    }
}

/// Speech synthesis handler
pub async fn tts_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(req): Json<TtsRequest>,
) -> impl IntoResponse {
    let api_key = match api_key_from_request(&headers) {
        Some(key) => key,
        None => return missing_api_key_response(),
    };

    let turn_id = TurnId(req.turn_id);
    let canonical = match state.guard.get_for_speech(turn_id) {
        Ok(text) => text,
        Err(e) => return guard_error_response(&e),
    };

    // Legacy clients send their own copy of the text; any divergence from
    // the canonical reply is flagged. Synthesis uses the canonical value.
    if let Some(client_text) = &req.text {
        if let Err(e) = state.guard.check_speech_text(turn_id, client_text) {
            return guard_error_response(&e);
        }
    }

    let wav = match state.speech.synthesize(&api_key, &canonical).await {
        Ok(wav) => wav,
        Err(e) => {
            if let Err(log_err) = state.error_log.append("TTS", &format!("{:#}", e)) {
                tracing::warn!("failed to append error log: {:#}", log_err);
            }
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    (
        [
            (header::CONTENT_TYPE, "audio/wav"),
            (header::CONTENT_DISPOSITION, "inline; filename=tts.wav"),
        ],
        wav,
    )
        .into_response()
}

/// Append a client-reported error to the error log
pub async fn log_error_handler(
    State(state): State<ServerState>,
    Json(req): Json<LogErrorRequest>,
) -> impl IntoResponse {
    let message = req
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or("(empty)");
    let context = req
        .context
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("Frontend");

    if let Err(e) = state.error_log.append(context, message) {
        tracing::warn!("failed to append error log: {:#}", e);
    }
    (StatusCode::OK, Json(json!({ "ok": true }))).into_response()
}

/// Status handler
pub async fn status_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let response = StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.config.upstream.model.clone(),
        violation_policy: state.config.guard.on_violation.to_string(),
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// Handler for the index page
pub async fn index_page() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Imagine Studio</title>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            max-width: 800px;
            margin: 0 auto;
            padding: 20px;
            background: #1a1a1a;
            color: #e0e0e0;
        }
        h1 { color: #4CAF50; }
        .endpoint {
            background: #333;
            padding: 10px;
            margin: 10px 0;
            border-radius: 4px;
            font-family: monospace;
        }
    </style>
</head>
<body>
    <h1>Imagine Studio</h1>
    <p>Chat server with a display/speech reply consistency guard.</p>
    <h2>API Endpoints:</h2>
    <div class="endpoint">POST /chat - Send a chat message (add ?diag=1 for the recorded length/preview)</div>
    <div class="endpoint">POST /tts - Synthesize the canonical reply of a turn (body: { "turn_id": N })</div>
    <div class="endpoint">POST /log-error - Report a client-side error</div>
    <div class="endpoint">GET /status - Server status</div>
</body>
</html>"#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{ReplyContent, ReplyGuard, Segment, SegmentKind, ViolationPolicy};
    use crate::upstream::MockConversationService;

    #[test]
    fn test_api_key_prefers_explicit_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "key-from-header".parse().unwrap());
        headers.insert(header::AUTHORIZATION, "Bearer key-from-auth".parse().unwrap());
        assert_eq!(
            api_key_from_request(&headers).as_deref(),
            Some("key-from-header")
        );
    }

    #[test]
    fn test_api_key_falls_back_to_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer tok-123".parse().unwrap());
        assert_eq!(api_key_from_request(&headers).as_deref(), Some("tok-123"));
    }

    #[test]
    fn test_tts_request_text_is_optional() {
        let req: TtsRequest = serde_json::from_str(r#"{ "turn_id": 3 }"#).unwrap();
        assert_eq!(req.turn_id, 3);
        assert!(req.text.is_none());

        let req: TtsRequest =
            serde_json::from_str(r#"{ "turn_id": 3, "text": "spoken copy" }"#).unwrap();
        assert_eq!(req.text.as_deref(), Some("spoken copy"));
    }

    #[tokio::test]
    async fn test_run_chat_turn_records_normalized_reply() {
        let mut chat = MockConversationService::new();
        chat.expect_complete().returning(|_, _| {
            Ok(ReplyContent::Segments(vec![
                Segment::text("a"),
                Segment::of_kind(SegmentKind::Image, "https://example.com/x.png"),
                Segment::text("c"),
            ]))
        });

        let guard = ReplyGuard::new(ViolationPolicy::Proceed, 96);
        let mut history = vec![Message::new(Role::System, "prompt")];

        let (turn_id, reply, fingerprint) =
            run_chat_turn(&chat, &guard, &mut history, "key", "hello")
                .await
                .unwrap();

        assert_eq!(reply.as_ref(), "ac");
        assert_eq!(fingerprint.len, 2);
        // Both consumption paths observe the same canonical value.
        assert_eq!(guard.get_for_speech(turn_id).unwrap().as_ref(), "ac");
        // History gained the user turn and the displayed reply.
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].content, "ac");
    }

    #[tokio::test]
    async fn test_run_chat_turn_rejects_empty_reply() {
        let mut chat = MockConversationService::new();
        chat.expect_complete()
            .returning(|_, _| Ok(ReplyContent::PlainText(String::new())));

        let guard = ReplyGuard::new(ViolationPolicy::Proceed, 96);
        let mut history = vec![Message::new(Role::System, "prompt")];

        let err = run_chat_turn(&chat, &guard, &mut history, "key", "hello")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty reply"));
    }
}
