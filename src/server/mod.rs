//! Web server module

pub mod http;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::guard::{JsonlObserver, ReplyGuard, TracingObserver};
use crate::logs::{ErrorLog, TurnLog};
use crate::types::{Message, Role};
use crate::upstream::{ConversationService, SpeechService, XaiChatClient, XaiSpeechClient};

/// Fallback persona when no system prompt file is configured.
const DEFAULT_SYSTEM_PROMPT: &str = "You are Imagine Studio, a friendly conversational companion. \
Keep replies natural and concise; they may be read aloud.";

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub guard: Arc<ReplyGuard>,
    pub chat: Arc<dyn ConversationService>,
    pub speech: Arc<dyn SpeechService>,
    /// Single in-memory conversation: system prompt plus turns
    pub history: Arc<Mutex<Vec<Message>>>,
    pub error_log: Arc<ErrorLog>,
    pub conversation_id: Uuid,
}

/// Start the web server
pub async fn start(host: Option<&str>, port: Option<u16>) -> Result<()> {
    let config = Config::load()?;
    let host = host.unwrap_or(&config.server.host).to_string();
    let port = port.unwrap_or(config.server.port);

    let log_dir = config.log_dir()?;
    let turn_log = TurnLog::open(&log_dir)?;
    let error_log = Arc::new(ErrorLog::open(&log_dir)?);
    let conversation_id = Uuid::new_v4();

    let guard = Arc::new(
        ReplyGuard::new(config.guard.on_violation, config.guard.preview_chars)
            .with_observer(Arc::new(TracingObserver))
            .with_observer(Arc::new(JsonlObserver::new(turn_log, conversation_id))),
    );

    let system_prompt = match &config.server.system_prompt_path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read system prompt file {}", path.display()))?
            .trim()
            .to_string(),
        None => DEFAULT_SYSTEM_PROMPT.to_string(),
    };

    let chat = Arc::new(XaiChatClient::new(
        config.upstream.base_url.clone(),
        config.upstream.model.clone(),
    ));
    let speech = Arc::new(XaiSpeechClient::new(
        config.upstream.realtime_url.clone(),
        config.upstream.voice.clone(),
        config.upstream.tts_sample_rate,
    )?);

    let state = ServerState {
        config: Arc::new(config),
        guard,
        chat,
        speech,
        history: Arc::new(Mutex::new(vec![Message::new(Role::System, system_prompt)])),
        error_log,
        conversation_id,
    };

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(http::index_page))
        .route("/chat", post(http::chat_handler))
        .route("/tts", post(http::tts_handler))
        .route("/log-error", post(http::log_error_handler))
        .route("/status", get(http::status_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("     Imagine Studio Server Starting");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("✓ Server binding to: {}", addr);
    println!("✓ Logs: {}", log_dir.display());
    if crate::config::api_key_from_env().is_some() {
        println!("✓ API key: from environment");
    } else {
        println!("⚠ API key: not set, visitors must send their own");
    }
    println!();
    println!("🚀 Listening on http://{}", addr);
    println!();

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;

    Ok(())
}
