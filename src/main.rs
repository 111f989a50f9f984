//! Imagine Studio - Web Chat Server
//!
//! Wraps a conversational + text-to-speech API behind a small HTTP server
//! with a display/speech reply consistency guard.

// Use the library crate for all modules
use imagine_studio::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (WARN level by default, use RUST_LOG=info for debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into())
        )
        .init();

    // Run CLI
    cli::run().await
}
