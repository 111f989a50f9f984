//! CLI interface for imagine-studio

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config;
use crate::server;

#[derive(Parser)]
#[command(name = "imagine-studio")]
#[command(about = "Web chat server wrapping a conversational + text-to-speech API", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server (default when no command given)
    Serve {
        /// Bind host (defaults to the configured host)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (defaults to the configured port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show or change configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Set the chat model
        #[arg(long, value_name = "MODEL")]
        set_model: Option<String>,
        /// Set the speech voice
        #[arg(long, value_name = "VOICE")]
        set_voice: Option<String>,
        /// Set the consistency violation policy (proceed or abort)
        #[arg(long, value_name = "POLICY")]
        set_policy: Option<String>,
    },
}

/// Run the CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => server::start(None, None).await,
        Some(Commands::Serve { host, port }) => server::start(host.as_deref(), port).await,
        Some(Commands::Config {
            show,
            set_model,
            set_voice,
            set_policy,
        }) => {
            let mut changed = false;
            if let Some(model) = set_model {
                config::set_model(&model)?;
                changed = true;
            }
            if let Some(voice) = set_voice {
                config::set_voice(&voice)?;
                changed = true;
            }
            if let Some(policy) = set_policy {
                config::set_policy(&policy)?;
                changed = true;
            }
            if show || !changed {
                config::show_config()?;
            }
            Ok(())
        }
    }
}
