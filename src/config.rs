//! Configuration management
//!
//! Manages server configuration including upstream API settings, guard
//! policy, and log locations.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::guard::ViolationPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Upstream API settings
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Reply consistency guard settings
    #[serde(default)]
    pub guard: GuardConfig,
    /// Log locations
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the chat completions API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// WebSocket URL of the realtime speech API
    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,
    /// Chat model
    #[serde(default = "default_model")]
    pub model: String,
    /// Speech voice
    #[serde(default = "default_voice")]
    pub voice: String,
    /// PCM sample rate for synthesized audio
    #[serde(default = "default_sample_rate")]
    pub tts_sample_rate: u32,
}

fn default_base_url() -> String {
    "https://api.x.ai/v1".to_string()
}

fn default_realtime_url() -> String {
    "wss://api.x.ai/v1/realtime".to_string()
}

fn default_model() -> String {
    "grok-4-1-fast-reasoning".to_string()
}

fn default_voice() -> String {
    "Ara".to_string()
}

fn default_sample_rate() -> u32 {
    24000
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            realtime_url: default_realtime_url(),
            model: default_model(),
            voice: default_voice(),
            tts_sample_rate: default_sample_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Optional system prompt file read at startup
    #[serde(default)]
    pub system_prompt_path: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            system_prompt_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// What to do with a request once a violation is detected
    #[serde(default)]
    pub on_violation: ViolationPolicy,
    /// Characters kept in log previews
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

fn default_preview_chars() -> usize {
    96
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            on_violation: ViolationPolicy::default(),
            preview_chars: default_preview_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log directory; defaults to the platform data directory.
    /// The IMAGINE_LOG_DIR environment variable overrides both.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file, creating a default one if absent
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let config: Config = toml::from_str(&contents)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Resolve the log directory: env override, then config, then the
    /// platform data directory.
    pub fn log_dir(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("IMAGINE_LOG_DIR") {
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
        if let Some(dir) = &self.logging.log_dir {
            return Ok(dir.clone());
        }
        Ok(data_dir()?.join("logs"))
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "imagine-studio", "imagine-studio")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "imagine-studio", "imagine-studio")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Deployer-provided API key, if any. Visitors may instead send their own
/// key per request.
pub fn api_key_from_env() -> Option<String> {
    std::env::var("XAI_API_KEY").ok().filter(|k| !k.is_empty())
}

/// Show current configuration
pub fn show_config() -> Result<()> {
    let config = Config::load()?;

    println!("Upstream:");
    println!("  base_url:        {}", config.upstream.base_url);
    println!("  realtime_url:    {}", config.upstream.realtime_url);
    println!("  model:           {}", config.upstream.model);
    println!("  voice:           {}", config.upstream.voice);
    println!("  tts_sample_rate: {}", config.upstream.tts_sample_rate);
    println!("Server:");
    println!("  host: {}", config.server.host);
    println!("  port: {}", config.server.port);
    println!("Guard:");
    println!("  on_violation:  {}", config.guard.on_violation);
    println!("  preview_chars: {}", config.guard.preview_chars);
    println!("Logs: {}", config.log_dir()?.display());
    println!(
        "API key: {}",
        if api_key_from_env().is_some() {
            "from environment"
        } else {
            "per request"
        }
    );

    Ok(())
}

/// Set the chat model
pub fn set_model(model: &str) -> Result<()> {
    let mut config = Config::load()?;
    config.upstream.model = model.to_string();
    config.save()?;
    println!("Chat model set to: {}", model);
    Ok(())
}

/// Set the speech voice
pub fn set_voice(voice: &str) -> Result<()> {
    let mut config = Config::load()?;
    config.upstream.voice = voice.to_string();
    config.save()?;
    println!("Speech voice set to: {}", voice);
    Ok(())
}

/// Set the violation policy
pub fn set_policy(policy: &str) -> Result<()> {
    let mut config = Config::load()?;
    config.guard.on_violation = policy.parse().map_err(anyhow::Error::msg)?;
    config.save()?;
    println!("Violation policy set to: {}", config.guard.on_violation);
    Ok(())
}
