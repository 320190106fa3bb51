//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment-platform variables (HOST, PORT, GROQ_API_KEY, CLOUDINARY_*)
//! 2. Environment variables (APP_SERVER__PORT, APP_CHAT__MODEL, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Why `__` as the separator:
//! Several keys contain underscores themselves (`max_history`, `api_key`), so a single
//! underscore can't tell a nested section apart from a word break.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Persona the assistant is pinned to for every conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are AudiBuddy, an AI expert in voice and vocal health. \
You provide professional advice on vocal health, vocal exercises, speech disorders, and voice-related \
medical conditions. You do NOT respond to unrelated topics. If asked about anything outside your \
expertise, politely refuse to answer and redirect the user to vocal health topics. Always maintain \
context of the previous conversation to provide more relevant and personalized responses.";

/// Longest idle limit accepted for chat sessions (one year).
pub const MAX_SESSION_IDLE_SECS: u64 = 365 * 24 * 60 * 60;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each collaborator the service talks to (diagnostic engine, artifact store,
/// chat API) gets its own section, so deployments can swap one without
/// touching the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub engine: EngineConfig,
    pub publisher: PublisherConfig,
    pub chat: ChatConfig,
    pub cors: CorsConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Where uploaded recordings are staged and which ones are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory holding the per-request audio, report and data files
    pub dir: String,
    /// Requests carrying more than this many bytes of audio get a 413
    pub max_file_size_bytes: usize,
    /// Lower-case extensions accepted for the `audio` field
    pub allowed_extensions: Vec<String>,
}

/// External report-generation command.
///
/// ## Placeholders:
/// Each entry in `args` may contain `{audio}`, `{report}` and `{data}`; they are
/// replaced with the per-request audio path, rendered-report path and
/// structured-data path before the command runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub program: String,
    pub args: Vec<String>,
    /// 0 disables the limit
    pub timeout_secs: u64,
}

/// Cloudinary upload settings for the rendered report.
///
/// Uploads are signed when both `api_key` and `api_secret` are set; otherwise
/// `upload_preset` must name a preset that accepts unsigned uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    pub api_base: String,
    pub cloud_name: String,
    pub upload_preset: String,
    pub api_key: String,
    pub api_secret: String,
    pub resource_type: String,
}

impl PublisherConfig {
    /// Enough is set for at least one of the two upload modes.
    pub fn has_credentials(&self) -> bool {
        !self.cloud_name.is_empty()
            && ((!self.api_key.is_empty() && !self.api_secret.is_empty())
                || !self.upload_preset.is_empty())
    }
}

/// Split a `cloudinary://<api_key>:<api_secret>@<cloud_name>` URL.
fn parse_cloudinary_url(url: &str) -> Option<(String, String, String)> {
    let rest = url.trim().strip_prefix("cloudinary://")?;
    let (credentials, cloud_name) = rest.rsplit_once('@')?;
    let (api_key, api_secret) = credentials.split_once(':')?;
    if api_key.is_empty() || api_secret.is_empty() || cloud_name.is_empty() {
        return None;
    }
    Some((api_key.to_string(), api_secret.to_string(), cloud_name.to_string()))
}

/// Chat-completion model settings and conversation limits.
///
/// ## Sampling:
/// `temperature` and `top_p` are fixed call configuration; nothing in the
/// service adapts them between turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_completion_tokens: u32,
    /// Number of user/assistant exchanges retained per session
    pub max_history: usize,
    pub system_prompt: String,
    /// 0 disables the client-side timeout
    pub request_timeout_secs: u64,
    pub max_sessions: usize,
    pub session_idle_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Empty means any origin is allowed
    pub allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            upload: UploadConfig {
                dir: "uploads".to_string(),
                max_file_size_bytes: 16 * 1024 * 1024,  // 16MB, same ceiling as the web form
                allowed_extensions: vec!["wav".to_string()],
            },
            engine: EngineConfig {
                program: "python3".to_string(),
                args: vec![
                    "report_generation.py".to_string(),
                    "{audio}".to_string(),
                    "{report}".to_string(),
                    "{data}".to_string(),
                ],
                timeout_secs: 0,
            },
            publisher: PublisherConfig {
                api_base: "https://api.cloudinary.com/v1_1".to_string(),
                cloud_name: String::new(),
                upload_preset: String::new(),
                api_key: String::new(),
                api_secret: String::new(),
                resource_type: "raw".to_string(),
            },
            chat: ChatConfig {
                api_base: "https://api.groq.com/openai/v1".to_string(),
                api_key: String::new(),
                model: "mixtral-8x7b-32768".to_string(),
                temperature: 1.0,
                top_p: 1.0,
                max_completion_tokens: 1024,
                max_history: 10,
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
                request_timeout_secs: 60,
                max_sessions: 1000,
                session_idle_secs: 3600,
            },
            cors: CorsConfig {
                allowed_origins: Vec::new(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_CHAT__MAX_HISTORY=5`: Keep five exchanges per session
    /// - `PORT=3000`: Special case for deployment platforms
    /// - `GROQ_API_KEY=...`: Chat API key, as the hosted deployment exports it
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("upload.allowed_extensions")
                    .with_list_parse_key("engine.args")
                    .with_list_parse_key("cors.allowed_origins")
                    .try_parsing(true),
            );

        // CLOUDINARY_URL bundles all three credentials; the single-value
        // variables below take precedence over it
        if let Ok(url) = env::var("CLOUDINARY_URL") {
            match parse_cloudinary_url(&url) {
                Some((api_key, api_secret, cloud_name)) => {
                    settings = settings
                        .set_override("publisher.api_key", api_key)?
                        .set_override("publisher.api_secret", api_secret)?
                        .set_override("publisher.cloud_name", cloud_name)?;
                }
                None => {
                    return Err(anyhow::anyhow!(
                        "CLOUDINARY_URL must look like cloudinary://<api_key>:<api_secret>@<cloud_name>"
                    ))
                }
            }
        }

        // Variables the hosting platform and the collaborators' own SDKs use
        let overrides = [
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("GROQ_API_KEY", "chat.api_key"),
            ("CLOUDINARY_CLOUD_NAME", "publisher.cloud_name"),
            ("CLOUDINARY_UPLOAD_PRESET", "publisher.upload_preset"),
            ("CLOUDINARY_API_KEY", "publisher.api_key"),
            ("CLOUDINARY_API_SECRET", "publisher.api_secret"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## Why validate:
    /// A zero history window or an empty extension list would make every
    /// request fail at runtime; it's better to refuse to start.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.upload.dir.trim().is_empty() {
            return Err(anyhow::anyhow!("Upload directory cannot be empty"));
        }

        if self.upload.max_file_size_bytes == 0 {
            return Err(anyhow::anyhow!("Maximum upload size must be greater than 0"));
        }

        if self.upload.allowed_extensions.is_empty() {
            return Err(anyhow::anyhow!("At least one audio extension must be allowed"));
        }

        if self.engine.program.trim().is_empty() {
            return Err(anyhow::anyhow!("Diagnostic engine program cannot be empty"));
        }

        if self.chat.max_history == 0 {
            return Err(anyhow::anyhow!("Chat history window must be greater than 0"));
        }

        if self.chat.max_sessions == 0 {
            return Err(anyhow::anyhow!("Max chat sessions must be greater than 0"));
        }

        if self.chat.session_idle_secs > MAX_SESSION_IDLE_SECS {
            return Err(anyhow::anyhow!(
                "Chat session idle limit cannot exceed {} seconds",
                MAX_SESSION_IDLE_SECS
            ));
        }

        if !(0.0..=2.0).contains(&self.chat.temperature) {
            return Err(anyhow::anyhow!("Chat temperature must be between 0 and 2"));
        }

        if !(self.chat.top_p > 0.0 && self.chat.top_p <= 1.0) {
            return Err(anyhow::anyhow!("Chat top_p must be in (0, 1]"));
        }

        Ok(())
    }

    /// Copy of the configuration that is safe to return over HTTP.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.chat.api_key.is_empty() {
            copy.chat.api_key = "***".to_string();
        }
        for secret in [
            &mut copy.publisher.upload_preset,
            &mut copy.publisher.api_key,
            &mut copy.publisher.api_secret,
        ] {
            if !secret.is_empty() {
                *secret = "***".to_string();
            }
        }
        copy
    }
}
