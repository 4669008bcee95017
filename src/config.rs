//! Application configuration
//!
//! Read from `~/.agent-chat/config.json` (camelCase JSON):
//!
//! ```json
//! {
//!   "agentConfig": { "platform": "DIFY", "difyUrl": "...", "difyKey": "...", "userId": "..." },
//!   "proxySettings": { "enabled": true, "protocol": "http", "host": "127.0.0.1", "port": 7890 },
//!   "chat": { "minSendIntervalMs": 1000 }
//! }
//! ```
//!
//! Localhost connections always bypass the proxy.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::bots::error::{BotError, BotResult};
use crate::bots::types::{BotConfig, DifyConfig, RagflowConfig};

/// Default proxy protocol (when not specified in config)
const DEFAULT_PROXY_PROTOCOL: &str = "http";
/// Default proxy host (when not specified in config)
const DEFAULT_PROXY_HOST: &str = "127.0.0.1";
/// Default proxy port (when not specified in config)
const DEFAULT_PROXY_PORT: u16 = 7890;
/// Loopback hosts that never go through the proxy
const NO_PROXY_HOSTS: &str = "localhost,localhost.localdomain,127.0.0.1,127.0.0.0/8,::1,[::1]";

/// Overall timeout for request/response calls (RAGFlow completions can be slow)
const API_TIMEOUT_SECS: u64 = 300;
/// Idle timeout for SSE streams: no bytes for this long drops the connection
const STREAM_IDLE_TIMEOUT_SECS: u64 = 60;
const CONNECT_TIMEOUT_SECS: u64 = 15;

/// `~/.agent-chat`
pub fn app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agent-chat")
}

pub fn config_path() -> PathBuf {
    app_dir().join("config.json")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub agent_config: Option<AgentConfig>,
    #[serde(default)]
    pub proxy_settings: Option<ProxySettings>,
    #[serde(default)]
    pub chat: ChatSettings,
}

impl AppConfig {
    /// Load `~/.agent-chat/config.json`. Missing or broken files fall back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                log::warn!(
                    "[config] Failed to read config file {:?}: {}. Check file permissions.",
                    path,
                    e
                );
                return Self::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(c) => c,
            Err(e) => {
                log::error!("[config] Invalid JSON in {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Proxy settings, only when enabled.
    pub fn active_proxy(&self) -> Option<&ProxySettings> {
        self.proxy_settings.as_ref().filter(|p| p.enabled)
    }
}

/// Proxy settings (`proxySettings` block).
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettings {
    pub enabled: bool,
    /// "http", "https", or "socks5"
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl ProxySettings {
    /// Validated proxy URL.
    pub fn proxy_url(&self) -> Result<String, String> {
        let protocol = self.protocol.as_deref().unwrap_or(DEFAULT_PROXY_PROTOCOL);
        if !["http", "https", "socks5"].contains(&protocol) {
            return Err(format!(
                "Invalid proxy protocol '{}'. Supported: http, https, socks5",
                protocol
            ));
        }
        let port = self.port.unwrap_or(DEFAULT_PROXY_PORT);
        if port == 0 {
            return Err(format!(
                "Invalid proxy port: {}. Port must be between 1 and 65535",
                port
            ));
        }
        let host = self.host.as_deref().unwrap_or(DEFAULT_PROXY_HOST);
        Ok(format!("{}://{}:{}", protocol, host, port))
    }
}

/// Chat tunables (`chat` block). Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    pub min_send_interval_ms: u64,
    pub history_cache_ttl_secs: u64,
    pub message_cache_ttl_secs: u64,
    pub history_page_size: u32,
    pub history_message_limit: u32,
    pub history_list_timeout_secs: u64,
    pub history_messages_timeout_secs: u64,
    /// Assistant greeting placed in every new session.
    pub greeting: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            min_send_interval_ms: 1000,
            history_cache_ttl_secs: 5 * 60,
            message_cache_ttl_secs: 10 * 60,
            history_page_size: 20,
            history_message_limit: 100,
            history_list_timeout_secs: 10,
            history_messages_timeout_secs: 15,
            greeting: None,
        }
    }
}

/// Agent record as delivered by the backend: a platform name plus loose credentials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub platform: String,
    pub agent_name: Option<String>,
    pub dify_url: Option<String>,
    pub dify_key: Option<String>,
    pub user_id: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub agent_id: Option<String>,
    pub local_agent_id: Option<String>,
    pub backend_url: Option<String>,
    pub upload_proxy_url: Option<String>,
}

/// Platform names the backend may send that have no adapter.
const KNOWN_UNSUPPORTED: &[&str] = &["OPENAI", "CLAUDE", "CUSTOM"];

impl TryFrom<&AgentConfig> for BotConfig {
    type Error = BotError;

    fn try_from(agent: &AgentConfig) -> Result<Self, Self::Error> {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        let platform = agent.platform.trim().to_ascii_uppercase();
        let config = match platform.as_str() {
            "DIFY" => BotConfig::Dify(DifyConfig {
                dify_url: text(&agent.dify_url),
                dify_key: text(&agent.dify_key),
                user_id: text(&agent.user_id),
                upload_proxy_url: agent.upload_proxy_url.clone(),
            }),
            "RAGFLOW" => BotConfig::Ragflow(RagflowConfig {
                base_url: text(&agent.base_url),
                api_key: text(&agent.api_key),
                agent_id: text(&agent.agent_id),
                user_id: text(&agent.user_id),
                backend_url: agent.backend_url.clone(),
                local_agent_id: agent.local_agent_id.clone(),
            }),
            other if KNOWN_UNSUPPORTED.contains(&other) => {
                return Err(BotError::UnsupportedPlatform(other.to_string()))
            }
            other => return Err(BotError::UnsupportedPlatform(format!("unknown '{}'", other))),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Apply the user's proxy to a client builder.
/// Loopback addresses are always excluded; without a proxy the system proxy is disabled too.
pub fn build_http_client(
    builder: reqwest::ClientBuilder,
    proxy: Option<&ProxySettings>,
) -> BotResult<Client> {
    let builder = match proxy.filter(|p| p.enabled) {
        Some(settings) => {
            let proxy_url = settings.proxy_url().map_err(BotError::ConfigIncomplete)?;
            log::info!("[config] Using proxy for external requests: {}", proxy_url);
            let proxy = reqwest::Proxy::all(&proxy_url)
                .map_err(|e| BotError::ConfigIncomplete(format!("Failed to create proxy: {}", e)))?
                .no_proxy(reqwest::NoProxy::from_string(NO_PROXY_HOSTS));
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };
    builder
        .build()
        .map_err(|e| BotError::Network(format!("Failed to build HTTP client: {}", e)))
}

/// The pair of HTTP clients every platform client uses.
#[derive(Clone, Debug)]
pub struct HttpClients {
    /// Request/response calls (history, uploads, blocking completions).
    pub api: Client,
    /// Long-lived SSE streams: idle timeout instead of an overall timeout.
    pub stream: Client,
}

impl HttpClients {
    pub fn new(proxy: Option<&ProxySettings>) -> BotResult<Self> {
        let api = build_http_client(
            Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .timeout(Duration::from_secs(API_TIMEOUT_SECS)),
            proxy,
        )?;
        let stream = build_http_client(
            Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .read_timeout(Duration::from_secs(STREAM_IDLE_TIMEOUT_SECS))
                .tcp_nodelay(true)
                .http1_only(),
            proxy,
        )?;
        Ok(Self { api, stream })
    }
}
