//! Server configuration.
//!
//! Configuration is assembled from environment variables (a `.env` file is
//! loaded at startup) with optional YAML overrides.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use voicebridge::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::PathBuf;

use serde::Deserialize;

/// TLS configuration for HTTPS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Everything the credential-minting backend needs to run:
/// - Server settings (host, port, TLS)
/// - Vendor API key used for minting ephemeral credentials
/// - Realtime session defaults (model, voice)
/// - Knowledge search settings (embedding model, vector index)
/// - Security settings (CORS, rate limiting)
/// - Minted-session registry lifetimes
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    /// Vendor API key; the only long-lived secret in the system. Never
    /// leaves this process — clients get ephemeral credentials instead.
    pub openai_api_key: Option<String>,

    /// Realtime model minted sessions are scoped to
    pub realtime_model: String,
    /// Default voice for minted sessions
    pub realtime_voice: String,

    // Knowledge search settings
    /// Vector index query endpoint; search is disabled when absent
    pub vector_index_url: Option<String>,
    /// Vector index API key
    pub vector_index_api_key: Option<String>,
    /// Embedding model for query vectors
    pub embedding_model: String,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    /// Maximum requests per second per IP address. Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting. Default: 10
    pub rate_limit_burst_size: u32,

    // Minted-session registry
    /// How long a minted session stays in the registry, in seconds
    pub session_ttl_seconds: u64,
    /// Registry sweep interval, in seconds
    pub sweep_interval_seconds: u64,
}

/// Zeroize secret fields when the config is dropped so the vendor key does
/// not linger in freed memory.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.vector_index_api_key {
            key.zeroize();
        }
    }
}

/// YAML override file shape. Every field optional; absent fields keep the
/// environment-derived value.
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    host: Option<String>,
    port: Option<u16>,
    tls_cert_path: Option<PathBuf>,
    tls_key_path: Option<PathBuf>,
    openai_api_key: Option<String>,
    realtime_model: Option<String>,
    realtime_voice: Option<String>,
    vector_index_url: Option<String>,
    vector_index_api_key: Option<String>,
    embedding_model: Option<String>,
    cors_allowed_origins: Option<String>,
    rate_limit_requests_per_second: Option<u32>,
    rate_limit_burst_size: Option<u32>,
    session_ttl_seconds: Option<u64>,
    sweep_interval_seconds: Option<u64>,
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| format!("invalid {key}: {e}").into()),
        None => Ok(default),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = ServerConfig {
            host: env_opt("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_parse("PORT", 3001)?,
            tls: match (env_opt("TLS_CERT_PATH"), env_opt("TLS_KEY_PATH")) {
                (Some(cert), Some(key)) => Some(TlsConfig {
                    cert_path: PathBuf::from(cert),
                    key_path: PathBuf::from(key),
                }),
                (None, None) => None,
                _ => {
                    return Err(
                        "TLS_CERT_PATH and TLS_KEY_PATH must be set together".into()
                    );
                }
            },
            openai_api_key: env_opt("OPENAI_API_KEY"),
            realtime_model: env_opt("REALTIME_MODEL")
                .unwrap_or_else(|| "gpt-4o-realtime-preview-2024-12-17".to_string()),
            realtime_voice: env_opt("REALTIME_VOICE").unwrap_or_else(|| "alloy".to_string()),
            vector_index_url: env_opt("VECTOR_INDEX_URL"),
            vector_index_api_key: env_opt("VECTOR_INDEX_API_KEY"),
            embedding_model: env_opt("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            cors_allowed_origins: env_opt("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: env_parse("RATE_LIMIT_REQUESTS_PER_SECOND", 60)?,
            rate_limit_burst_size: env_parse("RATE_LIMIT_BURST_SIZE", 10)?,
            session_ttl_seconds: env_parse("SESSION_TTL_SECONDS", 300)?,
            sweep_interval_seconds: env_parse("SESSION_SWEEP_INTERVAL_SECONDS", 60)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file over an environment variable
    /// base. YAML values win.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        let yaml: YamlConfig = serde_yaml::from_str(&raw)
            .map_err(|e| format!("failed to parse {}: {e}", path.display()))?;

        let mut config = Self::from_env()?;
        if let Some(host) = yaml.host {
            config.host = host;
        }
        if let Some(port) = yaml.port {
            config.port = port;
        }
        match (yaml.tls_cert_path, yaml.tls_key_path) {
            (Some(cert_path), Some(key_path)) => {
                config.tls = Some(TlsConfig {
                    cert_path,
                    key_path,
                });
            }
            (None, None) => {}
            _ => return Err("tls_cert_path and tls_key_path must be set together".into()),
        }
        if let Some(key) = yaml.openai_api_key {
            config.openai_api_key = Some(key);
        }
        if let Some(model) = yaml.realtime_model {
            config.realtime_model = model;
        }
        if let Some(voice) = yaml.realtime_voice {
            config.realtime_voice = voice;
        }
        if let Some(url) = yaml.vector_index_url {
            config.vector_index_url = Some(url);
        }
        if let Some(key) = yaml.vector_index_api_key {
            config.vector_index_api_key = Some(key);
        }
        if let Some(model) = yaml.embedding_model {
            config.embedding_model = model;
        }
        if let Some(origins) = yaml.cors_allowed_origins {
            config.cors_allowed_origins = Some(origins);
        }
        if let Some(rps) = yaml.rate_limit_requests_per_second {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = yaml.rate_limit_burst_size {
            config.rate_limit_burst_size = burst;
        }
        if let Some(ttl) = yaml.session_ttl_seconds {
            config.session_ttl_seconds = ttl;
        }
        if let Some(interval) = yaml.sweep_interval_seconds {
            config.sweep_interval_seconds = interval;
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.rate_limit_requests_per_second == 0 {
            return Err("rate_limit_requests_per_second must be greater than zero".into());
        }
        if self.rate_limit_burst_size == 0 {
            return Err("rate_limit_burst_size must be greater than zero".into());
        }
        if self.session_ttl_seconds == 0 {
            return Err("session_ttl_seconds must be greater than zero".into());
        }
        if self.sweep_interval_seconds == 0 {
            return Err("sweep_interval_seconds must be greater than zero".into());
        }
        if self.vector_index_url.is_some() && self.vector_index_api_key.is_none() {
            return Err("vector_index_api_key is required when vector_index_url is set".into());
        }
        Ok(())
    }

    /// Server address as "host:port".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether TLS is configured.
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Whether knowledge search is configured.
    pub fn has_search(&self) -> bool {
        self.vector_index_url.is_some()
    }
}
