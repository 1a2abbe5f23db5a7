//! Configuration management for the Tollgate webhook service.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tollgate_ingest::{GatewayConfig, PoolConfig};

const CONFIG_FILE: &str = "tollgate.toml";
const ENV_PREFIX: &str = "TOLLGATE_";

/// A trusted webhook sender.
///
/// The shared secret is never stored in configuration; `secret_env` names
/// the environment variable that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Path segment in `/webhooks/{name}`.
    pub name: String,
    /// Header carrying the hex HMAC.
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    /// Environment variable holding the shared secret.
    pub secret_env: String,
}

impl SenderConfig {
    /// Reads the shared secret from the environment.
    ///
    /// Returns `None` when the variable is unset or empty; such a sender
    /// refuses every request.
    pub fn secret(&self) -> Option<SecretString> {
        read_secret(&self.secret_env)
    }
}

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. `TOLLGATE_`-prefixed environment variables (highest priority)
/// 2. Configuration file (`tollgate.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// `DATABASE_URL` is honored without the prefix.
///
/// # Example
///
/// ```no_run
/// use tollgate_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Maximum number of database connections in the pool.
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    /// Minimum number of connections to maintain in the pool.
    #[serde(default = "default_min_connections")]
    pub database_min_connections: u32,
    /// Database connection acquire timeout in seconds.
    #[serde(default = "default_acquire_timeout")]
    pub database_connection_timeout: u64,
    /// Database connection idle timeout in seconds.
    #[serde(default = "default_idle_timeout")]
    pub database_idle_timeout: u64,

    // Server
    /// Server bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// Largest accepted webhook body in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    // Dispatch
    /// Run handlers on the background pool instead of inline.
    #[serde(default = "default_background_dispatch")]
    pub background_dispatch: bool,
    /// Number of dispatch workers.
    #[serde(default = "default_worker_count")]
    pub worker_pool_size: usize,
    /// Dispatch queue capacity.
    #[serde(default = "default_queue_size")]
    pub worker_queue_size: usize,
    /// Handler timeout in seconds.
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_seconds: u64,
    /// Time allowed for draining the dispatch queue on shutdown, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,

    // Notifier
    /// Messaging gateway API root. Without it messages are only logged.
    #[serde(default)]
    pub notifier_base_url: Option<String>,
    /// Environment variable holding the gateway API key.
    #[serde(default = "default_notifier_api_key_env")]
    pub notifier_api_key_env: String,
    /// Registered gateway sender id.
    #[serde(default = "default_notifier_sender_id")]
    pub notifier_sender_id: String,
    /// Gateway delivery channel.
    #[serde(default = "default_notifier_channel")]
    pub notifier_channel: String,
    /// Gateway request timeout in seconds.
    #[serde(default = "default_notifier_timeout")]
    pub notifier_timeout_seconds: u64,

    // Audit
    /// Environment variable holding the bearer token for `GET /events`.
    #[serde(default = "default_admin_token_env")]
    pub admin_token_env: String,

    /// Trusted senders.
    #[serde(default = "default_senders")]
    pub senders: Vec<SenderConfig>,

    // Logging
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// The layered configuration sources.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::raw().only(&["DATABASE_URL"]))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Extracts and validates a configuration from `figment`.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Dispatch pool sizing.
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig { worker_count: self.worker_pool_size, queue_size: self.worker_queue_size }
    }

    /// Handler timeout.
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_seconds)
    }

    /// Dispatch drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Gateway settings, when a gateway is configured and its key is set.
    pub fn to_gateway_config(&self) -> Option<GatewayConfig> {
        let base_url = self.notifier_base_url.clone().filter(|url| !url.trim().is_empty())?;
        let api_key = read_secret(&self.notifier_api_key_env)?;

        Some(GatewayConfig {
            base_url,
            api_key,
            sender_id: self.notifier_sender_id.clone(),
            channel: self.notifier_channel.clone(),
            timeout: Duration::from_secs(self.notifier_timeout_seconds),
        })
    }

    /// The admin bearer token, when set.
    pub fn admin_token(&self) -> Option<SecretString> {
        read_secret(&self.admin_token_env)
    }

    /// Parse server socket address from host and port configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Get database URL with password masked for logging.
    pub fn database_url_masked(&self) -> String {
        let url = &self.database_url;
        let userinfo_start = url.find("://").map_or(0, |i| i + 3);
        if let Some(at_pos) = url.rfind('@').filter(|&at| at > userinfo_start) {
            if let Some(colon_pos) = url[userinfo_start..at_pos].find(':') {
                let mut masked = url.clone();
                masked.replace_range(userinfo_start + colon_pos + 1..at_pos, "***");
                return masked;
            }
        }
        url.clone()
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database max_connections must be greater than 0");
        }

        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database min_connections cannot exceed max_connections");
        }

        if self.worker_pool_size == 0 {
            anyhow::bail!("worker_pool_size must be greater than 0");
        }

        if self.worker_queue_size == 0 {
            anyhow::bail!("worker_queue_size must be greater than 0");
        }

        if self.max_body_bytes == 0 {
            anyhow::bail!("max_body_bytes must be greater than 0");
        }

        if self.handler_timeout_seconds == 0 {
            anyhow::bail!("handler_timeout_seconds must be greater than 0");
        }

        // Inline handlers run inside the request, which must outlive them.
        if !self.background_dispatch && self.handler_timeout_seconds >= self.request_timeout {
            anyhow::bail!(
                "handler_timeout_seconds ({}) must be less than request_timeout ({}) when \
                 background_dispatch is off",
                self.handler_timeout_seconds,
                self.request_timeout
            );
        }

        let mut names = std::collections::HashSet::new();
        for sender in &self.senders {
            if sender.name.trim().is_empty() || sender.name.contains(['/', ':']) {
                anyhow::bail!("sender name '{}' must be a path segment without ':'", sender.name);
            }
            if sender.signature_header.trim().is_empty() {
                anyhow::bail!("sender '{}' has an empty signature_header", sender.name);
            }
            if !names.insert(sender.name.as_str()) {
                anyhow::bail!("sender '{}' is configured twice", sender.name);
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            database_connection_timeout: default_acquire_timeout(),
            database_idle_timeout: default_idle_timeout(),
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
            background_dispatch: default_background_dispatch(),
            worker_pool_size: default_worker_count(),
            worker_queue_size: default_queue_size(),
            handler_timeout_seconds: default_handler_timeout(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            notifier_base_url: None,
            notifier_api_key_env: default_notifier_api_key_env(),
            notifier_sender_id: default_notifier_sender_id(),
            notifier_channel: default_notifier_channel(),
            notifier_timeout_seconds: default_notifier_timeout(),
            admin_token_env: default_admin_token_env(),
            senders: default_senders(),
            rust_log: default_log_level(),
        }
    }
}

fn read_secret(var: &str) -> Option<SecretString> {
    std::env::var(var).ok().filter(|value| !value.is_empty()).map(SecretString::from)
}

fn default_database_url() -> String {
    "postgresql://localhost/tollgate".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    crate::DEFAULT_MAX_BODY_BYTES
}

fn default_background_dispatch() -> bool {
    true
}

fn default_worker_count() -> usize {
    tollgate_ingest::DEFAULT_WORKER_COUNT
}

fn default_queue_size() -> usize {
    tollgate_ingest::DEFAULT_QUEUE_SIZE
}

fn default_handler_timeout() -> u64 {
    tollgate_ingest::DEFAULT_HANDLER_TIMEOUT_SECS
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_notifier_api_key_env() -> String {
    "TERMII_API_KEY".to_string()
}

fn default_notifier_sender_id() -> String {
    "ODIA".to_string()
}

fn default_notifier_channel() -> String {
    "whatsapp".to_string()
}

fn default_notifier_timeout() -> u64 {
    10
}

fn default_admin_token_env() -> String {
    "TOLLGATE_ADMIN_TOKEN".to_string()
}

fn default_signature_header() -> String {
    "elevenlabs-signature".to_string()
}

fn default_senders() -> Vec<SenderConfig> {
    ["atlas", "lexi"]
        .into_iter()
        .map(|name| SenderConfig {
            name: name.to_string(),
            signature_header: default_signature_header(),
            secret_env: "ELEVENLABS_WEBHOOK_SECRET".to_string(),
        })
        .collect()
}

fn default_log_level() -> String {
    "info,tollgate=debug,tower_http=debug".to_string()
}
