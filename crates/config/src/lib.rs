use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "studycircle.toml",
    "config/studycircle.toml",
    "crates/config/studycircle.toml",
    "../studycircle.toml",
    "../config/studycircle.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://studycircle.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Connection settings for the shared pub/sub layer. The broadcast router
/// cannot operate without it, so there is no "disabled" variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "AuthConfig::default_session_ttl")]
    pub session_ttl_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: 86_400,
        }
    }
}

impl AuthConfig {
    fn default_session_ttl() -> u64 {
        86_400
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Upper bound on message content length, in characters.
    #[serde(default = "ChatConfig::default_max_message_length")]
    pub max_message_length: usize,
    /// Default page size for history backfill when the client passes none.
    #[serde(default = "ChatConfig::default_history_page_size")]
    pub history_page_size: i64,
    /// Capacity of each conversation's local broadcast channel. Sessions
    /// that lag beyond this skip events and must backfill via history.
    #[serde(default = "ChatConfig::default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: Self::default_max_message_length(),
            history_page_size: Self::default_history_page_size(),
            broadcast_capacity: Self::default_broadcast_capacity(),
        }
    }
}

impl ChatConfig {
    const fn default_max_message_length() -> usize {
        4_000
    }

    const fn default_history_page_size() -> i64 {
        50
    }

    const fn default_broadcast_capacity() -> usize {
        256
    }
}

/// Load the application configuration by combining defaults, files, and
/// environment overrides.
///
/// ```
/// use studycircle_config::load;
///
/// std::env::remove_var("STUDYCIRCLE_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder();
    builder = builder
        .set_default("http.address", defaults.http.address.clone())
        .unwrap()
        .set_default("http.port", i64::from(defaults.http.port))
        .unwrap()
        .set_default("database.url", defaults.database.url.clone())
        .unwrap()
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )
        .unwrap()
        .set_default("redis.url", defaults.redis.url.clone())
        .unwrap()
        .set_default(
            "auth.session_ttl_seconds",
            i64::try_from(defaults.auth.session_ttl_seconds).unwrap_or(i64::MAX),
        )
        .unwrap()
        .set_default(
            "chat.max_message_length",
            defaults.chat.max_message_length as i64,
        )
        .unwrap()
        .set_default("chat.history_page_size", defaults.chat.history_page_size)
        .unwrap()
        .set_default(
            "chat.broadcast_capacity",
            defaults.chat.broadcast_capacity as i64,
        )
        .unwrap();

    let environment_overrides = config::Environment::with_prefix("STUDYCIRCLE").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("STUDYCIRCLE_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via STUDYCIRCLE_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    debug!(?config, "loaded backend configuration");
    Ok(config)
}
