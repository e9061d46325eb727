use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    #[serde(default)]
    pub suppress_connection_errors: bool,

    /// Event bus buffer size (default: 100)
    pub event_bus_buffer_size: usize,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Maximum database connections (default: 5)
    pub max_db_connections: u32,

    /// Minimum database connections (default: 1)
    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/opsdesk.db".to_string(),
            log_level: "info".to_string(),
            suppress_connection_errors: false,
            event_bus_buffer_size: 100,
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,

    pub port: u16,

    pub cors_allowed_origins: Vec<String>,

    /// Whether to set the Secure flag on cookies.
    /// Default: true for production safety. Set to false for local development without HTTPS.
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 7100,
            cors_allowed_origins: vec![
                "http://localhost:7100".to_string(),
                "http://127.0.0.1:7100".to_string(),
            ],
            secure_cookies: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB (default: 8192 = 8MB)
    /// Lower values reduce memory usage but decrease GPU resistance.
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations) - higher = more CPU work
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (default: 1)
    pub argon2_parallelism: u32,

    /// Key for signing the remember cookie. Generated by `opsdesk init`;
    /// must be non-empty before the server will start.
    pub secret_key: String,

    /// Failed attempts before the account locks.
    pub max_failed_logins: u32,

    /// How long a lock holds. Expiry is evaluated lazily on read.
    pub lockout_minutes: u32,

    /// Rolling validity window for remember tokens.
    pub remember_window_days: u32,

    /// Minimum seconds between `last_activity_at` writes for one session.
    pub activity_touch_seconds: u32,

    /// Days before a password counts as expired. Accepts an integer or a
    /// string; anything that does not parse as a positive integer falls back
    /// to 90 rather than to "always expired".
    #[serde(deserialize_with = "deserialize_expiration_days")]
    pub password_expiration_days: u32,

    /// Cookie names, overridable for multi-instance deployments on one host.
    pub session_cookie_name: String,

    pub remember_cookie_name: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost_kib: 8192,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
            secret_key: String::new(),
            max_failed_logins: 5,
            lockout_minutes: 30,
            remember_window_days: 14,
            activity_touch_seconds: 60,
            password_expiration_days: DEFAULT_PASSWORD_EXPIRATION_DAYS,
            session_cookie_name: "opsdesk_session".to_string(),
            remember_cookie_name: "opsdesk_remember".to_string(),
        }
    }
}

const DEFAULT_PASSWORD_EXPIRATION_DAYS: u32 = 90;

/// Lenient parse for `password_expiration_days`: integers and numeric strings
/// are accepted, everything else (empty string, garbage, zero, negatives)
/// falls back to the default instead of an "always expired" zero.
fn deserialize_expiration_days<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    let parsed = match Raw::deserialize(deserializer)? {
        Raw::Int(n) => u32::try_from(n).ok().filter(|&n| n > 0),
        Raw::Text(s) => s.trim().parse::<u32>().ok().filter(|&n| n > 0),
    };

    Ok(parsed.unwrap_or(DEFAULT_PASSWORD_EXPIRATION_DAYS))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            observability: ObservabilityConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        if let Ok(env_path) = std::env::var("OPSDESK_CONFIG") {
            paths.push(PathBuf::from(env_path));
        }

        paths.push(PathBuf::from("config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("opsdesk").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".opsdesk").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    /// Creates config.toml with a freshly generated signing key if none
    /// exists yet.
    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let mut config = Self::default();
            config.security.secret_key = crate::crypto::generate_secret_key();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.enabled && self.security.secret_key.is_empty() {
            anyhow::bail!(
                "security.secret_key must be set before the server can start; run `opsdesk init`"
            );
        }

        if self.security.max_failed_logins == 0 {
            anyhow::bail!("security.max_failed_logins must be > 0");
        }

        if self.security.lockout_minutes == 0 {
            anyhow::bail!("security.lockout_minutes must be > 0");
        }

        if self.security.remember_window_days == 0 {
            anyhow::bail!("security.remember_window_days must be > 0");
        }

        Ok(())
    }
}
