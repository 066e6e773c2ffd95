//! Configuration management
//!
//! All settings come from the environment with sensible defaults, so the
//! binary runs unconfigured in development and picks up its real settings
//! from the hosting process in containers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub log: LogConfig,
    pub database: DatabaseConfig,
    pub engine: EngineSettings,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (SERVER_HOST, default "0.0.0.0")
    pub host: String,
    /// Port (SERVER_PORT, default 8080)
    pub port: u16,
    /// "release" or "debug" (SERVER_MODE)
    pub mode: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// trace|debug|info|warn|error (LOG_LEVEL, default "info")
    pub level: String,
    /// "pretty" or "json" (LOG_FORMAT, default "pretty")
    pub format: String,
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection string (DATABASE_URL, default "sqlite://data/flowdeck.db")
    pub url: String,
}

/// Flow executor limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Max node visits per execution (STEP_BUDGET, default 1000)
    pub step_budget: usize,
    /// Per-execution wall clock in seconds (EXECUTION_TIMEOUT_SECS, default 300)
    pub execution_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", "0.0.0.0"),
                port: env_parse("SERVER_PORT", 8080),
                mode: env_or("SERVER_MODE", "release"),
            },
            log: LogConfig {
                level: env_or("LOG_LEVEL", "info"),
                format: env_or("LOG_FORMAT", "pretty"),
            },
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", "sqlite://data/flowdeck.db"),
            },
            engine: EngineSettings {
                step_budget: env_parse("STEP_BUDGET", 1000),
                execution_timeout_secs: env_parse("EXECUTION_TIMEOUT_SECS", 300),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
