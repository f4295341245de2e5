use std::net::SocketAddr;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "recurd", about = "Recurring transaction scheduler and ledger poster")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "recurd.toml")]
    pub config: String,

    /// Port to listen on (overrides config file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// SQLite database path (overrides config file; implies the sqlite backend)
    #[arg(short, long)]
    pub db: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// When true, all API endpoints (except /health) require authentication.
    #[serde(default)]
    pub enabled: bool,

    /// Static API keys. Each key has a name (for audit) and a role.
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiKeyEntry {
    pub name: String,
    pub key: String,
    #[serde(default = "default_role")]
    pub role: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// "memory" or "sqlite".
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_role() -> String {
    "reader".to_string()
}

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        json: false,
    }
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        backend: default_backend(),
        path: default_db_path(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_db_path() -> String {
    "recurd.db".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: default_server(),
            logging: default_logging(),
            auth: AuthConfig::default(),
            storage: default_storage(),
        }
    }
}

impl Config {
    pub fn load(cli: &CliArgs) -> Self {
        let mut config = match std::fs::read_to_string(&cli.config) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Config::default()
            }),
            Err(_) => Config::default(),
        };

        // CLI overrides
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }
        if let Some(ref db) = cli.db {
            config.storage.backend = "sqlite".to_string();
            config.storage.path = db.clone();
        }

        config
    }

    pub fn listen_addr(&self) -> SocketAddr {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .expect("Invalid listen address")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_memory_backend() {
        let config = Config::default();
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.server.port, 3000);
        assert!(!config.auth.enabled);
    }

    #[test]
    fn toml_overrides_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8080

            [storage]
            backend = "sqlite"
            path = "/tmp/ledger.db"

            [auth]
            enabled = true

            [[auth.api_keys]]
            name = "ops"
            key = "secret"
            role = "admin"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.backend, "sqlite");
        assert!(config.auth.enabled);
        assert_eq!(config.auth.api_keys[0].role, "admin");
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
