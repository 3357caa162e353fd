use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Broadcast inbound messages back to their sender
    pub echo_to_sender: bool,

    /// Per-connection outbound queue capacity; broadcasts drop messages
    /// for a destination whose queue is full
    pub send_buffer: usize,

    /// Maximum accepted WebSocket message size in bytes
    pub max_message_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            echo_to_sender: true,
            send_buffer: 1000,
            max_message_bytes: 64 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load_from(config_file: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (RELAYCAST_SERVER_PORT, etc.)
        builder = builder.add_source(
            Environment::with_prefix("RELAYCAST")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut config: Self = config.try_deserialize()?;

        // A bare PORT variable (the conventional container contract)
        // overrides the configured listen port
        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => config.server.port = port,
                Err(_) => eprintln!("Ignoring non-numeric PORT value: {port}"),
            }
        }

        Ok(config)
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self> {
        Self::load_from(Some(path))
    }

    /// Load configuration from config file or environment variables
    ///
    /// Config file search order:
    /// 1. RELAYCAST_CONFIG_PATH environment variable (explicit path)
    /// 2. ./config.yaml (current working directory)
    /// 3. Fall back to environment variables only
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RELAYCAST_CONFIG_PATH")
            .ok()
            .filter(|p| Path::new(p).exists())
            .or_else(|| {
                let cwd = "config.yaml";
                Path::new(cwd).exists().then(|| cwd.to_string())
            });

        match config_path {
            Some(path) => {
                eprintln!("Loading config from {path}");
                Self::from_file(&path)
            }
            None => Self::from_env(),
        }
    }

    /// Get the listen address
    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Validate configuration, collecting every problem found
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let level = self.logging.level.to_lowercase();
        if !matches!(
            level.as_str(),
            "trace" | "debug" | "info" | "warn" | "warning" | "error"
        ) {
            errors.push(format!("Invalid logging.level: {}", self.logging.level));
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "Invalid logging.format: {} (expected \"json\" or \"pretty\")",
                self.logging.format
            ));
        }

        if self.relay.send_buffer == 0 {
            errors.push("relay.send_buffer must be at least 1".to_string());
        }

        if self.relay.max_message_bytes == 0 {
            errors.push("relay.max_message_bytes must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert!(config.relay.echo_to_sender);
        assert_eq!(config.relay.send_buffer, 1000);
        assert_eq!(config.relay.max_message_bytes, 64 * 1024);
    }

    #[test]
    fn test_listen_address() {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 9000,
            },
            ..Default::default()
        };

        assert_eq!(config.listen_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_validate_default_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("logging.level"));
    }

    #[test]
    fn test_validate_rejects_bad_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file_surfaces_config_error() {
        let path = std::env::temp_dir().join("relaycast-bad-config.yaml");
        std::fs::write(&path, "server: [not, a, map]\n").unwrap();

        let err = Config::from_file(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, crate::error::Error::Config(_)));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let mut config = Config::default();
        config.relay.send_buffer = 0;

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("send_buffer")));
    }
}
