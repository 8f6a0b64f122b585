use crate::error::{MatchError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Used only when `auth.allow_insecure_dev_secret` is set and no secret is configured.
pub const DEV_JWT_SECRET: &str = "tripmatch-insecure-dev-secret";

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
    pub token_ttl_hours: i64,
    pub allow_insecure_dev_secret: bool,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub recent_messages: u32,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_seconds: 30,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://tripmatch.db".to_string(),
            max_connections: 8,
            busy_timeout_seconds: 5,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_hours: 24,
            allow_insecure_dev_secret: false,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 200,
            recent_messages: 20,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LimitsConfig {
    /// Clamps a caller-supplied page size to the configured bounds.
    pub fn page(&self, limit: Option<u32>, offset: Option<u32>) -> (i64, i64) {
        let limit = limit
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1));
        (limit as i64, offset.unwrap_or(0) as i64)
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| MatchError::Config(format!("Failed to read config file: {}", e)))?;

        let config: AppConfig = toml::from_str(&config_str)
            .map_err(|e| MatchError::Config(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    /// Loads the file when it exists, falling back to defaults, then applies env overrides.
    pub fn load_with_env_overrides<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = if path.as_ref().exists() {
            Self::load(path)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }

        if let Ok(jwt_secret) = std::env::var("JWT_SECRET") {
            config.auth.jwt_secret = Some(jwt_secret);
        }

        if let Ok(port) = std::env::var("TRIPMATCH_PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| MatchError::Config(format!("Invalid TRIPMATCH_PORT: {}", port)))?;
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(MatchError::Config("Server port cannot be 0".to_string()));
        }

        if self.database.url.is_empty() {
            return Err(MatchError::Config("Database URL cannot be empty".to_string()));
        }

        if self.jwt_secret().is_none() {
            return Err(MatchError::Config(
                "auth.jwt_secret is required (or set auth.allow_insecure_dev_secret)".to_string(),
            ));
        }

        if self.auth.token_ttl_hours <= 0 {
            return Err(MatchError::Config("Token TTL must be positive".to_string()));
        }

        if self.limits.default_page_size == 0 || self.limits.default_page_size > self.limits.max_page_size {
            return Err(MatchError::Config(
                "Default page size must be between 1 and max_page_size".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty" | "compact") {
            return Err(MatchError::Config(format!(
                "Unknown log format: {}",
                self.logging.format
            )));
        }

        Ok(())
    }

    pub fn get_server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn jwt_secret(&self) -> Option<&str> {
        match self.auth.jwt_secret.as_deref() {
            Some(secret) if !secret.is_empty() => Some(secret),
            _ if self.auth.allow_insecure_dev_secret => Some(DEV_JWT_SECRET),
            _ => None,
        }
    }
}

pub fn create_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let default_config = AppConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| MatchError::Config(format!("Failed to serialize default config: {}", e)))?;

    std::fs::write(path, toml_str)
        .map_err(|e| MatchError::Config(format!("Failed to write default config file: {}", e)))?;

    Ok(())
}

/// Installs the global tracing subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.limits.max_page_size, 200);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_err(), "no secret configured");

        config.auth.jwt_secret = Some("s3cret".to_string());
        assert!(config.validate().is_ok());

        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_insecure_dev_secret_is_opt_in() {
        let mut config = AppConfig::default();
        assert_eq!(config.jwt_secret(), None);
        config.auth.allow_insecure_dev_secret = true;
        assert_eq!(config.jwt_secret(), Some(DEV_JWT_SECRET));
        config.auth.jwt_secret = Some("real".to_string());
        assert_eq!(config.jwt_secret(), Some("real"));
    }

    #[test]
    fn test_page_clamping() {
        let limits = LimitsConfig::default();
        assert_eq!(limits.page(None, None), (50, 0));
        assert_eq!(limits.page(Some(0), Some(10)), (1, 10));
        assert_eq!(limits.page(Some(10_000), None), (200, 0));
    }

    #[test]
    fn test_config_file_creation() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        create_default_config_file(path).unwrap();
        assert!(path.exists());

        let loaded_config = AppConfig::load(path).unwrap();
        assert_eq!(loaded_config.server.port, 8080);
        assert_eq!(loaded_config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(
            temp_file.path(),
            "[server]\nport = 9000\n\n[auth]\njwt_secret = \"abc\"\n",
        )
        .unwrap();

        let config = AppConfig::load(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.database.url, "sqlite://tripmatch.db");
        assert!(config.validate().is_ok());
    }
}
