//! Runtime settings

use crate::error::{AuthzError, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthzSettings {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub bootstrap: BootstrapSettings,
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineBackend {
    #[default]
    Memory,
    Spicedb,
}

/// Read freshness requested from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    Full,
    /// At least as fresh as the last write this process observed
    #[default]
    BestEffort,
    MinimizeLatency,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub backend: EngineBackend,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub consistency: Consistency,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_check_depth")]
    pub max_check_depth: u32,
    /// Ask the engine for debug traces of checks
    #[serde(default)]
    pub tracing: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Postgres URL; relations are kept in memory when unset
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapSettings {
    /// Directory of service definition files
    #[serde(default)]
    pub definitions_path: Option<PathBuf>,
    #[serde(default = "default_schema_push_attempts")]
    pub schema_push_attempts: u32,
    #[serde(default = "default_schema_push_backoff_ms")]
    pub schema_push_backoff_ms: u64,
    /// User ids granted platform admin
    #[serde(default)]
    pub admin_users: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_check_depth() -> u32 {
    50
}

fn default_max_connections() -> u32 {
    10
}

fn default_schema_push_attempts() -> u32 {
    3
}

fn default_schema_push_backoff_ms() -> u64 {
    500
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backend: EngineBackend::default(),
            endpoint: String::new(),
            token: String::new(),
            consistency: Consistency::default(),
            request_timeout_ms: default_request_timeout_ms(),
            max_check_depth: default_max_check_depth(),
            tracing: false,
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            definitions_path: None,
            schema_push_attempts: default_schema_push_attempts(),
            schema_push_backoff_ms: default_schema_push_backoff_ms(),
            admin_users: Vec::new(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ServiceSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl AuthzSettings {
    /// Loads `authz.{yaml,toml,...}` from the working directory and applies
    /// `AUTHZ__SECTION__KEY` environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from("authz")
    }

    pub fn load_from(file: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings: Self = config::Config::builder()
            .set_default("engine.backend", "memory")?
            .set_default("engine.consistency", "best_effort")?
            .set_default("logging.level", default_log_level())?
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix("AUTHZ")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("bootstrap.admin_users")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(AuthzError::Config(message.to_string()));

        if self.engine.backend == EngineBackend::Spicedb && self.engine.endpoint.is_empty() {
            return invalid("engine.endpoint is required for the spicedb backend");
        }
        if self.engine.request_timeout_ms == 0 {
            return invalid("engine.request_timeout_ms must be greater than zero");
        }
        if self.engine.max_check_depth == 0 {
            return invalid("engine.max_check_depth must be greater than zero");
        }
        if self.service.call_timeout_ms == 0 {
            return invalid("service.call_timeout_ms must be greater than zero");
        }
        if self.bootstrap.schema_push_attempts == 0 {
            return invalid("bootstrap.schema_push_attempts must be at least 1");
        }
        if self.database.url.is_some() && self.database.max_connections == 0 {
            return invalid("database.max_connections must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = AuthzSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.engine.backend, EngineBackend::Memory);
        assert_eq!(settings.engine.consistency, Consistency::BestEffort);
        assert_eq!(settings.service.call_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_spicedb_requires_endpoint() {
        let mut settings = AuthzSettings::default();
        settings.engine.backend = EngineBackend::Spicedb;
        assert!(matches!(settings.validate(), Err(AuthzError::Config(_))));

        settings.engine.endpoint = "http://localhost:8443".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "engine:\n  backend: spicedb\n  endpoint: http://spicedb:8443\n  consistency: full\nbootstrap:\n  admin_users: [u1, u2]\nlogging:\n  json: true"
        )
        .unwrap();

        let path = file.path().with_extension("");
        let settings = AuthzSettings::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.engine.backend, EngineBackend::Spicedb);
        assert_eq!(settings.engine.consistency, Consistency::Full);
        assert_eq!(settings.bootstrap.admin_users, vec!["u1", "u2"]);
        assert_eq!(settings.bootstrap.schema_push_attempts, 3);
        assert!(settings.logging.json);
    }
}
