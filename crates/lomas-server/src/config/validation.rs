use std::env;

use lomas_error::ConfigError;

use super::{DbType, RuntimeConfig};

/// Errors collected so far, plus warnings that don't block startup.
struct ValidationResult {
    errors: Vec<ConfigError>,
    warnings: Vec<String>,
}

impl ValidationResult {
    fn new() -> Self {
        Self { errors: Vec::new(), warnings: Vec::new() }
    }

    fn add_error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ConfigError::Invalid(format!("{field}: {}", message.into())));
    }

    fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    fn into_result(self) -> Result<Vec<String>, ConfigError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else if self.errors.len() == 1 {
            Err(self.errors.into_iter().next().expect("checked len == 1"))
        } else {
            Err(ConfigError::MultipleErrors { errors: self.errors })
        }
    }
}

/// Range and cross-field checks run before the server binds, surfacing
/// `ConfigError::Invalid`/`ConfigError::MultipleErrors` on failure
/// (spec.md §6, "a `ConfigValidator` runs range/consistency checks").
pub(crate) struct ConfigValidator<'a> {
    config: &'a RuntimeConfig,
    result: ValidationResult,
}

impl<'a> ConfigValidator<'a> {
    #[must_use]
    pub(crate) fn new(config: &'a RuntimeConfig) -> Self {
        Self { config, result: ValidationResult::new() }
    }

    /// Run all checks, returning the warnings on success.
    ///
    /// # Errors
    ///
    /// The first `ConfigError::Invalid` found, or `MultipleErrors` when
    /// more than one field fails.
    pub(crate) fn validate(mut self) -> Result<Vec<String>, ConfigError> {
        self.validate_server();
        self.validate_admin_database();
        self.validate_submit_limit();
        self.result.into_result()
    }

    fn validate_server(&mut self) {
        if self.config.server.host_port == 0 {
            self.result.add_error("server.host_port", "port cannot be 0");
        }
        if let Some(workers) = self.config.server.workers {
            if workers == 0 {
                self.result.add_error("server.workers", "must be greater than 0 when set");
            }
        }
        if let Some(time_attack) = self.config.server.time_attack {
            if time_attack.magnitude_ms == 0 {
                self.result.add_warning("server.time_attack.magnitude_ms is 0, which disables shaping in practice");
            }
        }
    }

    fn validate_admin_database(&mut self) {
        let db = &self.config.admin_database;
        match db.db_type {
            DbType::Postgres => {
                let Some(env_var) = &db.connection_string_env else {
                    self.result.add_error(
                        "admin_database.connection_string_env",
                        "required when db_type = \"postgres\"",
                    );
                    return;
                };
                if env::var(env_var).is_err() {
                    self.result.add_error(
                        "admin_database.connection_string_env",
                        format!("environment variable {env_var} is not set"),
                    );
                }
            },
            DbType::Yaml => {
                if db.yaml_path.is_none() {
                    self.result
                        .add_error("admin_database.yaml_path", "required when db_type = \"yaml\"");
                }
            },
        }
        if db.pool_size == 0 {
            self.result.add_error("admin_database.pool_size", "must be greater than 0");
        }
    }

    fn validate_submit_limit(&mut self) {
        if self.config.submit_limit == 0 {
            self.result.add_error("submit_limit", "must be greater than 0");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdminDatabaseConfig, ServerConfig};
    use std::collections::HashMap;

    fn base_config() -> RuntimeConfig {
        RuntimeConfig {
            server: ServerConfig {
                host_ip: "127.0.0.1".into(),
                host_port: 8080,
                workers: None,
                log_level: "info".into(),
                time_attack: None,
            },
            admin_database: AdminDatabaseConfig {
                db_type: DbType::Yaml,
                connection_string_env: None,
                pool_size: 10,
                yaml_path: Some("./demo.yaml".into()),
            },
            dp_libraries: HashMap::new(),
            develop_mode: true,
            submit_limit: 64,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(ConfigValidator::new(&base_config()).validate().is_ok());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = base_config();
        config.server.host_port = 0;
        assert!(ConfigValidator::new(&config).validate().is_err());
    }

    #[test]
    fn yaml_without_path_is_rejected() {
        let mut config = base_config();
        config.admin_database.yaml_path = None;
        assert!(ConfigValidator::new(&config).validate().is_err());
    }

    #[test]
    fn postgres_without_env_var_is_rejected() {
        let mut config = base_config();
        config.admin_database.db_type = DbType::Postgres;
        config.admin_database.yaml_path = None;
        assert!(ConfigValidator::new(&config).validate().is_err());
    }

    #[test]
    fn multiple_failures_collect_into_one_error() {
        let mut config = base_config();
        config.server.host_port = 0;
        config.submit_limit = 0;
        let err = ConfigValidator::new(&config).validate().unwrap_err();
        assert!(matches!(err, ConfigError::MultipleErrors { .. }));
    }
}
