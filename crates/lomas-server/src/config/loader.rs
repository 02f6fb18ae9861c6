use std::env;
use std::path::Path;

use lomas_error::ConfigError;

use super::RuntimeConfig;
use super::validation::ConfigValidator;

impl RuntimeConfig {
    /// Load configuration from a file with full validation.
    ///
    /// # Errors
    ///
    /// `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::ParseError` if it is not valid TOML for this shape, or
    /// the first `ConfigError::Invalid` raised by `ConfigValidator`.
    pub(crate) fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError { path: path.to_path_buf(), source: e })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError { source: e })?;

        let warnings = ConfigValidator::new(&config).validate()?;
        for warning in warnings {
            tracing::warn!("configuration warning: {warning}");
        }

        Ok(config)
    }

    /// Load configuration from the `LOMAS_CONFIG` env var, falling back to
    /// `./lomas.toml`.
    ///
    /// # Errors
    ///
    /// `ConfigError::NotFound` if neither location yields a file; otherwise
    /// the error `from_file` would return for the location it tried.
    pub(crate) fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = env::var("LOMAS_CONFIG") {
            return Self::from_file(path);
        }

        let local = Path::new("./lomas.toml");
        if local.exists() {
            return Self::from_file(local);
        }

        Err(ConfigError::NotFound)
    }
}
