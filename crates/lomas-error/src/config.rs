use std::path::PathBuf;

/// Errors loading or validating the layered `Config`/`Secrets` objects.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read from disk.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path of the config file that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file contents failed to parse.
    #[error("failed to parse config: {source}")]
    ParseError {
        /// Underlying TOML parse error.
        #[source]
        source: toml::de::Error,
    },

    /// No config file was found in any recognized location.
    #[error("no config file found in any recognized location")]
    NotFound,

    /// The config failed semantic validation.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// The secrets source was missing or unreadable.
    #[error("secrets source missing or unreadable: {0}")]
    SecretsUnavailable(String),

    /// Multiple configuration errors were collected together.
    #[error("{} configuration errors: {}", errors.len(), errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    MultipleErrors {
        /// The individual errors collected.
        errors: Vec<ConfigError>,
    },
}

impl ConfigError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ReadError { .. } => "config_read_error",
            Self::ParseError { .. } => "config_parse_error",
            Self::NotFound => "config_not_found",
            Self::Invalid(_) => "config_invalid",
            Self::SecretsUnavailable(_) => "secrets_unavailable",
            Self::MultipleErrors { .. } => "config_invalid",
        }
    }
}
