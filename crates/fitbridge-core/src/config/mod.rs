use std::path::Path;

use thiserror::Error;

mod schema;

pub use schema::{
    AuthConfig, BackupConfig, DestinationConfig, FitbridgeConfig, LedgerConfig, SourceConfig,
};

const MAX_EXPIRY_SKEW_SECONDS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("config validation error: {message}")]
    Validation { message: String },
}

/// Load and validate a `FitbridgeConfig` from a TOML file path.
///
/// Returns the default config if the file does not exist.
pub fn load_config(path: &Path) -> Result<FitbridgeConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(FitbridgeConfig::default());
    }

    let data = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_config(&data)
}

/// Parse and validate a `FitbridgeConfig` from a TOML string.
pub fn parse_config(data: &str) -> Result<FitbridgeConfig, ConfigError> {
    let config: FitbridgeConfig = toml::from_str(data)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &FitbridgeConfig) -> Result<(), ConfigError> {
    if config.source.prefix.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "source.prefix must not be empty".to_string(),
        });
    }

    if config.source.extension.trim_start_matches('.').trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "source.extension must not be empty".to_string(),
        });
    }

    if config.auth.expiry_skew_seconds > MAX_EXPIRY_SKEW_SECONDS {
        return Err(ConfigError::Validation {
            message: format!(
                "auth.expiry_skew_seconds must be <= {MAX_EXPIRY_SKEW_SECONDS}, got {}",
                config.auth.expiry_skew_seconds
            ),
        });
    }

    if config.destination.timeout_seconds == 0 {
        return Err(ConfigError::Validation {
            message: "destination.timeout_seconds must be > 0".to_string(),
        });
    }

    for (name, url) in [
        ("destination.token_url", &config.destination.token_url),
        ("destination.upload_url", &config.destination.upload_url),
    ] {
        if !url.is_empty() && !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(ConfigError::Validation {
                message: format!("{name} must be an http(s) URL, got '{url}'"),
            });
        }
    }

    Ok(())
}

impl FitbridgeConfig {
    /// Both endpoints are needed before anything can be sent.
    pub fn require_destination(&self) -> Result<(), ConfigError> {
        if self.destination.token_url.is_empty() || self.destination.upload_url.is_empty() {
            return Err(ConfigError::Validation {
                message: "destination.token_url and destination.upload_url must be set to sync"
                    .to_string(),
            });
        }
        Ok(())
    }
}
