//! Handler configuration.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::framing::FramingOptions;

pub const DEFAULT_TOKEN_PARAMETER: &str = "dcache-http-uuid";
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("invalid configuration: {source}")]
    Parse {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    pub fn invalid<S: ToString>(reason: S) -> Self {
        Self::Invalid { reason: reason.to_string() }
    }
}

/// Settings of the request handler. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Name of the query parameter carrying the session token.
    pub token_parameter: String,
    /// Largest chunk read from a channel at once.
    pub chunk_size: usize,
    /// Derive `Content-Type` from the file extension instead of always
    /// answering `application/octet-stream`.
    pub guess_content_type: bool,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        HandlerConfig {
            token_parameter: DEFAULT_TOKEN_PARAMETER.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            guess_content_type: false,
        }
    }
}

impl HandlerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: HandlerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::invalid("chunk_size must be positive"));
        }
        if self.token_parameter.is_empty() {
            return Err(ConfigError::invalid("token_parameter must not be empty"));
        }
        Ok(())
    }

    pub(crate) fn framing_options(&self) -> FramingOptions {
        FramingOptions { guess_content_type: self.guess_content_type }
    }
}
