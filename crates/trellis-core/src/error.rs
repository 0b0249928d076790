use thiserror::Error;

/// Errors raised by the shared Trellis types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Malformed URI: {uri} ({reason})")]
    MalformedUri { uri: String, reason: String },

    #[error("Invalid username: {0:?}")]
    InvalidUsername(String),

    #[error("Unknown share level: {0}")]
    UnknownShareLevel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for CoreError {
    fn from(e: config::ConfigError) -> Self {
        CoreError::Config(e.to_string())
    }
}
