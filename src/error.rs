//! Error types for the TensAI dispatcher.

use std::time::Duration;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Configuration-related errors. These never trigger a network call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No API endpoint configured for module: {0}")]
    UnknownModule(String),

    #[error("Module {module} has no {endpoint} endpoint")]
    MissingEndpoint { module: String, endpoint: String },

    #[error("Upload not supported for module: {0}")]
    UploadNotSupported(String),

    #[error("Unsupported generation type for {module}: {generation_type}")]
    UnsupportedGenerationType {
        module: String,
        generation_type: String,
    },

    #[error("Module {module} does not support action: {action}")]
    UnsupportedAction { module: String, action: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// A single failed attempt against an upstream endpoint.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    /// The request could not be built (e.g. an invalid header value).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether another attempt could succeed. A request that cannot be
    /// built fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_))
    }
}

/// Errors surfaced by dispatcher operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{module}: all {attempts} attempts failed. Last error: {last}")]
    Exhausted {
        module: String,
        attempts: u32,
        last: TransportError,
    },

    #[error("{module} request failed: {source}")]
    Transport {
        module: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DispatchError {
    /// Number of upstream attempts made before this error, zero for
    /// configuration and encoding failures.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Transport { .. } => 1,
            Self::Config(_) | Self::Encode(_) => 0,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
