use axum::http::StatusCode;
use std::io;

/// Boxed error returned by event listeners
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Raised while building a `GitHook`; never reaches the network
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("secret provided but it is empty")]
    EmptySecret,

    #[error("watched ref must not be empty")]
    EmptyRef,

    #[error("invalid body size limit '{0}'")]
    InvalidLimit(String),

    #[error("no action configured")]
    MissingAction,

    #[error("failed to read config file '{path}': {source}")]
    Read { path: String, source: io::Error },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Signature header absent or wrong
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("no provider signature")]
    Missing,

    #[error("signature validation failed")]
    Mismatch,
}

/// Body could not be turned into a dispatchable payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("no payload")]
    NoPayload,

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("invalid ref")]
    InvalidRef,
}

/// A listener (including the bound action) failed while handling an event
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct DispatchError {
    pub event: String,
    pub message: String,
}

impl DispatchError {
    pub fn new(event: impl Into<String>, source: BoxError) -> Self {
        Self {
            event: event.into(),
            message: source.to_string(),
        }
    }
}

/// Every per-request failure, mapped to a fixed status code
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl HookError {
    /// Status code answered to the webhook provider for this failure
    pub fn status(&self) -> StatusCode {
        match self {
            HookError::Signature(_) => StatusCode::UNAUTHORIZED,
            HookError::Payload(_) => StatusCode::BAD_REQUEST,
            HookError::Rejected { status, .. } => *status,
            HookError::Config(_) | HookError::Dispatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Helper type for Results that use HookError
pub type Result<T> = std::result::Result<T, HookError>;
