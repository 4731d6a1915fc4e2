//! Error handling module for dbman
//!
//! Provides the crate-wide error type using thiserror. Content resolution,
//! variable merging, provider calls and orchestration all report through
//! `DbmanError` so the command line can surface kind and message verbatim.

use strum::Display;
use thiserror::Error;

/// Main error type for dbman
#[derive(Error, Debug)]
pub enum DbmanError {
    /// The content source could not be reached at all
    #[error("I cannot reach the content source at '{uri}': {reason}")]
    SourceUnreachable { uri: String, reason: String },

    /// A plan, manifest, script, release or query does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The content source refused access (401/403)
    #[error("access denied: {0}")]
    Forbidden(String),

    /// The content source did not answer in time (408)
    #[error("timed out: {0}")]
    Timeout(String),

    /// The content source answered with a server-side failure (5xx)
    #[error("server error: {0}")]
    ServerError(String),

    /// A resolved variable value tripped the injection guard
    #[error("I found suspicious content for variable '{name}'")]
    SuspiciousVariableValue { name: String },

    /// Create/Deploy found an existing version entry
    #[error(
        "I have found an existing database version {db_version}, which is for application version {app_version}"
    )]
    AlreadyExists {
        app_version: String,
        db_version: String,
    },

    /// Upgrade found no version entry
    #[error("the database has not been deployed yet: no version information found")]
    NotInitialized,

    /// Target release is not ahead of the installed one
    #[error("I cannot upgrade from application version '{current}' to '{target}'")]
    InvalidUpgradePath { current: String, target: String },

    /// Protocol version or magic cookie mismatch while launching a plugin
    #[error("provider handshake failed: {0}")]
    ProviderHandshakeFailed(String),

    /// The plugin did not complete the handshake within the allowed window
    #[error("provider did not respond in time: {0}")]
    ProviderTimeout(String),

    /// RPC or process failure (crash, closed pipe, malformed response)
    #[error("provider transport error: {0}")]
    ProviderTransport(String),

    /// Failure reported by the backend inside a well-formed envelope
    #[error("provider error: {0}")]
    ProviderDomain(String),

    /// Configuration errors (loading, missing keys, unknown provider)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for dbman operations
pub type Result<T> = std::result::Result<T, DbmanError>;

/// Stable classification of a `DbmanError`, printed next to the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    SourceUnreachable,
    NotFound,
    Forbidden,
    Timeout,
    ServerError,
    SuspiciousVariableValue,
    AlreadyExists,
    NotInitialized,
    InvalidUpgradePath,
    ProviderHandshakeFailed,
    ProviderTimeout,
    ProviderTransportError,
    ProviderDomainError,
    Config,
    Io,
    Json,
}

// Convenient error constructors
impl DbmanError {
    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a handshake failure
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::ProviderHandshakeFailed(msg.into())
    }

    /// Create a transport failure
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::ProviderTransport(msg.into())
    }

    /// Create a backend (envelope-reported) failure
    pub fn domain(msg: impl Into<String>) -> Self {
        Self::ProviderDomain(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceUnreachable { .. } => ErrorKind::SourceUnreachable,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ServerError(_) => ErrorKind::ServerError,
            Self::SuspiciousVariableValue { .. } => ErrorKind::SuspiciousVariableValue,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::NotInitialized => ErrorKind::NotInitialized,
            Self::InvalidUpgradePath { .. } => ErrorKind::InvalidUpgradePath,
            Self::ProviderHandshakeFailed(_) => ErrorKind::ProviderHandshakeFailed,
            Self::ProviderTimeout(_) => ErrorKind::ProviderTimeout,
            Self::ProviderTransport(_) => ErrorKind::ProviderTransportError,
            Self::ProviderDomain(_) => ErrorKind::ProviderDomainError,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Json,
        }
    }

    /// A failed handshake is never retried: the host must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ProviderHandshakeFailed(_))
    }
}
