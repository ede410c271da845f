//! Error types shared across the queue core.
//!
//! Every failure carries a stable [`ErrorKind`], a human-readable message,
//! an optional source error, and a metadata map for structured context.
//! Kinds map onto HTTP statuses for the gateway and drive the default
//! retry classifier (see [`crate::retry`]).

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error identifiers, independent of transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unknown,
    Internal,
    Validation,
    NotFound,
    AlreadyExists,
    Permission,
    Unauthenticated,
    RateLimited,
    Timeout,
    Canceled,
    Conflict,
    Database,
    Network,
    Serialization,
    Configuration,
}

impl ErrorKind {
    /// Stable identifier string for logs and wire payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Internal => "INTERNAL",
            Self::Validation => "VALIDATION",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Permission => "PERMISSION_DENIED",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::RateLimited => "RATE_LIMITED",
            Self::Timeout => "TIMEOUT",
            Self::Canceled => "CANCELED",
            Self::Conflict => "CONFLICT",
            Self::Database => "DATABASE_ERROR",
            Self::Network => "NETWORK_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Configuration => "CONFIGURATION_ERROR",
        }
    }

    /// Recommended HTTP status for this kind.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::NotFound => 404,
            Self::AlreadyExists | Self::Conflict => 409,
            Self::Permission => 403,
            Self::Unauthenticated => 401,
            Self::RateLimited => 429,
            Self::Timeout | Self::Canceled => 408,
            Self::Unknown
            | Self::Internal
            | Self::Database
            | Self::Network
            | Self::Serialization
            | Self::Configuration => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error with a stable kind, optional cause, and structured metadata.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    metadata: BTreeMap<String, Value>,
}

impl Error {
    /// Creates a new error with the given kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Wraps an existing error with additional context.
    ///
    /// When the wrapped error is itself an [`Error`], its kind is preserved
    /// until overridden with [`Error::with_kind`].
    #[must_use]
    pub fn wrap(
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
        message: impl Into<String>,
    ) -> Self {
        let source = source.into();
        let kind = source
            .downcast_ref::<Self>()
            .map_or(ErrorKind::Unknown, |e| e.kind);
        Self {
            kind,
            message: message.into(),
            source: Some(source),
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the error kind.
    #[must_use]
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attaches a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message without the cause chain.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the metadata map.
    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    /// Recommended HTTP status for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    /// True when the default classifier would retry this error.
    ///
    /// Validation, not-found, permission, and authentication failures are
    /// terminal; everything else is assumed transient.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self.kind,
            ErrorKind::Validation
                | ErrorKind::NotFound
                | ErrorKind::Permission
                | ErrorKind::Unauthenticated
        )
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        self.kind == ErrorKind::Validation
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self.kind, ErrorKind::Conflict | ErrorKind::AlreadyExists)
    }

    // Shorthand constructors for the common kinds.

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        let kind = if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() {
            ErrorKind::Network
        } else {
            ErrorKind::Internal
        };
        Self::wrap(err, "redis operation failed").with_kind(kind)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::wrap(err, "serialization failed").with_kind(ErrorKind::Serialization)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => {
                Self::wrap(err, "row not found").with_kind(ErrorKind::NotFound)
            }
            other => Self::wrap(other, "database operation failed").with_kind(ErrorKind::Database),
        }
    }
}
