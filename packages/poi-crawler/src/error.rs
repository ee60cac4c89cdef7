//! Typed errors for the POI crawler.
//!
//! Library code returns these `thiserror` enums; only the binary and the
//! env-config glue reach for `anyhow`.

use thiserror::Error;

use crate::types::{SessionId, SessionStatus};

/// Failure reported by the fetch gateway.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The fetch did not complete within the per-call timeout
    #[error("timeout fetching: {url}")]
    Timeout { url: String },

    /// The server answered with a non-success status
    #[error("HTTP {status} fetching: {url}")]
    Http { url: String, status: u16 },

    /// Connection, DNS or body read failure
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl FetchError {
    /// Whether the URL should be re-queued (bounded by `retry_limit`).
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Network { .. } => true,
            FetchError::Http { status, .. } => *status == 429 || *status >= 500,
        }
    }

    /// Short machine-readable kind for progress events.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout { .. } => "timeout",
            FetchError::Http { .. } => "http_error",
            FetchError::Network { .. } => "network",
        }
    }
}

/// Failure reported by the reasoning backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("reasoning backend timed out")]
    Timeout,

    #[error("reasoning backend unreachable: {0}")]
    Unreachable(String),

    #[error("malformed reasoning response: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Hard errors abort extraction for the current page and count towards
    /// the session-abort threshold. A malformed response does neither.
    pub fn is_hard(&self) -> bool {
        matches!(self, BackendError::Timeout | BackendError::Unreachable(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Timeout => "timeout",
            BackendError::Unreachable(_) => "unreachable",
            BackendError::Malformed(_) => "malformed",
        }
    }
}

/// A candidate the agent refused to pass on. Never surfaced to callers,
/// only counted in diagnostics.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("candidate has no name")]
    MissingName,

    #[error("field `{field}` is not a string")]
    NotAString { field: &'static str },

    #[error("field `{field}` exceeds {max} characters")]
    FieldTooLong { field: &'static str, max: usize },

    #[error("confidence is not a finite number")]
    InvalidConfidence,
}

/// A URL that cannot enter the frontier.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScopeError {
    #[error("invalid URL `{url}`: {reason}")]
    Invalid { url: String, reason: String },

    #[error("disallowed URL scheme: {0}")]
    DisallowedScheme(String),

    #[error("off-site URL: {0}")]
    OffSite(String),

    #[error("depth {depth} exceeds max depth {max_depth}: {url}")]
    TooDeep {
        url: String,
        depth: u32,
        max_depth: u32,
    },

    #[error("non-content resource: {0}")]
    NonContent(String),
}

/// Checkpoint read/write failure.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the session controller and registry.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("invalid seed URL: {0}")]
    InvalidSeed(#[from] ScopeError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("session {0} is already running")]
    AlreadyRunning(SessionId),

    #[error("session task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;
pub type BackendResult<T> = std::result::Result<T, BackendError>;
pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;
pub type Result<T> = std::result::Result<T, SessionError>;
