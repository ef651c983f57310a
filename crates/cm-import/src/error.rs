//! Error types for NBI requests and local bookkeeping.

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The server answered 204: the resource or page is empty.
    #[error("nothing found")]
    NoContent,

    /// 404 from the NBI; usually transient while the service restarts.
    #[error("service is unavailable")]
    ServiceUnavailable,

    #[error("security violation, access not allowed")]
    AccessNotAllowed,

    #[error("bad request: {}", body.as_deref().unwrap_or("no details"))]
    BadRequest { body: Option<String> },

    #[error("server responded with 302, the authentication session has expired; please login again")]
    TokenExpired,

    #[error("missing credentials, can't authenticate")]
    MissingCredentials,

    #[error("nbi request failed with response code: {status}")]
    Request { status: u16, body: Option<String> },

    #[error("failed to connect to service: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("session is not open")]
    SessionClosed,

    #[error("login failed: {0}")]
    Login(String),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid timestamp '{input}': {reason}")]
    Timestamp { input: String, reason: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid job: {0}")]
    InvalidJob(String),
}

impl Error {
    pub fn timestamp(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Timestamp {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    /// HTTP status associated with the error, `999` for transport failures.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::NoContent => Some(204),
            Error::BadRequest { .. } => Some(400),
            Error::AccessNotAllowed => Some(401),
            Error::ServiceUnavailable => Some(404),
            Error::TokenExpired => Some(302),
            Error::Request { status, .. } => Some(*status),
            Error::Connection(_) | Error::MissingCredentials => Some(999),
            _ => None,
        }
    }

    /// Error body returned by the server, if any.
    pub fn body(&self) -> Option<&str> {
        match self {
            Error::BadRequest { body } | Error::Request { body, .. } => body.as_deref(),
            _ => None,
        }
    }
}
