//! Unified error type.

use std::io;

use crate::status;

/// Boxed, thread-safe error used where the concrete type is not known.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout strata.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type flowing through the middleware chain.
///
/// Validation failures ([`Error::InvalidStatus`], [`Error::InvalidHeader`])
/// are raised synchronously by the response setters. Handler failures are
/// usually [`Error::Http`], built with [`Context::throw`](crate::Context::throw).
/// Everything that reaches the application unhandled is mapped to a status
/// with [`Error::status`] and written by the context's error path.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid status code: {0}")]
    InvalidStatus(u16),

    #[error("invalid value for header `{name}`")]
    InvalidHeader { name: String },

    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        expose: bool,
    },

    #[error("connection closed before the response was sent")]
    ConnectionClosed,

    #[error("request finished without producing a response")]
    NoResponse,

    #[error("middleware panicked: {0}")]
    Panic(String),

    #[error("body stream failed: {0}")]
    Stream(String),

    #[error("invalid socket address `{0}`")]
    InvalidAddress(String),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(BoxError),
}

impl Error {
    /// An HTTP error with the given status and message.
    ///
    /// Client errors (`< 500`) are exposed to the client by default; server
    /// errors only ever show the generic reason phrase.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http { status, message: message.into(), expose: status < 500 }
    }

    /// An HTTP error whose message is the status' reason phrase.
    pub fn status_only(status: u16) -> Self {
        let message = status::reason(status).unwrap_or("Internal Server Error");
        Self::http(status, message)
    }

    /// Wraps any error raised by application code.
    pub fn other(err: impl Into<BoxError>) -> Self {
        Self::Other(err.into())
    }

    /// Turns a caught panic payload into a server error.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_owned()
        };
        Self::Panic(message)
    }

    /// Overrides whether the message is safe to show to the client.
    pub fn exposed(self, expose: bool) -> Self {
        match self {
            Self::Http { status, message, .. } => Self::Http { status, message, expose },
            other => other,
        }
    }

    /// The status written to the client when this error ends a request.
    ///
    /// Unregistered codes fall back to 500, a missing file becomes a 404.
    pub fn status(&self) -> u16 {
        match self {
            Self::Http { status, .. } if status::is_valid(*status) => *status,
            Self::Io(e) if e.kind() == io::ErrorKind::NotFound => 404,
            _ => 500,
        }
    }

    /// Whether the message may be sent to the client verbatim.
    pub fn expose(&self) -> bool {
        matches!(self, Self::Http { expose: true, .. })
    }
}
