//! Error taxonomy for the connection-level protocol core (C9 in SPEC_FULL.md).
//!
//! Every fallible operation in the core resolves, eventually, to an
//! [`HttpError`] carrying the status code and message that the connection
//! state machine writes on the wire. [`RollError`] is the superset used
//! internally before that collapse happens.

use http::StatusCode;
use std::error::Error as StdError;
use std::fmt;

/// The error raised by handlers, hooks, and lazy body accessors.
///
/// Mirrors `roll.http.HttpError` from the original implementation: a status
/// code, an optional human-readable message (defaults to the status phrase),
/// and an optional wrapped source error for `error` hooks to inspect.
pub struct HttpError {
    pub status: StatusCode,
    pub message: Option<String>,
    pub context: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl HttpError {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: None,
            context: None,
        }
    }

    pub fn with_message(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            context: None,
        }
    }

    /// Mirrors `HttpError(status, message=None, context=error)`: when no
    /// message is given, the context's `Display` becomes the message, the
    /// way the Python constructor falls back to `str(context)`.
    pub fn with_context(
        status: StatusCode,
        message: Option<String>,
        context: impl StdError + Send + Sync + 'static,
    ) -> Self {
        let message = message.unwrap_or_else(|| context.to_string());
        Self {
            status,
            message: Some(message),
            context: Some(Box::new(context)),
        }
    }

    /// The message that will be sent as the response body: the explicit
    /// message, or the status's canonical reason phrase.
    pub fn body_message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| self.status.canonical_reason().unwrap_or("Error").to_string())
    }
}

impl fmt::Debug for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpError")
            .field("status", &self.status)
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.body_message())
    }
}

impl StdError for HttpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.context.as_ref().map(|c| c.as_ref() as &(dyn StdError + 'static))
    }
}

impl HttpError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_message(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::with_message(StatusCode::NOT_FOUND, path)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED)
    }

    pub fn upgrade_required() -> Self {
        Self::with_message(StatusCode::UPGRADE_REQUIRED, "Request cannot be upgraded.")
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::with_message(StatusCode::NOT_IMPLEMENTED, message)
    }

    pub fn internal(context: impl StdError + Send + Sync + 'static) -> Self {
        Self::with_context(StatusCode::INTERNAL_SERVER_ERROR, None, context)
    }
}

/// Failure to parse the incoming byte stream as HTTP/1.1 before a Request
/// object even exists (spec.md §4.2's "fails the whole connection" case).
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Unparsable request: {0}")]
    Malformed(#[from] httparse::Error),
    #[error("Request headers too large.")]
    HeadersTooLarge,
    #[error("invalid request line")]
    InvalidRequestLine,
    #[error("connection closed before headers were complete")]
    ConnectionClosed,
}

/// The top-level internal error type threaded through the router, hook
/// pipeline and connection state machine. Every variant has a well-defined
/// HTTP status (see [`RollError::status`]) and collapses to an [`HttpError`]
/// at the point the connection serializes a response (spec.md §7).
#[derive(Debug, thiserror::Error)]
pub enum RollError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("{0}")]
    RouteNotFound(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("Request cannot be upgraded.")]
    UpgradeRequired,

    #[error("Request cannot be upgraded.")]
    UpgradeNotImplemented,

    #[error("idle timeout")]
    IdleTimeout,

    /// The peer went away mid-message — a WebSocket read failing because
    /// the underlying socket closed, distinct from an application error.
    #[error("connection closed untimely")]
    PeerClosed,

    /// The connection task was cancelled while a handler was in flight
    /// (spec.md §5's "Cancellation of the connection task propagates to
    /// the in-flight handler"); WebSocket sessions close with 1001.
    #[error("handler cancelled")]
    Cancelled,

    #[error("{0}")]
    Unhandled(String),
}

impl RollError {
    pub fn status(&self) -> StatusCode {
        match self {
            RollError::Parse(_) => StatusCode::BAD_REQUEST,
            RollError::Http(e) => e.status,
            RollError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            RollError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            RollError::UpgradeRequired => StatusCode::UPGRADE_REQUIRED,
            RollError::UpgradeNotImplemented => StatusCode::NOT_IMPLEMENTED,
            RollError::IdleTimeout => StatusCode::REQUEST_TIMEOUT,
            RollError::PeerClosed => StatusCode::REQUEST_TIMEOUT,
            RollError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            RollError::Unhandled(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The body text written on the wire for this error, per spec.md §7:
    /// "the response body is the human-readable error message; no stack
    /// traces are ever written to the wire by the core".
    pub fn body_message(&self) -> String {
        match self {
            RollError::Parse(_) => "Unparsable request".to_string(),
            RollError::Http(e) => e.body_message(),
            RollError::RouteNotFound(path) => path.clone(),
            RollError::MethodNotAllowed => {
                StatusCode::METHOD_NOT_ALLOWED.canonical_reason().unwrap().to_string()
            }
            RollError::UpgradeRequired => "Request cannot be upgraded.".to_string(),
            RollError::UpgradeNotImplemented => "Request cannot be upgraded.".to_string(),
            RollError::IdleTimeout => StatusCode::REQUEST_TIMEOUT.canonical_reason().unwrap().to_string(),
            RollError::PeerClosed => "Connection closed untimely.".to_string(),
            RollError::Cancelled => "Handler cancelled.".to_string(),
            RollError::Unhandled(msg) => msg.clone(),
        }
    }

    /// Wrap an arbitrary, non-`HttpError` failure the way spec.md §7
    /// describes: "a non-HttpError exception is wrapped into 500 with the
    /// exception string as body and the original exception preserved as
    /// context".
    pub fn unhandled(err: impl fmt::Display) -> Self {
        RollError::Unhandled(err.to_string())
    }
}

pub type RollResult<T> = Result<T, RollError>;
