//! Connection-level errors and client-facing sanitization.

use std::sync::Arc;

use thiserror::Error;

use ripple_protocol::MarshalError;

use crate::socket::SocketError;

/// A boxed error from user-supplied code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by the connection engine and channel dispatch.
#[derive(Debug, Error)]
pub enum CableError {
    #[error("unsupported subprotocol {0}")]
    UnsupportedSubprotocol(String),

    #[error("unexpected {got} frame (expected {expected})")]
    FrameType {
        got: &'static str,
        expected: &'static str,
    },

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// The peer closed the connection under ordinary conditions.
    #[error("websocket closed normally")]
    NormalClose,

    /// The peer closed the connection with an abnormal close code.
    #[error("websocket closed with code {0}")]
    Closed(u16),

    #[error("read deadline exceeded")]
    ReadTimeout,

    #[error("write deadline exceeded")]
    WriteTimeout,

    /// The connection's context was cancelled; orderly shutdown.
    #[error("connection cancelled")]
    Cancelled,

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error("unknown channel name {0}")]
    UnknownChannel(String),

    #[error("no existing subscription on {0}")]
    UnknownSubscription(String),

    #[error("subscription identifier failed checks: {0}")]
    IdentifierCheck(#[source] BoxError),

    #[error("subscription rejected")]
    SubscriptionRejected,

    #[error("{0}")]
    Other(String),
}

impl CableError {
    /// Whether the error represents an orderly end of the connection
    /// (normal close or cancellation) rather than a fault.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::NormalClose | Self::Cancelled)
    }
}

/// Rewrites errors before they cross the client boundary, so internal
/// detail never leaks into disconnect frames.
pub type ErrorSanitizer = Arc<dyn Fn(Option<&CableError>) -> String + Send + Sync>;

/// The default sanitizer: cancellation reads as a logout, anything
/// else as a generic failure.
#[must_use]
pub fn default_error_sanitizer(err: Option<&CableError>) -> String {
    match err {
        None => String::new(),
        Some(CableError::Cancelled) => "logged out".to_string(),
        Some(_) => "server or client error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizer_hides_error_detail() {
        assert_eq!(default_error_sanitizer(None), "");
        assert_eq!(
            default_error_sanitizer(Some(&CableError::Cancelled)),
            "logged out"
        );
        assert_eq!(
            default_error_sanitizer(Some(&CableError::UnknownChannel("secret".to_string()))),
            "server or client error"
        );
    }

    #[test]
    fn shutdown_classification() {
        assert!(CableError::NormalClose.is_shutdown());
        assert!(CableError::Cancelled.is_shutdown());
        assert!(!CableError::ReadTimeout.is_shutdown());
        assert!(!CableError::Closed(1011).is_shutdown());
    }
}
