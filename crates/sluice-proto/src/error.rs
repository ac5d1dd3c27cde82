//! Error taxonomy for protocol operations

use thiserror::Error;

/// Programmer errors raised synchronously at the call site.
///
/// These are never retried and never delivered through the pipe; the
/// surrounding stage decides whether to recover. Stale-message
/// suppression is deliberately not represented here: a write racing a
/// superseded session is a silent no-op, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A second request was started while the current one is still live
    #[error("Request has already been initiated")]
    RequestAlreadyInitiated,

    /// A second response was started while the current one is still live
    #[error("Response has already been initiated")]
    ResponseAlreadyInitiated,

    /// A write was attempted after the stream's end-of-stream sentinel
    #[error("The stream has been closed already")]
    StreamClosed,
}

/// A terminal operational failure, delivered along the response
/// direction by `throw`.
///
/// This is the protocol layer's sole channel for reporting operational
/// errors, and the signal a stage observes to drive its own retry
/// policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExchangeFailure {
    /// Human-readable failure message
    pub message: String,
}

impl ExchangeFailure {
    /// Create a new failure with the given message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
