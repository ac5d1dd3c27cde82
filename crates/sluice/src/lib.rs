//! # Sluice
//!
//! A session-scoped, duplex streaming request/response protocol layered
//! on top of a directional message pipe.
//!
//! One logical exchange is a request travelling toward a provider and a
//! response travelling back, each optionally followed by ordered body
//! chunks ending in a sentinel. Every attempt of an exchange is scoped
//! to a pair of session tokens; `retry` and `throw` close the current
//! pair so that stale in-flight chunks are discarded at receipt instead
//! of corrupting the superseding attempt.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use sluice_proto as proto;

/// Exchange controller: request/respond/proceed/retry/throw
pub mod exchange;

/// The pipe seam the protocol layer is built against
pub mod pipe;

/// Builder wiring stages onto an in-memory pipe
pub mod pipeline;

/// Write-side chunk streams
pub mod stream;

pub use exchange::{Exchange, ExchangeOutcome, Reply};
pub use pipe::{Continuation, Listener, Pipe};
pub use pipeline::Pipeline;
pub use proto::{Chunk, ChunkKind, Direction, ExchangeFailure, ProtocolViolation, Selector, Session};
pub use stream::Stream;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolViolation>;
