//! # Sluice Protocol
//!
//! Protocol vocabulary for the sluice exchange layer: chunk messages,
//! session tokens, and the error taxonomy shared between the exchange
//! controller and whatever pipe substrate carries the chunks.

#![warn(missing_docs)]

/// Chunk messages, directions, and subscription selectors
pub mod chunk;

/// Session tokens scoping chunks to one exchange attempt
pub mod session;

/// Error taxonomy for protocol operations
pub mod error;

pub use chunk::{Chunk, ChunkKind, Direction, Selector};
pub use error::{ExchangeFailure, ProtocolViolation};
pub use session::Session;
