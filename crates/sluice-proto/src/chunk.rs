//! Chunk messages, directions, and subscription selectors

use crate::{ExchangeFailure, Session};
use bytes::Bytes;

/// Direction a chunk travels through the pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Caller to provider
    Request,
    /// Provider to caller
    Response,
}

/// The closed set of chunk kinds the protocol layer emits.
///
/// The data variants carry `None` as the end-of-stream sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    /// Initial request message
    Request,
    /// One unit of streamed request body
    RequestData,
    /// Initial response message
    Response,
    /// One unit of streamed response body
    ResponseData,
    /// Terminal error signal
    Failure,
}

/// Subscription key for pipe listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Match one chunk kind
    Kind(ChunkKind),
    /// Match every chunk regardless of kind
    Any,
}

/// One message sent through the pipe.
///
/// Every variant except `Failure` is scoped to the session of the
/// exchange attempt that produced it; a receiver must discard a chunk
/// whose session is closed at the time of receipt. `Failure` carries no
/// session so that the terminal error outlives the sessions it just
/// invalidated.
#[derive(Debug, Clone)]
pub enum Chunk {
    /// Initial request message
    Request {
        /// Request payload
        data: Option<Bytes>,
        /// Session of this exchange attempt
        session: Session,
    },
    /// One unit of streamed request body; `None` is the sentinel
    RequestData {
        /// Chunk payload, or `None` for end-of-stream
        data: Option<Bytes>,
        /// Session of this exchange attempt
        session: Session,
    },
    /// Initial response message
    Response {
        /// Response payload
        data: Option<Bytes>,
        /// Session of this exchange attempt
        session: Session,
    },
    /// One unit of streamed response body; `None` is the sentinel
    ResponseData {
        /// Chunk payload, or `None` for end-of-stream
        data: Option<Bytes>,
        /// Session of this exchange attempt
        session: Session,
    },
    /// Terminal error signal, response direction, unscoped
    Failure {
        /// The failure being delivered
        error: ExchangeFailure,
    },
}

impl Chunk {
    /// Create a streamed body chunk for the given direction
    pub fn data(direction: Direction, data: Option<Bytes>, session: Session) -> Self {
        match direction {
            Direction::Request => Self::RequestData { data, session },
            Direction::Response => Self::ResponseData { data, session },
        }
    }

    /// Get the kind tag of this chunk
    pub fn kind(&self) -> ChunkKind {
        match self {
            Self::Request { .. } => ChunkKind::Request,
            Self::RequestData { .. } => ChunkKind::RequestData,
            Self::Response { .. } => ChunkKind::Response,
            Self::ResponseData { .. } => ChunkKind::ResponseData,
            Self::Failure { .. } => ChunkKind::Failure,
        }
    }

    /// Get the direction this chunk travels
    pub fn direction(&self) -> Direction {
        match self {
            Self::Request { .. } | Self::RequestData { .. } => Direction::Request,
            Self::Response { .. } | Self::ResponseData { .. } | Self::Failure { .. } => {
                Direction::Response
            }
        }
    }

    /// Get the session this chunk is scoped to, if any
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Request { session, .. }
            | Self::RequestData { session, .. }
            | Self::Response { session, .. }
            | Self::ResponseData { session, .. } => Some(session),
            Self::Failure { .. } => None,
        }
    }

    /// Get the payload, if this chunk carries one.
    ///
    /// `None` means either the end-of-stream sentinel or a payload-less
    /// chunk; use `is_end()` to tell a sentinel apart.
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Self::Request { data, .. }
            | Self::RequestData { data, .. }
            | Self::Response { data, .. }
            | Self::ResponseData { data, .. } => data.as_ref(),
            Self::Failure { .. } => None,
        }
    }

    /// Check whether this chunk is a data-stream end-of-stream sentinel
    pub fn is_end(&self) -> bool {
        matches!(
            self,
            Self::RequestData { data: None, .. } | Self::ResponseData { data: None, .. }
        )
    }

    /// Get the failure carried by a `Failure` chunk
    pub fn failure(&self) -> Option<&ExchangeFailure> {
        match self {
            Self::Failure { error } => Some(error),
            _ => None,
        }
    }

    /// Replace the payload of this chunk, if it carries one.
    ///
    /// Used by the continuation mechanism when a stage mutates a
    /// message before forwarding it. A `Failure` chunk is left alone.
    pub fn set_data(&mut self, payload: Bytes) {
        match self {
            Self::Request { data, .. }
            | Self::RequestData { data, .. }
            | Self::Response { data, .. }
            | Self::ResponseData { data, .. } => *data = Some(payload),
            Self::Failure { .. } => {}
        }
    }

    /// Check whether this chunk must be discarded because its session
    /// was closed by a retry or a terminal failure
    pub fn is_stale(&self) -> bool {
        self.session().map(Session::is_closed).unwrap_or(false)
    }
}
