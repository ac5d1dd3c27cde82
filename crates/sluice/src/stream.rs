//! Write-side chunk streams

use crate::pipe::{Continuation, Pipe};
use crate::Result;
use bytes::Bytes;
use sluice_proto::{Chunk, Direction, ProtocolViolation, Selector, Session};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Write-side handle for the chunked body of one exchange attempt.
///
/// A stream is bound to a direction and to the session of the attempt
/// that created it. It reads the session's closed state but does not
/// own it: when the exchange controller closes the session under a
/// retry or a terminal failure, writes on the stream become silent
/// no-ops. Writing after the stream's own end-of-stream sentinel is a
/// programming error and fails fast.
pub struct Stream {
    pipe: Arc<dyn Pipe>,
    direction: Direction,
    session: Session,
    ended: AtomicBool,
}

impl Stream {
    pub(crate) fn new(pipe: Arc<dyn Pipe>, direction: Direction, session: Session) -> Self {
        Self {
            pipe,
            direction,
            session,
            ended: AtomicBool::new(false),
        }
    }

    /// Direction this stream writes toward
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Session this stream is scoped to
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Send one body chunk
    pub fn write(&self, data: impl Into<Bytes>) -> Result<&Self> {
        self.push(Some(data.into()))
    }

    /// Send the end-of-stream sentinel and close the stream for writes.
    ///
    /// Ending a stream twice surfaces the same violation as any other
    /// write after the sentinel; end-of-stream is a one-time transition.
    pub fn end(&self) -> Result<&Self> {
        self.push(None)
    }

    /// Send one final body chunk, then the end-of-stream sentinel
    pub fn end_with(&self, data: impl Into<Bytes>) -> Result<&Self> {
        self.write(data)?;
        self.push(None)
    }

    fn push(&self, data: Option<Bytes>) -> Result<&Self> {
        // A session closed by retry/throw absorbs writes silently: a
        // producer racing a superseding exchange must neither corrupt
        // it nor crash. Checked before the local flag so that a
        // finished producer on a dead session stays quiet too.
        if self.session.is_closed() {
            debug!(session = %self.session.id(), "dropping write on closed session");
            return Ok(self);
        }
        if self.ended.load(Ordering::Acquire) {
            return Err(ProtocolViolation::StreamClosed);
        }
        let end = data.is_none();
        self.pipe
            .send(Chunk::data(self.direction, data, self.session.clone()));
        if end {
            self.ended.store(true, Ordering::Release);
        }
        Ok(self)
    }

    /// Register a persistent listener at the point this stream was
    /// created from
    pub fn on<F>(&self, selector: Selector, listener: F) -> &Self
    where
        F: FnMut(Chunk, Continuation) + Send + 'static,
    {
        self.pipe.on(selector, Box::new(listener));
        self
    }

    /// Register a one-shot listener at the point this stream was
    /// created from
    pub fn once<F>(&self, selector: Selector, listener: F) -> &Self
    where
        F: FnMut(Chunk, Continuation) + Send + 'static,
    {
        self.pipe.once(selector, Box::new(listener));
        self
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("direction", &self.direction)
            .field("session", &self.session)
            .field("ended", &self.ended.load(Ordering::Acquire))
            .finish()
    }
}
