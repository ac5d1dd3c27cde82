//! Exchange controller: request/respond/proceed/retry/throw

use crate::pipe::{Continuation, Pipe};
use crate::stream::Stream;
use crate::Result;
use bytes::Bytes;
use sluice_proto::{
    Chunk, ChunkKind, Direction, ExchangeFailure, ProtocolViolation, Selector, Session,
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::debug;

/// Terminal outcome of one exchange: the response payload, or the
/// failure that ended it
pub type ExchangeOutcome = std::result::Result<Option<Bytes>, ExchangeFailure>;

/// One point's exchange controller.
///
/// Every handle of a pipeline shares one exchange context: the pair of
/// current request/response session slots. At most one live session
/// exists per slot at a time; `retry` and `throw` close both, which
/// turns any chunk still in flight from the superseded attempt into
/// discarded stale traffic.
#[derive(Clone)]
pub struct Exchange {
    pipe: Arc<dyn Pipe>,
    slots: Arc<SessionSlots>,
}

#[derive(Default)]
struct SessionSlots {
    request: Mutex<Option<Session>>,
    response: Mutex<Option<Session>>,
}

impl Exchange {
    /// Create a controller with a fresh exchange context
    pub fn new(pipe: Arc<dyn Pipe>) -> Self {
        Self {
            pipe,
            slots: Arc::new(SessionSlots::default()),
        }
    }

    /// Create a controller at another point of the same pipeline,
    /// sharing this one's exchange context
    pub fn sibling(&self, pipe: Arc<dyn Pipe>) -> Self {
        Self {
            pipe,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Begin a new request exchange.
    ///
    /// Fails with [`ProtocolViolation::RequestAlreadyInitiated`] while
    /// the current request session is still live. Returns the
    /// request-direction stream for optional chunked body data.
    pub fn request(&self, payload: impl Into<Option<Bytes>>) -> Result<Stream> {
        self.begin(Direction::Request, payload.into())
    }

    /// Begin a new request exchange and observe its terminal outcome.
    ///
    /// One-shot observers for the terminal response and the terminal
    /// error share a single-fire channel; exactly one of them settles
    /// the returned [`Reply`], regardless of how many retries happen in
    /// between.
    pub fn request_with_reply(
        &self,
        payload: impl Into<Option<Bytes>>,
    ) -> Result<(Stream, Reply)> {
        if self.is_live(&self.slots.request) {
            return Err(ProtocolViolation::RequestAlreadyInitiated);
        }

        let (tx, rx) = oneshot::channel();
        let settle = Arc::new(Mutex::new(Some(tx)));

        // Settling must not hold the delivery open: the continuation is
        // completed so that chunks queued behind the terminal one (a
        // streamed response body, a late failure) still reach whatever
        // listeners the caller registered alongside the reply.
        let on_failure = settle.clone();
        self.pipe.once(
            Selector::Kind(ChunkKind::Failure),
            Box::new(move |chunk, continuation| {
                if let Some(tx) = lock(&on_failure).take() {
                    let error = chunk
                        .failure()
                        .cloned()
                        .unwrap_or_else(|| ExchangeFailure::new("exchange failed"));
                    let _ = tx.send(Err(error));
                }
                continuation.next();
            }),
        );
        let on_response = settle;
        self.pipe.once(
            Selector::Kind(ChunkKind::Response),
            Box::new(move |chunk, continuation| {
                if let Some(tx) = lock(&on_response).take() {
                    let _ = tx.send(Ok(chunk.payload().cloned()));
                }
                continuation.next();
            }),
        );

        let stream = self.begin(Direction::Request, payload.into())?;
        Ok((stream, Reply { rx }))
    }

    /// Begin the response side of the current exchange.
    ///
    /// Fails with [`ProtocolViolation::ResponseAlreadyInitiated`] while
    /// the current response session is still live. A `None` payload is
    /// an empty reply. Returns the response-direction stream.
    pub fn respond(&self, payload: impl Into<Option<Bytes>>) -> Result<Stream> {
        self.begin(Direction::Response, payload.into())
    }

    /// Forward the message currently suspended at this point
    pub fn proceed(&self) {
        self.pipe.proceed(None);
    }

    /// Replace the payload of the message currently suspended at this
    /// point, then forward it
    pub fn proceed_with(&self, data: impl Into<Bytes>) {
        self.pipe.proceed(Some(data.into()));
    }

    /// Abandon the current exchange and restart it with the given
    /// payload.
    ///
    /// Both current sessions are closed before the superseding request
    /// goes out, so chunks still in flight from the old attempt are
    /// discarded at receipt while the fresh attempt proceeds untouched.
    /// May be called repeatedly; every call fully supersedes the
    /// previous attempt.
    pub fn retry(&self, payload: impl Into<Option<Bytes>>) -> Result<Stream> {
        debug!("retrying exchange");
        self.shutdown_sessions();
        self.begin(Direction::Request, payload.into())
    }

    /// Terminate the current exchange with a terminal failure.
    ///
    /// Both current sessions are closed before the error signal is
    /// emitted along the response direction; receivers observe no
    /// further data for the closed sessions, only the error.
    pub fn throw(&self, error: ExchangeFailure) {
        debug!(%error, "terminating exchange");
        self.shutdown_sessions();
        self.pipe.resume();
        self.pipe.send(Chunk::Failure { error });
    }

    /// Unsuspend delivery at this point
    pub fn resume(&self) {
        self.pipe.resume();
    }

    /// Register a persistent listener at this point
    pub fn on<F>(&self, selector: Selector, listener: F) -> &Self
    where
        F: FnMut(Chunk, Continuation) + Send + 'static,
    {
        self.pipe.on(selector, Box::new(listener));
        self
    }

    /// Register a one-shot listener at this point
    pub fn once<F>(&self, selector: Selector, listener: F) -> &Self
    where
        F: FnMut(Chunk, Continuation) + Send + 'static,
    {
        self.pipe.once(selector, Box::new(listener));
        self
    }

    fn begin(&self, direction: Direction, payload: Option<Bytes>) -> Result<Stream> {
        let session = {
            let slot = match direction {
                Direction::Request => &self.slots.request,
                Direction::Response => &self.slots.response,
            };
            let mut slot = lock(slot);
            if slot.as_ref().map(|s| !s.is_closed()).unwrap_or(false) {
                return Err(match direction {
                    Direction::Request => ProtocolViolation::RequestAlreadyInitiated,
                    Direction::Response => ProtocolViolation::ResponseAlreadyInitiated,
                });
            }
            let session = Session::new();
            *slot = Some(session.clone());
            session
        };
        debug!(?direction, session = %session.id(), "beginning exchange side");

        self.pipe.resume();
        let chunk = match direction {
            Direction::Request => Chunk::Request {
                data: payload,
                session: session.clone(),
            },
            Direction::Response => Chunk::Response {
                data: payload,
                session: session.clone(),
            },
        };
        self.pipe.send(chunk);
        Ok(Stream::new(self.pipe.clone(), direction, session))
    }

    /// Close both current sessions, response first. Closing always
    /// covers the whole pair; a half-closed exchange would let stale
    /// and fresh traffic interleave.
    fn shutdown_sessions(&self) {
        if let Some(session) = lock(&self.slots.response).as_ref() {
            session.close();
        }
        if let Some(session) = lock(&self.slots.request).as_ref() {
            session.close();
        }
    }

    fn is_live(&self, slot: &Mutex<Option<Session>>) -> bool {
        lock(slot).as_ref().map(|s| !s.is_closed()).unwrap_or(false)
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange").finish_non_exhaustive()
    }
}

/// Single-fire observer for the terminal outcome of one exchange
pub struct Reply {
    rx: oneshot::Receiver<ExchangeOutcome>,
}

impl Reply {
    /// Wait for the terminal response or the terminal error.
    ///
    /// If the pipeline is torn down before either arrives, the
    /// exchange is reported as abandoned.
    pub async fn recv(self) -> ExchangeOutcome {
        self.rx
            .await
            .unwrap_or_else(|_| Err(ExchangeFailure::new("exchange abandoned")))
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply").finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests;
