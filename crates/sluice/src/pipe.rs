//! The pipe seam the protocol layer is built against
//!
//! The pipe is an external collaborator: it owns event dispatch,
//! middleware chaining, and message routing. The protocol layer only
//! needs the capabilities captured by the [`Pipe`] trait, scoped to one
//! point of the pipeline. [`memory::MemoryPipe`] provides an in-process
//! implementation with the delivery guarantees the protocol depends on.

use bytes::Bytes;
use sluice_proto::{Chunk, Selector};

pub mod memory;

/// A listener observing chunks delivered at one point of the pipe.
///
/// The continuation completes the delivery; until it (or `resume`) is
/// invoked, the point holds back subsequent messages, which is what
/// keeps per-session chunk order intact across suspension points.
pub type Listener = Box<dyn FnMut(Chunk, Continuation) + Send>;

/// One point's view of the underlying message pipe.
///
/// All operations are synchronous and non-blocking: they enqueue or
/// register and return. Chunk delivery order per direction is FIFO for
/// messages passing a given point.
pub trait Pipe: Send + Sync {
    /// Emit an outbound chunk from this point, toward the neighbor in
    /// the chunk's direction
    fn send(&self, chunk: Chunk);

    /// Unsuspend delivery at this point, discarding the currently
    /// suspended message if there is one
    fn resume(&self);

    /// Complete the currently suspended message at this point and
    /// forward it, optionally replacing its payload first.
    ///
    /// With nothing suspended this is a no-op; the surrounding pipe
    /// contract leaves that case undefined.
    fn proceed(&self, replacement: Option<Bytes>);

    /// Register a persistent listener for the given selector.
    ///
    /// Registering a selector that already has a listener replaces it.
    fn on(&self, selector: Selector, listener: Listener);

    /// Register a one-shot listener for the given selector
    fn once(&self, selector: Selector, listener: Listener);
}

/// Single-use handle completing one suspended message.
///
/// Dropping a continuation leaves the message suspended; a continuation
/// whose message was already completed through `proceed` or discarded
/// through `resume` is a silent no-op.
pub struct Continuation {
    complete: Box<dyn FnOnce(Option<Bytes>) + Send>,
}

impl Continuation {
    /// Create a continuation from its completion function
    pub fn new(complete: impl FnOnce(Option<Bytes>) + Send + 'static) -> Self {
        Self {
            complete: Box::new(complete),
        }
    }

    /// Forward the message as-is
    pub fn next(self) {
        (self.complete)(None);
    }

    /// Replace the message payload, then forward it
    pub fn next_with(self, data: impl Into<Bytes>) {
        (self.complete)(Some(data.into()));
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation").finish_non_exhaustive()
    }
}
