//! In-memory pipe with synchronous cascading dispatch
//!
//! Points are indexed `0..n`; request-direction chunks travel toward
//! higher indices and response-direction chunks toward lower ones.
//! Each point delivers one message at a time from a FIFO queue and
//! holds the next back until the current one is completed or discarded,
//! which is what keeps chunk order intact across suspension points even
//! when a stage completes from a timer or another task.
//!
//! Delivery cascades synchronously: a send reaches every consuming
//! listener before it returns, so a chunk emitted before a session is
//! closed is observed, while chunks still queued at close time are
//! discarded at receipt. The one deferral: while a listener at a point
//! is on the stack, further deliveries at that same point wait for it
//! to return, since a `FnMut` listener cannot re-enter itself.

use super::{Continuation, Listener, Pipe};
use bytes::Bytes;
use sluice_proto::{Chunk, ChunkKind, Direction, Selector};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

/// An in-process pipe with a fixed number of points
pub struct MemoryPipe {
    core: Arc<PipeCore>,
}

impl MemoryPipe {
    /// Create a pipe with the given number of points.
    ///
    /// Point 0 is conventionally the caller's end.
    ///
    /// Panics if `points` is zero.
    pub fn new(points: usize) -> Self {
        assert!(points > 0, "a pipe needs at least one point");
        Self {
            core: Arc::new(PipeCore {
                state: Mutex::new(PipeState {
                    points: (0..points).map(|_| Point::default()).collect(),
                    next_seq: 0,
                }),
            }),
        }
    }

    /// Number of points in this pipe
    pub fn points(&self) -> usize {
        lock(&self.core.state).points.len()
    }

    /// Get a handle scoped to the given point.
    ///
    /// Panics if the index is out of range.
    pub fn handle(&self, point: usize) -> PointHandle {
        assert!(point < self.points(), "point index out of range");
        PointHandle {
            core: Arc::clone(&self.core),
            point,
        }
    }
}

/// One point's handle onto a [`MemoryPipe`]
#[derive(Clone)]
pub struct PointHandle {
    core: Arc<PipeCore>,
    point: usize,
}

impl PointHandle {
    /// Index of the point this handle is scoped to
    pub fn point(&self) -> usize {
        self.point
    }
}

impl Pipe for PointHandle {
    fn send(&self, chunk: Chunk) {
        let target = lock(&self.core.state).route(self.point, chunk);
        if let Some(target) = target {
            self.core.dispatch(target);
        }
    }

    fn resume(&self) {
        {
            let mut state = lock(&self.core.state);
            if state.points[self.point].current.take().is_some() {
                trace!(point = self.point, "discarded suspended message");
            }
        }
        self.core.dispatch(self.point);
    }

    fn proceed(&self, replacement: Option<Bytes>) {
        let seq = {
            let state = lock(&self.core.state);
            state.points[self.point].current.as_ref().map(|c| c.seq)
        };
        match seq {
            Some(seq) => self.core.complete(self.point, seq, replacement),
            None => warn!(point = self.point, "proceed with no suspended message"),
        }
    }

    fn on(&self, selector: Selector, listener: Listener) {
        lock(&self.core.state).register(self.point, selector, listener, false);
    }

    fn once(&self, selector: Selector, listener: Listener) {
        lock(&self.core.state).register(self.point, selector, listener, true);
    }
}

struct PipeCore {
    state: Mutex<PipeState>,
}

struct PipeState {
    points: Vec<Point>,
    next_seq: u64,
}

#[derive(Default)]
struct Point {
    handlers: HashMap<Selector, Slot>,
    queue: VecDeque<Chunk>,
    current: Option<InFlight>,
    // a listener at this point is on the stack right now
    delivering: bool,
}

struct Slot {
    listener: Arc<Mutex<Listener>>,
    once: bool,
}

struct InFlight {
    chunk: Chunk,
    seq: u64,
}

enum Step {
    Deliver {
        chunk: Chunk,
        seq: u64,
        listener: Arc<Mutex<Listener>>,
    },
    Forward(Chunk),
}

impl PipeCore {
    /// Drain the queue at `point`, handing chunks to listeners,
    /// auto-forwarding unhandled ones and discarding stale ones.
    ///
    /// Returns as soon as the point is empty, suspended on a
    /// continuation, or already mid-delivery further up the stack; in
    /// the last case the frame that owns the delivery picks the queue
    /// back up when its listener returns.
    fn dispatch(self: &Arc<Self>, point: usize) {
        loop {
            let step = {
                let mut state = lock(&self.state);
                if state.points[point].delivering || state.points[point].current.is_some() {
                    return;
                }
                let Some(chunk) = state.points[point].queue.pop_front() else {
                    return;
                };
                if chunk.is_stale() {
                    debug!(point, kind = ?chunk.kind(), "discarding stale chunk");
                    continue;
                }
                match state.take_slot(point, chunk.kind()) {
                    Some(listener) => {
                        let seq = state.next_seq;
                        state.next_seq += 1;
                        state.points[point].current = Some(InFlight {
                            chunk: chunk.clone(),
                            seq,
                        });
                        state.points[point].delivering = true;
                        Step::Deliver {
                            chunk,
                            seq,
                            listener,
                        }
                    }
                    None => Step::Forward(chunk),
                }
            };
            match step {
                Step::Deliver {
                    chunk,
                    seq,
                    listener,
                } => {
                    let continuation = {
                        let core = Arc::clone(self);
                        Continuation::new(move |replacement| core.complete(point, seq, replacement))
                    };
                    {
                        let mut listener = lock(&listener);
                        (&mut *listener)(chunk, continuation);
                    }
                    lock(&self.state).points[point].delivering = false;
                }
                Step::Forward(chunk) => {
                    let target = lock(&self.state).route(point, chunk);
                    if let Some(target) = target {
                        self.dispatch(target);
                    }
                }
            }
        }
    }

    /// Complete the message `seq` suspended at `point`, forwarding it
    /// onward. A stale `seq` means the message was already completed or
    /// discarded; that call is a no-op.
    fn complete(self: &Arc<Self>, point: usize, seq: u64, replacement: Option<Bytes>) {
        let target = {
            let mut state = lock(&self.state);
            let matches = state.points[point]
                .current
                .as_ref()
                .map(|c| c.seq == seq)
                .unwrap_or(false);
            if !matches {
                trace!(point, seq, "stale continuation ignored");
                return;
            }
            let mut in_flight = match state.points[point].current.take() {
                Some(in_flight) => in_flight,
                None => return,
            };
            if let Some(data) = replacement {
                in_flight.chunk.set_data(data);
            }
            state.route(point, in_flight.chunk)
        };
        if let Some(target) = target {
            self.dispatch(target);
        }
        self.dispatch(point);
    }
}

impl PipeState {
    fn register(&mut self, point: usize, selector: Selector, listener: Listener, once: bool) {
        let slot = Slot {
            listener: Arc::new(Mutex::new(listener)),
            once,
        };
        if self.points[point].handlers.insert(selector, slot).is_some() {
            trace!(point, ?selector, "replaced existing listener");
        }
    }

    /// Enqueue a chunk at the neighbor of `from` in the chunk's
    /// direction, returning the neighbor's index; chunks falling off
    /// either end of the pipe are dropped.
    fn route(&mut self, from: usize, chunk: Chunk) -> Option<usize> {
        let target = match chunk.direction() {
            Direction::Request => {
                if from + 1 < self.points.len() {
                    Some(from + 1)
                } else {
                    None
                }
            }
            Direction::Response => from.checked_sub(1),
        };
        match target {
            Some(target) => self.points[target].queue.push_back(chunk),
            None => drop_at_edge(chunk),
        }
        target
    }

    /// Resolve the listener for a chunk kind: the exact-kind listener
    /// wins, then the wildcard. One-shot listeners are unregistered on
    /// the way out.
    fn take_slot(&mut self, point: usize, kind: ChunkKind) -> Option<Arc<Mutex<Listener>>> {
        let handlers = &mut self.points[point].handlers;
        let selector = if handlers.contains_key(&Selector::Kind(kind)) {
            Selector::Kind(kind)
        } else if handlers.contains_key(&Selector::Any) {
            Selector::Any
        } else {
            return None;
        };
        let once = handlers.get(&selector).map(|slot| slot.once).unwrap_or(false);
        if once {
            handlers.remove(&selector).map(|slot| slot.listener)
        } else {
            handlers.get(&selector).map(|slot| Arc::clone(&slot.listener))
        }
    }
}

fn drop_at_edge(chunk: Chunk) {
    if chunk.kind() == ChunkKind::Failure {
        warn!("terminal error left the pipe unconsumed");
    } else {
        trace!(kind = ?chunk.kind(), "chunk dropped at pipe edge");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
