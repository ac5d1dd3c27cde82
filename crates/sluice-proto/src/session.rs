//! Session tokens scoping chunks to one exchange attempt

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A generation marker for one attempt of an exchange.
///
/// Every chunk belonging to the attempt carries a clone of the token.
/// Clones share identity; closing any clone closes them all. The closed
/// transition is one-way: once a session is closed it never reopens, and
/// receivers discard any chunk scoped to a closed session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: Uuid,
    closed: AtomicBool,
}

impl Session {
    /// Create a fresh, open session token
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Get the session ID
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Check whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the session.
    ///
    /// Only the exchange controller that issued the token should call
    /// this; every other holder is a reader.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    /// Check whether two tokens refer to the same session
    pub fn same_as(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
