//! One-shot cancellation of a streaming session.
//!
//! Each session gets a child of the server's shutdown token. The first trip
//! records why the session stopped; later trips are ignored.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The response body was dropped: the peer went away or a write failed.
    Disconnect,
    /// The encoder did not take an event within the stall timeout.
    Stall,
    /// The encoder side of the event channel is gone.
    ChannelClosed,
    /// The server is shutting down.
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancelReason::Disconnect => "disconnect",
            CancelReason::Stall => "stall",
            CancelReason::ChannelClosed => "channel_closed",
            CancelReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct Inner {
    session: Uuid,
    token: CancellationToken,
    reason: OnceLock<CancelReason>,
}

#[derive(Debug, Clone)]
pub struct CancelController {
    inner: Arc<Inner>,
}

impl CancelController {
    pub fn new(shutdown: &CancellationToken, session: Uuid) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                token: shutdown.child_token(),
                reason: OnceLock::new(),
            }),
        }
    }

    /// Token handed to the engine.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Stop the session. Returns `true` for the first trip only.
    ///
    /// Never blocks: the producer notices at its next fragment.
    pub fn trip(&self, reason: CancelReason) -> bool {
        // a cancelled token with no recorded reason came from the parent
        let reason = if self.inner.token.is_cancelled() {
            CancelReason::Shutdown
        } else {
            reason
        };
        if self.inner.reason.set(reason).is_err() {
            return false;
        }
        self.inner.token.cancel();
        tracing::info!(session = %self.inner.session, %reason, "session cancelled");
        true
    }

    pub fn reason(&self) -> Option<CancelReason> {
        match self.inner.reason.get() {
            Some(reason) => Some(*reason),
            None if self.inner.token.is_cancelled() => Some(CancelReason::Shutdown),
            None => None,
        }
    }

    /// Guard that trips [`CancelReason::Disconnect`] when dropped armed.
    pub fn guard(&self) -> CancelGuard {
        CancelGuard {
            controller: self.clone(),
            armed: true,
        }
    }
}

/// Lives inside the response stream, so it drops with the body.
#[derive(Debug)]
pub struct CancelGuard {
    controller: CancelController,
    armed: bool,
}

impl CancelGuard {
    /// Call once the terminal event is on its way; a normal end of stream is
    /// not a disconnect.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.controller.trip(CancelReason::Disconnect);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_trip_wins() {
        let shutdown = CancellationToken::new();
        let cancel = CancelController::new(&shutdown, Uuid::new_v4());
        assert_eq!(cancel.reason(), None);

        assert!(cancel.trip(CancelReason::Stall));
        assert!(!cancel.trip(CancelReason::Disconnect));
        assert!(cancel.token().is_cancelled());
        assert_eq!(cancel.reason(), Some(CancelReason::Stall));
        assert!(!shutdown.is_cancelled());
    }

    #[test]
    fn shutdown_propagates_to_sessions() {
        let shutdown = CancellationToken::new();
        let cancel = CancelController::new(&shutdown, Uuid::new_v4());
        shutdown.cancel();
        assert!(cancel.is_cancelled());
        assert_eq!(cancel.reason(), Some(CancelReason::Shutdown));
        assert!(cancel.trip(CancelReason::Disconnect));
        assert_eq!(cancel.reason(), Some(CancelReason::Shutdown));
    }

    #[test]
    fn guard_trips_unless_disarmed() {
        let shutdown = CancellationToken::new();
        let cancel = CancelController::new(&shutdown, Uuid::new_v4());
        drop(cancel.guard());
        assert_eq!(cancel.reason(), Some(CancelReason::Disconnect));

        let other = CancelController::new(&shutdown, Uuid::new_v4());
        let mut guard = other.guard();
        guard.disarm();
        drop(guard);
        assert!(!other.is_cancelled());
    }
}
