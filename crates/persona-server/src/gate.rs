//! Exclusive access to the shared generation engine.
//!
//! The engine lives behind a `tokio::sync::Mutex`, whose waiters are served
//! in FIFO order. A [`Ticket`] wraps the owned guard: holding one is the only
//! way to reach the engine, and dropping it is the only way to release it.
//! Dropping a pending [`EngineGate::acquire`] future leaves the queue without
//! ever being granted.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use persona_engine::GenerationEngine;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type SharedEngine = Arc<Mutex<Box<dyn GenerationEngine>>>;

#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicU64,
    released: AtomicU64,
    waiting: AtomicUsize,
    holder: StdMutex<Option<Uuid>>,
}

impl Counters {
    fn set_holder(&self, session: Option<Uuid>) {
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }
}

/// Snapshot of gate activity, reported by `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub acquired: u64,
    pub released: u64,
    pub waiting: usize,
    pub holder: Option<Uuid>,
}

#[derive(Clone)]
pub struct EngineGate {
    engine: SharedEngine,
    counters: Arc<Counters>,
}

impl EngineGate {
    pub fn new(engine: Box<dyn GenerationEngine>) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Wait for exclusive access. No timeout; callers race it against their
    /// own cancellation.
    pub async fn acquire(&self, session: Uuid) -> Ticket {
        let waiting = WaitingGuard::enter(&self.counters);
        tracing::debug!(%session, waiting = waiting.position, "waiting for engine");
        let guard = Arc::clone(&self.engine).lock_owned().await;
        drop(waiting);
        Ticket::grant(guard, Arc::clone(&self.counters), session)
    }

    /// Take the engine only if nobody holds it.
    pub fn try_acquire(&self, session: Uuid) -> Option<Ticket> {
        let guard = Arc::clone(&self.engine).try_lock_owned().ok()?;
        Some(Ticket::grant(guard, Arc::clone(&self.counters), session))
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            acquired: self.counters.acquired.load(Ordering::SeqCst),
            released: self.counters.released.load(Ordering::SeqCst),
            waiting: self.counters.waiting.load(Ordering::SeqCst),
            holder: *self
                .counters
                .holder
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

struct WaitingGuard {
    counters: Arc<Counters>,
    position: usize,
}

impl WaitingGuard {
    fn enter(counters: &Arc<Counters>) -> Self {
        let position = counters.waiting.fetch_add(1, Ordering::SeqCst) + 1;
        Self {
            counters: Arc::clone(counters),
            position,
        }
    }
}

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.counters.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Proof of exclusive engine access for one session.
pub struct Ticket {
    session: Uuid,
    counters: Arc<Counters>,
    guard: OwnedMutexGuard<Box<dyn GenerationEngine>>,
}

impl Ticket {
    fn grant(
        guard: OwnedMutexGuard<Box<dyn GenerationEngine>>,
        counters: Arc<Counters>,
        session: Uuid,
    ) -> Self {
        counters.acquired.fetch_add(1, Ordering::SeqCst);
        counters.set_holder(Some(session));
        tracing::debug!(%session, "engine acquired");
        Self {
            session,
            counters,
            guard,
        }
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn engine(&mut self) -> &mut dyn GenerationEngine {
        &mut **self.guard
    }
}

impl Drop for Ticket {
    // Counters are updated before the guard field drops and unlocks.
    fn drop(&mut self) {
        self.counters.set_holder(None);
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(session = %self.session, "engine released");
    }
}
