//! Pool state and bookkeeping, common to blocking and asynchronous pools.

use std::{
    borrow::Cow,
    mem,
    sync::OnceLock,
    time::{Duration, Instant},
};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::{
    config::PoolConfig,
    error::Rejected,
    gate::Gate,
    idle::IdleList,
    metrics::PoolMetrics,
    resource::{Entry, Reclaim, Resource},
};

/// Snapshot of pool state, for diagnostic purposes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct PoolStats {
    /// Pool identifier.
    pub id: String,
    /// Current number of idle resources.
    pub idle: usize,
    /// Current number of open resources, both idle and borrowed.
    pub active: usize,
    /// Current number of borrowed resources.
    pub in_use: usize,
    /// Configured maximum number of open resources, zero if unbounded.
    pub max_active: usize,
    /// Configured maximum number of idle resources.
    pub max_idle: usize,
    /// Whether the pool was closed.
    pub closed: bool,
}

/// Mutable pool state.
struct State<R> {
    closed: bool,
    /// Number of open resources, both idle and borrowed.
    active: usize,
    idle: IdleList<Entry<R>>,
}

/// Outcome of a successful checkout.
pub(crate) enum Checkout<'a, R: Resource, G: Gate> {
    /// Idle resource ready for reuse.
    Idle(Entry<R>),
    /// Slot was reserved for a new resource, which the caller must dial.
    Dial(Reservation<'a, R, G>),
}

/// Pool core, shared by all clones of a pool and weakly referenced by borrowed resources.
pub(crate) struct Shared<R: Resource, G: Gate> {
    id: Cow<'static, str>,
    config: PoolConfig,
    state: Mutex<State<R>>,
    /// Admission gate, initialized on first use while holding the state lock.
    gate: OnceLock<G>,
    metrics: PoolMetrics,
}

impl<R: Resource, G: Gate> Shared<R, G> {
    pub(crate) fn new(id: Cow<'static, str>, config: PoolConfig) -> Self {
        Self {
            metrics: PoolMetrics::new(id.clone()),
            id,
            config,
            state: Mutex::new(State {
                closed: false,
                active: 0,
                idle: IdleList::default(),
            }),
            gate: OnceLock::new(),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub(crate) fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }

    /// Get admission gate, creating it if necessary.
    ///
    /// A gate created after the pool was closed is closed from the start.
    pub(crate) fn gate(&self) -> &G {
        if let Some(gate) = self.gate.get() {
            return gate;
        }
        let state = self.state.lock();
        let gate = self
            .gate
            .get_or_init(|| G::new(self.config.max_active, state.closed));
        drop(state);
        gate
    }

    /// Take an idle resource, or reserve a slot for a new one.
    ///
    /// Must be called after the caller has passed the admission gate, if one is in use.
    pub(crate) fn checkout(&self) -> Result<Checkout<'_, R, G>, Rejected> {
        let mut state = self.state.lock();
        if let Some(timeout) = self.config.effective_idle_timeout() {
            // Entries returned while the lock is released during closing are not rescanned.
            let scan = state.idle.len();
            for _ in 0..scan {
                let now = Instant::now();
                if !state.idle.back().is_some_and(|e| e.is_stale(timeout, now)) {
                    break;
                }
                let Some(stale) = state.idle.pop_back() else {
                    break;
                };
                MutexGuard::unlocked(&mut state, || stale.close(&self.id, "idle timeout"));
                state.active -= 1;
            }
        }
        while let Some(entry) = state.idle.pop_front() {
            if let Some(lifetime) = self.config.effective_max_lifetime() {
                if entry.is_expired(lifetime, Instant::now()) {
                    MutexGuard::unlocked(&mut state, || entry.close(&self.id, "max lifetime"));
                    state.active -= 1;
                    continue;
                }
            }
            drop(state);
            trace!(pool = %self.id, "reusing idle resource");
            return Ok(Checkout::Idle(entry));
        }
        if state.closed {
            return Err(Rejected::Closed);
        }
        if !self.config.wait
            && self.config.max_active > 0
            && state.active >= self.config.max_active
        {
            return Err(Rejected::Exhausted);
        }
        state.active += 1;
        Ok(Checkout::Dial(Reservation {
            shared: self,
            armed: true,
        }))
    }

    /// Roll back a slot reservation after a failed dial.
    fn cancel_reservation(&self) {
        let mut state = self.state.lock();
        state.active -= 1;
        if !state.closed {
            if let Some(gate) = self.gate.get() {
                gate.release();
            }
        }
    }

    /// Return a borrowed resource to the pool.
    fn put_entry(&self, mut entry: Entry<R>) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let discard = if state.closed {
            Some((entry, "pool closed"))
        } else if self
            .config
            .effective_max_lifetime()
            .is_some_and(|lifetime| entry.is_expired(lifetime, now))
        {
            Some((entry, "max lifetime"))
        } else {
            entry.last_used_at = now;
            state.idle.push_front(entry);
            if state.idle.len() > self.config.max_idle {
                state.idle.pop_back().map(|e| (e, "max idle"))
            } else {
                None
            }
        };
        if let Some((entry, reason)) = discard {
            MutexGuard::unlocked(&mut state, || entry.close(&self.id, reason));
            state.active -= 1;
        }
        // Gate tokens track borrows, not open resources.
        if !state.closed {
            if let Some(gate) = self.gate.get() {
                gate.release();
            }
        }
    }

    /// Close the pool.
    ///
    /// Idle resources are closed immediately, borrowed ones are closed when returned.
    /// Closing an already closed pool does nothing.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.active -= state.idle.len();
        let idle = mem::take(&mut state.idle);
        if let Some(gate) = self.gate.get() {
            gate.close();
        }
        drop(state);
        info!(pool = %self.id, "closing pool");
        if !idle.is_empty() {
            debug!(pool = %self.id, idle = idle.len(), "closing idle resources");
        }
        for entry in idle {
            entry.close(&self.id, "pool closed");
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Get snapshot of pool state.
    pub(crate) fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            id: self.id.to_string(),
            idle: state.idle.len(),
            active: state.active,
            in_use: state.active - state.idle.len(),
            max_active: self.config.max_active,
            max_idle: self.config.max_idle,
            closed: state.closed,
        }
    }

    /// Refresh pool state gauges, if they are due for an update.
    pub(crate) fn update_metrics(&self) {
        if self.metrics.state_due() {
            self.metrics.record_state(&self.stats());
        }
    }
}

impl<R: Resource, G: Gate> Reclaim<R> for Shared<R, G> {
    fn put(&self, entry: Entry<R>, borrowed_for: Duration) {
        self.metrics.record_use(borrowed_for);
        self.put_entry(entry);
    }
}

impl<R: Resource, G: Gate> Drop for Shared<R, G> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Slot reserved for a resource which is about to be dialed.
///
/// Dropping the reservation without [completing](Reservation::complete) it rolls back the
/// slot, which covers failed dials, panicking dialers and cancelled futures.
pub(crate) struct Reservation<'a, R: Resource, G: Gate> {
    shared: &'a Shared<R, G>,
    armed: bool,
}

impl<R: Resource, G: Gate> Reservation<'_, R, G> {
    /// Turn reserved slot into a pooled resource.
    pub(crate) fn complete(mut self, resource: R) -> Entry<R> {
        self.armed = false;
        debug!(pool = %self.shared.id, "dialed new resource");
        Entry::new(resource)
    }
}

impl<R: Resource, G: Gate> Drop for Reservation<'_, R, G> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.cancel_reservation();
        }
    }
}
