use std::{
    borrow::Cow,
    fmt,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use tracing::debug_span;

use crate::{
    config::PoolConfig,
    error::{Error, Rejected},
    gate::BlockingGate,
    resource::{Pooled, Reclaim},
    shared::{Checkout, PoolStats, Shared},
    sync::Dial,
};

/// How long a caller is ready to wait for admission.
#[derive(Clone, Copy, Debug)]
enum Admission {
    /// Wait until a slot is free, or until the deadline passes.
    Wait(Option<Instant>),
    /// Fail instead of waiting.
    Try,
}

/// Blocking resource pool.
///
/// Cloning the pool is cheap, and all clones share the same resources. The pool is closed
/// when the last clone is dropped.
pub struct Pool<D: Dial> {
    /// Pool state.
    shared: Arc<Shared<D::Resource, BlockingGate>>,
    /// Factory of new resources.
    dialer: Arc<D>,
}

impl<D: Dial> Pool<D> {
    /// Create new pool.
    ///
    /// No resources are created until first requested.
    pub fn new(id: impl Into<Cow<'static, str>>, config: PoolConfig, dialer: D) -> Self {
        Self {
            shared: Arc::new(Shared::new(id.into(), config)),
            dialer: Arc::new(dialer),
        }
    }

    /// Borrow a resource from the pool.
    ///
    /// If [`PoolConfig::wait`] is enabled and the pool is at capacity, blocks the current
    /// thread until a resource is returned, or until [`PoolConfig::acquire_timeout`] passes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if the pool is at capacity and waiting is disabled,
    /// [`Error::Closed`] if the pool was closed, [`Error::AcquireTimeout`] if waiting timed
    /// out, or [`Error::Dial`] if a new resource could not be created.
    pub fn get(&self) -> Result<Pooled<D::Resource>, Error<D::Error>> {
        let deadline = self
            .shared
            .config()
            .acquire_timeout
            .map(|timeout| Instant::now() + timeout);
        self.acquire(Admission::Wait(deadline))
    }

    /// Borrow a resource from the pool, waiting at most `timeout` for a free slot.
    ///
    /// The timeout does not apply to dialing new resources.
    ///
    /// # Errors
    ///
    /// Same as [`Pool::get`].
    pub fn get_timeout(&self, timeout: Duration) -> Result<Pooled<D::Resource>, Error<D::Error>> {
        self.acquire(Admission::Wait(Some(Instant::now() + timeout)))
    }

    /// Borrow a resource from the pool without waiting for a free slot.
    ///
    /// A new resource may still be dialed if no idle ones are available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WouldBlock`] if waiting would be required, otherwise same as
    /// [`Pool::get`].
    pub fn try_get(&self) -> Result<Pooled<D::Resource>, Error<D::Error>> {
        self.acquire(Admission::Try)
    }

    fn acquire(&self, admission: Admission) -> Result<Pooled<D::Resource>, Error<D::Error>> {
        let started = Instant::now();
        let span = debug_span!("pool_acquire", name = self.shared.id()).entered();
        if self.shared.config().is_gated() {
            let gate = self.shared.gate();
            let admitted = match admission {
                Admission::Wait(deadline) => gate.acquire(deadline),
                Admission::Try => gate.try_acquire(),
            };
            if let Err(rejected) = admitted {
                if rejected == Rejected::TimedOut {
                    self.shared.metrics().record_timeout();
                }
                return Err(rejected.into());
            }
        }
        let entry = match self.shared.checkout()? {
            Checkout::Idle(entry) => entry,
            Checkout::Dial(reservation) => {
                let dial_started = Instant::now();
                let resource = self.dialer.dial().map_err(Error::Dial)?;
                self.shared.metrics().record_create(dial_started);
                reservation.complete(resource)
            }
        };
        drop(span);
        self.shared.metrics().record_wait(started);
        self.shared.update_metrics();
        let pool = Arc::downgrade(&self.shared) as Weak<dyn Reclaim<D::Resource>>;
        Ok(Pooled::new(pool, entry))
    }

    /// Close the pool.
    ///
    /// Idle resources are closed right away, borrowed ones are closed when returned. All
    /// waiting and future borrowers get [`Error::Closed`]. Closing a closed pool does nothing.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Check whether the pool was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Get snapshot of pool state.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// Pool identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.shared.id()
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        self.shared.config()
    }

    /// Manually update pool metrics.
    ///
    /// Normally you wouldn't need to call this directly, as metrics collection occurs
    /// automatically as you use the pool.
    pub fn update_metrics(&self) {
        self.shared.update_metrics();
    }
}

impl<D: Dial> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            dialer: self.dialer.clone(),
        }
    }
}

impl<D: Dial> fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", self.shared.config())
            .field("stats", &self.shared.stats())
            .finish_non_exhaustive()
    }
}
