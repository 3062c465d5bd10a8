use std::{
    borrow::Cow,
    fmt,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use tracing::{debug_span, Instrument};

use crate::{
    config::PoolConfig,
    error::{Error, Rejected},
    gate::SemaphoreGate,
    r#async::Dial,
    resource::{Entry, Pooled, Reclaim},
    shared::{Checkout, PoolStats, Shared},
};

/// How long a caller is ready to wait for admission.
#[derive(Clone, Copy, Debug)]
enum Admission {
    /// Wait until a slot is free.
    Wait,
    /// Wait until a slot is free, for at most this long.
    WaitFor(Duration),
    /// Fail instead of waiting.
    Try,
}

/// Asynchronous resource pool.
///
/// Cloning the pool is cheap, and all clones share the same resources. The pool is closed
/// when the last clone is dropped.
///
/// Borrowing is cancel safe: dropping a pending [`Pool::get`] future releases everything it
/// has reserved so far.
pub struct Pool<D: Dial> {
    /// Pool state.
    shared: Arc<Shared<D::Resource, SemaphoreGate>>,
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
    /// If [`PoolConfig::wait`] is enabled and the pool is at capacity, waits until a resource
    /// is returned, or until [`PoolConfig::acquire_timeout`] passes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if the pool is at capacity and waiting is disabled,
    /// [`Error::Closed`] if the pool was closed, [`Error::AcquireTimeout`] if waiting timed
    /// out, or [`Error::Dial`] if a new resource could not be created.
    pub async fn get(&self) -> Result<Pooled<D::Resource>, Error<D::Error>> {
        let admission = match self.shared.config().acquire_timeout {
            Some(timeout) => Admission::WaitFor(timeout),
            None => Admission::Wait,
        };
        self.acquire(admission).await
    }

    /// Borrow a resource from the pool, waiting at most `timeout` for a free slot.
    ///
    /// The timeout does not apply to dialing new resources.
    ///
    /// # Errors
    ///
    /// Same as [`Pool::get`].
    pub async fn get_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Pooled<D::Resource>, Error<D::Error>> {
        self.acquire(Admission::WaitFor(timeout)).await
    }

    /// Borrow a resource from the pool without waiting for a free slot.
    ///
    /// A new resource may still be dialed if no idle ones are available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WouldBlock`] if waiting would be required, otherwise same as
    /// [`Pool::get`].
    pub async fn try_get(&self) -> Result<Pooled<D::Resource>, Error<D::Error>> {
        self.acquire(Admission::Try).await
    }

    async fn acquire(&self, admission: Admission) -> Result<Pooled<D::Resource>, Error<D::Error>> {
        let started = Instant::now();
        let span = debug_span!("pool_acquire", name = self.shared.id());
        let entry = self.admit(admission).instrument(span).await?;
        self.shared.metrics().record_wait(started);
        self.shared.update_metrics();
        let pool = Arc::downgrade(&self.shared) as Weak<dyn Reclaim<D::Resource>>;
        Ok(Pooled::new(pool, entry))
    }

    /// Pass the admission gate, then take an idle resource or dial a new one.
    async fn admit(&self, admission: Admission) -> Result<Entry<D::Resource>, Error<D::Error>> {
        if self.shared.config().is_gated() {
            let gate = self.shared.gate();
            let admitted = match admission {
                Admission::Wait => gate.acquire().await,
                Admission::WaitFor(timeout) => gate.acquire_timeout(timeout).await,
                Admission::Try => gate.try_acquire(),
            };
            if let Err(rejected) = admitted {
                if rejected == Rejected::TimedOut {
                    self.shared.metrics().record_timeout();
                }
                return Err(rejected.into());
            }
        }
        match self.shared.checkout()? {
            Checkout::Idle(entry) => Ok(entry),
            Checkout::Dial(reservation) => {
                let dial_started = Instant::now();
                let resource = self.dialer.dial().await.map_err(Error::Dial)?;
                self.shared.metrics().record_create(dial_started);
                Ok(reservation.complete(resource))
            }
        }
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

#[cfg(test)]
mod tests {
    use std::io;

    use tokio::{sync::Barrier, task::JoinSet, time::sleep};

    use super::*;
    use crate::testing::{Probe, Tracker};

    fn pool_with(
        tracker: &Arc<Tracker>,
        config: PoolConfig,
    ) -> Pool<impl Dial<Resource = Probe, Error = io::Error>> {
        let tracker = tracker.clone();
        Pool::new("async-test", config, move || {
            let tracker = tracker.clone();
            async move { tracker.dial() }
        })
    }

    #[tokio::test]
    async fn single_slot_fail_fast() {
        let tracker = Tracker::new();
        let pool = pool_with(&tracker, PoolConfig::default().with_max_active(1));
        let a = pool.get().await.unwrap();
        assert!(matches!(pool.get().await, Err(Error::PoolExhausted)));
        a.release();
        let b = pool.get().await.unwrap();
        assert_eq!(b.id, 1);
    }

    #[tokio::test]
    async fn reuse_and_evict_excess_idle() {
        let tracker = Tracker::new();
        let pool = pool_with(
            &tracker,
            PoolConfig::default().with_max_active(2).with_max_idle(1),
        );
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        a.release();
        let c = pool.get().await.unwrap();
        assert_eq!(c.id, 1);
        b.release();
        c.release();
        let stats = pool.stats();
        assert_eq!((stats.idle, stats.active), (1, 1));
        assert_eq!(tracker.closed(), vec![2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_fail_fast_never_exceeds_limit() {
        const LIMIT: usize = 3;
        const CALLERS: usize = 10;
        let tracker = Tracker::new();
        let pool = pool_with(&tracker, PoolConfig::default().with_max_active(LIMIT));
        let attempted = Arc::new(Barrier::new(CALLERS));
        let mut tasks = JoinSet::new();
        for _ in 0..CALLERS {
            let pool = pool.clone();
            let attempted = attempted.clone();
            tasks.spawn(async move {
                let res = pool.get().await;
                attempted.wait().await;
                res.map(drop).map_err(|e| matches!(e, Error::PoolExhausted))
            });
        }
        let results = tasks.join_all().await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), LIMIT);
        assert!(results.iter().all(|r| matches!(r, Ok(()) | Err(true))));
        assert_eq!(tracker.dialed(), LIMIT);
    }

    #[tokio::test]
    async fn waiting_borrower_is_unblocked_by_release() {
        let tracker = Tracker::new();
        let pool = pool_with(
            &tracker,
            PoolConfig::default().with_max_active(2).with_wait(true),
        );
        let a = pool.get().await.unwrap();
        let _b = pool.get().await.unwrap();
        let waiter = tokio::spawn({
            let pool = pool.clone();
            async move { pool.get().await.map(|r| r.id) }
        });
        sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());
        a.release();
        assert_eq!(waiter.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn timeouts_and_non_waiting_borrow() {
        let tracker = Tracker::new();
        let pool = pool_with(
            &tracker,
            PoolConfig::default()
                .with_max_active(1)
                .with_wait(true)
                .with_acquire_timeout(Duration::from_millis(20)),
        );
        let a = pool.get().await.unwrap();
        assert!(matches!(pool.get().await, Err(Error::AcquireTimeout)));
        assert!(matches!(
            pool.get_timeout(Duration::from_millis(10)).await,
            Err(Error::AcquireTimeout)
        ));
        assert!(matches!(pool.try_get().await, Err(Error::WouldBlock)));
        drop(a);
        assert!(pool.try_get().await.is_ok());
    }

    #[tokio::test]
    async fn cancelled_borrow_releases_reservation() {
        let tracker = Tracker::new();
        let slow = tracker.clone();
        let pool = Pool::new(
            "slow",
            PoolConfig::default().with_max_active(1).with_wait(true),
            move || {
                let tracker = slow.clone();
                async move {
                    sleep(Duration::from_secs(60)).await;
                    tracker.dial()
                }
            },
        );
        let pending = tokio::time::timeout(Duration::from_millis(20), pool.get()).await;
        assert!(pending.is_err());
        assert_eq!(pool.stats().active, 0);
        // Token went back to the gate as well.
        assert_eq!(pool.shared.gate().try_acquire(), Ok(()));
        assert_eq!(tracker.dialed(), 0);
    }

    #[tokio::test]
    async fn close_fails_waiting_borrowers() {
        let tracker = Tracker::new();
        let pool = pool_with(
            &tracker,
            PoolConfig::default().with_max_active(1).with_wait(true),
        );
        let a = pool.get().await.unwrap();
        let waiter = tokio::spawn({
            let pool = pool.clone();
            async move { pool.get().await.map(drop) }
        });
        sleep(Duration::from_millis(20)).await;
        pool.close();
        assert!(matches!(waiter.await.unwrap(), Err(Error::Closed)));
        a.release();
        assert_eq!(tracker.closed(), vec![1]);
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn close_closes_idle_once() {
        let tracker = Tracker::new();
        let pool = pool_with(&tracker, PoolConfig::default().with_max_idle(4));
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        a.release();
        b.release();
        pool.close();
        pool.close();
        let mut closed = tracker.closed();
        closed.sort_unstable();
        assert_eq!(closed, vec![1, 2]);
        assert!(matches!(pool.get().await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn stale_resources_are_pruned() {
        let tracker = Tracker::new();
        let pool = pool_with(
            &tracker,
            PoolConfig::default().with_idle_timeout(Duration::from_millis(30)),
        );
        pool.get().await.unwrap().release();
        sleep(Duration::from_millis(50)).await;
        let a = pool.get().await.unwrap();
        assert_eq!(a.id, 2);
        assert_eq!(tracker.closed(), vec![1]);
    }

    #[tokio::test]
    async fn unbounded_waiting_pool() {
        let tracker = Tracker::new();
        let pool = pool_with(
            &tracker,
            PoolConfig::default()
                .with_max_active(usize::MAX)
                .with_wait(true),
        );
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        drop(a);
        drop(b);
        assert_eq!(pool.stats().idle, 2);
    }

    #[tokio::test]
    async fn dial_failure_rolls_back() {
        let tracker = Tracker::new();
        let pool = pool_with(
            &tracker,
            PoolConfig::default().with_max_active(1).with_wait(true),
        );
        tracker.set_fail_dial(true);
        assert!(matches!(pool.get().await, Err(Error::Dial(_))));
        tracker.set_fail_dial(false);
        assert!(pool.try_get().await.is_ok());
        assert_eq!(pool.stats().active, 1);
    }
}
