//! Pooled resources and handles to borrowed resources.

use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::Weak,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

/// Objects which can be kept in a pool.
///
/// The only capability a pool requires from its resources is the ability to be closed.
pub trait Resource: Send + 'static {
    /// Error returned when closing the resource fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Close the resource, releasing everything it holds.
    ///
    /// Pools call this exactly once per resource, and never while the resource is borrowed.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the resource was not closed cleanly. Pools only log such errors.
    fn close(self) -> Result<(), Self::Error>;
}

/// Resource stored in a pool, along with its bookkeeping timestamps.
pub(crate) struct Entry<R> {
    pub(crate) resource: R,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
}

impl<R: Resource> Entry<R> {
    /// Wrap freshly dialed resource.
    pub(crate) fn new(resource: R) -> Self {
        let now = Instant::now();
        Self {
            resource,
            created_at: now,
            last_used_at: now,
        }
    }

    /// Check whether the resource was idle for longer than `timeout`.
    pub(crate) fn is_stale(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_used_at) > timeout
    }

    /// Check whether the resource was created more than `lifetime` ago.
    pub(crate) fn is_expired(&self, lifetime: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > lifetime
    }

    /// Close the underlying resource, logging the outcome.
    pub(crate) fn close(self, pool: &str, reason: &'static str) {
        match self.resource.close() {
            Ok(()) => debug!(pool, reason, "closed pooled resource"),
            Err(err) => warn!(pool, reason, error = %err, "failed to close pooled resource"),
        }
    }
}

/// Receiving side of a borrowed resource.
///
/// Implemented by pool internals, so that handles do not depend on the flavour of the pool.
pub(crate) trait Reclaim<R>: Send + Sync {
    /// Return a borrowed resource to the pool.
    fn put(&self, entry: Entry<R>, borrowed_for: Duration);
}

/// Borrowed resource.
///
/// Dereferences to the underlying resource. The resource is returned to the originating pool
/// when the handle is dropped or explicitly [released](Pooled::release). If the pool itself
/// no longer exists at that point, the resource is closed.
pub struct Pooled<R: Resource> {
    /// Originating pool.
    pool: Weak<dyn Reclaim<R>>,
    /// Retrieval time.
    borrowed_at: Instant,
    /// Pooled resource, present until returned.
    entry: Option<Entry<R>>,
}

impl<R: Resource> Pooled<R> {
    pub(crate) fn new(pool: Weak<dyn Reclaim<R>>, entry: Entry<R>) -> Self {
        Self {
            pool,
            borrowed_at: Instant::now(),
            entry: Some(entry),
        }
    }

    fn entry(&self) -> &Entry<R> {
        self.entry
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled resource used after release"))
    }

    fn entry_mut(&mut self) -> &mut Entry<R> {
        self.entry
            .as_mut()
            .unwrap_or_else(|| unreachable!("pooled resource used after release"))
    }

    /// Time when the underlying resource was created.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.entry().created_at
    }

    /// Time when the underlying resource was last returned to the pool.
    ///
    /// Equals [`Pooled::created_at`] for resources which were never returned before.
    #[must_use]
    pub fn last_used_at(&self) -> Instant {
        self.entry().last_used_at
    }

    /// Return the resource to the pool.
    ///
    /// Equivalent to dropping the handle.
    pub fn release(self) {
        drop(self);
    }
}

impl<R: Resource> Deref for Pooled<R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        &self.entry().resource
    }
}

impl<R: Resource> DerefMut for Pooled<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entry_mut().resource
    }
}

impl<R: Resource> AsRef<R> for Pooled<R> {
    fn as_ref(&self) -> &R {
        self
    }
}

impl<R: Resource> AsMut<R> for Pooled<R> {
    fn as_mut(&mut self) -> &mut R {
        self
    }
}

impl<R: Resource + fmt::Debug> fmt::Debug for Pooled<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("resource", &self.entry.as_ref().map(|e| &e.resource))
            .field("borrowed_for", &self.borrowed_at.elapsed())
            .finish_non_exhaustive()
    }
}

impl<R: Resource> Drop for Pooled<R> {
    fn drop(&mut self) {
        let Some(entry) = self.entry.take() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => pool.put(entry, self.borrowed_at.elapsed()),
            None => entry.close("<dropped>", "pool dropped"),
        }
    }
}
