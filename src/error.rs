//! Error types and error support code.

/// Error type returned by pool acquisition methods.
///
/// `E` is the error type of the dialer used to create new resources.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error<E> {
    /// Maximum number of active resources was reached, and the pool is configured not to wait.
    #[error("pool is exhausted")]
    PoolExhausted,
    /// Pool was closed.
    #[error("pool is closed")]
    Closed,
    /// Call would block the caller, and non-blocking operation was requested.
    #[error("acquisition from pool would block execution")]
    WouldBlock,
    /// Waiting for a free slot took longer than the specified timeout.
    #[error("resource acquisition timeout")]
    AcquireTimeout,
    /// Dialer failed to create a new resource.
    #[error("unable to dial new resource: {0}")]
    Dial(#[source] E),
}

impl<E> Error<E> {
    /// Returns `true` if this error was caused by the dialer, rather than by pool state.
    #[must_use]
    pub fn is_dial(&self) -> bool {
        matches!(self, Self::Dial(_))
    }
}

/// Reasons for the pool to refuse a borrow, independent of the dialer error type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Rejected {
    Exhausted,
    Closed,
    WouldBlock,
    TimedOut,
}

impl<E> From<Rejected> for Error<E> {
    fn from(value: Rejected) -> Self {
        match value {
            Rejected::Exhausted => Self::PoolExhausted,
            Rejected::Closed => Self::Closed,
            Rejected::WouldBlock => Self::WouldBlock,
            Rejected::TimedOut => Self::AcquireTimeout,
        }
    }
}
