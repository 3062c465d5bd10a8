//! Blocking pools.

mod pool;

pub use crate::{error::Error, resource::Resource, shared::PoolStats, sync::pool::Pool};

/// Factory of new pool resources.
///
/// Implemented for any closure returning a [`Result`] with a resource.
pub trait Dial: Send + Sync + 'static {
    /// Resource type created by this dialer.
    type Resource: Resource;
    /// Error type returned by this dialer.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create new resource.
    ///
    /// Called without holding any pool locks.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the resource could not be created. The error is passed to the caller
    /// of [`Pool::get`] unchanged.
    fn dial(&self) -> Result<Self::Resource, Self::Error>;
}

impl<F, R, E> Dial for F
where
    F: Fn() -> Result<R, E> + Send + Sync + 'static,
    R: Resource,
    E: std::error::Error + Send + Sync + 'static,
{
    type Resource = R;
    type Error = E;

    fn dial(&self) -> Result<Self::Resource, Self::Error> {
        self()
    }
}
