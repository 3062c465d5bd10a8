//! Asynchronous pools.

mod pool;

use std::future::Future;

pub use crate::{error::Error, r#async::pool::Pool, resource::Resource, shared::PoolStats};

/// Factory of new pool resources.
///
/// Implemented for any closure returning a future which resolves to a [`Result`] with a
/// resource.
#[async_trait::async_trait]
pub trait Dial: Send + Sync + 'static {
    /// Resource type created by this dialer.
    type Resource: Resource;
    /// Error type returned by this dialer.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create new resource.
    ///
    /// Called without holding any pool locks. The returned future may be dropped before
    /// completion if the borrower gives up.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the resource could not be created. The error is passed to the caller
    /// of [`Pool::get`] unchanged.
    async fn dial(&self) -> Result<Self::Resource, Self::Error>;
}

#[async_trait::async_trait]
impl<F, Fut, R, E> Dial for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Resource,
    E: std::error::Error + Send + Sync + 'static,
{
    type Resource = R;
    type Error = E;

    async fn dial(&self) -> Result<Self::Resource, Self::Error> {
        self().await
    }
}
