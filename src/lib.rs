#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![deny(elided_lifetimes_in_paths, unreachable_pub)]
#![warn(
    missing_docs,
    clippy::doc_link_with_quotes,
    clippy::doc_markdown,
    clippy::missing_errors_doc
)]

#[cfg(feature = "async")]
pub mod r#async;
mod config;
pub mod error;
mod gate;
mod idle;
mod metrics;
mod resource;
mod shared;
pub mod sync;
#[cfg(test)]
mod testing;

pub use crate::{
    config::{ConfigError, PoolConfig, PoolsConfig, PoolsConfigBuilder},
    error::Error,
    resource::{Pooled, Resource},
    shared::PoolStats,
};
