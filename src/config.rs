//! Pool configuration structures.

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration of a single pool.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of open resources, both idle and borrowed.
    ///
    /// Zero means no limit. Default is zero.
    #[serde(default, alias = "max_open")]
    pub max_active: usize,
    /// Maximum number of idle resources kept in the pool.
    ///
    /// Resources returned in excess of this number are closed. Default is 2.
    #[serde(default = "PoolConfig::default_max_idle")]
    pub max_idle: usize,
    /// Close resources which stayed idle for longer than this.
    ///
    /// Checked when acquiring resources. Default is no timeout.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "humantime_serde"
    )]
    pub idle_timeout: Option<Duration>,
    /// Close resources which were created longer than this ago, instead of reusing them.
    ///
    /// Default is unlimited lifetime.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "max_conn_lifetime",
        with = "humantime_serde"
    )]
    pub max_lifetime: Option<Duration>,
    /// Wait for a resource to be returned when [`PoolConfig::max_active`] is reached.
    ///
    /// If disabled, acquisition fails instantly. Default is `false`.
    #[serde(default)]
    pub wait: bool,
    /// Maximum time to wait for a free slot, if waiting is enabled.
    ///
    /// Default is to wait indefinitely.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "humantime_serde"
    )]
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 0,
            max_idle: Self::default_max_idle(),
            idle_timeout: None,
            max_lifetime: None,
            wait: false,
            acquire_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Default value for [`Self::max_idle`].
    #[must_use]
    #[inline]
    fn default_max_idle() -> usize {
        2
    }

    /// Set maximum number of open resources.
    #[must_use]
    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    /// Set maximum number of idle resources.
    #[must_use]
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Set idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set maximum lifetime of a resource.
    #[must_use]
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Enable or disable waiting for a free slot.
    #[must_use]
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// Set default timeout for waiting on a free slot.
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Effective idle timeout, with zero meaning no timeout.
    pub(crate) fn effective_idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout.filter(|t| !t.is_zero())
    }

    /// Effective resource lifetime, with zero meaning unlimited.
    pub(crate) fn effective_max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime.filter(|t| !t.is_zero())
    }

    /// Whether borrowing goes through the admission gate.
    pub(crate) fn is_gated(&self) -> bool {
        self.wait && self.max_active > 0
    }
}

/// Configuration of multiple named pools.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct PoolsConfig {
    /// Pool configurations, keyed by pool name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pools: BTreeMap<String, PoolConfig>,
}

impl PoolsConfig {
    /// Create builder for pool configuration.
    pub fn builder() -> PoolsConfigBuilder {
        PoolsConfigBuilder::new()
    }

    /// Get configuration for a named pool.
    ///
    /// Falls back to defaults if the pool was not configured.
    #[must_use]
    pub fn get(&self, name: &str) -> PoolConfig {
        self.pools.get(name).cloned().unwrap_or_default()
    }
}

/// Pool configuration loading error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Configuration builder error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

/// Builder for pool configuration.
#[must_use]
pub struct PoolsConfigBuilder {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl PoolsConfigBuilder {
    /// Alternative method to construct a pool configuration builder.
    pub fn new() -> Self {
        Self {
            builder: config::Config::builder(),
        }
    }

    /// Try to build configuration object from preconfigured sources.
    ///
    /// This method will do all the I/O necessary to load the configuration.
    ///
    /// See [`config::builder::ConfigBuilder::build`].
    ///
    /// # Errors
    ///
    /// Returns `Err` if some configuration loading was unsuccessful.
    pub fn build(self) -> Result<PoolsConfig, ConfigError> {
        self.builder.build()?.try_deserialize().map_err(Into::into)
    }

    /// Add a custom object implementing [`Source`] trait as a source of pool configuration.
    ///
    /// [`Source`]: config::Source
    pub fn with_source<T>(mut self, source: T) -> Self
    where
        T: config::Source + Send + Sync + 'static,
    {
        self.builder = self.builder.add_source(source);
        self
    }

    /// Add file as a source of pool configuration.
    pub fn with_file(self, name: impl AsRef<str>) -> Self {
        self.with_source(config::File::with_name(name.as_ref()))
    }

    /// Add environment variables as a source of pool configuration.
    ///
    /// Nested keys are separated with `_`, prefix is separated with `__`, so that
    /// `APP__POOLS_PG_MAX_ACTIVE` maps to `pools.pg.max_active`. Pool names and keys which
    /// contain underscores can not be set this way.
    pub fn with_env(self, prefix: impl AsRef<str>) -> Self {
        self.with_source(
            config::Environment::with_prefix(prefix.as_ref())
                .separator("_")
                .prefix_separator("__")
                .try_parsing(true),
        )
    }
}

impl Default for PoolsConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use config::{File, FileFormat};
    use serde_json::{from_str, json, to_value};

    use super::*;

    /// Deserialize - all defaults.
    #[test]
    fn pool_config_de_default() {
        let deserialized: PoolConfig = from_str("{}").unwrap();
        assert_eq!(deserialized, PoolConfig::default());
        assert_eq!(deserialized.max_idle, 2);
        assert!(!deserialized.is_gated());
    }

    /// Deserialize - human-readable durations.
    #[test]
    fn pool_config_de_durations() {
        let serialized = r#"{
            "max_active": 10,
            "max_idle": 1,
            "idle_timeout": "5m",
            "max_conn_lifetime": "1h 30m",
            "wait": true,
            "acquire_timeout": "250ms"
        }"#;
        let deserialized: PoolConfig = from_str(serialized).unwrap();
        assert_eq!(
            deserialized,
            PoolConfig::default()
                .with_max_active(10)
                .with_max_idle(1)
                .with_idle_timeout(Duration::from_secs(300))
                .with_max_lifetime(Duration::from_secs(5400))
                .with_wait(true)
                .with_acquire_timeout(Duration::from_millis(250))
        );
        assert!(deserialized.is_gated());
    }

    /// Serialize - unset durations are skipped.
    #[test]
    fn pool_config_ser() {
        let config = PoolConfig::default()
            .with_max_active(4)
            .with_idle_timeout(Duration::from_secs(90));
        assert_eq!(
            to_value(&config).unwrap(),
            json!({
                "max_active": 4,
                "max_idle": 2,
                "idle_timeout": "1m 30s",
                "wait": false
            })
        );
    }

    #[test]
    fn zero_durations_disable_limits() {
        let config = PoolConfig::default()
            .with_idle_timeout(Duration::ZERO)
            .with_max_lifetime(Duration::ZERO);
        assert_eq!(config.effective_idle_timeout(), None);
        assert_eq!(config.effective_max_lifetime(), None);
        let config = config.with_idle_timeout(Duration::from_secs(1));
        assert_eq!(config.effective_idle_timeout(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn waiting_without_limit_is_not_gated() {
        let config = PoolConfig::default().with_wait(true);
        assert!(!config.is_gated());
    }

    #[test]
    fn load_named_pools_from_yaml() {
        let yaml = r#"
pools:
  postgres:
    max_active: 10
    max_idle: 1
    wait: true
  redis:
    max_idle: 4
    idle_timeout: 30s
"#;
        let config = PoolsConfig::builder()
            .with_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap();
        assert_eq!(config.pools.len(), 2);
        let postgres = config.get("postgres");
        assert_eq!(postgres.max_active, 10);
        assert_eq!(postgres.max_idle, 1);
        assert!(postgres.wait);
        let redis = config.get("redis");
        assert_eq!(redis.max_idle, 4);
        assert_eq!(redis.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.get("missing"), PoolConfig::default());
    }

    #[test]
    fn invalid_duration_is_reported() {
        let yaml = "pools:\n  broken:\n    idle_timeout: soon\n";
        let err = PoolsConfig::builder()
            .with_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Config(_)));
    }
}
