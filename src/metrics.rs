use std::{
    borrow::Cow,
    sync::{Arc, LazyLock},
    time::{Duration, Instant},
};

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram},
    Key, KeyValue, StringValue, Value,
};
use parking_lot::Mutex;

use crate::shared::PoolStats;

/// Central metrics singleton for pool metrics.
pub(crate) static POOL_METRICS: LazyLock<Arc<Metrics>> = LazyLock::new(|| Arc::new(Metrics::new()));

const KEY_POOL_NAME: Key = Key::from_static_str("db.client.connection.pool.name");
const KEY_STATE: Key = Key::from_static_str("db.client.connection.state");

/// Minimum interval between two consecutive recordings of pool state gauges.
const PROBE_INTERVAL: Duration = Duration::from_secs(15);

/// Storage for pool metrics.
pub(crate) struct Metrics {
    /// The number of connections that are currently in state described by the state attribute.
    pub(crate) conn_count: Gauge<u64>,
    /// The time it took to obtain an open connection from the pool.
    pub(crate) wait_time: Histogram<f64>,
    /// The time between borrowing a connection and returning it to the pool.
    pub(crate) use_time: Histogram<f64>,
    /// The time it took to create a new connection.
    pub(crate) create_time: Histogram<f64>,
    /// The number of connection timeouts that have occurred trying to obtain a connection from
    /// the pool.
    pub(crate) timeouts: Counter<u64>,
    /// The maximum number of idle open connections allowed.
    pub(crate) idle_max: Gauge<u64>,
    /// The maximum number of open connections allowed.
    pub(crate) conn_max: Gauge<u64>,
}

impl Metrics {
    /// Create new storage for pool metrics.
    ///
    /// You probably don't need this, as all pools use a central metrics singleton for storage.
    pub(crate) fn new() -> Self {
        let meter = global::meter("lendpool");
        // db.client.connection.pool.name (string)
        // db.client.connection.state (idle / used)
        let conn_count = meter
            .u64_gauge("db.client.connection.count")
            .with_description("The number of connections that are currently in state described by the state attribute.")
            .build();
        // db.client.connection.pool.name (string)
        let wait_time = meter
            .f64_histogram("db.client.connection.wait_time")
            .with_unit("s")
            .with_description("The time it took to obtain an open connection from the pool.")
            .build();
        // db.client.connection.pool.name (string)
        let use_time = meter
            .f64_histogram("db.client.connection.use_time")
            .with_unit("s")
            .with_description(
                "The time between borrowing a connection and returning it to the pool.",
            )
            .build();
        // db.client.connection.pool.name (string)
        let create_time = meter
            .f64_histogram("db.client.connection.create_time")
            .with_unit("s")
            .with_description("The time it took to create a new connection.")
            .build();
        // db.client.connection.pool.name (string)
        let timeouts = meter
            .u64_counter("db.client.connection.timeouts")
            .with_description("The number of connection timeouts that have occurred trying to obtain a connection from the pool.")
            .build();
        // db.client.connection.pool.name (string)
        let idle_max = meter
            .u64_gauge("db.client.connection.idle.max")
            .with_description("The maximum number of idle open connections allowed.")
            .build();
        // db.client.connection.pool.name (string)
        let conn_max = meter
            .u64_gauge("db.client.connection.max")
            .with_description("The maximum number of open connections allowed.")
            .build();
        Metrics {
            conn_count,
            wait_time,
            use_time,
            create_time,
            timeouts,
            idle_max,
            conn_max,
        }
    }

    pub(crate) fn record_state(&self, label: &[KeyValue], stats: &PoolStats) {
        // Unbounded pools report no maximum.
        if stats.max_active > 0 {
            self.conn_max.record(stats.max_active as u64, label);
        }
        self.idle_max.record(stats.max_idle as u64, label);
        let total_label = status_kv(label[0].clone(), "total");
        self.conn_count.record(stats.active as u64, &total_label);
        let idle_label = status_kv(label[0].clone(), "idle");
        self.conn_count.record(stats.idle as u64, &idle_label);
        let used_label = status_kv(label[0].clone(), "used");
        self.conn_count.record(stats.in_use as u64, &used_label);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

pub(crate) fn pool_kv(name: Cow<'static, str>) -> [KeyValue; 1] {
    if name.is_empty() {
        [KeyValue::new(KEY_POOL_NAME, "default")]
    } else {
        [KeyValue::new(KEY_POOL_NAME, name)]
    }
}

pub(crate) fn status_kv(name: KeyValue, status: &'static str) -> [KeyValue; 2] {
    [
        name,
        KeyValue::new(KEY_STATE, Value::String(StringValue::from(status))),
    ]
}

/// Per-pool view of the metrics singleton.
pub(crate) struct PoolMetrics {
    /// Pool label.
    label: [KeyValue; 1],
    /// Linked metrics storage.
    metrics: Arc<Metrics>,
    /// Time of last gathering of common pool metrics.
    last_gathered_at: Mutex<Option<Instant>>,
}

impl PoolMetrics {
    pub(crate) fn new(name: Cow<'static, str>) -> Self {
        Self {
            label: pool_kv(name),
            metrics: POOL_METRICS.clone(),
            last_gathered_at: Mutex::new(None),
        }
    }

    pub(crate) fn record_wait(&self, since: Instant) {
        self.metrics
            .wait_time
            .record(since.elapsed().as_secs_f64(), &self.label);
    }

    pub(crate) fn record_use(&self, borrowed_for: Duration) {
        self.metrics
            .use_time
            .record(borrowed_for.as_secs_f64(), &self.label);
    }

    pub(crate) fn record_create(&self, since: Instant) {
        self.metrics
            .create_time
            .record(since.elapsed().as_secs_f64(), &self.label);
    }

    pub(crate) fn record_timeout(&self) {
        self.metrics.timeouts.add(1, &self.label);
    }

    /// Check whether pool state gauges are due for an update.
    ///
    /// Marks them as updated if they are.
    pub(crate) fn state_due(&self) -> bool {
        let mut last_gathered_at = self.last_gathered_at.lock();
        match *last_gathered_at {
            Some(at) if at.elapsed() <= PROBE_INTERVAL => false,
            _ => {
                *last_gathered_at = Some(Instant::now());
                true
            }
        }
    }

    pub(crate) fn record_state(&self, stats: &PoolStats) {
        self.metrics.record_state(&self.label, stats);
    }
}
