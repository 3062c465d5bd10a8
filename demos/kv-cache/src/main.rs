//! Example of concurrent workers sharing a [`lendpool`] pool of key-value store connections.
//!
//! Connections are simulated in-process, with artificial latency on connect.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use clap::Parser;
use lendpool::{r#async::Pool, PoolsConfig, Resource};
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "demos/kv-cache/config.yaml",
        env = "KV_CACHE_CONFIG_FILE"
    )]
    config_file: String,
    /// Number of concurrent workers.
    #[arg(short, long, default_value_t = 8)]
    workers: usize,
    /// Number of requests issued by each worker.
    #[arg(short, long, default_value_t = 50)]
    requests: usize,
    /// Refuse every N-th connection attempt, 0 to accept all.
    #[arg(long, default_value_t = 0)]
    refuse_every: usize,
}

/// Shared key-value storage, standing in for a remote server.
type Store = Arc<Mutex<HashMap<String, String>>>;

/// Connection error type.
#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    /// Server refused new connection.
    #[error("connection attempt #{0} refused")]
    Refused(usize),
}

/// Simulated connection to the key-value store.
#[derive(Debug)]
struct Connection {
    id: usize,
    store: Store,
}

impl Connection {
    fn set(&mut self, key: String, value: String) {
        self.store.lock().insert(key, value);
    }

    fn get(&self, key: &str) -> Option<String> {
        self.store.lock().get(key).cloned()
    }
}

impl Resource for Connection {
    type Error = ConnectionError;

    fn close(self) -> Result<(), Self::Error> {
        info!(connection = self.id, "connection closed");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lendpool=debug")),
        )
        .init();
    let args = Args::parse();
    let config = PoolsConfig::builder()
        .with_file(&args.config_file)
        .with_env("KV_CACHE")
        .build()?;
    let store = Store::default();
    let counter = Arc::new(AtomicUsize::new(0));
    let refuse_every = args.refuse_every;
    let pool = Pool::new("kv", config.get("kv"), move || {
        let store = store.clone();
        let counter = counter.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let id = counter.fetch_add(1, Ordering::Relaxed) + 1;
            if refuse_every > 0 && id % refuse_every == 0 {
                return Err(ConnectionError::Refused(id));
            }
            info!(connection = id, "connection established");
            Ok(Connection { id, store })
        }
    });
    info!(?pool, "pool created");

    let mut workers = JoinSet::new();
    for worker in 0..args.workers {
        let pool = pool.clone();
        let requests = args.requests;
        workers.spawn(async move {
            for request in 0..requests {
                let mut conn = match pool.get().await {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(worker, request, error = %err, "unable to borrow connection");
                        continue;
                    }
                };
                let key = format!("key-{}", request % 16);
                conn.set(key.clone(), format!("worker-{worker}"));
                tokio::time::sleep(Duration::from_millis(1)).await;
                let value = conn.get(&key);
                debug!(worker, request, key, ?value, "value read back");
            }
        });
    }
    while let Some(res) = workers.join_next().await {
        res?;
    }

    println!("{}", serde_json::to_string_pretty(&pool.stats())?);
    pool.close();
    Ok(())
}
