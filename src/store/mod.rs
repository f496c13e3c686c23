//! Time-expiring key-value storage for flattened fields.

mod memory;
mod writer;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, IntoConnectionInfo};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use memory::MemoryStore;
pub use writer::{CacheWriter, FieldFailure, WriteReport};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A cache that keeps each entry for a bounded time.
///
/// Handles are shared by every concurrent writer, so implementations must be
/// safe to call from many tasks at once.
#[async_trait]
pub trait FieldStore: Send + Sync {
    /// Write `value` under `key`, replacing any previous value and resetting
    /// its expiry to `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
}

/// Redis connection settings.
#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// `host:port`
    pub address: String,
    pub password: Option<String>,
    pub db: i64,
}

/// Per-attempt bound on the initial connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// [`FieldStore`] backed by Redis `SET key value EX ttl`.
///
/// The first connection is made by a background task. Until it succeeds
/// every write fails with [`StoreError::Unavailable`]; after that the
/// connection manager reconnects on its own. Clones share the connection.
#[derive(Clone)]
pub struct RedisStore {
    address: String,
    conn: Arc<OnceCell<ConnectionManager>>,
}

impl RedisStore {
    /// Validate `settings` and start connecting. Never waits for the server.
    ///
    /// Must be called inside a tokio runtime. The connect task stops on
    /// `cancel` or once connected.
    pub fn connect_lazy(
        settings: &RedisSettings,
        cancel: CancellationToken,
    ) -> Result<Self, StoreError> {
        let mut info = format!("redis://{}", settings.address).into_connection_info()?;
        info.redis.db = settings.db;
        info.redis.password = settings.password.clone();
        let client = redis::Client::open(info)?;

        let store = Self {
            address: settings.address.clone(),
            conn: Arc::new(OnceCell::new()),
        };
        tokio::spawn(establish(client, store.clone(), settings.db, cancel));
        Ok(store)
    }

    pub fn is_connected(&self) -> bool {
        self.conn.initialized()
    }
}

async fn establish(client: redis::Client, store: RedisStore, db: i64, cancel: CancellationToken) {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(CONNECT_TIMEOUT);

    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => return,
            res = ConnectionManager::new_with_config(client.clone(), config.clone()) => res,
        };
        match attempt {
            Ok(conn) => {
                let _ = store.conn.set(conn);
                info!(address = %store.address, db, "connected to redis");
                return;
            }
            Err(err) => warn!(
                address = %store.address,
                %err,
                retry_in = ?CONNECT_RETRY_DELAY,
                "redis unavailable"
            ),
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(CONNECT_RETRY_DELAY) => {}
        }
    }
}

#[async_trait]
impl FieldStore for RedisStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let Some(conn) = self.conn.get() else {
            return Err(StoreError::Unavailable(format!(
                "not connected to {}",
                self.address
            )));
        };
        // EX only takes whole seconds and rejects zero.
        let secs = ttl.as_secs().max(1);
        let mut conn = conn.clone();
        conn.set_ex::<_, _, ()>(key, value, secs).await?;
        Ok(())
    }
}
