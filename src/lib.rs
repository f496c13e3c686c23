//! Keeps a Redis cache of CoinGecko market data warm.
//!
//! Every asset of the ranked market list is flattened into one expiring key
//! per field, `<id>#<Field>`, and rewritten on each round.

pub mod app;
pub mod args;
pub mod config;
pub mod flatten;
pub mod logging;
pub mod market;
pub mod metrics;
pub mod refresh;
pub mod store;

pub use app::Application;
pub use flatten::{flatten, FieldName, FieldValue, FlattenedField};
pub use market::{AssetSnapshot, CoinGeckoClient, FetchError, MarketSource};
pub use refresh::Coordinator;
pub use store::{CacheWriter, FieldStore, MemoryStore, RedisStore};
