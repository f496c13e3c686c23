use clap::builder::PossibleValuesParser;
use clap::{Parser, ValueHint};

pub const DEFAULT_FREQUENCY_SECS: u64 = 1;
pub const DEFAULT_PAGES: u32 = 1;
pub const DEFAULT_CURRENCY: &str = "usd";
pub const DEFAULT_ORDER: &str = "market_cap_desc";
pub const DEFAULT_EXPIRY_SECS: u64 = 60;
pub const DEFAULT_REDIS_HOSTNAME: &str = "localhost:6379";
pub const DEFAULT_METRICS_ADDR: &str = ":6380";
pub const DEFAULT_PER_PAGE: u32 = 100; // upstream maximum is 250
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_INFLIGHT_WRITES: usize = 32;

/// Sort keys accepted by `/coins/markets`.
pub const ORDER_KEYS: [&str; 8] = [
    "market_cap_desc",
    "market_cap_asc",
    "gecko_desc",
    "gecko_asc",
    "volume_desc",
    "volume_asc",
    "id_desc",
    "id_asc",
];

/// Keeps a Redis cache of CoinGecko market data warm.
///
/// Pages through the ranked market list, writes every asset's fields as
/// expiring Redis keys (`<id>#<Field>`), then refreshes the pinned ids given
/// as positional arguments once per round.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Seconds to wait between rounds, and before retrying a failed page
    #[arg(long, env = "FREQUENCY", default_value_t = DEFAULT_FREQUENCY_SECS)]
    pub frequency: u64,

    /// Number of pages to pull per round
    #[arg(
        long,
        env = "PAGES",
        default_value_t = DEFAULT_PAGES,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub pages: u32,

    /// Quote currency for prices
    #[arg(long, env = "CURRENCY", default_value = DEFAULT_CURRENCY)]
    pub currency: String,

    /// Sort key for the ranked market list
    #[arg(
        long,
        env = "ORDER",
        default_value = DEFAULT_ORDER,
        value_parser = PossibleValuesParser::new(ORDER_KEYS)
    )]
    pub order: String,

    /// Seconds to keep entries in the cache
    #[arg(
        long,
        env = "EXPIRY",
        default_value_t = DEFAULT_EXPIRY_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub expiry: u64,

    /// Redis address (host:port)
    #[arg(
        long,
        env = "REDIS_HOSTNAME",
        value_hint = ValueHint::Hostname,
        default_value = DEFAULT_REDIS_HOSTNAME
    )]
    pub hostname: String,

    /// Redis password (empty for none)
    #[arg(long, env = "REDIS_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Redis logical database
    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    pub db: i64,

    /// Listen address for the metrics endpoint; `:port` binds every interface
    #[arg(long, env = "METRICS_ADDR", default_value = DEFAULT_METRICS_ADDR)]
    pub metrics: String,

    /// CoinGecko API base URL
    #[arg(
        long = "api-url",
        env = "COINGECKO_API_URL",
        value_hint = ValueHint::Url,
        default_value = crate::market::COINGECKO_API_URL
    )]
    pub api_url: String,

    /// Assets per page
    #[arg(
        long = "per-page",
        env = "PER_PAGE",
        default_value_t = DEFAULT_PER_PAGE,
        value_parser = clap::value_parser!(u32).range(1..=250)
    )]
    pub per_page: u32,

    /// Upstream request timeout in seconds
    #[arg(
        long = "request-timeout",
        env = "REQUEST_TIMEOUT",
        default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub request_timeout: u64,

    /// Upper bound on concurrent cache writers
    #[arg(
        long = "max-inflight-writes",
        env = "MAX_INFLIGHT_WRITES",
        default_value_t = DEFAULT_MAX_INFLIGHT_WRITES
    )]
    pub max_inflight_writes: usize,

    /// Asset ids refreshed individually once per round regardless of rank
    #[arg(value_name = "ID")]
    pub tail: Vec<String>,
}
