use crate::args::Args;
use crate::store::RedisSettings;
use anyhow::{Context, Result};
use derive_builder::{Builder, UninitializedFieldError};
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("{0}")]
    Invalid(String),
}

impl From<UninitializedFieldError> for ConfigError {
    fn from(e: UninitializedFieldError) -> Self {
        Self::Missing(e.field_name())
    }
}

/// Everything the refresh loop needs, fixed at startup.
#[derive(Builder, Clone, Debug)]
#[builder(build_fn(validate = "Self::validate", error = "ConfigError"))]
pub struct RefreshConfig {
    /// Pause between rounds, also used as the back-off after a failed page.
    #[builder(default = "Duration::from_secs(1)")]
    pub interval: Duration,
    /// Pages pulled per round (1-based, inclusive).
    #[builder(default = "1")]
    pub max_pages: u32,
    /// Lifetime of every cache entry.
    #[builder(default = "Duration::from_secs(60)")]
    pub ttl: Duration,
    /// Pinned ids refreshed once per round.
    #[builder(default)]
    pub tail: Vec<String>,
    #[builder(default = "32")]
    pub max_inflight_writes: usize,
}

impl RefreshConfig {
    pub fn builder() -> RefreshConfigBuilder {
        RefreshConfigBuilder::default()
    }
}

impl RefreshConfigBuilder {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pages == Some(0) {
            return Err(ConfigError::Invalid("max_pages must be at least 1".into()));
        }
        if self.ttl.is_some_and(|ttl| ttl < Duration::from_secs(1)) {
            return Err(ConfigError::Invalid("ttl must be at least one second".into()));
        }
        if self.max_inflight_writes == Some(0) {
            return Err(ConfigError::Invalid(
                "max_inflight_writes must be at least 1".into(),
            ));
        }
        if let Some(tail) = &self.tail {
            if tail.iter().any(|id| id.trim().is_empty()) {
                return Err(ConfigError::Invalid("pinned asset ids must not be empty".into()));
            }
        }
        Ok(())
    }
}

/// Upstream API settings.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: Url,
    pub currency: String,
    pub order: String,
    pub per_page: u32,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub refresh: RefreshConfig,
    pub api: ApiConfig,
    pub redis: RedisSettings,
    /// `host:port`, resolved when the listener binds.
    pub metrics_addr: String,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        let refresh = RefreshConfig::builder()
            .interval(Duration::from_secs(args.frequency))
            .max_pages(args.pages)
            .ttl(Duration::from_secs(args.expiry))
            .tail(args.tail)
            .max_inflight_writes(args.max_inflight_writes)
            .build()
            .context("Invalid refresh settings")?;

        let base_url = Url::parse(&args.api_url)
            .with_context(|| format!("Invalid API url '{}'", args.api_url))?;

        let api = ApiConfig {
            base_url,
            currency: args.currency.trim().to_ascii_lowercase(),
            order: args.order,
            per_page: args.per_page,
            timeout: Duration::from_secs(args.request_timeout),
        };

        let redis = RedisSettings {
            address: args.hostname,
            password: Some(args.password).filter(|p| !p.is_empty()),
            db: args.db,
        };

        let metrics_addr = listen_addr(&args.metrics)
            .with_context(|| format!("Invalid metrics address '{}'", args.metrics))?;

        let config = Self {
            refresh,
            api,
            redis,
            metrics_addr,
        };
        config.log_summary();
        Ok(config)
    }

    fn log_summary(&self) {
        info!(
            interval = ?self.refresh.interval,
            pages = self.refresh.max_pages,
            ttl = ?self.refresh.ttl,
            pinned = self.refresh.tail.len(),
            currency = %self.api.currency,
            order = %self.api.order,
            redis = %self.redis.address,
            db = self.redis.db,
            metrics = %self.metrics_addr,
            "configuration loaded"
        );
    }
}

/// Accepts `host:port` or a bare `:port` meaning every interface. Hosts
/// may be names; only the port is checked here.
pub fn listen_addr(s: &str) -> Result<String, ConfigError> {
    let invalid = || ConfigError::Invalid(format!("expected host:port, got '{s}'"));
    let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
    port.parse::<u16>().map_err(|_| invalid())?;

    if host.is_empty() {
        Ok(format!("0.0.0.0:{port}"))
    } else {
        Ok(s.to_string())
    }
}
