use crate::args::Args;
use crate::config::Config;
use crate::market::CoinGeckoClient;
use crate::metrics::{self, FetchCounters};
use crate::refresh::Coordinator;
use crate::store::{CacheWriter, RedisStore};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Application {
    config: Config,
}

impl Application {
    /// Read `.env`, then the command line and environment.
    pub fn init() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<Self> {
        Ok(Self {
            config: Config::from_args(args)?,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the refresh loop and the metrics endpoint until ctrl-c, or until
    /// the metrics server fails.
    pub async fn run(self) -> Result<()> {
        let Config {
            refresh,
            api,
            redis,
            metrics_addr,
        } = self.config;

        let cancel = CancellationToken::new();
        let store = RedisStore::connect_lazy(&redis, cancel.clone())
            .with_context(|| format!("Invalid redis address '{}'", redis.address))?;
        let source = CoinGeckoClient::new(
            api.base_url,
            api.currency,
            api.order,
            api.per_page,
            api.timeout,
        )
        .context("Failed to build HTTP client")?;

        let counters = Arc::new(FetchCounters::default());

        let coordinator = Coordinator::new(
            refresh,
            Arc::new(source),
            CacheWriter::new(Arc::new(store)),
            counters.clone(),
        );
        let refresh_task = tokio::spawn(coordinator.run(cancel.clone()));

        let served = tokio::select! {
            res = metrics::serve(metrics_addr, counters, cancel.clone()) => res,
            res = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                res.context("Failed to listen for ctrl-c")
            }
        };

        cancel.cancel();
        if let Err(err) = refresh_task.await {
            warn!(%err, "refresh task ended abnormally");
        }
        served
    }
}
