//! Fetch counters and the pull endpoint that exposes them.

use anyhow::Context;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// Upstream fetch outcomes, counted once per page or pinned asset.
#[derive(Debug, Default)]
pub struct FetchCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FetchCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Prometheus text exposition.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, help, value) in [
            ("cg_hit", "Number of times the cache got data", self.hits()),
            ("cg_miss", "Number of times the cache missed data", self.misses()),
        ] {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {value}");
        }
        out
    }
}

async fn metrics(State(counters): State<Arc<FetchCounters>>) -> impl IntoResponse {
    ([(CONTENT_TYPE, TEXT_FORMAT)], counters.render())
}

pub fn router(counters: Arc<FetchCounters>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .with_state(counters)
}

/// Serve `/metrics` on `addr` (`host:port`, names allowed) until `cancel`
/// fires.
pub async fn serve(
    addr: String,
    counters: Arc<FetchCounters>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr.as_str())
        .await
        .with_context(|| format!("Failed to bind metrics listener on {addr}"))?;
    info!("metrics listening on http://{}/metrics", listener.local_addr()?);

    axum::serve(listener, router(counters))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}
