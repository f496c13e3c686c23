use anyhow::{Context, Result};
use gecko_cache::logging::init_logging;
use gecko_cache::Application;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging().context("initializing logging")?;

    Application::init()?.run().await
}
