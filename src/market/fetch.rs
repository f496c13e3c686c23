use super::{AssetSnapshot, CoinDetail, FetchError, MarketSource};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3/";

/// CoinGecko rejects requests without a browser-looking agent.
const USER_AGENT: &str = "Mozilla/5.0";

/// CoinGecko-backed [`MarketSource`].
#[derive(Debug, Clone)]
pub struct CoinGeckoClient {
    client: Client,
    base_url: Url,
    currency: String,
    order: String,
    per_page: u32,
}

impl CoinGeckoClient {
    pub fn new(
        base_url: Url,
        currency: impl Into<String>,
        order: impl Into<String>,
        per_page: u32,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            base_url,
            currency: currency.into(),
            order: order.into(),
            per_page,
        })
    }

    /// `<base>/coins/markets?vs_currency=..&order=..&page=..&per_page=..`
    fn markets_url(&self, page: u32) -> Result<Url, FetchError> {
        let mut url = self.endpoint(&["coins", "markets"])?;
        url.query_pairs_mut()
            .append_pair("vs_currency", &self.currency)
            .append_pair("order", &self.order)
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &self.per_page.to_string());
        Ok(url)
    }

    /// `<base>/coins/<id>` without the sections that are never cached.
    fn coin_url(&self, id: &str) -> Result<Url, FetchError> {
        let mut url = self.endpoint(&["coins", id])?;
        url.query_pairs_mut()
            .append_pair("localization", "false")
            .append_pair("tickers", "false")
            .append_pair("community_data", "false")
            .append_pair("developer_data", "false");
        Ok(url)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidRequest(format!("not a base url: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        let resp = self
            .client
            .get(url)
            .header("accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl MarketSource for CoinGeckoClient {
    async fn fetch_page(&self, page: u32) -> Result<Vec<AssetSnapshot>, FetchError> {
        if page == 0 {
            return Err(FetchError::InvalidRequest("pages start at 1".into()));
        }
        let snapshots: Vec<AssetSnapshot> = self.get_json(self.markets_url(page)?).await?;
        debug!(page, count = snapshots.len(), "retrieved page");
        Ok(snapshots)
    }

    async fn fetch_one(&self, id: &str) -> Result<AssetSnapshot, FetchError> {
        if id.trim().is_empty() {
            return Err(FetchError::InvalidRequest("empty asset id".into()));
        }
        let detail: CoinDetail = self.get_json(self.coin_url(id)?).await?;
        debug!(id, "retrieved asset");
        Ok(detail.into_snapshot(&self.currency))
    }
}
