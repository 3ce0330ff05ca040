// HTTP client for the price pages

use crate::errors::ScrapeError;
use reqwest::{Client, Url};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://gasprices.aaa.com";

/// The site serves its map payload to this client string
pub const USER_AGENT: &str = "insomnia/2022.4.2";

const REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// PriceClient fetches pages relative to a base URL
#[derive(Clone)]
pub struct PriceClient {
    client: Client,
    base_url: Url,
}

impl PriceClient {
    pub fn new(base_url: &str) -> Result<Self, ScrapeError> {
        let base_url = Url::parse(base_url).map_err(|e| ScrapeError::Parse {
            what: format!("base URL '{}'", base_url),
            reason: e.to_string(),
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| ScrapeError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `url` against the base URL; absolute URLs pass through
    pub fn resolve(&self, url: &str) -> Result<Url, ScrapeError> {
        self.base_url.join(url).map_err(|e| ScrapeError::Parse {
            what: format!("URL '{}'", url),
            reason: e.to_string(),
        })
    }

    /// GET a page body; non-success statuses are errors
    #[tracing::instrument(skip(self))]
    pub async fn get_text(&self, url: &str) -> Result<String, ScrapeError> {
        let url = self.resolve(url)?;
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Http(format!("GET {} returned {}", url, status)));
        }

        tracing::debug!(status = status.as_u16(), "Fetched page");
        Ok(response.text().await?)
    }
}
