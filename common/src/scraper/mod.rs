// AAA gas price scraper, the default producer task
//
// Fetches the national price map, then each state's county map, and writes
// both as timestamped CSV files under a base directory.

pub mod client;
pub mod output;
pub mod parse;

pub use client::{PriceClient, DEFAULT_BASE_URL, USER_AGENT};
pub use output::OutputPaths;
pub use parse::PriceRow;

use crate::errors::ScrapeError;
use chrono::Utc;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Summary of one scrape
#[derive(Debug, Clone)]
pub struct ScrapeReport {
    pub national_rows: usize,
    pub county_rows: usize,
    pub paths: OutputPaths,
}

pub struct PriceScraper {
    client: PriceClient,
}

impl PriceScraper {
    pub fn new(client: PriceClient) -> Self {
        Self { client }
    }

    /// Fetch the landing page and extract one row per state
    #[instrument(skip(self))]
    pub async fn national_prices(&self) -> Result<Vec<PriceRow>, ScrapeError> {
        let base = self.client.base_url().to_string();
        let html = self.client.get_text(&base).await?;
        let rows = parse::national_prices(&html);
        if rows.is_empty() {
            warn!("No national price data found on landing page");
        }
        info!(states = rows.len(), "Parsed national prices");
        Ok(rows)
    }

    /// Fetch county prices for every state row
    ///
    /// Rows with fewer than four fields and the DC row are skipped. A state
    /// page without a map data script is skipped with a warning.
    #[instrument(skip(self, national))]
    pub async fn state_prices(&self, national: &[PriceRow]) -> Result<Vec<PriceRow>, ScrapeError> {
        let mut all_prices = Vec::new();

        for state in national {
            if state.len() < 4 {
                continue;
            }
            let (abbr, name) = (&state[0], &state[1]);
            if abbr == "DC" {
                continue;
            }
            let Some(state_url) = state.last() else {
                continue;
            };

            let page = self.client.get_text(state_url).await?;
            let Some(src) = parse::map_script_src(&page) else {
                warn!(state = %name, "No map script found");
                continue;
            };

            let script = self.client.get_text(&src).await?;
            let data = parse::map_data(&script)?;
            let rows = parse::county_rows(abbr, name, &data);
            debug!(state = %abbr, counties = rows.len(), "Parsed county prices");
            all_prices.extend(rows);
        }

        Ok(all_prices)
    }

    /// Scrape everything and write both CSV files under `base`
    #[instrument(skip(self), fields(base = %base.display()))]
    pub async fn scrape_to(&self, base: &Path) -> Result<ScrapeReport, ScrapeError> {
        let national = self.national_prices().await?;
        let states = self.state_prices(&national).await?;

        let timestamp = output::timestamp(Utc::now());
        let paths = output::save(base, &timestamp, &national, &states)?;
        info!(
            national = %paths.national.display(),
            states = %paths.states.display(),
            "Wrote price files"
        );

        Ok(ScrapeReport {
            national_rows: national.len(),
            county_rows: states.len(),
            paths,
        })
    }
}
