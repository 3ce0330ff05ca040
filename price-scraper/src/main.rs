// Price scraper binary entry point
//
// Scrapes national and state gas prices into timestamped CSV files.

use anyhow::Result;
use clap::Parser;
use common::config::LogFormat;
use common::scraper::{PriceClient, PriceScraper, DEFAULT_BASE_URL};
use common::telemetry;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "price-scraper")]
#[command(about = "Scrape national and state gas prices.", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Base filepath to store data
    #[arg(short = 'f', long, default_value = "prices/")]
    filepath: PathBuf,

    /// Site to scrape
    #[arg(long, env = "PRICE_SCRAPER_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.debug {
        telemetry::init_logging_at("debug", &LogFormat::Pretty)?;
    } else {
        telemetry::init_logging("info", &LogFormat::Pretty)?;
    }
    debug!("Debug mode enabled");

    info!(base_url = %cli.base_url, filepath = %cli.filepath.display(), "Running price scraper");
    let started = Instant::now();

    let scraper = PriceScraper::new(PriceClient::new(&cli.base_url)?);
    let report = scraper.scrape_to(&cli.filepath).await?;

    info!(
        national_rows = report.national_rows,
        county_rows = report.county_rows,
        elapsed_seconds = format!("{:.5}", started.elapsed().as_secs_f64()),
        "Price scraper finished"
    );

    Ok(())
}
