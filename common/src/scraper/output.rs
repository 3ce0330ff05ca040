// CSV output for scraped prices

use crate::errors::ScrapeError;
use crate::scraper::parse::PriceRow;
use chrono::{DateTime, SecondsFormat, Utc};
use csv::{Terminator, WriterBuilder};
use std::fs;
use std::path::{Path, PathBuf};

/// File stem for one scrape: UTC RFC 3339 with microseconds and `+00:00`
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Where one scrape was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub national: PathBuf,
    pub states: PathBuf,
}

impl OutputPaths {
    pub fn new(base: &Path, timestamp: &str) -> Self {
        let file_name = format!("{}.csv", timestamp);
        Self {
            national: base.join("national").join(&file_name),
            states: base.join("states").join(file_name),
        }
    }
}

/// Write rows without a header; rows may differ in length
pub fn write_rows(path: &Path, rows: &[PriceRow]) -> Result<(), ScrapeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .terminator(Terminator::CRLF)
        .from_path(path)?;

    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;

    Ok(())
}

/// Write both files of one scrape under `base`
pub fn save(
    base: &Path,
    timestamp: &str,
    national: &[PriceRow],
    states: &[PriceRow],
) -> Result<OutputPaths, ScrapeError> {
    let paths = OutputPaths::new(base, timestamp);
    write_rows(&paths.national, national)?;
    write_rows(&paths.states, states)?;
    Ok(paths)
}
