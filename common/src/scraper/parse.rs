// Payload extraction for the AAA price pages
//
// National prices live in an inline script assignment; county prices live in
// a separate map data script referenced from each state page.

use crate::errors::ScrapeError;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// One CSV row, fields in source order
pub type PriceRow = Vec<String>;

fn placestxt_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"iwmparam\[0\]\.placestxt\s*=\s*"(.*)""#).expect("valid placestxt regex")
    })
}

fn map_script_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<script[^>]*?\bsrc\s*=\s*["']([^"']*premiumhtml5map_js_data[^"']*)["']"#)
            .expect("valid map script regex")
    })
}

fn map_data_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"map_data\s*:\s*(\{.*?),\s*groups").expect("valid map_data regex")
    })
}

/// Extract national rows `[abbr, name, price, state_url]` from the landing page
///
/// The last `placestxt` assignment on the page wins. Entries are `;`-terminated
/// and their fields are `,`-terminated, so the trailing element of each split
/// is dropped. Returns an empty list when the page carries no assignment.
pub fn national_prices(html: &str) -> Vec<PriceRow> {
    let Some(captures) = placestxt_regex().captures_iter(html).last() else {
        return Vec::new();
    };
    let payload = captures.get(1).map_or("", |m| m.as_str()).trim();

    let mut entries: Vec<&str> = payload.split(';').collect();
    entries.pop();

    entries
        .into_iter()
        .map(|entry| {
            let mut fields: Vec<String> = entry.trim().split(',').map(str::to_string).collect();
            fields.pop();
            fields
        })
        .collect()
}

/// Locate the map data script referenced by a state page
pub fn map_script_src(html: &str) -> Option<String> {
    map_script_regex()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse the `map_data` object of a map data script
///
/// Only the first line that matches is considered. A script without any
/// `map_data` object yields an empty map; a malformed object is an error.
pub fn map_data(script: &str) -> Result<Map<String, Value>, ScrapeError> {
    let captured = script
        .trim()
        .lines()
        .filter(|line| line.contains("map_data"))
        .find_map(|line| map_data_regex().captures(line))
        .and_then(|c| c.get(1));

    match captured {
        Some(object) => serde_json::from_str(object.as_str().trim()).map_err(|e| {
            ScrapeError::Parse {
                what: "map_data".to_string(),
                reason: e.to_string(),
            }
        }),
        None => Ok(Map::new()),
    }
}

/// Build county rows `[abbr, state_name, county, comment]` in map order
pub fn county_rows(state_abbr: &str, state_name: &str, data: &Map<String, Value>) -> Vec<PriceRow> {
    data.values()
        .map(|county| {
            vec![
                state_abbr.to_string(),
                state_name.to_string(),
                field(county, "name"),
                field(county, "comment"),
            ]
        })
        .collect()
}

fn field(county: &Value, key: &str) -> String {
    match county.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
