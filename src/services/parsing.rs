//! Text → typed value parsing for scraped fields.
//!
//! Scraped result pages routinely contain corrupted cells, so none of these
//! functions fail: unparsable input yields `None` and a warning.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

/// Formats tried, in order, for every date-shaped candidate.
const DATE_FORMATS: [&str; 3] = ["%B %d, %Y", "%m/%d/%Y", "%b %d, %Y"];

/// Date-shaped patterns scanned, in order: "October 6, 2024" then "10/6/2024".
fn date_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"\w+ \d{1,2}, \d{4}").expect("valid long-form date regex"),
            Regex::new(r"\d{1,2}/\d{1,2}/\d{4}").expect("valid slash date regex"),
        ]
    })
}

/// Parse a chip time into elapsed seconds.
///
/// - `MM:SS.f`    → minutes × 60 + seconds
/// - `HH:MM:SS.f` → hours × 3600 + minutes × 60 + seconds
///
/// Empty text is simply missing; any other shape is reported and missing.
pub fn parse_chip_time(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let parsed = match text.split(':').collect::<Vec<_>>().as_slice() {
        [m, s] => parse_components(None, m, s),
        [h, m, s] => parse_components(Some(h), m, s),
        _ => None,
    };

    if parsed.is_none() {
        tracing::warn!("Unparsable chip time '{}'", text);
    }
    parsed
}

fn parse_components(hours: Option<&str>, minutes: &str, seconds: &str) -> Option<f64> {
    let hours = match hours {
        Some(h) => h.trim().parse::<u32>().ok()?,
        None => 0,
    };
    let minutes = minutes.trim().parse::<u32>().ok()?;
    let seconds = seconds.trim().parse::<f64>().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(f64::from(hours) * 3600.0 + f64::from(minutes) * 60.0 + seconds)
}

/// Locate the race date in the text of a results page.
///
/// Candidates are visited pattern by pattern, in match order; each candidate
/// is tried against every format in `DATE_FORMATS`. The first one that parses
/// wins.
pub fn resolve_race_date(page_text: &str) -> Option<NaiveDate> {
    let found = date_patterns()
        .iter()
        .flat_map(|pattern| pattern.find_iter(page_text))
        .find_map(|candidate| parse_date_candidate(candidate.as_str()));

    if found.is_none() {
        tracing::warn!("Could not extract race date from page");
    }
    found
}

fn parse_date_candidate(candidate: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(candidate, fmt).ok())
}
