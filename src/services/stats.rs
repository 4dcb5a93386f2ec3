//! Per-year distribution statistics over chip times and race-window weather.
//!
//! Everything here is recomputed from the stored rows on demand; nothing is
//! persisted.

use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::db::models::{Location, RaceResult, WeatherRecord};
use crate::helpers::{opt_round_to, round_to, seconds_to_hms};

/// Chip-time distribution of one year. Only results with a parsed chip time
/// contribute.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct YearStatistics {
    pub year: i32,
    pub count: usize,
    pub mean_seconds: f64,
    pub median_seconds: f64,
    /// Sample standard deviation; `None` for a single finisher.
    pub std_dev_seconds: Option<f64>,
    pub min_seconds: f64,
    pub max_seconds: f64,
    pub p25_seconds: f64,
    pub p75_seconds: f64,
    /// Fastest time, `HH:MM:SS.ss`
    pub fastest_time: String,
    /// Median time, `HH:MM:SS.ss`
    pub median_time: String,
}

/// Race-window weather aggregates for one (year, site). Missing hourly
/// values are skipped; a measure with no values at all is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WeatherYearStatistics {
    pub year: i32,
    pub location: Location,
    pub observations: usize,
    pub temperature_mean_f: Option<f64>,
    pub temperature_min_f: Option<f64>,
    pub temperature_max_f: Option<f64>,
    pub wind_speed_mean_mph: Option<f64>,
    pub wind_speed_min_mph: Option<f64>,
    pub wind_speed_max_mph: Option<f64>,
    pub wind_gust_mean_mph: Option<f64>,
    pub wind_gust_max_mph: Option<f64>,
    pub wind_direction_mean_deg: Option<f64>,
}

/// The per-site weather columns of the combined table.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LocationWeatherSummary {
    pub wind_speed_avg: Option<f64>,
    pub wind_speed_max: Option<f64>,
    pub wind_gust_max: Option<f64>,
    pub temperature_avg: Option<f64>,
    pub wind_direction_avg: Option<f64>,
}

impl From<&WeatherYearStatistics> for LocationWeatherSummary {
    fn from(w: &WeatherYearStatistics) -> Self {
        Self {
            wind_speed_avg: opt_round_to(w.wind_speed_mean_mph, 1),
            wind_speed_max: opt_round_to(w.wind_speed_max_mph, 1),
            wind_gust_max: opt_round_to(w.wind_gust_max_mph, 1),
            temperature_avg: opt_round_to(w.temperature_mean_f, 1),
            wind_direction_avg: opt_round_to(w.wind_direction_mean_deg, 1),
        }
    }
}

/// Race statistics of one year left-joined with both sites' weather.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CombinedYearRow {
    #[serde(flatten)]
    pub stats: YearStatistics,
    pub start: Option<LocationWeatherSummary>,
    pub summit: Option<LocationWeatherSummary>,
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Percentile of already-sorted values by linear interpolation between order
/// statistics, with rank `h = (n - 1) * p` and `p` in `[0, 1]`.
pub fn percentile_linear(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&p) {
        return None;
    }
    let h = (sorted.len() - 1) as f64 * p;
    let lower = h.floor() as usize;
    let upper = h.ceil() as usize;
    let fraction = h - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample (n - 1) standard deviation.
fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

fn min_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

fn max_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Statistics of one year's chip times. `None` when no time is present.
pub fn summarize_year(year: i32, times: &[f64]) -> Option<YearStatistics> {
    let mut sorted: Vec<f64> = times.iter().copied().filter(|t| t.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let median = percentile_linear(&sorted, 0.5)?;
    let min = sorted[0];
    let max = sorted[sorted.len() - 1];

    Some(YearStatistics {
        year,
        count: sorted.len(),
        mean_seconds: mean(&sorted)?,
        median_seconds: median,
        std_dev_seconds: sample_std_dev(&sorted),
        min_seconds: min,
        max_seconds: max,
        p25_seconds: percentile_linear(&sorted, 0.25)?,
        p75_seconds: percentile_linear(&sorted, 0.75)?,
        fastest_time: seconds_to_hms(min),
        median_time: seconds_to_hms(median),
    })
}

/// Statistics per year, ascending. Years without any chip time are absent.
pub fn yearly_statistics(results: &[RaceResult]) -> Vec<YearStatistics> {
    let mut by_year: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for result in results {
        if let Some(seconds) = result.chip_time_seconds {
            by_year.entry(result.year).or_default().push(seconds);
        }
    }

    by_year
        .into_iter()
        .filter_map(|(year, times)| summarize_year(year, &times))
        .collect()
}

/// Weather aggregates per (year, location), ordered by year then site.
pub fn weather_statistics(records: &[WeatherRecord]) -> Vec<WeatherYearStatistics> {
    let mut groups: BTreeMap<(i32, Location), Vec<&WeatherRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.year, record.location))
            .or_default()
            .push(record);
    }

    groups
        .into_iter()
        .map(|((year, location), rows)| {
            let temperature = present(&rows, |r| r.temperature_f);
            let wind = present(&rows, |r| r.wind_speed_mph);
            let gust = present(&rows, |r| r.wind_gust_mph);
            let direction = present(&rows, |r| r.wind_direction_deg);

            WeatherYearStatistics {
                year,
                location,
                observations: rows.len(),
                temperature_mean_f: mean(&temperature),
                temperature_min_f: min_of(&temperature),
                temperature_max_f: max_of(&temperature),
                wind_speed_mean_mph: mean(&wind),
                wind_speed_min_mph: min_of(&wind),
                wind_speed_max_mph: max_of(&wind),
                wind_gust_mean_mph: mean(&gust),
                wind_gust_max_mph: max_of(&gust),
                wind_direction_mean_deg: mean(&direction),
            }
        })
        .collect()
}

fn present(rows: &[&WeatherRecord], field: impl Fn(&WeatherRecord) -> Option<f64>) -> Vec<f64> {
    rows.iter().filter_map(|r| field(r)).collect()
}

/// Left-join race statistics with the site-pivoted weather table on year.
/// Years without weather keep `None` weather columns; weather for years
/// without race statistics is dropped.
pub fn combined_table(
    stats: &[YearStatistics],
    weather: &[WeatherYearStatistics],
) -> Vec<CombinedYearRow> {
    let pivot: BTreeMap<(i32, Location), &WeatherYearStatistics> =
        weather.iter().map(|w| ((w.year, w.location), w)).collect();
    let site = |year: i32, location: Location| {
        pivot
            .get(&(year, location))
            .map(|w| LocationWeatherSummary::from(*w))
    };

    stats
        .iter()
        .map(|s| CombinedYearRow {
            stats: s.clone(),
            start: site(s.year, Location::Start),
            summit: site(s.year, Location::Summit),
        })
        .collect()
}

/// Mean of the per-year medians, in seconds.
pub fn mean_of_medians(stats: &[YearStatistics]) -> Option<f64> {
    let medians: Vec<f64> = stats.iter().map(|s| s.median_seconds).collect();
    mean(&medians).map(|m| round_to(m, 2))
}
