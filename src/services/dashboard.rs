//! Dashboard document: overall summary, per-year times and weather, wind
//! correlation and multi-year rider history.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::db::models::{RaceResult, WeatherRecord};
use crate::helpers::{round_to, seconds_to_minutes, seconds_to_mmss};
use crate::services::correlation::wind_vs_median;
use crate::services::stats::{
    combined_table, mean_of_medians, weather_statistics, yearly_statistics, LocationWeatherSummary,
    YearStatistics,
};

pub const RACE_NAME: &str = "Mount Diablo Challenge";

/// Minimum timed results for a rider to appear in the history.
const MIN_RIDER_RESULTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OverallSummary {
    pub total_years: usize,
    /// `"2018-2025"`
    pub year_range: Option<String>,
    /// Mean of the yearly medians, in minutes
    pub overall_median_minutes: Option<f64>,
    pub overall_median_formatted: Option<String>,
    pub fastest_year_by_winner: Option<i32>,
    pub fastest_time: Option<String>,
    pub fastest_year_by_median: Option<i32>,
    pub fastest_median_time: Option<String>,
    pub total_finishers: usize,
    /// Summit mean wind vs median minutes
    pub wind_correlation: Option<f64>,
}

/// Distribution points of one year, in minutes.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct YearTimes {
    pub min: f64,
    pub p25: f64,
    pub median: f64,
    pub mean: f64,
    pub p75: f64,
    pub max: f64,
}

/// Distribution points of one year as `M:SS`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct YearTimesFormatted {
    pub min: String,
    pub p25: String,
    pub median: String,
    pub mean: String,
    pub p75: String,
    pub max: String,
}

impl From<&YearStatistics> for YearTimes {
    fn from(s: &YearStatistics) -> Self {
        Self {
            min: seconds_to_minutes(s.min_seconds),
            p25: seconds_to_minutes(s.p25_seconds),
            median: seconds_to_minutes(s.median_seconds),
            mean: seconds_to_minutes(s.mean_seconds),
            p75: seconds_to_minutes(s.p75_seconds),
            max: seconds_to_minutes(s.max_seconds),
        }
    }
}

impl From<&YearStatistics> for YearTimesFormatted {
    fn from(s: &YearStatistics) -> Self {
        Self {
            min: seconds_to_mmss(s.min_seconds),
            p25: seconds_to_mmss(s.p25_seconds),
            median: seconds_to_mmss(s.median_seconds),
            mean: seconds_to_mmss(s.mean_seconds),
            p75: seconds_to_mmss(s.p75_seconds),
            max: seconds_to_mmss(s.max_seconds),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DashboardYear {
    pub year: i32,
    pub count: usize,
    pub times: YearTimes,
    pub times_formatted: YearTimesFormatted,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DashboardWeatherYear {
    pub year: i32,
    pub start: Option<LocationWeatherSummary>,
    pub summit: Option<LocationWeatherSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RiderPerformance {
    pub year: i32,
    pub time_seconds: f64,
    /// `M:SS`
    pub time_formatted: String,
    pub place: Option<i32>,
    pub gender: String,
    pub age: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RiderHistory {
    pub name: String,
    pub years_participated: usize,
    /// Ascending by year.
    pub performances: Vec<RiderPerformance>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Dashboard {
    pub race_name: String,
    pub generated_at: DateTime<Utc>,
    pub years: Vec<i32>,
    pub overall: OverallSummary,
    pub by_year: Vec<DashboardYear>,
    pub weather_by_year: Vec<DashboardWeatherYear>,
    pub riders: Vec<RiderHistory>,
}

/// Riders with at least two timed results, sorted by name. Riders are
/// identified by name only.
pub fn rider_histories(results: &[RaceResult]) -> Vec<RiderHistory> {
    let mut by_name: BTreeMap<&str, Vec<RiderPerformance>> = BTreeMap::new();
    for result in results {
        let Some(seconds) = result.chip_time_seconds else {
            continue;
        };
        by_name
            .entry(result.name.as_str())
            .or_default()
            .push(RiderPerformance {
                year: result.year,
                time_seconds: round_to(seconds, 1),
                time_formatted: seconds_to_mmss(seconds),
                place: result.place,
                gender: result.gender.clone(),
                age: result.age,
            });
    }

    by_name
        .into_iter()
        .filter(|(_, performances)| performances.len() >= MIN_RIDER_RESULTS)
        .map(|(name, mut performances)| {
            performances.sort_by_key(|p| p.year);
            RiderHistory {
                name: name.to_string(),
                years_participated: performances.len(),
                performances,
            }
        })
        .collect()
}

/// Year with the smallest value of `key`; the earliest year wins ties.
fn fastest_by(
    stats: &[YearStatistics],
    key: impl Fn(&YearStatistics) -> f64,
) -> Option<&YearStatistics> {
    stats.iter().fold(None, |best: Option<&YearStatistics>, s| match best {
        Some(b) if key(b) <= key(s) => Some(b),
        _ => Some(s),
    })
}

fn overall_summary(stats: &[YearStatistics], wind_correlation: Option<f64>) -> OverallSummary {
    let first = stats.first().map(|s| s.year);
    let last = stats.last().map(|s| s.year);
    let overall_median = mean_of_medians(stats);
    let by_winner = fastest_by(stats, |s| s.min_seconds);
    let by_median = fastest_by(stats, |s| s.median_seconds);

    OverallSummary {
        total_years: stats.len(),
        year_range: first.zip(last).map(|(a, b)| format!("{}-{}", a, b)),
        overall_median_minutes: overall_median.map(seconds_to_minutes),
        overall_median_formatted: overall_median.map(seconds_to_mmss),
        fastest_year_by_winner: by_winner.map(|s| s.year),
        fastest_time: by_winner.map(|s| seconds_to_mmss(s.min_seconds)),
        fastest_year_by_median: by_median.map(|s| s.year),
        fastest_median_time: by_median.map(|s| seconds_to_mmss(s.median_seconds)),
        total_finishers: stats.iter().map(|s| s.count).sum(),
        wind_correlation,
    }
}

/// Assemble the dashboard from the stored tables.
pub fn build_dashboard(
    results: &[RaceResult],
    weather: &[WeatherRecord],
    generated_at: DateTime<Utc>,
) -> Dashboard {
    let stats = yearly_statistics(results);
    let combined = combined_table(&stats, &weather_statistics(weather));
    let correlation = wind_vs_median(&combined);

    Dashboard {
        race_name: RACE_NAME.to_string(),
        generated_at,
        years: stats.iter().map(|s| s.year).collect(),
        overall: overall_summary(&stats, correlation.coefficient),
        by_year: stats
            .iter()
            .map(|s| DashboardYear {
                year: s.year,
                count: s.count,
                times: YearTimes::from(s),
                times_formatted: YearTimesFormatted::from(s),
            })
            .collect(),
        weather_by_year: combined
            .into_iter()
            .map(|row| DashboardWeatherYear {
                year: row.stats.year,
                start: row.start,
                summit: row.summit,
            })
            .collect(),
        riders: rider_histories(results),
    }
}
