use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Weather observation site along the course.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
    sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Location {
    Start,
    Summit,
}

impl Location {
    pub const ALL: [Location; 2] = [Location::Start, Location::Summit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Start => "start",
            Location::Summit => "summit",
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finisher's record for one year, as scraped from the results table.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct RaceResult {
    pub year: i32,
    /// `None` when the race date could not be resolved from the results page.
    pub race_date: Option<NaiveDate>,
    pub place: Option<i32>,
    pub name: String,
    pub team: String,
    pub city_state: String,
    pub gender: String,
    pub gender_place: String,
    pub age: Option<i32>,
    pub age_place: String,
    /// Raw chip time cell text.
    pub chip_time_text: String,
    /// Derived from `chip_time_text`; `None` when unparsable.
    pub chip_time_seconds: Option<f64>,
    pub pace: String,
    pub start_time: String,
}

/// One hourly observation at one site on race day, within the race window.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct WeatherRecord {
    pub year: i32,
    pub race_date: NaiveDate,
    /// Local time at the venue.
    pub timestamp: NaiveDateTime,
    pub location: Location,
    pub temperature_f: Option<f64>,
    pub wind_speed_mph: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub wind_gust_mph: Option<f64>,
}

/// Row counts of both tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct TableCounts {
    pub race_results: i64,
    pub weather_data: i64,
}
