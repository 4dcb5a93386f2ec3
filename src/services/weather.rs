//! Open-Meteo archive client and race-window join.
//!
//! Fetches the hourly series for one site and one race day, then keeps the
//! hours that fall inside the race window.
//! See: https://open-meteo.com/en/docs/historical-weather-api

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::Deserialize;

use crate::config::{AppConfig, RaceWindow};
use crate::db::models::{Location, WeatherRecord};
use crate::errors::AppError;

const HOURLY_VARIABLES: &str = "temperature_2m,windspeed_10m,winddirection_10m,wind_gusts_10m";

/// Timestamp formats emitted by the archive API (local time, no offset).
const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"];

/// Latitude and longitude of a weather site.
pub fn site_coordinates(location: Location) -> (f64, f64) {
    match location {
        // Walnut Creek, base of the climb
        Location::Start => (37.885, -122.059),
        // Mount Diablo summit
        Location::Summit => (37.881, -121.914),
    }
}

/// Client for the Open-Meteo historical archive.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
    api_url: String,
    timezone: String,
}

/// Parallel hourly arrays as returned by the API. Entries may be `null`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HourlySeries {
    pub time: Vec<String>,
    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub windspeed_10m: Vec<Option<f64>>,
    #[serde(default)]
    pub winddirection_10m: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_gusts_10m: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    hourly: Option<HourlySeries>,
}

impl OpenMeteoClient {
    pub fn new(api_url: &str, timezone: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            timezone: timezone.to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(&config.weather_api_url, &config.weather_timezone)
    }

    /// Fetch the hourly series of one race day at one site.
    pub async fn fetch_hourly(
        &self,
        location: Location,
        date: NaiveDate,
    ) -> Result<HourlySeries, AppError> {
        let (lat, lon) = site_coordinates(location);
        let day = date.format("%Y-%m-%d").to_string();

        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("start_date", day.clone()),
                ("end_date", day),
                ("hourly", HOURLY_VARIABLES.to_string()),
                ("timezone", self.timezone.clone()),
                ("temperature_unit", "fahrenheit".to_string()),
                ("windspeed_unit", "mph".to_string()),
            ])
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalServiceError(format!("weather request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalServiceError(format!(
                "weather API returned HTTP {}",
                response.status()
            )));
        }

        let body: ArchiveResponse = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!("weather JSON parse error: {}", e))
        })?;

        body.hourly.ok_or_else(|| {
            AppError::ExternalServiceError(format!(
                "weather API returned no hourly data for {} on {}",
                location, date
            ))
        })
    }
}

/// Keep the hours of `series` whose local hour lies inside `window`, tagged
/// with the year, race date and site.
///
/// Measurement arrays shorter than `time` yield missing values. Without a
/// race date nothing can be joined and the result is empty.
pub fn join_race_window(
    series: &HourlySeries,
    year: i32,
    race_date: Option<NaiveDate>,
    location: Location,
    window: RaceWindow,
) -> Vec<WeatherRecord> {
    let Some(race_date) = race_date else {
        tracing::warn!(year, %location, "No race date, skipping weather join");
        return Vec::new();
    };

    let at = |values: &[Option<f64>], i: usize| values.get(i).copied().flatten();

    series
        .time
        .iter()
        .enumerate()
        .filter_map(|(i, raw)| {
            let Some(timestamp) = parse_local_timestamp(raw) else {
                tracing::warn!(year, %location, "Skipping unparsable weather timestamp '{}'", raw);
                return None;
            };
            window.contains(timestamp.hour()).then(|| WeatherRecord {
                year,
                race_date,
                timestamp,
                location,
                temperature_f: at(&series.temperature_2m, i),
                wind_speed_mph: at(&series.windspeed_10m, i),
                wind_direction_deg: at(&series.winddirection_10m, i),
                wind_gust_mph: at(&series.wind_gusts_10m, i),
            })
        })
        .collect()
}

fn parse_local_timestamp(raw: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn race_day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 6).unwrap()
    }

    fn full_day_series() -> HourlySeries {
        let hours = 0..24;
        HourlySeries {
            time: hours
                .clone()
                .map(|h| format!("2024-10-06T{:02}:00", h))
                .collect(),
            temperature_2m: hours.clone().map(|h| Some(50.0 + h as f64)).collect(),
            windspeed_10m: hours.clone().map(|h| Some(h as f64)).collect(),
            winddirection_10m: hours.clone().map(|_| Some(270.0)).collect(),
            wind_gusts_10m: hours.map(|h| Some(h as f64 * 1.5)).collect(),
        }
    }

    #[test]
    fn test_join_keeps_window_hours() {
        let records = join_race_window(
            &full_day_series(),
            2024,
            Some(race_day()),
            Location::Summit,
            RaceWindow::default(),
        );

        assert_eq!(records.len(), 5);
        let hours: Vec<u32> = records.iter().map(|r| r.timestamp.hour()).collect();
        assert_eq!(hours, vec![7, 8, 9, 10, 11]);
        assert!(records
            .iter()
            .all(|r| r.location == Location::Summit && r.year == 2024 && r.race_date == race_day()));
        assert_eq!(records[0].temperature_f, Some(57.0));
        assert_eq!(records[0].wind_speed_mph, Some(7.0));
        assert_eq!(records[4].wind_gust_mph, Some(16.5));
    }

    #[test]
    fn test_join_short_arrays_yield_missing_values() {
        let mut series = full_day_series();
        series.wind_gusts_10m.truncate(9);
        series.temperature_2m.clear();
        series.windspeed_10m[10] = None;

        let records = join_race_window(
            &series,
            2024,
            Some(race_day()),
            Location::Start,
            RaceWindow::default(),
        );

        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.temperature_f.is_none()));
        assert_eq!(records[1].wind_gust_mph, Some(12.0));
        assert_eq!(records[2].wind_gust_mph, None);
        assert_eq!(records[3].wind_speed_mph, None);
        assert_eq!(records[3].wind_direction_deg, Some(270.0));
    }

    #[test]
    fn test_join_without_race_date_is_empty() {
        let records = join_race_window(
            &full_day_series(),
            2020,
            None,
            Location::Start,
            RaceWindow::default(),
        );
        assert!(records.is_empty());
    }

    #[test]
    fn test_join_skips_bad_timestamps() {
        let mut series = full_day_series();
        series.time[8] = "garbage".to_string();
        series.time[9] = "2024-10-06T09:00:00".to_string();

        let records = join_race_window(
            &series,
            2024,
            Some(race_day()),
            Location::Start,
            RaceWindow::new(8, 9).unwrap(),
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp.hour(), 9);
    }

    #[tokio::test]
    async fn test_fetch_hourly_sends_archive_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("latitude", "37.881"))
            .and(query_param("longitude", "-121.914"))
            .and(query_param("start_date", "2024-10-06"))
            .and(query_param("end_date", "2024-10-06"))
            .and(query_param("hourly", HOURLY_VARIABLES))
            .and(query_param("timezone", "America/Los_Angeles"))
            .and(query_param("temperature_unit", "fahrenheit"))
            .and(query_param("windspeed_unit", "mph"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "latitude": 37.88,
                "longitude": -121.91,
                "hourly": {
                    "time": ["2024-10-06T07:00", "2024-10-06T08:00"],
                    "temperature_2m": [58.1, null],
                    "windspeed_10m": [12.0, 14.5],
                    "winddirection_10m": [280.0, 290.0],
                    "wind_gusts_10m": [20.1, 22.3]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenMeteoClient::new(&server.uri(), "America/Los_Angeles").unwrap();
        let series = client
            .fetch_hourly(Location::Summit, race_day())
            .await
            .unwrap();

        assert_eq!(series.time.len(), 2);
        assert_eq!(series.temperature_2m, vec![Some(58.1), None]);
        assert_eq!(series.windspeed_10m[1], Some(14.5));
    }

    #[tokio::test]
    async fn test_fetch_hourly_without_hourly_block_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "error": false, "latitude": 37.88 })),
            )
            .mount(&server)
            .await;

        let client = OpenMeteoClient::new(&server.uri(), "America/Los_Angeles").unwrap();
        let err = client
            .fetch_hourly(Location::Start, race_day())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalServiceError(_)));
    }

    #[tokio::test]
    async fn test_fetch_hourly_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let client = OpenMeteoClient::new(&server.uri(), "America/Los_Angeles").unwrap();
        let result = client.fetch_hourly(Location::Start, race_day()).await;
        assert!(matches!(result, Err(AppError::ExternalServiceError(_))));
    }
}
