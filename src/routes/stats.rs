//! Statistics endpoints, recomputed from the stored tables on every request.

use axum::extract::State;
use axum::Json;
use sqlx::SqlitePool;

use crate::db::queries;
use crate::errors::{AppError, ErrorResponse};
use crate::services::correlation::{wind_vs_median, WindCorrelation};
use crate::services::stats::{
    combined_table, weather_statistics, yearly_statistics, CombinedYearRow, WeatherYearStatistics,
    YearStatistics,
};

/// Chip-time statistics per year.
#[utoipa::path(
    get,
    path = "/api/v1/stats/years",
    tag = "Statistics",
    responses(
        (status = 200, description = "Statistics per year, ascending", body = Vec<YearStatistics>),
        (status = 500, description = "Database error", body = ErrorResponse),
    )
)]
pub async fn get_year_statistics(
    State(pool): State<SqlitePool>,
) -> Result<Json<Vec<YearStatistics>>, AppError> {
    let results = queries::list_results(&pool).await?;
    Ok(Json(yearly_statistics(&results)))
}

/// Race-window weather aggregates per year and site.
#[utoipa::path(
    get,
    path = "/api/v1/stats/weather",
    tag = "Statistics",
    responses(
        (status = 200, description = "Weather aggregates per (year, location)", body = Vec<WeatherYearStatistics>),
        (status = 500, description = "Database error", body = ErrorResponse),
    )
)]
pub async fn get_weather_statistics(
    State(pool): State<SqlitePool>,
) -> Result<Json<Vec<WeatherYearStatistics>>, AppError> {
    let weather = queries::list_weather(&pool).await?;
    Ok(Json(weather_statistics(&weather)))
}

async fn load_combined(pool: &SqlitePool) -> Result<Vec<CombinedYearRow>, AppError> {
    let results = queries::list_results(pool).await?;
    let weather = queries::list_weather(pool).await?;
    Ok(combined_table(
        &yearly_statistics(&results),
        &weather_statistics(&weather),
    ))
}

/// Race statistics joined with start and summit weather.
///
/// Years without weather are included with `null` site columns.
#[utoipa::path(
    get,
    path = "/api/v1/stats/combined",
    tag = "Statistics",
    responses(
        (status = 200, description = "Combined table, one row per year", body = Vec<CombinedYearRow>),
        (status = 500, description = "Database error", body = ErrorResponse),
    )
)]
pub async fn get_combined_statistics(
    State(pool): State<SqlitePool>,
) -> Result<Json<Vec<CombinedYearRow>>, AppError> {
    Ok(Json(load_combined(&pool).await?))
}

/// Correlation between summit mean wind speed and median finishing time.
#[utoipa::path(
    get,
    path = "/api/v1/stats/correlation",
    tag = "Statistics",
    responses(
        (status = 200, description = "Pearson coefficient and the yearly pairs", body = WindCorrelation),
        (status = 500, description = "Database error", body = ErrorResponse),
    )
)]
pub async fn get_wind_correlation(
    State(pool): State<SqlitePool>,
) -> Result<Json<WindCorrelation>, AppError> {
    let combined = load_combined(&pool).await?;
    Ok(Json(wind_vs_median(&combined)))
}
