//! Ingestion endpoints.
//!
//! GET  /api/v1/ingest/status        current or last run
//! POST /api/v1/ingest/years/:year   re-ingest one year
//! POST /api/v1/ingest/weather       refetch weather for stored race dates

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::errors::{AppError, ErrorResponse};
use crate::services::ingest::{IngestAccepted, IngestService, IngestState};

/// Query parameters for re-ingesting a year.
#[derive(Debug, Deserialize, IntoParams)]
pub struct YearIngestParams {
    /// Replace the stored rows of the year (default true). With `false`, a
    /// year that already has results is rejected.
    pub replace: Option<bool>,
}

/// Get the current ingestion status.
#[utoipa::path(
    get,
    path = "/api/v1/ingest/status",
    tag = "Ingest",
    responses(
        (status = 200, description = "Current or last ingestion run", body = IngestState),
    )
)]
pub async fn get_ingest_status(State(service): State<IngestService>) -> Json<IngestState> {
    let state = service.state();
    let s = state.read().await;
    Json(s.clone())
}

/// Re-ingest one year in the background.
#[utoipa::path(
    post,
    path = "/api/v1/ingest/years/{year}",
    tag = "Ingest",
    params(
        ("year" = i32, Path, description = "Race year (2018-2030)"),
        YearIngestParams,
    ),
    responses(
        (status = 202, description = "Run started", body = IngestAccepted),
        (status = 400, description = "Year outside the supported range", body = ErrorResponse),
        (status = 409, description = "Year exists and replace=false, or a run is active", body = ErrorResponse),
    )
)]
pub async fn ingest_year(
    State(service): State<IngestService>,
    Path(year): Path<i32>,
    Query(params): Query<YearIngestParams>,
) -> Result<(StatusCode, Json<IngestAccepted>), AppError> {
    let replace = params.replace.unwrap_or(true);
    let accepted = service.start_years(vec![year], replace, false).await?;
    tracing::info!(year, replace, run_id = %accepted.run_id, "Year ingestion requested");
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// Refetch weather for every stored race date in the background.
#[utoipa::path(
    post,
    path = "/api/v1/ingest/weather",
    tag = "Ingest",
    responses(
        (status = 202, description = "Run started", body = IngestAccepted),
        (status = 409, description = "A run is active", body = ErrorResponse),
    )
)]
pub async fn refresh_weather(
    State(service): State<IngestService>,
) -> Result<(StatusCode, Json<IngestAccepted>), AppError> {
    let accepted = service.start_weather_refresh()?;
    tracing::info!(run_id = %accepted.run_id, "Weather refresh requested");
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}
