use axum::extract::State;
use axum::Json;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::queries;
use crate::errors::{AppError, ErrorResponse};
use crate::services::dashboard::{build_dashboard, Dashboard};

/// Full dashboard document.
///
/// Overall summary, per-year times and weather, the wind correlation and
/// multi-year rider history in one response.
#[utoipa::path(
    get,
    path = "/api/v1/dashboard",
    tag = "Dashboard",
    responses(
        (status = 200, description = "Dashboard document", body = Dashboard),
        (status = 500, description = "Database error", body = ErrorResponse),
    )
)]
pub async fn get_dashboard(State(pool): State<SqlitePool>) -> Result<Json<Dashboard>, AppError> {
    let results = queries::list_results(&pool).await?;
    let weather = queries::list_weather(&pool).await?;
    Ok(Json(build_dashboard(&results, &weather, Utc::now())))
}
