use axum::extract::State;
use axum::Json;
use sqlx::SqlitePool;

use crate::db::queries;
use crate::errors::{AppError, ErrorResponse};
use crate::services::dashboard::{rider_histories, RiderHistory};

/// Riders with timed results in at least two years, sorted by name.
#[utoipa::path(
    get,
    path = "/api/v1/riders",
    tag = "Riders",
    responses(
        (status = 200, description = "Multi-year rider history", body = Vec<RiderHistory>),
        (status = 500, description = "Database error", body = ErrorResponse),
    )
)]
pub async fn list_riders(
    State(pool): State<SqlitePool>,
) -> Result<Json<Vec<RiderHistory>>, AppError> {
    let results = queries::list_results(&pool).await?;
    Ok(Json(rider_histories(&results)))
}
