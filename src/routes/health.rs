use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;

use crate::db::models::TableCounts;
use crate::db::queries;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status ("ok" when healthy, "degraded" when DB is unreachable)
    pub status: String,
    /// API version
    pub version: String,
    /// Whether the database is reachable
    pub database: bool,
    /// Stored row counts, absent when the DB is unreachable
    pub counts: Option<TableCounts>,
    /// Years with stored results, ascending
    pub years: Vec<i32>,
}

/// Health check endpoint.
///
/// Returns status "degraded" (still 200) if the DB is unreachable.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_check(State(pool): State<SqlitePool>) -> Json<HealthResponse> {
    let counts = queries::table_counts(&pool).await.ok();
    let db_ok = counts.is_some();
    let years = if db_ok {
        queries::list_years(&pool).await.unwrap_or_default()
    } else {
        Vec::new()
    };

    Json(HealthResponse {
        status: if db_ok {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: db_ok,
        counts,
        years,
    })
}
