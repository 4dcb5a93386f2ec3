// Diablo Stats API v0.1
use axum::{
    routing::{get, post},
    Router,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::net::SocketAddr;
use std::str::FromStr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod db;
mod errors;
mod helpers;
mod routes;
mod services;

use config::AppConfig;
use services::crawler::CrawlContext;
use services::ingest::IngestService;
use services::weather::OpenMeteoClient;

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 5;

/// Diablo Stats API OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Diablo Stats API",
        version = "0.1.0",
        description = "Year-over-year statistics for the Mount Diablo Challenge hill climb. \
            Scrapes finisher results from the paginated results site, joins them with \
            hourly archive weather at the start and summit during the race window, and \
            serves per-year distributions, a combined race and weather table, the \
            wind/finishing-time correlation and multi-year rider history.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Statistics", description = "Per-year race and weather statistics"),
        (name = "Riders", description = "Multi-year rider history"),
        (name = "Dashboard", description = "Complete dashboard document"),
        (name = "Ingest", description = "Results and weather ingestion"),
    ),
    paths(
        routes::health::health_check,
        routes::stats::get_year_statistics,
        routes::stats::get_weather_statistics,
        routes::stats::get_combined_statistics,
        routes::stats::get_wind_correlation,
        routes::riders::list_riders,
        routes::dashboard::get_dashboard,
        routes::ingest::get_ingest_status,
        routes::ingest::ingest_year,
        routes::ingest::refresh_weather,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            db::models::TableCounts,
            db::models::Location,
            services::stats::YearStatistics,
            services::stats::WeatherYearStatistics,
            services::stats::LocationWeatherSummary,
            services::stats::CombinedYearRow,
            services::correlation::CorrelationPair,
            services::correlation::WindCorrelation,
            services::dashboard::Dashboard,
            services::dashboard::OverallSummary,
            services::dashboard::DashboardYear,
            services::dashboard::YearTimes,
            services::dashboard::YearTimesFormatted,
            services::dashboard::DashboardWeatherYear,
            services::dashboard::RiderHistory,
            services::dashboard::RiderPerformance,
            services::ingest::IngestState,
            services::ingest::IngestKind,
            services::ingest::YearStage,
            services::ingest::YearIngestStatus,
            services::ingest::IngestAccepted,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

/// Create the directory of a file-backed SQLite URL so `mode=rwc` can
/// create the database file.
fn ensure_sqlite_dir(database_url: &str) -> std::io::Result<()> {
    let Some(path) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or_default();
    match std::path::Path::new(path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "diablo_stats_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    ensure_sqlite_dir(&config.database_url).expect("Failed to create database directory");

    // Set up database connection pool
    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .expect("Invalid DATABASE_URL")
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(DB_POOL_MAX_CONNECTIONS)
        .connect_with(connect_options)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations completed");

    // Outbound clients
    let crawler = CrawlContext::from_config(&config).expect("Failed to build results client");
    let weather = OpenMeteoClient::from_config(&config).expect("Failed to build weather client");
    let ingest = IngestService::new(pool.clone(), crawler, weather, config.race_window);

    if config.ingest_on_startup {
        match ingest
            .start_years(config.race_years.clone(), true, config.force_rebuild)
            .await
        {
            Ok(accepted) => tracing::info!(
                run_id = %accepted.run_id,
                years = ?accepted.years,
                force_rebuild = config.force_rebuild,
                "Startup ingestion started"
            ),
            Err(e) => tracing::error!("Startup ingestion not started: {}", e),
        }
    }

    // CORS: GET for statistics, POST for ingestion triggers
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    // Build router
    // Read endpoints use SqlitePool state directly; ingest routes use IngestService.
    let stats_routes = Router::new()
        .route(
            "/api/v1/stats/years",
            get(routes::stats::get_year_statistics),
        )
        .route(
            "/api/v1/stats/weather",
            get(routes::stats::get_weather_statistics),
        )
        .route(
            "/api/v1/stats/combined",
            get(routes::stats::get_combined_statistics),
        )
        .route(
            "/api/v1/stats/correlation",
            get(routes::stats::get_wind_correlation),
        )
        .route("/api/v1/riders", get(routes::riders::list_riders))
        .route("/api/v1/dashboard", get(routes::dashboard::get_dashboard))
        .with_state(pool.clone());

    let ingest_routes = Router::new()
        .route(
            "/api/v1/ingest/status",
            get(routes::ingest::get_ingest_status),
        )
        .route(
            "/api/v1/ingest/years/:year",
            post(routes::ingest::ingest_year),
        )
        .route(
            "/api/v1/ingest/weather",
            post(routes::ingest::refresh_weather),
        )
        .with_state(ingest);

    // Health check uses SqlitePool to verify DB connectivity
    let health_routes = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .with_state(pool);

    let app = Router::new()
        .merge(health_routes)
        .merge(stats_routes)
        .merge(ingest_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/v1/health",
            "/api/v1/stats/years",
            "/api/v1/stats/weather",
            "/api/v1/stats/combined",
            "/api/v1/stats/correlation",
            "/api/v1/riders",
            "/api/v1/dashboard",
            "/api/v1/ingest/status",
            "/api/v1/ingest/years/{year}",
            "/api/v1/ingest/weather",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }

    #[test]
    fn test_ensure_sqlite_dir_ignores_memory_urls() {
        assert!(ensure_sqlite_dir("sqlite::memory:").is_ok());
        assert!(ensure_sqlite_dir("sqlite://diablo.db?mode=rwc").is_ok());
    }
}
