//! Ingestion pipeline: crawl results, store them, fetch and join weather.
//!
//! Runs in a background task, one year at a time. At most one run is active;
//! a run lock rejects overlapping requests. Progress is in-memory
//! (`Arc<RwLock<IngestState>>`) and served by the status endpoint.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{validate_year, RaceWindow};
use crate::db::models::{Location, WeatherRecord};
use crate::db::queries;
use crate::errors::AppError;
use crate::services::crawler::CrawlContext;
use crate::services::weather::{join_race_window, OpenMeteoClient};

// ---------------------------------------------------------------------------
// Ingest state (in-memory, shared via Arc<RwLock<>>)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IngestKind {
    /// Crawl results and fetch weather for a list of years.
    Years,
    /// Refetch weather for the race dates already stored.
    WeatherRefresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum YearStage {
    Pending,
    Crawling,
    StoringResults,
    FetchingWeather,
    StoringWeather,
    Done,
    Failed,
}

/// Progress of one year within a run.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct YearIngestStatus {
    pub year: i32,
    pub stage: YearStage,
    pub race_date: Option<NaiveDate>,
    pub pages_fetched: usize,
    /// "exhausted", "truncated" or "aborted: <reason>"
    pub crawl_outcome: Option<String>,
    pub results_stored: u64,
    pub weather_stored: u64,
    /// Non-fatal problems, e.g. a site whose weather could not be fetched.
    pub warnings: Vec<String>,
}

impl YearIngestStatus {
    fn pending(year: i32) -> Self {
        Self {
            year,
            stage: YearStage::Pending,
            race_date: None,
            pages_fetched: 0,
            crawl_outcome: None,
            results_stored: 0,
            weather_stored: 0,
            warnings: Vec::new(),
        }
    }
}

/// Current or last ingestion run, exposed via the status endpoint.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct IngestState {
    pub running: bool,
    pub run_id: Option<Uuid>,
    pub kind: Option<IngestKind>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_run_duration_ms: Option<u64>,
    pub total_runs: u64,
    /// Error that ended the last run early, if any.
    pub last_error: Option<String>,
    pub years: Vec<YearIngestStatus>,
}

/// Shared ingest state handle.
pub type SharedIngestState = Arc<RwLock<IngestState>>;

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestJob {
    Years {
        years: Vec<i32>,
        /// Replace the stored rows of each year.
        replace: bool,
        /// Wipe both tables before the first year.
        force_rebuild: bool,
    },
    WeatherRefresh,
}

impl IngestJob {
    fn kind(&self) -> IngestKind {
        match self {
            IngestJob::Years { .. } => IngestKind::Years,
            IngestJob::WeatherRefresh => IngestKind::WeatherRefresh,
        }
    }
}

/// Response body of an accepted ingest request.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IngestAccepted {
    pub run_id: Uuid,
    pub kind: IngestKind,
    pub years: Vec<i32>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct IngestService {
    pool: SqlitePool,
    crawler: CrawlContext,
    weather: OpenMeteoClient,
    window: RaceWindow,
    state: SharedIngestState,
    run_lock: Arc<Mutex<()>>,
}

impl IngestService {
    pub fn new(
        pool: SqlitePool,
        crawler: CrawlContext,
        weather: OpenMeteoClient,
        window: RaceWindow,
    ) -> Self {
        Self {
            pool,
            crawler,
            weather,
            window,
            state: Arc::new(RwLock::new(IngestState::default())),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn state(&self) -> SharedIngestState {
        self.state.clone()
    }

    /// Validate a years job and start it in the background.
    ///
    /// Years outside the supported range are rejected before any network
    /// activity. Without `replace`, a year that already has results is a
    /// conflict.
    pub async fn start_years(
        &self,
        years: Vec<i32>,
        replace: bool,
        force_rebuild: bool,
    ) -> Result<IngestAccepted, AppError> {
        for &year in &years {
            validate_year(year)?;
        }
        if years.is_empty() {
            return Err(AppError::BadRequest("no years to ingest".to_string()));
        }
        if !replace && !force_rebuild {
            for &year in &years {
                if queries::year_exists(&self.pool, year).await? {
                    return Err(AppError::Conflict(format!(
                        "Year {} already has results; pass replace=true to re-ingest it",
                        year
                    )));
                }
            }
        }

        self.spawn(IngestJob::Years {
            years,
            replace,
            force_rebuild,
        })
    }

    /// Start a weather-only refresh in the background.
    pub fn start_weather_refresh(&self) -> Result<IngestAccepted, AppError> {
        self.spawn(IngestJob::WeatherRefresh)
    }

    fn spawn(&self, job: IngestJob) -> Result<IngestAccepted, AppError> {
        let guard = self.run_lock.clone().try_lock_owned().map_err(|_| {
            AppError::Conflict("An ingestion run is already in progress".to_string())
        })?;

        let run_id = Uuid::new_v4();
        let accepted = IngestAccepted {
            run_id,
            kind: job.kind(),
            years: match &job {
                IngestJob::Years { years, .. } => years.clone(),
                IngestJob::WeatherRefresh => Vec::new(),
            },
        };

        let service = self.clone();
        tokio::spawn(async move {
            service.run(guard, run_id, job).await;
        });
        Ok(accepted)
    }

    /// Execute a job while holding the run lock, publishing progress.
    async fn run(&self, _guard: OwnedMutexGuard<()>, run_id: Uuid, job: IngestJob) {
        let started_at = Utc::now();
        {
            let mut s = self.state.write().await;
            s.running = true;
            s.run_id = Some(run_id);
            s.kind = Some(job.kind());
            s.started_at = Some(started_at);
            s.finished_at = None;
            s.last_run_duration_ms = None;
            s.last_error = None;
            s.years = match &job {
                IngestJob::Years { years, .. } => {
                    years.iter().copied().map(YearIngestStatus::pending).collect()
                }
                IngestJob::WeatherRefresh => Vec::new(),
            };
        }
        tracing::info!(%run_id, kind = ?job.kind(), "Ingestion run started");

        let result = match job {
            IngestJob::Years {
                years,
                replace,
                force_rebuild,
            } => self.ingest_years(&years, replace, force_rebuild).await,
            IngestJob::WeatherRefresh => self.refresh_weather().await,
        };

        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        let mut s = self.state.write().await;
        s.running = false;
        s.finished_at = Some(finished_at);
        s.last_run_duration_ms = Some(duration_ms);
        s.total_runs += 1;
        match result {
            Ok(()) => tracing::info!(%run_id, duration_ms, "Ingestion run completed"),
            Err(e) => {
                tracing::error!(%run_id, "Ingestion run failed: {}", e);
                s.last_error = Some(e.to_string());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Pipelines
    // -----------------------------------------------------------------------

    async fn ingest_years(
        &self,
        years: &[i32],
        replace: bool,
        force_rebuild: bool,
    ) -> Result<(), AppError> {
        if force_rebuild {
            tracing::warn!("Force rebuild: clearing all stored results and weather");
            queries::clear_all(&self.pool).await?;
        }

        for (i, &year) in years.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.crawler.year_delay()).await;
            }
            if let Err(e) = self.ingest_year(year, replace || force_rebuild).await {
                self.set_stage(year, YearStage::Failed).await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn ingest_year(&self, year: i32, replace: bool) -> Result<(), AppError> {
        self.set_stage(year, YearStage::Crawling).await;
        let crawl = self.crawler.crawl_year(year).await;
        self.update_year(year, |y| {
            y.race_date = crawl.race_date;
            y.pages_fetched = crawl.pages_fetched;
            y.crawl_outcome = Some(crawl.outcome.to_string());
        })
        .await;

        if crawl.results.is_empty() {
            tracing::warn!(year, "No results collected, keeping stored data");
            self.update_year(year, |y| {
                y.stage = YearStage::Done;
                y.warnings.push("no results collected".to_string());
            })
            .await;
            return Ok(());
        }

        self.set_stage(year, YearStage::StoringResults).await;
        let stored = queries::insert_results(&self.pool, &crawl.results, replace)
            .await
            .map_err(|e| {
                tracing::error!(year, stage = "store_results", "Failed to store results: {}", e);
                e
            })?;
        self.update_year(year, |y| y.results_stored = stored).await;

        self.store_weather(year, crawl.race_date).await?;
        self.set_stage(year, YearStage::Done).await;
        Ok(())
    }

    async fn refresh_weather(&self) -> Result<(), AppError> {
        let dates = queries::race_dates_by_year(&self.pool).await?;
        if dates.is_empty() {
            tracing::warn!("No stored race dates, nothing to refresh");
            return Ok(());
        }

        {
            let mut s = self.state.write().await;
            s.years = dates
                .iter()
                .map(|(&year, &date)| YearIngestStatus {
                    race_date: Some(date),
                    ..YearIngestStatus::pending(year)
                })
                .collect();
        }

        for (year, date) in dates {
            if let Err(e) = self.store_weather(year, Some(date)).await {
                self.set_stage(year, YearStage::Failed).await;
                return Err(e);
            }
            self.set_stage(year, YearStage::Done).await;
        }
        Ok(())
    }

    /// Fetch both sites for the race day, join the race window and replace the
    /// year's weather. A site that cannot be fetched is skipped.
    async fn store_weather(&self, year: i32, race_date: Option<NaiveDate>) -> Result<(), AppError> {
        let Some(date) = race_date else {
            tracing::warn!(year, "Race date unknown, skipping weather");
            self.update_year(year, |y| y.warnings.push("race date unknown".to_string()))
                .await;
            return Ok(());
        };

        self.set_stage(year, YearStage::FetchingWeather).await;
        let mut records: Vec<WeatherRecord> = Vec::new();
        for location in Location::ALL {
            match self.weather.fetch_hourly(location, date).await {
                Ok(series) => {
                    records.extend(join_race_window(
                        &series,
                        year,
                        Some(date),
                        location,
                        self.window,
                    ));
                }
                Err(e) => {
                    tracing::error!(year, %location, stage = "fetch_weather", "{}", e);
                    self.update_year(year, |y| {
                        y.warnings.push(format!("{} weather: {}", location, e))
                    })
                    .await;
                }
            }
        }

        if records.is_empty() {
            tracing::warn!(year, %date, "No weather in the race window");
            return Ok(());
        }

        self.set_stage(year, YearStage::StoringWeather).await;
        let stored = queries::insert_weather(&self.pool, &records, true)
            .await
            .map_err(|e| {
                tracing::error!(year, stage = "store_weather", "Failed to store weather: {}", e);
                e
            })?;
        self.update_year(year, |y| y.weather_stored = stored).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // State helpers
    // -----------------------------------------------------------------------

    async fn set_stage(&self, year: i32, stage: YearStage) {
        self.update_year(year, |y| y.stage = stage).await;
    }

    async fn update_year(&self, year: i32, f: impl FnOnce(&mut YearIngestStatus)) {
        let mut s = self.state.write().await;
        if let Some(status) = s.years.iter_mut().find(|y| y.year == year) {
            f(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::services::results_page::tests::{results_page_html, row};
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hourly_body() -> serde_json::Value {
        let time: Vec<String> = (0..24).map(|h| format!("2024-10-06T{:02}:00", h)).collect();
        let wind: Vec<f64> = (0..24).map(|h| h as f64).collect();
        serde_json::json!({
            "hourly": {
                "time": time,
                "temperature_2m": wind.iter().map(|w| w + 50.0).collect::<Vec<_>>(),
                "windspeed_10m": wind,
                "winddirection_10m": vec![270.0; 24],
                "wind_gusts_10m": vec![20.0; 24]
            }
        })
    }

    async fn mount_results(server: &MockServer, year: &str) {
        Mock::given(method("GET"))
            .and(path("/Results.aspx"))
            .and(query_param("y", year))
            .respond_with(ResponseTemplate::new(200).set_body_string(results_page_html(
                &[row("1", "Ada", "55:00"), row("2", "Bo", "1:01:30")],
                false,
                "vs",
            )))
            .mount(server)
            .await;
    }

    async fn mount_weather(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/archive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(hourly_body()))
            .mount(server)
            .await;
    }

    fn service(pool: SqlitePool, results: &MockServer, weather: &MockServer) -> IngestService {
        let crawler = CrawlContext::new(
            &format!("{}/Results.aspx?id=11068", results.uri()),
            "diablo-test",
            Duration::ZERO,
            Duration::ZERO,
            100,
        )
        .unwrap();
        let weather =
            OpenMeteoClient::new(&format!("{}/archive", weather.uri()), "America/Los_Angeles")
                .unwrap();
        IngestService::new(pool, crawler, weather, RaceWindow::default())
    }

    async fn run_job(service: &IngestService, job: IngestJob) {
        let guard = service.run_lock.clone().try_lock_owned().unwrap();
        service.run(guard, Uuid::new_v4(), job).await;
    }

    #[tokio::test]
    async fn test_ingest_year_stores_results_and_weather() {
        let (results, weather) = (MockServer::start().await, MockServer::start().await);
        mount_results(&results, "2024").await;
        mount_weather(&weather).await;
        let pool = test_pool().await;
        let service = service(pool.clone(), &results, &weather);

        run_job(
            &service,
            IngestJob::Years {
                years: vec![2024],
                replace: true,
                force_rebuild: false,
            },
        )
        .await;

        let counts = queries::table_counts(&pool).await.unwrap();
        assert_eq!(counts.race_results, 2);
        assert_eq!(counts.weather_data, 10);

        let state = service.state().read().await.clone();
        assert!(!state.running);
        assert_eq!(state.total_runs, 1);
        assert_eq!(state.kind, Some(IngestKind::Years));
        assert!(state.last_error.is_none());
        let year = &state.years[0];
        assert_eq!(year.stage, YearStage::Done);
        assert_eq!(year.race_date, NaiveDate::from_ymd_opt(2024, 10, 6));
        assert_eq!(year.crawl_outcome.as_deref(), Some("exhausted"));
        assert_eq!((year.results_stored, year.weather_stored), (2, 10));
    }

    #[tokio::test]
    async fn test_reingest_with_replace_is_idempotent() {
        let (results, weather) = (MockServer::start().await, MockServer::start().await);
        mount_results(&results, "2024").await;
        mount_weather(&weather).await;
        let pool = test_pool().await;
        let service = service(pool.clone(), &results, &weather);

        let job = IngestJob::Years {
            years: vec![2024],
            replace: true,
            force_rebuild: false,
        };
        run_job(&service, job.clone()).await;
        run_job(&service, job).await;

        let counts = queries::table_counts(&pool).await.unwrap();
        assert_eq!(counts.race_results, 2);
        assert_eq!(counts.weather_data, 10);
        assert_eq!(service.state().read().await.total_runs, 2);
    }

    #[tokio::test]
    async fn test_weather_failure_keeps_results() {
        let (results, weather) = (MockServer::start().await, MockServer::start().await);
        mount_results(&results, "2024").await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&weather)
            .await;
        let pool = test_pool().await;
        let service = service(pool.clone(), &results, &weather);

        run_job(
            &service,
            IngestJob::Years {
                years: vec![2024],
                replace: true,
                force_rebuild: false,
            },
        )
        .await;

        let counts = queries::table_counts(&pool).await.unwrap();
        assert_eq!(counts.race_results, 2);
        assert_eq!(counts.weather_data, 0);
        let state = service.state().read().await.clone();
        assert_eq!(state.years[0].stage, YearStage::Done);
        assert_eq!(state.years[0].warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_aborted_year_does_not_stop_later_years() {
        let (results, weather) = (MockServer::start().await, MockServer::start().await);
        Mock::given(method("GET"))
            .and(query_param("y", "2022"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&results)
            .await;
        mount_results(&results, "2023").await;
        mount_weather(&weather).await;
        let pool = test_pool().await;
        let service = service(pool.clone(), &results, &weather);

        run_job(
            &service,
            IngestJob::Years {
                years: vec![2022, 2023],
                replace: true,
                force_rebuild: false,
            },
        )
        .await;

        assert_eq!(queries::list_years(&pool).await.unwrap(), vec![2023]);
        let state = service.state().read().await.clone();
        assert!(state.years[0]
            .crawl_outcome
            .as_deref()
            .is_some_and(|o| o.starts_with("aborted")));
        assert_eq!(state.years[1].results_stored, 2);
    }

    #[tokio::test]
    async fn test_force_rebuild_clears_other_years() {
        let (results, weather) = (MockServer::start().await, MockServer::start().await);
        mount_results(&results, "2024").await;
        mount_results(&results, "2019").await;
        mount_weather(&weather).await;
        let pool = test_pool().await;
        let service = service(pool.clone(), &results, &weather);

        run_job(
            &service,
            IngestJob::Years {
                years: vec![2019],
                replace: true,
                force_rebuild: false,
            },
        )
        .await;
        run_job(
            &service,
            IngestJob::Years {
                years: vec![2024],
                replace: false,
                force_rebuild: true,
            },
        )
        .await;

        assert_eq!(queries::list_years(&pool).await.unwrap(), vec![2024]);
    }

    #[tokio::test]
    async fn test_weather_refresh_uses_stored_dates() {
        let (results, weather) = (MockServer::start().await, MockServer::start().await);
        mount_results(&results, "2024").await;
        let pool = test_pool().await;
        let service = service(pool.clone(), &results, &weather);

        // First run without a reachable weather API stores results only.
        run_job(
            &service,
            IngestJob::Years {
                years: vec![2024],
                replace: true,
                force_rebuild: false,
            },
        )
        .await;
        assert_eq!(queries::table_counts(&pool).await.unwrap().weather_data, 0);

        mount_weather(&weather).await;
        run_job(&service, IngestJob::WeatherRefresh).await;

        assert_eq!(queries::table_counts(&pool).await.unwrap().weather_data, 10);
        let state = service.state().read().await.clone();
        assert_eq!(state.kind, Some(IngestKind::WeatherRefresh));
        assert_eq!(state.years.len(), 1);
        assert_eq!(state.years[0].stage, YearStage::Done);
    }

    #[tokio::test]
    async fn test_start_rejects_out_of_range_year() {
        let (results, weather) = (MockServer::start().await, MockServer::start().await);
        let service = service(test_pool().await, &results, &weather);

        let err = service.start_years(vec![2017], true, false).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        let err = service.start_years(vec![2031], true, false).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_start_without_replace_conflicts_on_existing_year() {
        let (results, weather) = (MockServer::start().await, MockServer::start().await);
        mount_results(&results, "2024").await;
        mount_weather(&weather).await;
        let pool = test_pool().await;
        let service = service(pool, &results, &weather);
        run_job(
            &service,
            IngestJob::Years {
                years: vec![2024],
                replace: true,
                force_rebuild: false,
            },
        )
        .await;

        let err = service.start_years(vec![2024], false, false).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_start_while_running_conflicts() {
        let (results, weather) = (MockServer::start().await, MockServer::start().await);
        let service = service(test_pool().await, &results, &weather);

        let _held = service.run_lock.clone().try_lock_owned().unwrap();

        let err = service.start_weather_refresh().unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let err = service.start_years(vec![2024], true, false).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
