//! Postback-driven crawler for the results site.
//!
//! The results grid pages forward by re-POSTing the whole form of the current
//! page with the pager's event fields set, so pages must be walked strictly in
//! order with a cookie-carrying session. One year is crawled at a time:
//!
//! ```text
//! Init ──GET landing──▶ PageFetched ──rows──▶ RowsExtracted ──next link──▶ HasNext
//!                           │                      │                         │
//!                      zero rows               no next link             POST form
//!                           ▼                      ▼                         │
//!                       Exhausted ◀────────────────┘        PageFetched ◀────┘
//! ```
//!
//! A transport failure aborts only the current year; rows collected so far
//! are kept. The page bound ends the walk as a truncation.

use chrono::NaiveDate;
use std::fmt;
use std::time::Duration;

use crate::config::AppConfig;
use crate::db::models::RaceResult;
use crate::errors::AppError;
use crate::services::results_page::{parse_page, race_date_from_html, ParsedPage, PostbackForm};

/// Overall timeout for a single page request.
const REQUEST_TIMEOUT_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Crawl context
// ---------------------------------------------------------------------------

/// Everything a crawl needs: the HTTP session, the site address and the
/// politeness settings.
#[derive(Debug, Clone)]
pub struct CrawlContext {
    client: reqwest::Client,
    base_url: String,
    page_delay: Duration,
    year_delay: Duration,
    max_pages: usize,
}

impl CrawlContext {
    pub fn new(
        base_url: &str,
        user_agent: &str,
        page_delay: Duration,
        year_delay: Duration,
        max_pages: usize,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            page_delay,
            year_delay,
            max_pages,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(
            &config.results_base_url,
            &config.scraper_user_agent,
            config.page_delay,
            config.year_delay,
            config.max_pages_per_year,
        )
    }

    /// Landing page of one year's results. The base URL already carries the
    /// event id query parameter.
    pub fn year_url(&self, year: i32) -> String {
        format!("{}&y={}", self.base_url, year)
    }

    /// Pause between two consecutive years.
    pub fn year_delay(&self) -> Duration {
        self.year_delay
    }
}

// ---------------------------------------------------------------------------
// Crawl report
// ---------------------------------------------------------------------------

/// How a year's crawl ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// The last page had no "next" link or no rows.
    Exhausted,
    /// The page bound was reached with more pages available.
    Truncated,
    /// A request failed; rows from earlier pages are kept.
    Aborted(String),
}

impl fmt::Display for CrawlOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlOutcome::Exhausted => f.write_str("exhausted"),
            CrawlOutcome::Truncated => f.write_str("truncated"),
            CrawlOutcome::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// Result of crawling one year.
#[derive(Debug, Clone)]
pub struct YearCrawl {
    pub year: i32,
    pub race_date: Option<NaiveDate>,
    /// Rows of every fetched page in page order, stamped with `race_date`.
    pub results: Vec<RaceResult>,
    pub pages_fetched: usize,
    pub outcome: CrawlOutcome,
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

enum CrawlState {
    Init,
    PageFetched(String),
    RowsExtracted(ParsedPage),
    HasNext(PostbackForm),
    Exhausted,
}

impl CrawlContext {
    /// Walk every results page of `year`.
    pub async fn crawl_year(&self, year: i32) -> YearCrawl {
        let url = self.year_url(year);
        let mut results: Vec<RaceResult> = Vec::new();
        let mut race_date = None;
        let mut pages_fetched = 0usize;
        let mut state = CrawlState::Init;

        tracing::info!(year, "Crawling results from {}", url);

        let outcome = loop {
            state = match state {
                CrawlState::Init => match self.fetch_landing(&url).await {
                    Ok(html) => {
                        pages_fetched += 1;
                        race_date = race_date_from_html(&html);
                        if let Some(date) = race_date {
                            tracing::info!(year, %date, "Resolved race date");
                        }
                        CrawlState::PageFetched(html)
                    }
                    Err(e) => break CrawlOutcome::Aborted(e.to_string()),
                },

                CrawlState::PageFetched(html) => {
                    let page = parse_page(&html, year);
                    if page.rows.is_empty() {
                        tracing::info!(year, page = pages_fetched, "No more data");
                        CrawlState::Exhausted
                    } else {
                        CrawlState::RowsExtracted(page)
                    }
                }

                CrawlState::RowsExtracted(page) => {
                    tracing::debug!(
                        year,
                        page = pages_fetched,
                        rows = page.rows.len(),
                        "Extracted page rows"
                    );
                    results.extend(page.rows);
                    match page.next_page {
                        Some(form) => CrawlState::HasNext(form),
                        None => CrawlState::Exhausted,
                    }
                }

                CrawlState::HasNext(form) => {
                    if pages_fetched >= self.max_pages {
                        tracing::warn!(
                            year,
                            max_pages = self.max_pages,
                            "Page limit reached, results truncated"
                        );
                        break CrawlOutcome::Truncated;
                    }
                    if form.get("__VIEWSTATE").is_none() {
                        tracing::warn!(
                            year,
                            page = pages_fetched,
                            "Page has no __VIEWSTATE field"
                        );
                    }
                    tracing::debug!(
                        year,
                        page = pages_fetched,
                        fields = form.field_count(),
                        "Posting back for next page"
                    );
                    tokio::time::sleep(self.page_delay).await;
                    match self.post_form(&url, form.next_page()).await {
                        Ok(html) => {
                            pages_fetched += 1;
                            CrawlState::PageFetched(html)
                        }
                        Err(e) => break CrawlOutcome::Aborted(e.to_string()),
                    }
                }

                CrawlState::Exhausted => break CrawlOutcome::Exhausted,
            };
        };

        for row in &mut results {
            row.race_date = race_date;
        }

        match &outcome {
            CrawlOutcome::Aborted(reason) => tracing::error!(
                year,
                pages = pages_fetched,
                rows = results.len(),
                "Crawl aborted: {}",
                reason
            ),
            _ => tracing::info!(
                year,
                pages = pages_fetched,
                rows = results.len(),
                "Crawl finished ({})",
                outcome
            ),
        }

        YearCrawl {
            year,
            race_date,
            results,
            pages_fetched,
            outcome,
        }
    }

    async fn fetch_landing(&self, url: &str) -> Result<String, AppError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("results request failed: {}", e)))?;
        read_page(response).await
    }

    async fn post_form(&self, url: &str, form: PostbackForm) -> Result<String, AppError> {
        let response = self
            .client
            .post(url)
            .form(form.fields())
            .send()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("results postback failed: {}", e)))?;
        read_page(response).await
    }
}

async fn read_page(response: reqwest::Response) -> Result<String, AppError> {
    if !response.status().is_success() {
        return Err(AppError::ExternalServiceError(format!(
            "results site returned HTTP {}",
            response.status()
        )));
    }
    response
        .text()
        .await
        .map_err(|e| AppError::ExternalServiceError(format!("results body read failed: {}", e)))
}
