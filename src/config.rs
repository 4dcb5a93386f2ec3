use std::time::Duration;

/// Earliest race year the results site carries.
pub const MIN_SUPPORTED_YEAR: i32 = 2018;
/// Latest race year accepted by ingestion.
pub const MAX_SUPPORTED_YEAR: i32 = 2030;

const DEFAULT_RESULTS_BASE_URL: &str =
    "https://mountdiablochallenge.itsyourrace.com/Results.aspx?id=11068";
const DEFAULT_WEATHER_API_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Errors raised while reading configuration. All of them are reported before
/// any network activity starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error(
        "Year {0} is outside the supported range {min}-{max}",
        min = MIN_SUPPORTED_YEAR,
        max = MAX_SUPPORTED_YEAR
    )]
    YearOutOfRange(i32),

    #[error("Race window {start}..={end} is not a valid local-hour range")]
    InvalidWindow { start: u32, end: u32 },
}

/// Local-hour range (inclusive) during which weather is relevant to the race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl RaceWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Result<Self, ConfigError> {
        if start_hour > 23 || end_hour > 23 || start_hour > end_hour {
            return Err(ConfigError::InvalidWindow {
                start: start_hour,
                end: end_hour,
            });
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    pub fn contains(&self, hour: u32) -> bool {
        (self.start_hour..=self.end_hour).contains(&hour)
    }
}

impl Default for RaceWindow {
    fn default() -> Self {
        Self {
            start_hour: 7,
            end_hour: 11,
        }
    }
}

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub results_base_url: String,
    pub weather_api_url: String,
    pub weather_timezone: String,
    pub scraper_user_agent: String,
    /// Years ingested by the startup run, ascending.
    pub race_years: Vec<i32>,
    pub race_window: RaceWindow,
    pub page_delay: Duration,
    pub year_delay: Duration,
    pub max_pages_per_year: usize,
    pub ingest_on_startup: bool,
    /// Wipe both tables before the startup run.
    pub force_rebuild: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup (env vars in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let race_window = RaceWindow::new(
            parse_number(&lookup, "RACE_START_HOUR", 7)?,
            parse_number(&lookup, "RACE_END_HOUR", 11)?,
        )?;

        Ok(Self {
            database_url: get_or(
                "DATABASE_URL",
                "sqlite://data/diablo_challenge.db?mode=rwc",
            ),
            port: parse_number(&lookup, "PORT", 8080)?,
            results_base_url: get_or("RESULTS_BASE_URL", DEFAULT_RESULTS_BASE_URL),
            weather_api_url: get_or("WEATHER_API_URL", DEFAULT_WEATHER_API_URL),
            weather_timezone: get_or("WEATHER_TIMEZONE", "America/Los_Angeles"),
            scraper_user_agent: get_or("SCRAPER_USER_AGENT", DEFAULT_USER_AGENT),
            race_years: parse_years(&get_or("RACE_YEARS", "2018-2025"))?,
            race_window,
            page_delay: Duration::from_millis(parse_number(&lookup, "PAGE_DELAY_MS", 500)?),
            year_delay: Duration::from_millis(parse_number(&lookup, "YEAR_DELAY_MS", 1000)?),
            max_pages_per_year: parse_number(&lookup, "MAX_PAGES_PER_YEAR", 100)?,
            ingest_on_startup: parse_flag(&lookup, "INGEST_ON_STARTUP")?,
            force_rebuild: parse_flag(&lookup, "FORCE_REBUILD")?,
        })
    }
}

/// Reject a year outside the range the results site supports.
pub fn validate_year(year: i32) -> Result<i32, ConfigError> {
    if (MIN_SUPPORTED_YEAR..=MAX_SUPPORTED_YEAR).contains(&year) {
        Ok(year)
    } else {
        Err(ConfigError::YearOutOfRange(year))
    }
}

/// Parse a year list: either an inclusive range `2018-2025` or a comma list
/// `2018,2019,2021`. The result is sorted and deduplicated.
pub fn parse_years(raw: &str) -> Result<Vec<i32>, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "RACE_YEARS",
        message,
    };
    let parse_one = |s: &str| {
        s.trim()
            .parse::<i32>()
            .map_err(|e| invalid(format!("'{}': {}", s.trim(), e)))
    };

    let mut years = if let Some((from, to)) = raw.split_once('-') {
        let (from, to) = (parse_one(from)?, parse_one(to)?);
        if from > to {
            return Err(invalid(format!("empty range {}-{}", from, to)));
        }
        (from..=to).collect::<Vec<_>>()
    } else {
        raw.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(parse_one)
            .collect::<Result<Vec<_>, _>>()?
    };

    if years.is_empty() {
        return Err(invalid("no years given".to_string()));
    }
    for &year in &years {
        validate_year(year)?;
    }
    years.sort_unstable();
    years.dedup();
    Ok(years)
}

fn parse_number<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            message: format!("'{}': {}", raw, e),
        }),
        None => Ok(default),
    }
}

fn parse_flag<F>(lookup: &F, key: &'static str) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("no") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            key,
            message: format!("'{}' is not a boolean", other),
        }),
    }
}
