//! Persistence boundary for race results and weather observations.
//!
//! Both tables are year-scoped: re-ingesting a year with `replace_existing`
//! deletes every row of that year in the same transaction as the insert, so
//! running the same year twice never duplicates rows.

use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};

use super::models::{RaceResult, TableCounts, WeatherRecord};

const RACE_RESULT_COLUMNS: &str = "year, race_date, place, name, team, city_state, gender, \
     gender_place, age, age_place, chip_time_text, chip_time_seconds, pace, start_time";

const WEATHER_COLUMNS: &str = "year, race_date, timestamp, location, temperature_f, \
     wind_speed_mph, wind_direction_deg, wind_gust_mph";

/// Whether any race result exists for `year`.
pub async fn year_exists(pool: &SqlitePool, year: i32) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM race_results WHERE year = ?")
        .bind(year)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Insert race results. With `replace_existing`, all rows of every year in
/// the batch are deleted first.
pub async fn insert_results(
    pool: &SqlitePool,
    rows: &[RaceResult],
    replace_existing: bool,
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    if replace_existing {
        let years: BTreeSet<i32> = rows.iter().map(|r| r.year).collect();
        for year in years {
            let deleted = sqlx::query("DELETE FROM race_results WHERE year = ?")
                .bind(year)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if deleted > 0 {
                tracing::info!(year, deleted, "Replacing existing race results");
            }
        }
    }

    let sql = format!(
        "INSERT INTO race_results ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        RACE_RESULT_COLUMNS
    );
    let mut inserted = 0;
    for row in rows {
        inserted += sqlx::query(&sql)
            .bind(row.year)
            .bind(row.race_date)
            .bind(row.place)
            .bind(&row.name)
            .bind(&row.team)
            .bind(&row.city_state)
            .bind(&row.gender)
            .bind(&row.gender_place)
            .bind(row.age)
            .bind(&row.age_place)
            .bind(&row.chip_time_text)
            .bind(row.chip_time_seconds)
            .bind(&row.pace)
            .bind(&row.start_time)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }

    tx.commit().await?;
    tracing::info!("Inserted {} race results", inserted);
    Ok(inserted)
}

/// Insert weather observations. With `replace_existing`, all rows of every
/// year in the batch are deleted first.
pub async fn insert_weather(
    pool: &SqlitePool,
    rows: &[WeatherRecord],
    replace_existing: bool,
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    if replace_existing {
        let years: BTreeSet<i32> = rows.iter().map(|r| r.year).collect();
        for year in years {
            sqlx::query("DELETE FROM weather_data WHERE year = ?")
                .bind(year)
                .execute(&mut *tx)
                .await?;
        }
    }

    let sql = format!(
        "INSERT INTO weather_data ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        WEATHER_COLUMNS
    );
    let mut inserted = 0;
    for row in rows {
        inserted += sqlx::query(&sql)
            .bind(row.year)
            .bind(row.race_date)
            .bind(row.timestamp)
            .bind(row.location)
            .bind(row.temperature_f)
            .bind(row.wind_speed_mph)
            .bind(row.wind_direction_deg)
            .bind(row.wind_gust_mph)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }

    tx.commit().await?;
    tracing::info!("Inserted {} weather records", inserted);
    Ok(inserted)
}

/// Wipe both tables (forced full rebuild).
pub async fn clear_all(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM race_results")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM weather_data")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    tracing::info!("Cleared all race results and weather data");
    Ok(())
}

/// All race results, ordered by year then place (unplaced rows last).
pub async fn list_results(pool: &SqlitePool) -> Result<Vec<RaceResult>, sqlx::Error> {
    sqlx::query_as::<_, RaceResult>(&format!(
        "SELECT {} FROM race_results ORDER BY year, place IS NULL, place, id",
        RACE_RESULT_COLUMNS
    ))
    .fetch_all(pool)
    .await
}

/// All weather observations, ordered by year then timestamp.
pub async fn list_weather(pool: &SqlitePool) -> Result<Vec<WeatherRecord>, sqlx::Error> {
    sqlx::query_as::<_, WeatherRecord>(&format!(
        "SELECT {} FROM weather_data ORDER BY year, timestamp, location",
        WEATHER_COLUMNS
    ))
    .fetch_all(pool)
    .await
}

/// Distinct years with race results, ascending.
pub async fn list_years(pool: &SqlitePool) -> Result<Vec<i32>, sqlx::Error> {
    sqlx::query_scalar("SELECT DISTINCT year FROM race_results ORDER BY year")
        .fetch_all(pool)
        .await
}

/// The stored race date of each year that has one.
pub async fn race_dates_by_year(
    pool: &SqlitePool,
) -> Result<BTreeMap<i32, NaiveDate>, sqlx::Error> {
    let rows: Vec<(i32, NaiveDate)> = sqlx::query_as(
        "SELECT year, MIN(race_date) FROM race_results
         WHERE race_date IS NOT NULL
         GROUP BY year
         ORDER BY year",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().collect())
}

pub async fn table_counts(pool: &SqlitePool) -> Result<TableCounts, sqlx::Error> {
    let race_results: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM race_results")
        .fetch_one(pool)
        .await?;
    let weather_data: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM weather_data")
        .fetch_one(pool)
        .await?;
    Ok(TableCounts {
        race_results,
        weather_data,
    })
}
