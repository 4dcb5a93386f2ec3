//! Pearson correlation across years.

use serde::Serialize;
use utoipa::ToSchema;

use crate::helpers::{round_to, seconds_to_minutes};
use crate::services::stats::CombinedYearRow;

/// Minimum number of complete pairs for a defined coefficient.
const MIN_PAIRS: usize = 2;

/// One year's contribution to the wind/median correlation.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CorrelationPair {
    pub year: i32,
    pub summit_wind_speed_avg: Option<f64>,
    pub median_minutes: f64,
}

/// Correlation between summit mean wind speed and median finishing time.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WindCorrelation {
    /// Pearson r rounded to 3 decimals; `null` with fewer than two complete
    /// years or a constant series.
    pub coefficient: Option<f64>,
    /// Years with both values present.
    pub pairs_used: usize,
    pub pairs: Vec<CorrelationPair>,
}

/// Pearson coefficient over the index-aligned pairs where both values are
/// present. Pairing stops at the shorter sequence.
pub fn pearson(xs: &[Option<f64>], ys: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < MIN_PAIRS {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        let (dx, dy) = (x - mean_x, y - mean_y);
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }

    let r = cov / (var_x.sqrt() * var_y.sqrt());
    r.is_finite().then(|| round_to(r.clamp(-1.0, 1.0), 3))
}

/// Correlate summit mean wind with median minutes, aligned by year through
/// the combined table.
pub fn wind_vs_median(rows: &[CombinedYearRow]) -> WindCorrelation {
    let pairs: Vec<CorrelationPair> = rows
        .iter()
        .map(|row| CorrelationPair {
            year: row.stats.year,
            summit_wind_speed_avg: row.summit.as_ref().and_then(|s| s.wind_speed_avg),
            median_minutes: seconds_to_minutes(row.stats.median_seconds),
        })
        .collect();

    let winds: Vec<Option<f64>> = pairs.iter().map(|p| p.summit_wind_speed_avg).collect();
    let medians: Vec<Option<f64>> = pairs.iter().map(|p| Some(p.median_minutes)).collect();

    WindCorrelation {
        coefficient: pearson(&winds, &medians),
        pairs_used: winds.iter().filter(|w| w.is_some()).count(),
        pairs,
    }
}
