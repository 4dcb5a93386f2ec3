//! Shared helpers for rounding and rendering elapsed times.
//!
//! Chip times are stored as seconds (f64). The API exposes them both as
//! minutes (2 decimal places) and as display strings:
//!
//! - `seconds_to_mmss`: `"83:07"` style used by the dashboard
//! - `seconds_to_hms`: `"01:23:07.40"` style used by the statistics endpoints

/// Round to a fixed number of decimal places. Non-finite values pass through.
pub(crate) fn round_to(v: f64, places: i32) -> f64 {
    if !v.is_finite() {
        return v;
    }
    let factor = 10f64.powi(places);
    (v * factor).round() / factor
}

/// Round an optional value, keeping `None`.
pub(crate) fn opt_round_to(v: Option<f64>, places: i32) -> Option<f64> {
    v.map(|x| round_to(x, places))
}

/// Seconds → minutes, rounded to 2 decimal places.
pub(crate) fn seconds_to_minutes(seconds: f64) -> f64 {
    round_to(seconds / 60.0, 2)
}

/// Seconds → `M:SS` (minutes are not wrapped into hours).
pub(crate) fn seconds_to_mmss(seconds: f64) -> String {
    let total = seconds.max(0.0);
    let minutes = (total / 60.0).floor() as u64;
    let secs = (total % 60.0).floor() as u64;
    format!("{}:{:02}", minutes, secs)
}

/// Seconds → `HH:MM:SS.ss`.
///
/// Rounds to centiseconds before splitting so a carry lands in the minutes.
pub(crate) fn seconds_to_hms(seconds: f64) -> String {
    let centis = (seconds.max(0.0) * 100.0).round() as u64;
    let hours = centis / 360_000;
    let minutes = (centis / 6_000) % 60;
    let secs = (centis % 6_000) as f64 / 100.0;
    format!("{:02}:{:02}:{:05.2}", hours, minutes, secs)
}
