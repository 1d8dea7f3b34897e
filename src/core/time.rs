//! Timestamp helpers and `--since` expression parsing.

use crate::core::error::RecapError;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use ulid::Ulid;

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Parse a `--since` expression into an inclusive lower bound.
///
/// Accepted forms:
/// - relative: `yesterday`, `today`, `N day(s)/week(s)/month(s) ago`
/// - absolute date: `YYYY-MM-DD` (calendar-day granularity, UTC)
/// - absolute datetime: RFC3339 (explicit time-of-day wins)
pub fn parse_since_expr(expr: &str) -> Result<DateTime<Utc>, RecapError> {
    parse_since_at(expr, Utc::now())
}

/// Testable variant of `parse_since_expr` with an explicit "now".
pub fn parse_since_at(expr: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, RecapError> {
    let expr = expr.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(expr) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(expr, "%Y-%m-%d") {
        return Ok(start_of_day(date));
    }

    let lowered = expr.to_ascii_lowercase();
    match lowered.as_str() {
        "today" => return Ok(start_of_day(now.date_naive())),
        "yesterday" => return Ok(start_of_day(now.date_naive() - Duration::days(1))),
        _ => {}
    }

    // "N unit(s) ago", resolved to the start of the resulting day.
    let parts: Vec<&str> = lowered.split_whitespace().collect();
    if parts.len() == 3 && parts[2] == "ago" {
        let n: i64 = parts[0].parse().map_err(|_| {
            RecapError::ValidationError(format!("invalid --since expression: '{}'", expr))
        })?;
        let days = match parts[1].trim_end_matches('s') {
            "day" => n,
            "week" => n * 7,
            "month" => n * 30,
            _ => {
                return Err(RecapError::ValidationError(format!(
                    "invalid --since unit in '{}'; use days, weeks, or months",
                    expr
                )));
            }
        };
        return Ok(start_of_day((now - Duration::days(days)).date_naive()));
    }

    Err(RecapError::ValidationError(format!(
        "invalid --since expression: '{}'. Use 'yesterday', 'N days ago', YYYY-MM-DD, or RFC3339",
        expr
    )))
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid"))
}
