//! Raw observations → canonical rows.
//!
//! Values are coerced first and rows that fail coercion are dropped; only the
//! surviving rows have their dates parsed. An unparseable date on a surviving
//! row means the upstream contract is broken and fails the run.

use crate::models::{CanonicalRow, Observation};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::debug;

/// Upstream marker for "no observation on this date".
pub const MISSING_MARKER: &str = ".";

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Rows(Vec<CanonicalRow>),
    EmptyUpstream,
    EmptyAfterCleaning,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unparseable observation date {0:?}")]
pub struct InvalidDate(pub String);

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Strict numeric coercion: "5137.21" → 5137.21 | "." / "" / "n/a" / "inf" → None
pub fn parse_value(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == MISSING_MARKER {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Calendar date with any time-of-day component stripped.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }

    None
}

// ── Observations → rows ───────────────────────────────────────────────────────

pub fn normalize(raw: &[Observation]) -> Result<Normalized, InvalidDate> {
    if raw.is_empty() {
        return Ok(Normalized::EmptyUpstream);
    }

    let mut rows = Vec::with_capacity(raw.len());
    for obs in raw {
        let Some(metric_value) = obs.value.as_deref().and_then(parse_value) else {
            debug!("Dropping {} (value {:?})", obs.date, obs.value);
            continue;
        };
        let date = parse_date(&obs.date).ok_or_else(|| InvalidDate(obs.date.clone()))?;
        rows.push(CanonicalRow { date, metric_value });
    }

    if rows.is_empty() {
        Ok(Normalized::EmptyAfterCleaning)
    } else {
        Ok(Normalized::Rows(rows))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
