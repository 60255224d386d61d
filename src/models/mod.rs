use chrono::NaiveDate;
use serde::Deserialize;
use std::fmt;

// ── Raw upstream payload ──────────────────────────────────────────────────────

/// Body of the observations endpoint. Only the `observations` array is read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservationsResponse {
    #[serde(default)]
    pub observations: Vec<Observation>,
}

/// One raw observation as served upstream; `value` is text, `"."` when missing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Observation {
    pub date: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[cfg(test)]
impl Observation {
    pub fn new(date: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            value: Some(value.into()),
        }
    }
}

// ── Request window ────────────────────────────────────────────────────────────

/// The job only ever asks for the most recent observations first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationWindow {
    pub series_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub sort_order: SortOrder,
    pub limit: u32,
}

impl fmt::Display for ObservationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} → {} ({}, limit {})",
            self.series_id,
            self.start_date,
            self.end_date,
            self.sort_order.as_str(),
            self.limit
        )
    }
}

// ── Canonical row ─────────────────────────────────────────────────────────────

/// The cleaned unit persisted to both sinks. `metric_value` is always finite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanonicalRow {
    pub date: NaiveDate,
    pub metric_value: f64,
}

// ── Run outcome ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    Loaded(usize),
    EmptyUpstream,
    EmptyAfterCleaning,
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunResult::Loaded(n) => write!(f, "success {} rows", n),
            RunResult::EmptyUpstream => f.write_str("no data"),
            RunResult::EmptyAfterCleaning => f.write_str("empty"),
        }
    }
}
