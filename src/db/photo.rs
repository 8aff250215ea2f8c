//! Photo records and the lookup key used by the store.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// One uploaded image and its conversion/display state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Photo {
    pub id: i64,
    pub filename: String,
    pub original_path: PathBuf,
    pub display_path: Option<PathBuf>,
    pub uploaded_at: DateTime<Utc>,
    pub converted: bool,
    pub last_displayed: Option<DateTime<Utc>>,
    pub display_count: i64,
}

/// Identifies a photo either by its row id or by its unique filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoKey<'a> {
    Id(i64),
    Filename(&'a str),
}

impl fmt::Display for PhotoKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoKey::Id(id) => write!(f, "photo #{}", id),
            PhotoKey::Filename(name) => write!(f, "photo {}", name),
        }
    }
}

impl From<i64> for PhotoKey<'_> {
    fn from(id: i64) -> Self {
        PhotoKey::Id(id)
    }
}

impl<'a> From<&'a str> for PhotoKey<'a> {
    fn from(filename: &'a str) -> Self {
        PhotoKey::Filename(filename)
    }
}

/// Aggregate counters for the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub converted: u64,
    pub last_display: Option<DateTime<Utc>>,
}

/// Format a timestamp the way it is stored: fixed-width RFC 3339 with
/// microseconds, so text order is time order.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc))
}
