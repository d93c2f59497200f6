//! Counts, timing and first failure of a unit of work.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::warn;

use crate::error::MigrateError;

/// Outcome of a worker, a table or a phase.
///
/// Sibling results merge by summing counts and widening the time span. Only
/// the first error is kept; later ones are logged.
#[derive(Debug, Serialize)]
pub struct ConversionResult {
    pub record_count: i64,
    pub byte_count: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<MigrateError>,
}

fn serialize_error<S: Serializer>(
    error: &Option<MigrateError>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl ConversionResult {
    /// Empty result stamped with the current time.
    pub fn started() -> Self {
        let now = Utc::now();
        Self {
            record_count: 0,
            byte_count: 0,
            started_at: now,
            finished_at: now,
            error: None,
        }
    }

    /// Result carrying only an error.
    pub fn failed(error: MigrateError) -> Self {
        let mut result = Self::started();
        result.error = Some(error);
        result
    }

    /// Stamp the end time.
    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    pub fn with_error(mut self, error: MigrateError) -> Self {
        self.record_error(error);
        self
    }

    /// Keep `error` if no error has been recorded yet.
    pub fn record_error(&mut self, error: MigrateError) {
        if self.error.is_none() {
            self.error = Some(error);
        } else {
            warn!("Additional error not carried in the merged result: {}", error);
        }
    }

    /// Fold a sibling result into this one.
    pub fn merge(&mut self, other: ConversionResult) {
        self.record_count += other.record_count;
        self.byte_count += other.byte_count;
        self.started_at = self.started_at.min(other.started_at);
        self.finished_at = self.finished_at.max(other.finished_at);
        if let Some(error) = other.error {
            self.record_error(error);
        }
    }

    /// Merge many results. An empty input yields an empty result stamped now.
    pub fn merge_all(results: impl IntoIterator<Item = ConversionResult>) -> Self {
        let mut iter = results.into_iter();
        let Some(mut merged) = iter.next() else {
            return Self::started();
        };
        for r in iter {
            merged.merge(r);
        }
        merged
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Take the error out, leaving the counts.
    pub fn take_error(&mut self) -> Option<MigrateError> {
        self.error.take()
    }
}

impl Default for ConversionResult {
    fn default() -> Self {
        Self::started()
    }
}

impl fmt::Display for ConversionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records, {} bytes in {:.2}s",
            self.record_count,
            self.byte_count,
            self.elapsed_seconds()
        )?;
        if let Some(e) = &self.error {
            write!(f, ", error: {}", e)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn result(records: i64, bytes: i64, start_secs: i64, end_secs: i64) -> ConversionResult {
        let base = Utc::now();
        ConversionResult {
            record_count: records,
            byte_count: bytes,
            started_at: base + Duration::seconds(start_secs),
            finished_at: base + Duration::seconds(end_secs),
            error: None,
        }
    }

    #[test]
    fn test_merge_sums_and_widens() {
        let mut a = result(10, 100, 5, 8);
        let b = result(4, 40, 2, 6);
        let (start, end) = (b.started_at, a.finished_at);
        a.merge(b);
        assert_eq!(a.record_count, 14);
        assert_eq!(a.byte_count, 140);
        assert_eq!(a.started_at, start);
        assert_eq!(a.finished_at, end);
    }

    #[test]
    fn test_first_error_wins() {
        let mut a = result(1, 1, 0, 1);
        a.merge(result(1, 1, 0, 1).with_error(MigrateError::Config("first".into())));
        a.merge(result(1, 1, 0, 1).with_error(MigrateError::Config("second".into())));
        assert_eq!(a.record_count, 3);
        assert!(a.error.unwrap().to_string().contains("first"));
    }

    #[test]
    fn test_merge_all_empty() {
        let merged = ConversionResult::merge_all(Vec::new());
        assert_eq!(merged.record_count, 0);
        assert!(merged.is_success());
    }

    #[test]
    fn test_serializes_error_as_text() {
        let r = ConversionResult::failed(MigrateError::Cancelled);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["error"], "Migration cancelled");
        assert_eq!(json["record_count"], 0);
    }
}
