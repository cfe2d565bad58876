//! Hand-off point between raw source payloads and whatever consumes them.
//!
//! Record parsing and metric aggregation live outside this crate and plug in
//! through [`DatasetTransformer`]. [`TableSummaryTransformer`] is a minimal
//! built-in used by the HTTP server.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("Failed to process dataset for cohort {cohort}: {reason}")]
    Invalid { cohort: String, reason: String },
}

/// Turns the raw header-plus-rows text of a cohort into a structured result.
pub trait DatasetTransformer: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    fn transform(&self, cohort: &str, raw: &str) -> Result<Self::Output, TransformError>;
}

/// Header names and row count of a delimited dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub cohort: String,
    pub headers: Vec<String>,
    pub row_count: usize,
}

/// Reads the header line (trimming each name) and counts non-empty rows.
#[derive(Debug, Clone)]
pub struct TableSummaryTransformer {
    delimiter: char,
}

impl Default for TableSummaryTransformer {
    fn default() -> Self {
        Self { delimiter: ',' }
    }
}

impl TableSummaryTransformer {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }
}

impl DatasetTransformer for TableSummaryTransformer {
    type Output = TableSummary;

    fn transform(&self, cohort: &str, raw: &str) -> Result<TableSummary, TransformError> {
        let mut lines = raw.lines().filter(|line| !line.trim().is_empty());
        let header = lines.next().ok_or_else(|| TransformError::Invalid {
            cohort: cohort.to_string(),
            reason: "payload has no header row".to_string(),
        })?;

        let headers = header
            .trim_start_matches('\u{feff}')
            .split(self.delimiter)
            .map(|h| h.trim().trim_matches('"').to_string())
            .collect();

        Ok(TableSummary {
            cohort: cohort.to_string(),
            headers,
            row_count: lines.count(),
        })
    }
}
