//! Resilient retrieval of cohort engagement datasets.
//!
//! A [`RefreshController`] caches processed datasets in front of a
//! [`SourceOrchestrator`], which loads raw tabular text from the current
//! [`SourceAdapter`] and walks a fixed fallback chain when it fails.

pub mod adapters;
pub mod api;
pub mod cache;
pub mod config;
pub mod controller;
pub mod dataset;
pub mod orchestrator;

#[cfg(test)]
mod testing;

pub use adapters::{AdapterError, CsvAdapter, MongoDbAdapter, SourceAdapter, SourceType, StorachaAdapter};
pub use cache::{CacheKey, ResultCache, DEFAULT_TTL};
pub use controller::{spawn_health_reporter, RefreshController, RefreshError, RefreshStatus};
pub use dataset::{DatasetTransformer, TableSummary, TableSummaryTransformer, TransformError};
pub use orchestrator::{Attempt, AttemptOutcome, HealthMap, LoadedDataset, SourceError, SourceOrchestrator};
