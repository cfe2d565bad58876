use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod csv;
pub mod stub;

pub use csv::CsvAdapter;
pub use stub::{MongoDbAdapter, StorachaAdapter};

/// Identifier of a backing store. Doubles as the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Csv,
    MongoDb,
    Storacha,
}

impl SourceType {
    /// Every declared source, in the default fallback order.
    pub const ALL: [SourceType; 3] = [SourceType::Csv, SourceType::MongoDb, SourceType::Storacha];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Csv => "csv",
            SourceType::MongoDb => "mongodb",
            SourceType::Storacha => "storacha",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(SourceType::Csv),
            "mongodb" => Ok(SourceType::MongoDb),
            "storacha" => Ok(SourceType::Storacha),
            other => Err(format!("Unknown source type: {other}. Use csv, mongodb, or storacha")),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("No resource mapped for cohort {cohort}")]
    NotFound { cohort: String },
    #[error("Failed to fetch data for cohort {cohort}: {reason}")]
    Fetch {
        cohort: String,
        status: Option<u16>,
        reason: String,
    },
    #[error("{0} adapter not yet implemented")]
    NotImplemented(SourceType),
    #[error("Config error: {0}")]
    Config(String),
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier this adapter registers under.
    fn source_type(&self) -> SourceType;

    /// Retrieve the raw header-plus-rows dataset for `cohort`.
    ///
    /// The whole payload is returned or the call fails; there are no partial
    /// results.
    async fn load_cohort_data(&self, cohort: &str) -> Result<String, AdapterError>;

    /// Optional: cheap reachability probe against a representative resource.
    ///
    /// Must not have side effects. Adapters that cannot probe report healthy.
    async fn validate_connection(&self) -> bool {
        true
    }
}
