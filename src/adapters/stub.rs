//! Declared sources whose backends are not wired up yet.
//!
//! They can be registered and take part in the fallback chain, but every load
//! fails with [`AdapterError::NotImplemented`] and every probe reports
//! unhealthy, so the orchestrator passes over them without attempting a load.

use async_trait::async_trait;
use tracing::debug;

use crate::adapters::{AdapterError, SourceAdapter, SourceType};

/// Document store backend.
#[derive(Debug, Default)]
pub struct MongoDbAdapter;

/// Decentralized storage backend.
#[derive(Debug, Default)]
pub struct StorachaAdapter;

#[async_trait]
impl SourceAdapter for MongoDbAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::MongoDb
    }

    async fn load_cohort_data(&self, cohort: &str) -> Result<String, AdapterError> {
        debug!(cohort = %cohort, "MongoDB adapter invoked");
        Err(AdapterError::NotImplemented(SourceType::MongoDb))
    }

    async fn validate_connection(&self) -> bool {
        false
    }
}

#[async_trait]
impl SourceAdapter for StorachaAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Storacha
    }

    async fn load_cohort_data(&self, cohort: &str) -> Result<String, AdapterError> {
        debug!(cohort = %cohort, "Storacha adapter invoked");
        Err(AdapterError::NotImplemented(SourceType::Storacha))
    }

    async fn validate_connection(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stubs_always_fail_and_report_unhealthy() {
        let stubs: Vec<Box<dyn SourceAdapter>> = vec![Box::new(MongoDbAdapter), Box::new(StorachaAdapter)];
        for stub in stubs {
            let err = stub.load_cohort_data("2").await.unwrap_err();
            assert_eq!(err, AdapterError::NotImplemented(stub.source_type()));
            assert!(!stub.validate_connection().await);
        }
    }

    #[test]
    fn not_implemented_message_names_source() {
        assert_eq!(
            AdapterError::NotImplemented(SourceType::Storacha).to_string(),
            "storacha adapter not yet implemented"
        );
    }
}
