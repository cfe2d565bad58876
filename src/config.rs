use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::adapters::{AdapterError, CsvAdapter, MongoDbAdapter, SourceAdapter, SourceType, StorachaAdapter};
use crate::orchestrator::SourceOrchestrator;

/// Origin used for the csv source when no `[[adapter]]` of type csv is configured.
pub const DEFAULT_CSV_BASE_URL: &str = "http://127.0.0.1:3000/";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_source")]
    pub default_source: SourceType,
    #[serde(default = "default_cohort")]
    pub cohort: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    #[serde(default = "default_fallback_order")]
    pub fallback_order: Vec<SourceType>,
    #[serde(default)]
    pub adapter: Vec<AdapterConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum AdapterConfig {
    #[serde(rename = "csv")]
    Csv {
        base_url: Option<String>,
        root: Option<String>,
        cohorts: Option<BTreeMap<String, String>>,
        probe_cohort: Option<String>,
    },

    #[serde(rename = "mongodb")]
    MongoDb,

    #[serde(rename = "storacha")]
    Storacha,
}

fn default_source() -> SourceType {
    SourceType::Csv
}

fn default_cohort() -> String {
    "2".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_attempt_timeout_ms() -> u64 {
    10_000
}

fn default_health_interval_secs() -> u64 {
    60
}

fn default_fallback_order() -> Vec<SourceType> {
    SourceType::ALL.to_vec()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_source: default_source(),
            cohort: default_cohort(),
            cache_ttl_secs: default_cache_ttl_secs(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            health_interval_secs: default_health_interval_secs(),
            fallback_order: default_fallback_order(),
            adapter: Vec::new(),
        }
    }
}

impl Config {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

pub fn create_adapters(config: &Config) -> Result<Vec<Arc<dyn SourceAdapter>>, AdapterError> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    for adapter_config in &config.adapter {
        match adapter_config {
            AdapterConfig::Csv {
                base_url,
                root,
                cohorts,
                probe_cohort,
            } => {
                let mut adapter = match (base_url, root) {
                    (Some(base_url), None) => {
                        info!(base_url = %base_url, "Creating CSV adapter");
                        CsvAdapter::http(base_url)?
                    }
                    (None, Some(root)) => {
                        info!(root = %root, "Creating CSV adapter");
                        CsvAdapter::local(PathBuf::from(root))?
                    }
                    _ => {
                        return Err(AdapterError::Config(
                            "CSV adapter needs exactly one of base_url or root".to_string(),
                        ))
                    }
                };
                if let Some(cohorts) = cohorts {
                    adapter = adapter.with_cohorts(cohorts.clone());
                }
                if let Some(probe_cohort) = probe_cohort {
                    adapter = adapter.with_probe_cohort(probe_cohort.clone());
                }
                adapters.push(Arc::new(adapter));
            }

            AdapterConfig::MongoDb => {
                info!("Creating MongoDB adapter (not implemented)");
                adapters.push(Arc::new(MongoDbAdapter));
            }

            AdapterConfig::Storacha => {
                info!("Creating Storacha adapter (not implemented)");
                adapters.push(Arc::new(StorachaAdapter));
            }
        }
    }

    Ok(adapters)
}

/// Build the orchestrator described by `config`.
///
/// The csv source is always registered, on [`DEFAULT_CSV_BASE_URL`] when the
/// config does not describe one. `default_source` must be registered.
pub fn build_orchestrator(config: &Config) -> Result<SourceOrchestrator, AdapterError> {
    let mut adapters = create_adapters(config)?;
    if !adapters.iter().any(|a| a.source_type() == SourceType::Csv) {
        info!(base_url = DEFAULT_CSV_BASE_URL, "No CSV adapter configured, using default");
        adapters.push(Arc::new(CsvAdapter::http(DEFAULT_CSV_BASE_URL)?));
    }

    let position = adapters
        .iter()
        .position(|a| a.source_type() == config.default_source)
        .ok_or_else(|| {
            AdapterError::Config(format!(
                "Default source {} has no adapter configured",
                config.default_source
            ))
        })?;
    let default = adapters.remove(position);

    let mut orchestrator = SourceOrchestrator::new(default);
    for adapter in adapters {
        if orchestrator.register_adapter(adapter).is_some() {
            return Err(AdapterError::Config(
                "Each source type may only be configured once".to_string(),
            ));
        }
    }

    Ok(orchestrator
        .with_fallback_order(config.fallback_order.clone())
        .with_attempt_timeout(config.attempt_timeout()))
}

pub fn load_config(path: &Path) -> Result<Config, anyhow::Error> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}
