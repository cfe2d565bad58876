use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::adapters::{AdapterError, SourceAdapter, SourceType};

/// Upper bound for a single adapter load or probe.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reachability of every registered source, rebuilt wholesale per check.
pub type HealthMap = BTreeMap<SourceType, bool>;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Adapter not available: {0}")]
    UnknownAdapter(SourceType),
    #[error("All data adapters failed for cohort {cohort}")]
    Exhausted {
        cohort: String,
        attempts: Vec<Attempt>,
    },
}

/// Why a source did or did not produce the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Loaded,
    Failed(AdapterError),
    TimedOut,
    /// Probe reported the source unreachable; no load was attempted.
    Unhealthy,
    /// Named in the fallback order but never registered.
    Unregistered,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Loaded => f.write_str("loaded"),
            AttemptOutcome::Failed(e) => write!(f, "failed: {e}"),
            AttemptOutcome::TimedOut => f.write_str("timed out"),
            AttemptOutcome::Unhealthy => f.write_str("skipped: connection check failed"),
            AttemptOutcome::Unregistered => f.write_str("skipped: not registered"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub source: SourceType,
    pub outcome: AttemptOutcome,
}

/// A successful load along with the path the chain took to get there.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    /// Source that actually produced the payload.
    pub source: SourceType,
    pub payload: String,
    pub attempts: Vec<Attempt>,
}

impl LoadedDataset {
    pub fn used_fallback(&self) -> bool {
        self.attempts.len() > 1
    }
}

/// Owns the registered adapters, the current source and the fallback chain.
pub struct SourceOrchestrator {
    adapters: HashMap<SourceType, Arc<dyn SourceAdapter>>,
    current: RwLock<SourceType>,
    fallback_order: Vec<SourceType>,
    attempt_timeout: Duration,
}

impl SourceOrchestrator {
    /// Create an orchestrator whose current source is `default`.
    ///
    /// The fallback order starts as every declared [`SourceType`].
    pub fn new(default: Arc<dyn SourceAdapter>) -> Self {
        let current = default.source_type();
        let mut adapters: HashMap<SourceType, Arc<dyn SourceAdapter>> = HashMap::new();
        adapters.insert(current, default);
        SourceOrchestrator {
            adapters,
            current: RwLock::new(current),
            fallback_order: SourceType::ALL.to_vec(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Register an adapter under its own source type, replacing any adapter
    /// already registered there.
    pub fn register_adapter(&mut self, adapter: Arc<dyn SourceAdapter>) -> Option<Arc<dyn SourceAdapter>> {
        let source = adapter.source_type();
        if !self.fallback_order.contains(&source) {
            self.fallback_order.push(source);
        }
        self.adapters.insert(source, adapter)
    }

    /// Set the order in which alternates are tried.
    ///
    /// Duplicates are dropped and registered sources the order leaves out are
    /// appended, so every registered source stays reachable.
    pub fn with_fallback_order(mut self, order: Vec<SourceType>) -> Self {
        let mut normalized: Vec<SourceType> = Vec::with_capacity(order.len());
        for source in order {
            if !normalized.contains(&source) {
                normalized.push(source);
            }
        }
        let mut registered = self.registered();
        registered.retain(|s| !normalized.contains(s));
        normalized.extend(registered);
        self.fallback_order = normalized;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn current_type(&self) -> SourceType {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fallback_order(&self) -> &[SourceType] {
        &self.fallback_order
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Registered sources in declaration order.
    pub fn registered(&self) -> Vec<SourceType> {
        let mut sources: Vec<SourceType> = self.adapters.keys().copied().collect();
        sources.sort();
        sources
    }

    pub fn is_registered(&self, source: SourceType) -> bool {
        self.adapters.contains_key(&source)
    }

    /// Make `source` the current source and return the previous one.
    ///
    /// Does not reload anything.
    pub fn switch_adapter(&self, source: SourceType) -> Result<SourceType, SourceError> {
        if !self.is_registered(source) {
            return Err(SourceError::UnknownAdapter(source));
        }
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *current, source);
        info!(from = %previous, to = %source, "Switched current source");
        Ok(previous)
    }

    /// Load a cohort from the current source, walking the fallback chain on
    /// failure. Candidates are tried one at a time, never concurrently.
    pub async fn load_cohort_data(&self, cohort: &str) -> Result<LoadedDataset, SourceError> {
        let current = self.current_type();
        let mut attempts = Vec::new();

        info!(source = %current, cohort = %cohort, "Loading cohort data");
        match self.adapters.get(&current) {
            Some(adapter) => match self.attempt_load(adapter.as_ref(), cohort).await {
                Ok(payload) => {
                    attempts.push(Attempt { source: current, outcome: AttemptOutcome::Loaded });
                    return Ok(LoadedDataset { source: current, payload, attempts });
                }
                Err(outcome) => {
                    warn!(source = %current, cohort = %cohort, outcome = %outcome, "Primary adapter failed");
                    attempts.push(Attempt { source: current, outcome });
                }
            },
            None => attempts.push(Attempt { source: current, outcome: AttemptOutcome::Unregistered }),
        }

        for &candidate in self.fallback_order.iter().filter(|s| **s != current) {
            let Some(adapter) = self.adapters.get(&candidate) else {
                debug!(source = %candidate, "Fallback source not registered, skipping");
                attempts.push(Attempt { source: candidate, outcome: AttemptOutcome::Unregistered });
                continue;
            };

            info!(source = %candidate, cohort = %cohort, "Trying fallback adapter");
            if !self.probe(adapter).await {
                warn!(source = %candidate, "Fallback adapter validation failed");
                attempts.push(Attempt { source: candidate, outcome: AttemptOutcome::Unhealthy });
                continue;
            }

            match self.attempt_load(adapter.as_ref(), cohort).await {
                Ok(payload) => {
                    info!(source = %candidate, cohort = %cohort, "Loaded data using fallback adapter");
                    attempts.push(Attempt { source: candidate, outcome: AttemptOutcome::Loaded });
                    return Ok(LoadedDataset { source: candidate, payload, attempts });
                }
                Err(outcome) => {
                    warn!(source = %candidate, cohort = %cohort, outcome = %outcome, "Fallback adapter failed");
                    attempts.push(Attempt { source: candidate, outcome });
                }
            }
        }

        error!(cohort = %cohort, attempts = attempts.len(), "All data adapters failed");
        Err(SourceError::Exhausted {
            cohort: cohort.to_string(),
            attempts,
        })
    }

    /// Probe every registered adapter. Never fails: a probe that panics or
    /// overruns the attempt timeout counts as unhealthy.
    pub async fn check_health(&self) -> HealthMap {
        let mut health = HealthMap::new();
        for source in self.registered() {
            if let Some(adapter) = self.adapters.get(&source) {
                health.insert(source, self.probe(adapter).await);
            }
        }
        info!(?health, "Adapter health check");
        health
    }

    async fn attempt_load(&self, adapter: &dyn SourceAdapter, cohort: &str) -> Result<String, AttemptOutcome> {
        match timeout(self.attempt_timeout, adapter.load_cohort_data(cohort)).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => Err(AttemptOutcome::Failed(e)),
            Err(_) => Err(AttemptOutcome::TimedOut),
        }
    }

    async fn probe(&self, adapter: &Arc<dyn SourceAdapter>) -> bool {
        let adapter = Arc::clone(adapter);
        let source = adapter.source_type();
        let mut handle = tokio::spawn(async move { adapter.validate_connection().await });
        match timeout(self.attempt_timeout, &mut handle).await {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(e)) => {
                warn!(source = %source, error = %e, "Connection probe aborted");
                false
            }
            Err(_) => {
                handle.abort();
                warn!(source = %source, "Connection probe timed out");
                false
            }
        }
    }
}
