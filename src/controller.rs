use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::adapters::SourceType;
use crate::cache::{CacheKey, ResultCache, DEFAULT_TTL};
use crate::dataset::{DatasetTransformer, TransformError};
use crate::orchestrator::{HealthMap, SourceError, SourceOrchestrator};

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// What observers see of the controller's most recent work on the selected cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshStatus {
    pub cohort: String,
    pub source: SourceType,
    pub fetching: bool,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Source that produced the dataset currently held, which differs from
    /// `source` after a fallback.
    pub served_by: Option<SourceType>,
}

/// Caches processed datasets in front of a [`SourceOrchestrator`] and owns
/// the selected-cohort state.
pub struct RefreshController<T: DatasetTransformer> {
    orchestrator: SourceOrchestrator,
    transformer: T,
    cache: Mutex<ResultCache<Arc<T::Output>>>,
    in_flight: Mutex<HashMap<CacheKey, Gate>>,
    selected: RwLock<String>,
    health: watch::Sender<HealthMap>,
    status: watch::Sender<RefreshStatus>,
}

impl<T: DatasetTransformer> RefreshController<T> {
    pub fn new(orchestrator: SourceOrchestrator, transformer: T, cohort: impl Into<String>) -> Self {
        let cohort = cohort.into();
        let (health, _) = watch::channel(HealthMap::new());
        let (status, _) = watch::channel(RefreshStatus {
            cohort: cohort.clone(),
            source: orchestrator.current_type(),
            fetching: false,
            error: None,
            last_updated: None,
            served_by: None,
        });
        RefreshController {
            orchestrator,
            transformer,
            cache: Mutex::new(ResultCache::new(DEFAULT_TTL)),
            in_flight: Mutex::new(HashMap::new()),
            selected: RwLock::new(cohort),
            health,
            status,
        }
    }

    pub fn with_ttl(self, ttl: Duration) -> Self {
        RefreshController {
            cache: Mutex::new(ResultCache::new(ttl)),
            ..self
        }
    }

    pub fn selected_cohort(&self) -> String {
        self.selected.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn current_source(&self) -> SourceType {
        self.orchestrator.current_type()
    }

    /// Number of cached entries, fresh or stale.
    pub fn cached_entries(&self) -> usize {
        self.lock_cache().len()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<HealthMap> {
        self.health.subscribe()
    }

    /// The most recently published health map.
    pub fn health(&self) -> HealthMap {
        self.health.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<RefreshStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> RefreshStatus {
        self.status.borrow().clone()
    }

    /// Return the processed dataset for `cohort` from the current source.
    ///
    /// A fresh cache entry is returned without any I/O. Otherwise the dataset
    /// is loaded through the orchestrator, transformed and cached. Overlapping
    /// calls for the same cohort and source share a single load.
    pub async fn refresh(&self, cohort: &str) -> Result<Arc<T::Output>, RefreshError> {
        let (key, generation) = {
            let cache = self.lock_cache();
            (CacheKey::new(cohort, self.orchestrator.current_type()), cache.generation())
        };

        if let Some(hit) = self.fresh(&key) {
            debug!(cohort = %cohort, source = %key.source, "Using cached data");
            self.publish_success(cohort, None);
            return Ok(hit);
        }

        let gate = self.enter_gate(&key);
        let _permit = gate.lock.lock().await;
        if let Some(hit) = self.fresh(&key) {
            debug!(cohort = %cohort, source = %key.source, "Served by concurrent refresh");
            self.publish_success(cohort, None);
            return Ok(hit);
        }

        self.publish(cohort, |status| status.fetching = true);
        let started = Instant::now();
        match self.load(cohort).await {
            Ok((served_by, value)) => {
                let stored = self
                    .lock_cache()
                    .insert_if_current(generation, key.clone(), value.clone(), started);
                if !stored {
                    debug!(cohort = %cohort, source = %key.source, "Cache was invalidated during load, not storing");
                }
                self.publish_success(cohort, Some(served_by));
                Ok(value)
            }
            Err(e) => {
                warn!(cohort = %cohort, error = %e, "Error refreshing data");
                let message = e.to_string();
                self.publish(cohort, |status| {
                    status.fetching = false;
                    status.error = Some(message);
                });
                Err(e)
            }
        }
    }

    /// Select a cohort and refresh it.
    pub async fn set_cohort(&self, cohort: &str) -> Result<Arc<T::Output>, RefreshError> {
        {
            let mut selected = self.selected.write().unwrap_or_else(PoisonError::into_inner);
            *selected = cohort.to_string();
        }
        self.status.send_modify(|status| {
            if status.cohort != cohort {
                status.cohort = cohort.to_string();
                status.served_by = None;
                status.last_updated = None;
            }
            status.error = None;
        });
        info!(cohort = %cohort, "Selected cohort");
        self.refresh(cohort).await
    }

    /// Make `source` current, invalidate every cached dataset, then refresh the
    /// selected cohort.
    ///
    /// An unregistered source fails with [`SourceError::UnknownAdapter`] and
    /// leaves both the current source and the cache untouched.
    pub async fn switch_adapter(&self, source: SourceType) -> Result<Arc<T::Output>, RefreshError> {
        {
            let mut cache = self.lock_cache();
            self.orchestrator.switch_adapter(source)?;
            cache.clear();
        }
        self.status.send_modify(|status| status.source = source);
        info!(source = %source, "Switched adapter, cache cleared");

        let cohort = self.selected_cohort();
        self.refresh(&cohort).await
    }

    /// Probe every source and publish the result to health subscribers.
    pub async fn check_health(&self) -> HealthMap {
        let health = self.orchestrator.check_health().await;
        self.health.send_replace(health.clone());
        health
    }

    async fn load(&self, cohort: &str) -> Result<(SourceType, Arc<T::Output>), RefreshError> {
        let loaded = self.orchestrator.load_cohort_data(cohort).await?;
        let output = self.transformer.transform(cohort, &loaded.payload)?;
        Ok((loaded.source, Arc::new(output)))
    }

    fn fresh(&self, key: &CacheKey) -> Option<Arc<T::Output>> {
        self.lock_cache().get_fresh(key, Instant::now())
    }

    fn enter_gate(&self, key: &CacheKey) -> GateGuard<'_> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let gate = in_flight.entry(key.clone()).or_default();
        gate.holders += 1;
        GateGuard {
            in_flight: &self.in_flight,
            key: key.clone(),
            lock: gate.lock.clone(),
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, ResultCache<Arc<T::Output>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_success(&self, cohort: &str, served_by: Option<SourceType>) {
        self.publish(cohort, |status| {
            status.fetching = false;
            status.error = None;
            status.last_updated = Some(Utc::now());
            if served_by.is_some() {
                status.served_by = served_by;
            }
        });
    }

    /// Status only tracks the selected cohort.
    fn publish(&self, cohort: &str, update: impl FnOnce(&mut RefreshStatus)) {
        self.status.send_if_modified(|status| {
            if status.cohort != cohort {
                return false;
            }
            update(status);
            true
        });
    }
}

/// Per-key refresh gate, shared by every caller refreshing the same key.
#[derive(Default)]
struct Gate {
    lock: Arc<AsyncMutex<()>>,
    holders: usize,
}

/// One caller's hold on a [`Gate`]. The last holder to drop removes the key
/// from the in-flight map.
struct GateGuard<'a> {
    in_flight: &'a Mutex<HashMap<CacheKey, Gate>>,
    key: CacheKey,
    lock: Arc<AsyncMutex<()>>,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(gate) = in_flight.get_mut(&self.key) {
            gate.holders -= 1;
            if gate.holders == 0 {
                in_flight.remove(&self.key);
            }
        }
    }
}

/// Re-check source health every `every`, starting immediately, until the
/// returned task is aborted.
pub fn spawn_health_reporter<T: DatasetTransformer>(
    controller: Arc<RefreshController<T>>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            controller.check_health().await;
        }
    })
}
