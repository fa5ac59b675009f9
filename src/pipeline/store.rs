//! Persisted results and memoized computed caches.
//!
//! Statistical properties and sample/cluster assignments are expensive and
//! immutable once computed: both are exposed as get-or-create operations
//! executed under the store mutex, so two concurrent first requests for the
//! same key perform exactly one computation.

use crate::error::Result;
use crate::pipeline::{ExperimentId, GeneGemCombination, SampleCluster};
use crate::stats::properties::SourceStatisticalProperties;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Default)]
struct StoreInner {
    combinations: HashMap<ExperimentId, Vec<GeneGemCombination>>,
    properties: HashMap<u64, Arc<SourceStatisticalProperties>>,
    sample_clusters: HashMap<ExperimentId, Vec<SampleCluster>>,
    next_combination_id: u64,
}

/// Thread-safe store for everything the pipeline persists
#[derive(Default)]
pub struct ResultStore {
    inner: Mutex<StoreInner>,
}

/// Serializable snapshot written by [`ResultStore::persist`]
#[derive(Serialize)]
struct PersistedResults<'a> {
    combinations: &'a HashMap<ExperimentId, Vec<GeneGemCombination>>,
    statistical_properties: &'a HashMap<u64, Arc<SourceStatisticalProperties>>,
    sample_clusters: &'a HashMap<ExperimentId, Vec<SampleCluster>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an experiment's combinations, assigning their row ids.
    /// Returns the stored rows.
    pub fn save_combinations(
        &self,
        experiment_id: ExperimentId,
        mut combinations: Vec<GeneGemCombination>,
    ) -> Vec<GeneGemCombination> {
        let mut inner = self.inner.lock().unwrap();
        for combination in &mut combinations {
            inner.next_combination_id += 1;
            combination.id = inner.next_combination_id;
            combination.experiment_id = experiment_id;
        }
        debug!(
            "Stored {} combinations for experiment {}",
            combinations.len(),
            experiment_id
        );
        inner
            .combinations
            .insert(experiment_id, combinations.clone());
        combinations
    }

    /// All combinations of an experiment
    pub fn combinations(&self, experiment_id: ExperimentId) -> Vec<GeneGemCombination> {
        self.inner
            .lock()
            .unwrap()
            .combinations
            .get(&experiment_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Look a combination up by its row id
    pub fn find_combination(&self, combination_id: u64) -> Option<GeneGemCombination> {
        let inner = self.inner.lock().unwrap();
        inner
            .combinations
            .values()
            .flatten()
            .find(|c| c.id == combination_id)
            .cloned()
    }

    /// Cached statistical properties of a combination, if any
    pub fn statistical_properties(
        &self,
        combination_id: u64,
    ) -> Option<Arc<SourceStatisticalProperties>> {
        self.inner
            .lock()
            .unwrap()
            .properties
            .get(&combination_id)
            .cloned()
    }

    /// Return the cached properties for a combination, computing and storing
    /// them on first request. The store mutex is held across the
    /// computation, so concurrent first calls cannot create duplicates.
    pub fn get_or_compute_properties<F>(
        &self,
        combination_id: u64,
        compute: F,
    ) -> Result<Arc<SourceStatisticalProperties>>
    where
        F: FnOnce() -> Result<SourceStatisticalProperties>,
    {
        let mut inner = self.inner.lock().unwrap();
        if let Some(cached) = inner.properties.get(&combination_id) {
            return Ok(cached.clone());
        }
        let properties = Arc::new(compute()?);
        inner.properties.insert(combination_id, properties.clone());
        debug!(
            "Computed statistical properties for combination {}",
            combination_id
        );
        Ok(properties)
    }

    /// Cached sample/cluster rows of a validation, if any
    pub fn sample_clusters(&self, validation_id: ExperimentId) -> Option<Vec<SampleCluster>> {
        self.inner
            .lock()
            .unwrap()
            .sample_clusters
            .get(&validation_id)
            .cloned()
    }

    /// Return the cached sample/cluster rows for a validation, computing and
    /// storing them on first request under the same single-writer guarantee
    /// as the statistical properties.
    pub fn get_or_compute_sample_clusters<F>(
        &self,
        validation_id: ExperimentId,
        compute: F,
    ) -> Result<Vec<SampleCluster>>
    where
        F: FnOnce() -> Result<Vec<SampleCluster>>,
    {
        let mut inner = self.inner.lock().unwrap();
        if let Some(cached) = inner.sample_clusters.get(&validation_id) {
            return Ok(cached.clone());
        }
        let rows = compute()?;
        inner.sample_clusters.insert(validation_id, rows.clone());
        debug!(
            "Stored {} sample/cluster rows for validation {}",
            rows.len(),
            validation_id
        );
        Ok(rows)
    }

    /// Dump the store as pretty JSON for later retrieval
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let snapshot = PersistedResults {
            combinations: &inner.combinations,
            statistical_properties: &inner.properties,
            sample_clusters: &inner.sample_clusters,
        };
        let json = serde_json::to_string_pretty(&snapshot).map_err(|e| {
            crate::error::FusionError::numerical_error(format!("unserializable store: {}", e))
        })?;
        std::fs::write(path.as_ref(), json)?;
        info!("Persisted result store to {:?}", path.as_ref());
        Ok(())
    }
}
