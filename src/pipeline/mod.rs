pub mod correlation;
pub mod store;
pub mod validation;
pub mod worker;

use crate::model::TrainedModel;
use crate::source::clinical::SurvivalColumnTuple;
use crate::source::{ClinicalSource, MoleculeKind, SampleSource, Source, DEFAULT_CHUNK_SIZE};
use crate::stats::correction::AdjustmentMethod;
use crate::stats::correlation::CorrelationMethod;
use serde::{Deserialize, Serialize};
use tracing::info;

pub type ExperimentId = u64;
pub type UserId = u64;

/// Decimal places for values sent to clients; values used for further
/// computation are never rounded
pub const DISPLAY_DECIMALS: i32 = 3;

/// Lifecycle of an experiment or statistical validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentState {
    WaitingForQueue,
    InProcess,
    Completed,
    FinishedWithError,
    /// Terminal business outcome of sample intersection, never retried
    NoSamplesInCommon,
    Stopped,
    ReachedAttemptsLimit,
}

impl ExperimentState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            ExperimentState::WaitingForQueue | ExperimentState::InProcess
        )
    }
}

impl std::fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExperimentState::WaitingForQueue => "waiting-for-queue",
            ExperimentState::InProcess => "in-process",
            ExperimentState::Completed => "completed",
            ExperimentState::FinishedWithError => "finished-with-error",
            ExperimentState::NoSamplesInCommon => "no-samples-in-common",
            ExperimentState::Stopped => "stopped",
            ExperimentState::ReachedAttemptsLimit => "reached-attempts-limit",
        };
        write!(f, "{}", name)
    }
}

/// Observer hook invoked on every persisted state change so clients can
/// refresh. Fire-and-forget: implementations must not fail and the pipeline
/// never blocks on them.
pub trait StateNotifier: Send + Sync {
    fn notify(&self, user_id: UserId);
}

/// Notifier that only logs, used by the CLI
#[derive(Debug, Default)]
pub struct LogNotifier;

impl StateNotifier for LogNotifier {
    fn notify(&self, user_id: UserId) {
        info!("State update for user {}", user_id);
    }
}

/// Experiment-level correlation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    pub method: CorrelationMethod,
    pub adjustment: AdjustmentMethod,
    /// Pairs below this absolute correlation are discarded
    pub minimum_coefficient_threshold: f64,
    /// Genes with a standard deviation below this are skipped
    pub minimum_std_gene: f64,
    /// GEM molecules with a standard deviation below this are skipped
    pub minimum_std_gem: f64,
    /// Rows per chunk while streaming the GEM source
    pub chunk_size: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            method: CorrelationMethod::Pearson,
            adjustment: AdjustmentMethod::BenjaminiHochberg,
            minimum_coefficient_threshold: 0.7,
            minimum_std_gene: 0.0,
            minimum_std_gem: 0.2,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// A correlation experiment between a gene source and a GEM source
pub struct CorrelationExperiment {
    pub id: ExperimentId,
    pub name: String,
    pub user_id: UserId,
    pub mrna_source: Source,
    pub gem_source: Source,
    pub clinical_source: Option<ClinicalSource>,
    /// Genes to evaluate; empty means every gene in the source
    pub gene_list: Vec<String>,
    /// GEM molecules to evaluate; empty means every row in the source
    pub gem_list: Vec<String>,
    pub config: CorrelationConfig,
    pub state: ExperimentState,
    /// Attempt counter bounding automatic retries
    pub attempt: u32,
    /// Pairs evaluated during the run
    pub evaluated_row_count: Option<usize>,
    /// Pairs surviving the correlation threshold
    pub result_total_row_count: Option<usize>,
}

impl CorrelationExperiment {
    pub fn new(
        id: ExperimentId,
        name: impl Into<String>,
        user_id: UserId,
        mrna_source: Source,
        gem_source: Source,
        config: CorrelationConfig,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            user_id,
            mrna_source,
            gem_source,
            clinical_source: None,
            gene_list: Vec::new(),
            gem_list: Vec::new(),
            config,
            state: ExperimentState::WaitingForQueue,
            attempt: 1,
            evaluated_row_count: None,
            result_total_row_count: None,
        }
    }

    /// Every source feeding the sample intersection, absent ones included
    pub fn get_all_sources(&self) -> Vec<Option<&dyn SampleSource>> {
        vec![
            Some(&self.mrna_source as &dyn SampleSource),
            Some(&self.gem_source as &dyn SampleSource),
            self.clinical_source
                .as_ref()
                .map(|c| c as &dyn SampleSource),
        ]
    }

    /// Persist a state change and inform the notifier
    pub fn set_state(&mut self, state: ExperimentState, notifier: &dyn StateNotifier) {
        self.state = state;
        notifier.notify(self.user_id);
    }
}

/// One row per (gene, GEM) pair surviving a correlation experiment.
/// Immutable once written, except for the lazy attachment of cached
/// statistical properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneGemCombination {
    pub id: u64,
    pub experiment_id: ExperimentId,
    pub gene: String,
    pub gem: String,
    pub correlation: f64,
    pub p_value: f64,
    pub adjusted_p_value: Option<f64>,
}

/// One sample's cluster assignment within a statistical validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCluster {
    pub sample: String,
    pub cluster: usize,
}

/// Per-source slot of a statistical validation, with optional metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceResult {
    pub kind: MoleculeKind,
    pub mean_squared_error: Option<f64>,
    pub c_index: Option<f64>,
    pub log_likelihood: Option<f64>,
    pub roc_auc: Option<f64>,
}

impl SourceResult {
    pub fn new(kind: MoleculeKind) -> Self {
        Self {
            kind,
            mean_squared_error: None,
            c_index: None,
            log_likelihood: None,
            roc_auc: None,
        }
    }
}

/// A statistical validation of a trained model against clinical and
/// molecular sources
pub struct StatisticalValidation {
    pub id: ExperimentId,
    pub name: String,
    pub user_id: UserId,
    pub state: ExperimentState,
    pub attempt: u32,
    pub model: TrainedModel,
    pub clinical_source: ClinicalSource,
    /// Molecular sources with the molecules selected from each
    pub molecular_sources: Vec<(Source, Vec<String>)>,
    /// Resolved once and frozen
    pub survival_tuple: SurvivalColumnTuple,
    pub source_results: Vec<SourceResult>,
    // Terminal metrics over all molecules
    pub mean_squared_error: Option<f64>,
    pub c_index: Option<f64>,
    pub log_likelihood: Option<f64>,
    pub r_squared: Option<f64>,
}

impl StatisticalValidation {
    pub fn new(
        id: ExperimentId,
        name: impl Into<String>,
        user_id: UserId,
        model: TrainedModel,
        clinical_source: ClinicalSource,
        molecular_sources: Vec<(Source, Vec<String>)>,
        survival_tuple: SurvivalColumnTuple,
    ) -> Self {
        let source_results = molecular_sources
            .iter()
            .map(|(source, _)| SourceResult::new(source.kind()))
            .collect();
        Self {
            id,
            name: name.into(),
            user_id,
            state: ExperimentState::WaitingForQueue,
            attempt: 1,
            model,
            clinical_source,
            molecular_sources,
            survival_tuple,
            source_results,
            mean_squared_error: None,
            c_index: None,
            log_likelihood: None,
            r_squared: None,
        }
    }

    /// Clinical source first, then every present molecular source
    pub fn get_all_sources(&self) -> Vec<Option<&dyn SampleSource>> {
        let mut sources: Vec<Option<&dyn SampleSource>> =
            vec![Some(&self.clinical_source as &dyn SampleSource)];
        for (source, _) in &self.molecular_sources {
            sources.push(Some(source as &dyn SampleSource));
        }
        sources
    }

    /// Persist a state change and inform the notifier
    pub fn set_state(&mut self, state: ExperimentState, notifier: &dyn StateNotifier) {
        self.state = state;
        notifier.notify(self.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct CountingNotifier(pub AtomicUsize);

    impl StateNotifier for CountingNotifier {
        fn notify(&self, _user_id: UserId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ExperimentState::WaitingForQueue.is_terminal());
        assert!(!ExperimentState::InProcess.is_terminal());
        assert!(ExperimentState::Completed.is_terminal());
        assert!(ExperimentState::NoSamplesInCommon.is_terminal());
        assert!(ExperimentState::ReachedAttemptsLimit.is_terminal());
    }

    #[test]
    fn test_state_change_notifies() {
        use crate::source::{MoleculeKind, TabularFile};
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        file.write_all(b"\tS1\nG1\t1\n").unwrap();
        let path = file.into_temp_path();

        let source = |kind| Source::uploaded(TabularFile::open(&path).unwrap(), kind);
        let mut experiment = CorrelationExperiment::new(
            1,
            "test",
            42,
            source(MoleculeKind::Mrna),
            source(MoleculeKind::Mirna),
            CorrelationConfig::default(),
        );

        let notifier = CountingNotifier(AtomicUsize::new(0));
        experiment.set_state(ExperimentState::InProcess, &notifier);
        experiment.set_state(ExperimentState::Completed, &notifier);
        assert_eq!(notifier.0.load(Ordering::SeqCst), 2);
        assert_eq!(experiment.state, ExperimentState::Completed);
    }
}
