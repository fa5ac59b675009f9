//! # omicsfuse: multi-omics data fusion and survival validation
//!
//! omicsfuse aligns heterogeneous measurement sources (gene expression,
//! miRNA, copy-number, methylation, clinical data) on a common sample set,
//! joins them in bounded-memory chunks, computes pairwise gene/GEM
//! correlations with multiple-testing correction and cached diagnostic
//! statistics, and scores externally fitted clustering/regression models
//! with Kaplan-Meier groups, concordance index and partial log-likelihood.
//!
//! ## Features
//!
//! - Uniform source contract over uploaded files and synchronized cohort
//!   datasets (TSV/CSV, gzipped or not), including the dual-table clinical
//!   join with TCGA-suffix reconciliation
//! - Deterministic sample intersection with a distinguished
//!   no-samples-in-common outcome
//! - Chunked long-format molecule joining that never holds more than one
//!   chunk in memory
//! - Pearson/Spearman/Kendall correlation with Benjamini-Hochberg,
//!   Benjamini-Yekutieli or Bonferroni adjustment
//! - Memoized per-pair diagnostics (normality, heteroscedasticity,
//!   linearity, monotonicity, outliers)
//! - Background worker queue with attempt-bounded retries and cooperative
//!   stops
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use omicsfuse::fusion::CancelFlag;
//! use omicsfuse::pipeline::correlation::run_correlation_experiment;
//! use omicsfuse::pipeline::{CorrelationConfig, CorrelationExperiment};
//! use omicsfuse::source::{MoleculeKind, Source, TabularFile};
//!
//! let mrna = Source::uploaded(TabularFile::open("genes.tsv").unwrap(), MoleculeKind::Mrna);
//! let mirna = Source::uploaded(TabularFile::open("mirna.tsv").unwrap(), MoleculeKind::Mirna);
//!
//! let mut experiment = CorrelationExperiment::new(
//!     1,
//!     "my-experiment",
//!     1,
//!     mrna,
//!     mirna,
//!     CorrelationConfig::default(),
//! );
//! let outcome = run_correlation_experiment(&mut experiment, &CancelFlag::new()).unwrap();
//! println!("{} combinations", outcome.combinations.len());
//! ```

pub mod cli;
pub mod error;
pub mod fusion;
pub mod model;
pub mod pipeline;
pub mod source;
pub mod stats;
pub mod survival;
pub mod utils;

/// Re-export commonly used types
pub use error::{FusionError, Result};
pub use fusion::{common_samples, CancelFlag, EventCoercion, SurvivalObservation};
pub use model::TrainedModel;
pub use pipeline::{CorrelationExperiment, ExperimentState, StatisticalValidation};
pub use source::{ClinicalSource, MoleculeKind, Source, TabularFile};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn info() -> String {
    format!(
        "{} v{} - multi-omics data fusion and survival validation",
        NAME, VERSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_info() {
        let info_str = info();
        assert!(info_str.contains("omicsfuse"));
        assert!(info_str.contains(VERSION));
    }
}
