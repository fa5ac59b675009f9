//! The statistical-validation runner: align the validation's sources on
//! their common samples, build the unified molecules table, normalize the
//! clinical data, and score the trained model.

use crate::error::{FusionError, Result};
use crate::fusion::joiner::{format_data, generate_molecules_file, FormattedData, JoinEntry};
use crate::fusion::{common_samples, CancelFlag, EventCoercion};
use crate::model::TrainedModel;
use crate::pipeline::store::ResultStore;
use crate::pipeline::{SampleCluster, StatisticalValidation};
use crate::source::clinical::AttributeFrame;
use crate::survival::groups::{
    feature_matrix, groups_from_labels, survival_groups_by_attribute, ClusteringGroups,
    RegressionGroups,
};
use crate::survival::metrics::{mean_squared_error, r_squared};
use ndarray::ArrayView1;
use std::collections::HashSet;
use tracing::{debug, info};

/// Keep only the frame rows whose key is in `samples`, preserving order
fn filter_frame_rows(frame: &AttributeFrame, samples: &[String]) -> AttributeFrame {
    let wanted: HashSet<&String> = samples.iter().collect();
    let mut out = AttributeFrame {
        index_name: frame.index_name.clone(),
        index: Vec::new(),
        columns: frame.columns.clone(),
        values: Vec::new(),
    };
    for (key, row) in frame.index.iter().zip(&frame.values) {
        if wanted.contains(key) {
            out.index.push(key.clone());
            out.values.push(row.clone());
        }
    }
    out
}

/// Build the aligned molecules/clinical data for a validation.
///
/// The unified molecules table is streamed to a temporary file which is
/// deleted when the returned data goes out of scope.
pub fn molecules_and_clinical(
    validation: &StatisticalValidation,
    coercion: &EventCoercion,
    chunk_size: usize,
    cancel: &CancelFlag,
) -> Result<FormattedData> {
    let samples = common_samples(&validation.get_all_sources())?;

    let entries: Vec<Option<JoinEntry<'_>>> = validation
        .molecular_sources
        .iter()
        .map(|(source, molecules)| {
            Some(JoinEntry {
                source,
                molecules: molecules.as_slice(),
            })
        })
        .collect();
    let molecules_file = generate_molecules_file(&entries, &samples, chunk_size, cancel)?;

    let survival = validation
        .clinical_source
        .survival_frame(&validation.survival_tuple)?;
    let survival = filter_frame_rows(&survival, &samples);

    let formatted = format_data(
        molecules_file.path(),
        &survival,
        coercion,
        validation.model.is_regression(),
    )?;
    debug!(
        "Validation {} aligned {} molecules over {} samples",
        validation.id,
        formatted.molecules.n_rows(),
        formatted.samples.len()
    );
    Ok(formatted)
}

/// Run a statistical validation end to end, filling its terminal metrics.
pub fn run_statistical_validation(
    validation: &mut StatisticalValidation,
    store: &ResultStore,
    coercion: &EventCoercion,
    chunk_size: usize,
    cancel: &CancelFlag,
) -> Result<()> {
    let formatted = molecules_and_clinical(validation, coercion, chunk_size, cancel)?;
    cancel.check()?;

    match &validation.model {
        TrainedModel::Regression(model) => {
            let features = feature_matrix(&formatted.molecules);
            let predicted = model.predict(features.view())?;
            let predicted: Vec<f64> = predicted.to_vec();
            let observed: Vec<f64> =
                formatted.observations.iter().map(|o| o.time).collect();

            validation.mean_squared_error = Some(mean_squared_error(&predicted, &observed)?);
            validation.r_squared = Some(r_squared(&predicted, &observed)?);

            // Longer predicted survival means lower risk
            let risk: Vec<f64> = predicted.iter().map(|t| -t).collect();
            let events: Vec<bool> =
                formatted.observations.iter().map(|o| o.event).collect();
            validation.c_index = crate::survival::metrics::concordance_index(
                ArrayView1::from(risk.as_slice()),
                ArrayView1::from(observed.as_slice()),
                &events,
            )
            .ok();

            let summary = crate::survival::metrics::fit_single_covariate_cox(
                &predicted,
                &formatted.observations,
            )?;
            validation.log_likelihood = Some(summary.log_likelihood);
        }
        TrainedModel::Clustering(model) => {
            let features = feature_matrix(&formatted.molecules);
            let labels = model.assign(features.view())?;
            let (_, summary) = groups_from_labels(&labels, &formatted.observations)?;
            validation.c_index = Some(summary.concordance_index);
            validation.log_likelihood = Some(summary.log_likelihood);

            let rows: Vec<SampleCluster> = formatted
                .samples
                .iter()
                .zip(&labels)
                .map(|(sample, cluster)| SampleCluster {
                    sample: sample.clone(),
                    cluster: *cluster,
                })
                .collect();
            store.get_or_compute_sample_clusters(validation.id, || Ok(rows))?;
        }
    }

    info!(
        "Validation {} scored: c-index={:?}, log-likelihood={:?}",
        validation.id, validation.c_index, validation.log_likelihood
    );
    Ok(())
}

/// Kaplan-Meier groups for a validation backed by a clustering model.
///
/// Sample/cluster assignments are computed once per validation: when cached
/// rows exist they are reused and the model is not consulted again.
pub fn kaplan_meier_by_clustering(
    validation: &StatisticalValidation,
    store: &ResultStore,
    coercion: &EventCoercion,
    chunk_size: usize,
    cancel: &CancelFlag,
) -> Result<ClusteringGroups> {
    let model = validation.model.as_clustering()?;
    let formatted = molecules_and_clinical(validation, coercion, chunk_size, cancel)?;

    let labels: Vec<usize> = match store.sample_clusters(validation.id) {
        Some(cached) => {
            debug!("Reusing cached sample/cluster rows for validation {}", validation.id);
            formatted
                .samples
                .iter()
                .map(|sample| {
                    cached
                        .iter()
                        .find(|row| &row.sample == sample)
                        .map(|row| row.cluster)
                        .ok_or_else(|| FusionError::row_not_found(sample))
                })
                .collect::<Result<Vec<usize>>>()?
        }
        None => {
            let features = feature_matrix(&formatted.molecules);
            let labels = model.assign(features.view())?;
            let rows: Vec<SampleCluster> = formatted
                .samples
                .iter()
                .zip(&labels)
                .map(|(sample, cluster)| SampleCluster {
                    sample: sample.clone(),
                    cluster: *cluster,
                })
                .collect();
            store.get_or_compute_sample_clusters(validation.id, || Ok(rows))?;
            labels
        }
    };

    let (groups, summary) = groups_from_labels(&labels, &formatted.observations)?;
    Ok(ClusteringGroups {
        groups,
        concordance_index: summary.concordance_index,
        log_likelihood: summary.log_likelihood,
        assignments: formatted
            .samples
            .iter()
            .cloned()
            .zip(labels)
            .collect(),
    })
}

/// Kaplan-Meier groups for a validation backed by a regression model,
/// stratified by a user-chosen clinical attribute.
///
/// An unknown or empty attribute is rejected before any computation.
pub fn kaplan_meier_by_attribute(
    validation: &StatisticalValidation,
    attribute: &str,
    coercion: &EventCoercion,
    chunk_size: usize,
    cancel: &CancelFlag,
) -> Result<RegressionGroups> {
    if attribute.trim().is_empty() {
        return Err(FusionError::invalid_configuration(
            "clinical attribute must not be empty",
        ));
    }
    let model = validation.model.as_regression()?;

    let attribute_values = validation
        .clinical_source
        .specific_samples_and_attribute(None, attribute)
        .map_err(|e| match e {
            FusionError::AttributeNotFound { attribute } => {
                FusionError::invalid_configuration(format!(
                    "unknown clinical attribute: {}",
                    attribute
                ))
            }
            other => other,
        })?;

    let formatted = molecules_and_clinical(validation, coercion, chunk_size, cancel)?;
    survival_groups_by_attribute(model, &formatted.molecules, &attribute_values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CentroidModel, LinearSurvivalModel};
    use crate::source::clinical::SurvivalColumnTuple;
    use crate::source::{ClinicalSource, MoleculeKind, Source, TabularFile};
    use std::io::Write;

    fn file(content: &str) -> tempfile::TempPath {
        let mut f = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.into_temp_path()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Four samples, one mRNA molecule separating them into two halves
    fn build_validation(model: TrainedModel) -> (StatisticalValidation, Vec<tempfile::TempPath>) {
        let mrna = file("\tS1\tS2\tS3\tS4\nG1\t0.1\t0.2\t9.8\t9.9\n");
        let clinical = file(
            "SAMPLE\tOS_STATUS\tOS_MONTHS\tGRADE\nS1\t1\t20\tlow\nS2\t1\t18\tlow\nS3\t1\t3\thigh\nS4\t1\t2\thigh\n",
        );

        let validation = StatisticalValidation::new(
            1,
            "validation",
            1,
            model,
            ClinicalSource::uploaded(
                TabularFile::open(&clinical).unwrap(),
                vec![SurvivalColumnTuple::new("OS_STATUS", "OS_MONTHS")],
            ),
            vec![(
                Source::uploaded(TabularFile::open(&mrna).unwrap(), MoleculeKind::Mrna),
                strings(&["G1"]),
            )],
            SurvivalColumnTuple::new("OS_STATUS", "OS_MONTHS"),
        );
        (validation, vec![mrna, clinical])
    }

    #[test]
    fn test_clustering_validation_fills_metrics_and_caches() {
        let model = TrainedModel::Clustering(CentroidModel {
            centroids: vec![vec![0.0], vec![10.0]],
        });
        let (mut validation, _files) = build_validation(model);
        let store = ResultStore::new();

        run_statistical_validation(
            &mut validation,
            &store,
            &EventCoercion::default(),
            100,
            &CancelFlag::new(),
        )
        .unwrap();

        assert!(validation.c_index.unwrap() >= 0.85);
        assert!(validation.log_likelihood.unwrap().is_finite());
        assert!(validation.mean_squared_error.is_none());

        let cached = store.sample_clusters(1).unwrap();
        assert_eq!(cached.len(), 4);
        assert_eq!(cached[0].cluster, 0);
        assert_eq!(cached[2].cluster, 1);
    }

    #[test]
    fn test_regression_validation_fills_metrics() {
        // Predicted time = 20 - 2*expression: high expression dies sooner
        let model = TrainedModel::Regression(LinearSurvivalModel {
            coefficients: vec![-2.0],
            intercept: 20.0,
        });
        let (mut validation, _files) = build_validation(model);
        let store = ResultStore::new();

        run_statistical_validation(
            &mut validation,
            &store,
            &EventCoercion::default(),
            100,
            &CancelFlag::new(),
        )
        .unwrap();

        assert!(validation.mean_squared_error.is_some());
        assert!(validation.r_squared.is_some());
        assert!(validation.c_index.unwrap() > 0.9);
        assert!(validation.log_likelihood.unwrap().is_finite());
    }

    #[test]
    fn test_km_by_clustering_uses_cache() {
        let model = TrainedModel::Clustering(CentroidModel {
            centroids: vec![vec![0.0], vec![10.0]],
        });
        let (validation, _files) = build_validation(model);
        let store = ResultStore::new();

        let first = kaplan_meier_by_clustering(
            &validation,
            &store,
            &EventCoercion::default(),
            100,
            &CancelFlag::new(),
        )
        .unwrap();
        assert_eq!(first.groups.len(), 2);
        assert!(store.sample_clusters(1).is_some());

        // Second call reuses the cached rows and yields identical groups
        let second = kaplan_meier_by_clustering(
            &validation,
            &store,
            &EventCoercion::default(),
            100,
            &CancelFlag::new(),
        )
        .unwrap();
        assert_eq!(first.assignments, second.assignments);
        assert_eq!(first.concordance_index, second.concordance_index);
    }

    #[test]
    fn test_km_by_attribute_groups() {
        let model = TrainedModel::Regression(LinearSurvivalModel {
            coefficients: vec![-2.0],
            intercept: 20.0,
        });
        let (validation, _files) = build_validation(model);

        let result = kaplan_meier_by_attribute(
            &validation,
            "GRADE",
            &EventCoercion::default(),
            100,
            &CancelFlag::new(),
        )
        .unwrap();
        assert_eq!(result.groups.len(), 2);
        assert_eq!(result.groups[0].label, "high");
        assert!(result.concordance_index >= 0.5);
    }

    #[test]
    fn test_km_by_attribute_rejects_bad_configuration() {
        let model = TrainedModel::Regression(LinearSurvivalModel {
            coefficients: vec![-2.0],
            intercept: 20.0,
        });
        let (validation, _files) = build_validation(model);

        let err = kaplan_meier_by_attribute(
            &validation,
            "",
            &EventCoercion::default(),
            100,
            &CancelFlag::new(),
        )
        .unwrap_err();
        assert!(matches!(err, FusionError::InvalidConfiguration { .. }));

        let err = kaplan_meier_by_attribute(
            &validation,
            "NOT_AN_ATTRIBUTE",
            &EventCoercion::default(),
            100,
            &CancelFlag::new(),
        )
        .unwrap_err();
        assert!(matches!(err, FusionError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_km_by_attribute_requires_regression_model() {
        let model = TrainedModel::Clustering(CentroidModel {
            centroids: vec![vec![0.0]],
        });
        let (validation, _files) = build_validation(model);

        let err = kaplan_meier_by_attribute(
            &validation,
            "GRADE",
            &EventCoercion::default(),
            100,
            &CancelFlag::new(),
        )
        .unwrap_err();
        assert!(matches!(err, FusionError::InvalidConfiguration { .. }));
    }
}
