//! Kaplan-Meier group construction for statistical validations.
//!
//! Clustering mode groups samples by their fitted cluster and charts the
//! real survival observations; regression mode groups samples by a clinical
//! attribute and charts the model's predicted times, every prediction
//! treated as an observed event.

use crate::error::{FusionError, Result};
use crate::fusion::SurvivalObservation;
use crate::model::{CentroidModel, LinearSurvivalModel};
use crate::source::clinical::strip_tcga_suffix;
use crate::source::Frame;
use crate::survival::metrics::{fit_single_covariate_cox, CoxSummary};
use crate::survival::{kaplan_meier_curve, SurvivalGroup};
use ndarray::Array2;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Transpose a molecules frame (rows = molecules, columns = samples) into a
/// samples x features matrix, molecule order preserved
pub fn feature_matrix(molecules: &Frame) -> Array2<f64> {
    let n_samples = molecules.n_cols();
    let n_features = molecules.n_rows();
    let mut matrix = Array2::zeros((n_samples, n_features));
    for (feature, row) in molecules.values.iter().enumerate() {
        for (sample, value) in row.iter().enumerate() {
            matrix[(sample, feature)] = *value;
        }
    }
    matrix
}

/// Encode group labels as ordinals over their sorted distinct values
pub fn ordinal_encode(labels: &[String]) -> Vec<f64> {
    let mut distinct: Vec<&String> = labels.iter().collect();
    distinct.sort();
    distinct.dedup();
    labels
        .iter()
        .map(|l| distinct.iter().position(|d| *d == l).unwrap() as f64)
        .collect()
}

/// One Kaplan-Meier curve per cluster label plus the Cox summary treating
/// the label as the sole covariate
pub fn groups_from_labels(
    labels: &[usize],
    observations: &[SurvivalObservation],
) -> Result<(Vec<SurvivalGroup>, CoxSummary)> {
    if labels.len() != observations.len() {
        return Err(FusionError::numerical_error(
            "survival groups: labels and observations are misaligned",
        ));
    }
    if labels.is_empty() {
        return Err(FusionError::NoSamplesInCommon);
    }

    let mut by_cluster: BTreeMap<usize, Vec<SurvivalObservation>> = BTreeMap::new();
    for (label, observation) in labels.iter().zip(observations) {
        by_cluster.entry(*label).or_default().push(*observation);
    }

    let groups: Vec<SurvivalGroup> = by_cluster
        .iter()
        .map(|(cluster, members)| SurvivalGroup {
            label: cluster.to_string(),
            curve: kaplan_meier_curve(members),
        })
        .collect();

    let covariate: Vec<f64> = labels.iter().map(|&l| l as f64).collect();
    let summary = fit_single_covariate_cox(&covariate, observations)?;
    Ok((groups, summary))
}

/// Survival groups derived from a clustering model
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClusteringGroups {
    pub groups: Vec<SurvivalGroup>,
    pub concordance_index: f64,
    pub log_likelihood: f64,
    /// One (sample, cluster) pair per evaluated sample
    pub assignments: Vec<(String, usize)>,
}

/// Assign every sample to a cluster, build one Kaplan-Meier curve per
/// cluster from the real observations, and summarize group separation with
/// a Cox fit on the cluster label.
pub fn survival_groups_by_clustering(
    model: &CentroidModel,
    molecules: &Frame,
    observations: &[SurvivalObservation],
) -> Result<ClusteringGroups> {
    if molecules.n_cols() != observations.len() {
        return Err(FusionError::numerical_error(
            "clustering groups: molecules and clinical data are misaligned",
        ));
    }
    if molecules.n_cols() == 0 {
        return Err(FusionError::NoSamplesInCommon);
    }

    let features = feature_matrix(molecules);
    let labels = model.assign(features.view())?;

    let assignments: Vec<(String, usize)> = molecules
        .columns
        .iter()
        .cloned()
        .zip(labels.iter().copied())
        .collect();

    let (groups, summary) = groups_from_labels(&labels, observations)?;
    info!("Derived {} survival groups from clustering", groups.len());

    Ok(ClusteringGroups {
        groups,
        concordance_index: summary.concordance_index,
        log_likelihood: summary.log_likelihood,
        assignments,
    })
}

/// Survival groups derived from a regression model and a clinical attribute
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegressionGroups {
    pub groups: Vec<SurvivalGroup>,
    pub concordance_index: f64,
    pub log_likelihood: f64,
}

/// Group samples by a clinical attribute, predict a time per sample and
/// build one Kaplan-Meier curve per group from the predictions.
///
/// Clinical sample identifiers have their TCGA suffix stripped before the
/// join with the molecule columns; samples missing from either side are
/// excluded. The pooled predictions with the label-encoded group as sole
/// covariate give the summary concordance index and log-likelihood.
pub fn survival_groups_by_attribute(
    model: &LinearSurvivalModel,
    molecules: &Frame,
    attribute_values: &[(String, String)],
) -> Result<RegressionGroups> {
    // Inner join on sample identifier, suffix-insensitive on the clinical side
    let mut group_of: BTreeMap<String, String> = BTreeMap::new();
    for (sample, value) in attribute_values {
        group_of.insert(strip_tcga_suffix(sample), value.clone());
    }

    let mut by_group: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (position, sample) in molecules.columns.iter().enumerate() {
        if let Some(value) = group_of.get(&strip_tcga_suffix(sample)) {
            by_group.entry(value.clone()).or_default().push(position);
        }
    }
    if by_group.is_empty() {
        return Err(FusionError::NoSamplesInCommon);
    }

    let features = feature_matrix(molecules);
    let mut groups = Vec::new();
    let mut pooled_labels: Vec<String> = Vec::new();
    let mut pooled_observations: Vec<SurvivalObservation> = Vec::new();

    for (label, members) in &by_group {
        let subset = features.select(ndarray::Axis(0), members);
        let predicted = model.predict(subset.view())?;
        debug!("Group {:?}: {} samples", label, predicted.len());

        // Every prediction is charted as an observed event
        let observations: Vec<SurvivalObservation> = predicted
            .iter()
            .map(|&time| SurvivalObservation::new(true, time))
            .collect();
        groups.push(SurvivalGroup {
            label: label.clone(),
            curve: kaplan_meier_curve(&observations),
        });

        pooled_labels.extend(std::iter::repeat(label.clone()).take(observations.len()));
        pooled_observations.extend(observations);
    }

    let covariate = ordinal_encode(&pooled_labels);
    let summary = fit_single_covariate_cox(&covariate, &pooled_observations)?;

    Ok(RegressionGroups {
        groups,
        concordance_index: summary.concordance_index,
        log_likelihood: summary.log_likelihood,
    })
}
