//! Consumption of externally fitted models.
//!
//! Model fitting is an upstream collaborator's job; this crate only loads a
//! checkpoint and consumes its predictions: cluster labels for clustering
//! models, predicted survival times for regression models.

use crate::error::{FusionError, Result};
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// A fitted clustering model: samples are assigned to the nearest centroid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentroidModel {
    /// One centroid per cluster, each with one value per feature
    pub centroids: Vec<Vec<f64>>,
}

impl CentroidModel {
    pub fn n_clusters(&self) -> usize {
        self.centroids.len()
    }

    pub fn n_features(&self) -> usize {
        self.centroids.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Assign each row of the feature matrix to its nearest centroid
    /// (squared Euclidean distance, lowest cluster index wins ties)
    pub fn assign(&self, features: ArrayView2<f64>) -> Result<Vec<usize>> {
        if self.centroids.is_empty() {
            return Err(FusionError::invalid_configuration(
                "clustering model has no centroids",
            ));
        }
        if features.ncols() != self.n_features() {
            return Err(FusionError::invalid_configuration(format!(
                "clustering model expects {} features, got {}",
                self.n_features(),
                features.ncols()
            )));
        }

        let mut labels = Vec::with_capacity(features.nrows());
        for row in features.rows() {
            let mut best = 0usize;
            let mut best_distance = f64::INFINITY;
            for (cluster, centroid) in self.centroids.iter().enumerate() {
                let distance: f64 = row
                    .iter()
                    .zip(centroid)
                    .map(|(v, c)| {
                        let d = if v.is_finite() { *v } else { 0.0 } - c;
                        d * d
                    })
                    .sum();
                if distance < best_distance {
                    best_distance = distance;
                    best = cluster;
                }
            }
            labels.push(best);
        }
        Ok(labels)
    }
}

/// A fitted proportional-hazards-style regression model predicting a
/// survival time per sample from a linear combination of features
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSurvivalModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LinearSurvivalModel {
    pub fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    /// Predict one time value per row of the feature matrix
    pub fn predict(&self, features: ArrayView2<f64>) -> Result<Array1<f64>> {
        if features.ncols() != self.n_features() {
            return Err(FusionError::invalid_configuration(format!(
                "regression model expects {} features, got {}",
                self.n_features(),
                features.ncols()
            )));
        }

        let predictions: Vec<f64> = features
            .rows()
            .into_iter()
            .map(|row| {
                self.intercept
                    + row
                        .iter()
                        .zip(&self.coefficients)
                        .map(|(v, c)| if v.is_finite() { v * c } else { 0.0 })
                        .sum::<f64>()
            })
            .collect();
        Ok(Array1::from(predictions))
    }
}

/// An externally fitted model, tagged by kind in its checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainedModel {
    Clustering(CentroidModel),
    Regression(LinearSurvivalModel),
}

impl TrainedModel {
    pub fn is_regression(&self) -> bool {
        matches!(self, TrainedModel::Regression(_))
    }

    /// The clustering model, or an invalid-configuration error when the
    /// checkpoint holds a different kind
    pub fn as_clustering(&self) -> Result<&CentroidModel> {
        match self {
            TrainedModel::Clustering(model) => Ok(model),
            TrainedModel::Regression(_) => Err(FusionError::invalid_configuration(
                "a clustering model is required for this operation",
            )),
        }
    }

    /// The regression model, or an invalid-configuration error
    pub fn as_regression(&self) -> Result<&LinearSurvivalModel> {
        match self {
            TrainedModel::Regression(model) => Ok(model),
            TrainedModel::Clustering(_) => Err(FusionError::invalid_configuration(
                "a regression model is required for this operation",
            )),
        }
    }

    /// Load a model checkpoint from JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let model: TrainedModel = serde_json::from_str(&raw).map_err(|e| {
            FusionError::invalid_configuration(format!(
                "unreadable model checkpoint {:?}: {}",
                path, e
            ))
        })?;
        info!("Loaded trained model from {:?}", path);
        Ok(model)
    }

    /// Save a model checkpoint as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            FusionError::invalid_configuration(format!("unserializable model: {}", e))
        })?;
        fs::write(path, json)?;
        debug!("Saved model checkpoint to {:?}", path);
        Ok(())
    }
}
