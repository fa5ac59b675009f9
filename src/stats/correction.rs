//! Multiple testing correction.
//!
//! Correlation experiments evaluate thousands of gene x GEM pairs; the raw
//! p-values are adjusted with the method configured on the experiment.

use crate::error::{FusionError, Result};
use serde::{Deserialize, Serialize};

/// p-value adjustment method selected per experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentMethod {
    /// Benjamini-Hochberg, controls the false discovery rate
    BenjaminiHochberg,
    /// Benjamini-Yekutieli, FDR control under arbitrary dependence
    BenjaminiYekutieli,
    /// Bonferroni, controls the family-wise error rate
    Bonferroni,
}

impl AdjustmentMethod {
    /// Parse from a user-supplied string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bh" | "benjamini-hochberg" => Some(AdjustmentMethod::BenjaminiHochberg),
            "by" | "benjamini-yekutieli" => Some(AdjustmentMethod::BenjaminiYekutieli),
            "bonferroni" => Some(AdjustmentMethod::Bonferroni),
            _ => None,
        }
    }
}

impl std::fmt::Display for AdjustmentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AdjustmentMethod::BenjaminiHochberg => "benjamini-hochberg",
            AdjustmentMethod::BenjaminiYekutieli => "benjamini-yekutieli",
            AdjustmentMethod::Bonferroni => "bonferroni",
        };
        write!(f, "{}", name)
    }
}

/// Apply the adjustment, returning adjusted p-values in input order
pub fn adjust(p_values: &[f64], method: AdjustmentMethod) -> Result<Vec<f64>> {
    match method {
        AdjustmentMethod::BenjaminiHochberg => fdr(p_values, 1.0),
        AdjustmentMethod::BenjaminiYekutieli => {
            let n = p_values.len();
            let harmonic: f64 = (1..=n).map(|i| 1.0 / i as f64).sum();
            fdr(p_values, harmonic.max(1.0))
        }
        AdjustmentMethod::Bonferroni => bonferroni(p_values),
    }
}

/// Bonferroni: `p_adj = min(p * n, 1)`
pub fn bonferroni(p_values: &[f64]) -> Result<Vec<f64>> {
    validate_p_values(p_values)?;
    let n = p_values.len() as f64;
    Ok(p_values.iter().map(|&p| (p * n).min(1.0)).collect())
}

/// FDR step-up procedure: adjust as `p * n * scale / rank`, enforce
/// monotonicity from right to left and clamp to [0, 1]. A scale of 1 is
/// Benjamini-Hochberg; the harmonic-sum scale is Benjamini-Yekutieli.
fn fdr(p_values: &[f64], scale: f64) -> Result<Vec<f64>> {
    validate_p_values(p_values)?;
    let n = p_values.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let n_f = n as f64;
    let mut adjusted = vec![0.0; n];
    let mut prev = f64::INFINITY;
    for i in (0..n).rev() {
        let rank = (i + 1) as f64;
        let adj = (p_values[indices[i]] * n_f * scale / rank).min(1.0).min(prev);
        adjusted[indices[i]] = adj;
        prev = adj;
    }
    Ok(adjusted)
}

fn validate_p_values(p_values: &[f64]) -> Result<()> {
    for (i, &p) in p_values.iter().enumerate() {
        if !(0.0..=1.0).contains(&p) {
            return Err(FusionError::numerical_error(format!(
                "p-value at index {} is out of range [0, 1]: {}",
                i, p
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bonferroni() {
        let adjusted = bonferroni(&[0.01, 0.04, 0.03, 0.005]).unwrap();
        assert_relative_eq!(adjusted[0], 0.04, epsilon = 1e-10);
        assert_relative_eq!(adjusted[3], 0.02, epsilon = 1e-10);

        let clamped = bonferroni(&[0.5, 0.8]).unwrap();
        assert_eq!(clamped, vec![1.0, 1.0]);
    }

    #[test]
    fn test_benjamini_hochberg_known() {
        let adjusted = adjust(&[0.01, 0.04, 0.03, 0.005], AdjustmentMethod::BenjaminiHochberg)
            .unwrap();
        assert_relative_eq!(adjusted[3], 0.02, epsilon = 1e-10);
        assert_relative_eq!(adjusted[0], 0.02, epsilon = 1e-10);
        assert_relative_eq!(adjusted[2], 0.04, epsilon = 1e-10);
        assert_relative_eq!(adjusted[1], 0.04, epsilon = 1e-10);
    }

    #[test]
    fn test_benjamini_yekutieli_is_more_conservative() {
        let p = [0.01, 0.04, 0.03, 0.005];
        let bh = adjust(&p, AdjustmentMethod::BenjaminiHochberg).unwrap();
        let by = adjust(&p, AdjustmentMethod::BenjaminiYekutieli).unwrap();
        for (a, b) in bh.iter().zip(&by) {
            assert!(b >= a);
        }
    }

    #[test]
    fn test_monotonicity_of_sorted_adjusted() {
        let p = [0.1, 0.001, 0.05, 0.01, 0.5];
        let adjusted = adjust(&p, AdjustmentMethod::BenjaminiHochberg).unwrap();
        let mut pairs: Vec<(f64, f64)> = p.iter().copied().zip(adjusted).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        for w in pairs.windows(2) {
            assert!(w[1].1 >= w[0].1 - 1e-12);
        }
    }

    #[test]
    fn test_empty_and_invalid() {
        assert!(adjust(&[], AdjustmentMethod::BenjaminiHochberg)
            .unwrap()
            .is_empty());
        assert!(adjust(&[1.5], AdjustmentMethod::Bonferroni).is_err());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(
            AdjustmentMethod::from_str("BH"),
            Some(AdjustmentMethod::BenjaminiHochberg)
        );
        assert_eq!(
            AdjustmentMethod::from_str("benjamini-yekutieli"),
            Some(AdjustmentMethod::BenjaminiYekutieli)
        );
        assert_eq!(AdjustmentMethod::from_str("x"), None);
    }
}
