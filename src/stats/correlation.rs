//! Pairwise correlation with p-values.
//!
//! The correlation method is experiment-level configuration: Pearson,
//! Spearman or Kendall tau-b, each returning `(coefficient, p_value)`.

use crate::error::{FusionError, Result};
use crate::stats::distribution::{normal_sf, students_t_two_sided};
use serde::{Deserialize, Serialize};

/// Correlation method selected per experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationMethod {
    Pearson,
    Spearman,
    Kendall,
}

impl CorrelationMethod {
    /// Parse from a user-supplied string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pearson" => Some(CorrelationMethod::Pearson),
            "spearman" => Some(CorrelationMethod::Spearman),
            "kendall" => Some(CorrelationMethod::Kendall),
            _ => None,
        }
    }
}

impl std::fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CorrelationMethod::Pearson => "pearson",
            CorrelationMethod::Spearman => "spearman",
            CorrelationMethod::Kendall => "kendall",
        };
        write!(f, "{}", name)
    }
}

/// Compute the configured correlation between `x` and `y`
pub fn correlate(x: &[f64], y: &[f64], method: CorrelationMethod) -> Result<(f64, f64)> {
    match method {
        CorrelationMethod::Pearson => pearson(x, y),
        CorrelationMethod::Spearman => spearman(x, y),
        CorrelationMethod::Kendall => kendall(x, y),
    }
}

fn validate_paired(x: &[f64], y: &[f64]) -> Result<()> {
    if x.len() != y.len() {
        return Err(FusionError::numerical_error(format!(
            "correlation: x and y must have the same length ({} vs {})",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 3 {
        return Err(FusionError::numerical_error(
            "correlation: need at least 3 paired observations",
        ));
    }
    Ok(())
}

/// Pearson product-moment correlation with its two-sided t-test p-value.
///
/// A constant series yields a coefficient of 0.0 with p-value 1.0.
pub fn pearson(x: &[f64], y: &[f64]) -> Result<(f64, f64)> {
    validate_paired(x, y)?;

    let n = x.len() as f64;
    let mean_x: f64 = x.iter().sum::<f64>() / n;
    let mean_y: f64 = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 {
        return Ok((0.0, 1.0));
    }
    let r = (cov / denom).clamp(-1.0, 1.0);

    let df = n - 2.0;
    let p = if r.abs() >= 1.0 {
        0.0
    } else {
        let t = r * (df / (1.0 - r * r)).sqrt();
        students_t_two_sided(t, df)?
    };
    Ok((r, p))
}

/// Spearman rank correlation: Pearson on average ranks
pub fn spearman(x: &[f64], y: &[f64]) -> Result<(f64, f64)> {
    validate_paired(x, y)?;
    let rx = rank_average(x);
    let ry = rank_average(y);
    pearson(&rx, &ry)
}

/// Kendall tau-b with tie corrections and the normal-approximation p-value
pub fn kendall(x: &[f64], y: &[f64]) -> Result<(f64, f64)> {
    validate_paired(x, y)?;

    let n = x.len();
    let mut concordant = 0i64;
    let mut discordant = 0i64;
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[i] - x[j];
            let dy = y[i] - y[j];
            let product = dx * dy;
            if product > 0.0 {
                concordant += 1;
            } else if product < 0.0 {
                discordant += 1;
            }
        }
    }

    let tie_sizes = |values: &[f64]| -> Vec<f64> {
        let mut sorted: Vec<f64> = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mut sizes = Vec::new();
        let mut run = 1usize;
        for w in sorted.windows(2) {
            if w[0].total_cmp(&w[1]).is_eq() {
                run += 1;
            } else {
                if run > 1 {
                    sizes.push(run as f64);
                }
                run = 1;
            }
        }
        if run > 1 {
            sizes.push(run as f64);
        }
        sizes
    };
    let ties_x = tie_sizes(x);
    let ties_y = tie_sizes(y);

    let n_f = n as f64;
    let n0 = n_f * (n_f - 1.0) / 2.0;
    let n1: f64 = ties_x.iter().map(|t| t * (t - 1.0) / 2.0).sum();
    let n2: f64 = ties_y.iter().map(|t| t * (t - 1.0) / 2.0).sum();

    let denom = ((n0 - n1) * (n0 - n2)).sqrt();
    if denom == 0.0 {
        return Ok((0.0, 1.0));
    }
    let tau = ((concordant - discordant) as f64 / denom).clamp(-1.0, 1.0);

    // Tie-adjusted variance of C - D under independence
    let v0 = n_f * (n_f - 1.0) * (2.0 * n_f + 5.0);
    let vt: f64 = ties_x.iter().map(|t| t * (t - 1.0) * (2.0 * t + 5.0)).sum();
    let vu: f64 = ties_y.iter().map(|t| t * (t - 1.0) * (2.0 * t + 5.0)).sum();
    let t1: f64 = ties_x.iter().map(|t| t * (t - 1.0)).sum();
    let u1: f64 = ties_y.iter().map(|t| t * (t - 1.0)).sum();
    let t2: f64 = ties_x.iter().map(|t| t * (t - 1.0) * (t - 2.0)).sum();
    let u2: f64 = ties_y.iter().map(|t| t * (t - 1.0) * (t - 2.0)).sum();

    let mut var = (v0 - vt - vu) / 18.0 + t1 * u1 / (2.0 * n_f * (n_f - 1.0));
    if n > 2 {
        var += t2 * u2 / (9.0 * n_f * (n_f - 1.0) * (n_f - 2.0));
    }
    if var <= 0.0 {
        return Ok((tau, 1.0));
    }

    let z = (concordant - discordant) as f64 / var.sqrt();
    let p = (2.0 * normal_sf(z.abs())).min(1.0);
    Ok((tau, p))
}

/// Average ranks with ties sharing the mean of their positions
pub fn rank_average(data: &[f64]) -> Vec<f64> {
    let n = data.len();
    let mut indexed: Vec<(f64, usize)> =
        data.iter().copied().enumerate().map(|(i, v)| (v, i)).collect();
    indexed.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && indexed[j].0.total_cmp(&indexed[i].0).is_eq() {
            j += 1;
        }
        let rank_val = (i + 1..=j).map(|r| r as f64).sum::<f64>() / (j - i) as f64;
        for k in i..j {
            ranks[indexed[k].1] = rank_val;
        }
        i = j;
    }
    ranks
}
