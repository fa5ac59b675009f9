//! Diagnostic statistics for a gene/GEM value-vector pair.
//!
//! One bundle is computed per gene x GEM combination on first request and
//! cached forever after: normality of each vector (Shapiro-Wilk),
//! heteroscedasticity (Breusch-Pagan and Goldfeld-Quandt), linearity
//! (Harvey-Collier on recursive residuals), monotonicity (Spearman) and
//! per-vector outliers (Tukey fences).

use crate::error::{FusionError, Result};
use crate::stats::correlation::spearman;
use crate::stats::distribution::{chi_squared_sf, f_sf, normal_ppf, normal_sf, students_t_two_sided};
use serde::{Deserialize, Serialize};

/// A statistical test reduced to its statistic and p-value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatisticalTest {
    pub statistic: f64,
    pub p_value: f64,
}

/// Breusch-Pagan heteroscedasticity test, both the Lagrange-multiplier and
/// the F form
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreuschPaganTest {
    pub lagrange_multiplier: f64,
    pub p_value: f64,
    pub f_value: f64,
    pub f_p_value: f64,
}

/// An outlying sample in one of the two vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierSample {
    pub sample: String,
    pub value: f64,
}

/// Cached diagnostic bundle for a specific gene/GEM value-vector pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatisticalProperties {
    pub gene_mean: f64,
    pub gem_mean: f64,
    pub gene_standard_deviation: f64,
    pub gem_standard_deviation: f64,
    pub gene_normality: StatisticalTest,
    pub gem_normality: StatisticalTest,
    pub heteroscedasticity_breusch_pagan: BreuschPaganTest,
    pub homoscedasticity_goldfeld_quandt: StatisticalTest,
    /// Absent when the recursive-residual recursion is degenerate
    pub linearity: Option<StatisticalTest>,
    pub monotonicity: Option<StatisticalTest>,
    pub gene_outliers: Vec<OutlierSample>,
    pub gem_outliers: Vec<OutlierSample>,
    pub number_of_samples_evaluated: usize,
}

/// Compute the full diagnostic bundle for a paired gene/GEM vector
pub fn compute_statistical_properties(
    gene_values: &[f64],
    gem_values: &[f64],
    gene_samples: &[String],
    gem_samples: &[String],
) -> Result<SourceStatisticalProperties> {
    if gene_values.len() != gem_values.len() {
        return Err(FusionError::numerical_error(
            "statistical properties: gene and GEM vectors must be paired",
        ));
    }
    if gene_values.len() < 3 {
        return Err(FusionError::numerical_error(
            "statistical properties: need at least 3 paired samples",
        ));
    }

    let monotonicity = spearman(gene_values, gem_values)
        .ok()
        .map(|(statistic, p_value)| StatisticalTest { statistic, p_value });

    Ok(SourceStatisticalProperties {
        gene_mean: mean(gene_values),
        gem_mean: mean(gem_values),
        gene_standard_deviation: std_dev(gene_values),
        gem_standard_deviation: std_dev(gem_values),
        gene_normality: shapiro_wilk(gene_values)?,
        gem_normality: shapiro_wilk(gem_values)?,
        heteroscedasticity_breusch_pagan: breusch_pagan(gene_values, gem_values)?,
        homoscedasticity_goldfeld_quandt: goldfeld_quandt(gene_values, gem_values),
        linearity: harvey_collier(gene_values, gem_values),
        monotonicity,
        gene_outliers: outliers_tukey(gene_values, gene_samples),
        gem_outliers: outliers_tukey(gem_values, gem_samples),
        number_of_samples_evaluated: gene_values.len(),
    })
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (ddof = 1)
fn std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    (ss / (n - 1) as f64).sqrt()
}

/// Simple OLS of y on x with intercept: (intercept, slope, residuals)
fn ols_simple(x: &[f64], y: &[f64]) -> Result<(f64, f64, Vec<f64>)> {
    let n = x.len() as f64;
    let mean_x = mean(x);
    let mean_y = mean(y);
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        sxx += (xi - mean_x) * (xi - mean_x);
        sxy += (xi - mean_x) * (yi - mean_y);
    }
    if sxx == 0.0 || n < 2.0 {
        return Err(FusionError::numerical_error(
            "ols: regressor has zero variance",
        ));
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let residuals = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| yi - (intercept + slope * xi))
        .collect();
    Ok((intercept, slope, residuals))
}

/// Shapiro-Wilk W test for normality (Royston's approximation).
///
/// Valid from n = 3; the p-value uses the exact small-sample expression at
/// n = 3 and the normalizing transforms above it.
pub fn shapiro_wilk(values: &[f64]) -> Result<StatisticalTest> {
    let n = values.len();
    if n < 3 {
        return Err(FusionError::numerical_error(
            "shapiro_wilk: need at least 3 observations",
        ));
    }

    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let m = mean(&sorted);
    let ss: f64 = sorted.iter().map(|v| (v - m) * (v - m)).sum();
    if ss <= 0.0 {
        return Err(FusionError::numerical_error(
            "shapiro_wilk: sample has zero variance",
        ));
    }

    // Expected normal order statistics (Blom scores)
    let n_f = n as f64;
    let mut m_scores = Vec::with_capacity(n);
    for i in 1..=n {
        let p = (i as f64 - 0.375) / (n_f + 0.25);
        m_scores.push(normal_ppf(p)?);
    }
    let m_sum_sq: f64 = m_scores.iter().map(|v| v * v).sum();

    // Weights: normalized scores with Royston's polynomial end corrections
    let mut weights: Vec<f64> = m_scores.iter().map(|v| v / m_sum_sq.sqrt()).collect();
    if n > 3 {
        let u = 1.0 / n_f.sqrt();
        let a_n = weights[n - 1]
            + u * (0.221157 + u * (-0.147981 + u * (-2.071190 + u * (4.434685 - u * 2.706056))));
        if n > 5 {
            let a_n1 = weights[n - 2]
                + u * (0.042981
                    + u * (-0.293762 + u * (-1.752461 + u * (5.682633 - u * 3.582633))));
            let last = m_scores[n - 1];
            let second = m_scores[n - 2];
            let phi = (m_sum_sq - 2.0 * last * last - 2.0 * second * second)
                / (1.0 - 2.0 * a_n * a_n - 2.0 * a_n1 * a_n1);
            for (i, w) in weights.iter_mut().enumerate().take(n - 2).skip(2) {
                *w = m_scores[i] / phi.sqrt();
            }
            weights[n - 1] = a_n;
            weights[n - 2] = a_n1;
            weights[0] = -a_n;
            weights[1] = -a_n1;
        } else {
            let last = m_scores[n - 1];
            let phi = (m_sum_sq - 2.0 * last * last) / (1.0 - 2.0 * a_n * a_n);
            for (i, w) in weights.iter_mut().enumerate().take(n - 1).skip(1) {
                *w = m_scores[i] / phi.sqrt();
            }
            weights[n - 1] = a_n;
            weights[0] = -a_n;
        }
    } else {
        weights[0] = -(0.5_f64.sqrt());
        weights[1] = 0.0;
        weights[2] = 0.5_f64.sqrt();
    }

    let b: f64 = weights.iter().zip(&sorted).map(|(w, v)| w * v).sum();
    let w_stat = ((b * b) / ss).min(1.0);

    let p_value = if n == 3 {
        let p = (6.0 / std::f64::consts::PI)
            * (w_stat.sqrt().asin() - 0.75_f64.sqrt().asin());
        p.clamp(0.0, 1.0)
    } else if n <= 11 {
        let gamma = -2.273 + 0.459 * n_f;
        let mu = 0.5440 - 0.39978 * n_f + 0.025054 * n_f * n_f - 0.0006714 * n_f.powi(3);
        let sigma =
            (1.3822 - 0.77857 * n_f + 0.062767 * n_f * n_f - 0.0020322 * n_f.powi(3)).exp();
        let arg = gamma - (1.0 - w_stat).ln();
        if arg <= 0.0 {
            0.0
        } else {
            let z = (-(arg.ln()) - mu) / sigma;
            normal_sf(z).clamp(0.0, 1.0)
        }
    } else {
        let ln_n = n_f.ln();
        let mu = -1.5861 - 0.31082 * ln_n - 0.083751 * ln_n * ln_n + 0.0038915 * ln_n.powi(3);
        let sigma = (-0.4803 - 0.082676 * ln_n + 0.0030302 * ln_n * ln_n).exp();
        let z = ((1.0 - w_stat).ln() - mu) / sigma;
        normal_sf(z).clamp(0.0, 1.0)
    };

    Ok(StatisticalTest {
        statistic: w_stat,
        p_value,
    })
}

/// Breusch-Pagan test: regress squared residuals of y~x back on x
pub fn breusch_pagan(x: &[f64], y: &[f64]) -> Result<BreuschPaganTest> {
    let n = x.len() as f64;
    let (_, _, residuals) = ols_simple(x, y)?;
    let squared: Vec<f64> = residuals.iter().map(|r| r * r).collect();

    // R² of the auxiliary regression
    let (_, _, aux_residuals) = ols_simple(x, &squared)?;
    let mean_sq = mean(&squared);
    let ss_total: f64 = squared.iter().map(|v| (v - mean_sq) * (v - mean_sq)).sum();
    let ss_residual: f64 = aux_residuals.iter().map(|r| r * r).sum();
    let r_squared = if ss_total > 0.0 {
        (1.0 - ss_residual / ss_total).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let lagrange_multiplier = n * r_squared;
    let p_value = chi_squared_sf(lagrange_multiplier, 1.0)?;

    let df_denominator = n - 2.0;
    let (f_value, f_p_value) = if r_squared < 1.0 && df_denominator > 0.0 {
        let f = r_squared * df_denominator / (1.0 - r_squared);
        (f, f_sf(f, 1.0, df_denominator)?)
    } else {
        (f64::INFINITY, 0.0)
    };

    Ok(BreuschPaganTest {
        lagrange_multiplier,
        p_value,
        f_value,
        f_p_value,
    })
}

/// Goldfeld-Quandt test: ratio of residual variances of the two x-sorted
/// halves. Degenerate halves (fewer than 3 points) yield NaN rather than an
/// error, matching what an OLS on them would produce.
pub fn goldfeld_quandt(x: &[f64], y: &[f64]) -> StatisticalTest {
    let n = x.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));

    let half = n / 2;
    let split = |range: &[usize]| -> (Vec<f64>, Vec<f64>) {
        (
            range.iter().map(|&i| x[i]).collect(),
            range.iter().map(|&i| y[i]).collect(),
        )
    };
    let (x1, y1) = split(&order[..half]);
    let (x2, y2) = split(&order[half..]);

    let rss = |xs: &[f64], ys: &[f64]| -> Option<(f64, f64)> {
        if xs.len() < 3 {
            return None;
        }
        let (_, _, residuals) = ols_simple(xs, ys).ok()?;
        let df = (xs.len() - 2) as f64;
        Some((residuals.iter().map(|r| r * r).sum::<f64>(), df))
    };

    match (rss(&x1, &y1), rss(&x2, &y2)) {
        (Some((rss1, df1)), Some((rss2, df2))) if rss1 > 0.0 => {
            let statistic = (rss2 / df2) / (rss1 / df1);
            let p_value = f_sf(statistic, df2, df1).unwrap_or(f64::NAN);
            StatisticalTest { statistic, p_value }
        }
        _ => StatisticalTest {
            statistic: f64::NAN,
            p_value: f64::NAN,
        },
    }
}

/// Harvey-Collier linearity test: one-sample t-test on the recursive
/// residuals of y~x. `None` when the recursion is degenerate.
pub fn harvey_collier(x: &[f64], y: &[f64]) -> Option<StatisticalTest> {
    let n = x.len();
    if n < 5 {
        return None;
    }

    // Initialize the recursive least squares on the first two points
    let x1 = x[0];
    let x2 = x[1];
    if x1 == x2 {
        return None;
    }
    let mut slope = (y[1] - y[0]) / (x2 - x1);
    let mut intercept = y[0] - slope * x1;

    // P = (X'X)^{-1} for X = [[1, x1], [1, x2]]
    let det = 2.0 * (x1 * x1 + x2 * x2) - (x1 + x2) * (x1 + x2);
    if det.abs() < 1e-12 {
        return None;
    }
    let mut p00 = (x1 * x1 + x2 * x2) / det;
    let mut p01 = -(x1 + x2) / det;
    let mut p11 = 2.0 / det;

    let mut recursive = Vec::with_capacity(n - 2);
    for t in 2..n {
        let xt = x[t];
        // f = 1 + [1, xt] P [1, xt]'
        let f = 1.0 + p00 + 2.0 * p01 * xt + p11 * xt * xt;
        if f <= 0.0 {
            return None;
        }
        let predicted = intercept + slope * xt;
        let error = y[t] - predicted;
        recursive.push(error / f.sqrt());

        // Gain K = P x / f, then rank-one updates of b and P
        let k0 = (p00 + p01 * xt) / f;
        let k1 = (p01 + p11 * xt) / f;
        intercept += k0 * error;
        slope += k1 * error;

        let new_p00 = p00 - k0 * (p00 + xt * p01);
        let new_p01 = p01 - k0 * (p01 + xt * p11);
        let new_p11 = p11 - k1 * (p01 + xt * p11);
        p00 = new_p00;
        p01 = new_p01;
        p11 = new_p11;
    }

    let m = recursive.len();
    let mean_w = mean(&recursive);
    let sd_w = std_dev(&recursive);
    if !(sd_w > 0.0) {
        return None;
    }
    let t_stat = mean_w / (sd_w / (m as f64).sqrt());
    let df = (m - 1) as f64;
    let p_value = students_t_two_sided(t_stat, df).ok()?;
    if !t_stat.is_finite() || !p_value.is_finite() {
        return None;
    }
    Some(StatisticalTest {
        statistic: t_stat,
        p_value,
    })
}

/// Linear-interpolation quantile over a sorted copy of the data
fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let position = q * (sorted.len() - 1) as f64;
    let low = position.floor() as usize;
    let high = position.ceil() as usize;
    if low == high {
        sorted[low]
    } else {
        let weight = position - low as f64;
        sorted[low] * (1.0 - weight) + sorted[high] * weight
    }
}

/// Tukey-fence outliers: values beyond 1.5 IQR of the quartiles
pub fn outliers_tukey(values: &[f64], samples: &[String]) -> Vec<OutlierSample> {
    if values.len() < 3 {
        return Vec::new();
    }
    let q1 = quantile(values, 0.25);
    let q3 = quantile(values, 0.75);
    let iqr = q3 - q1;
    let low = q1 - 1.5 * iqr;
    let high = q3 + 1.5 * iqr;

    values
        .iter()
        .zip(samples)
        .filter(|(v, _)| **v < low || **v > high)
        .map(|(v, s)| OutlierSample {
            sample: s.clone(),
            value: *v,
        })
        .collect()
}
