//! Survival model scoring: concordance index and the single-covariate Cox
//! proportional-hazards fit used to summarize group separation.

use crate::error::{FusionError, Result};
use crate::fusion::SurvivalObservation;
use ndarray::ArrayView1;
use tracing::debug;

/// Harrell's concordance index: the fraction of comparable pairs where the
/// higher risk score belongs to the shorter survival, ties counting half.
pub fn concordance_index(
    risk_scores: ArrayView1<f64>,
    times: ArrayView1<f64>,
    events: &[bool],
) -> Result<f64> {
    let n = risk_scores.len();
    if n != times.len() || n != events.len() {
        return Err(FusionError::numerical_error(
            "concordance: risk scores, times and events must have the same length",
        ));
    }

    let mut concordant = 0.0;
    let mut discordant = 0.0;
    let mut tied_risk = 0.0;

    for i in 0..n {
        if !events[i] {
            continue;
        }
        for j in 0..n {
            if i == j {
                continue;
            }
            // j is comparable when it outlived i (event later, or censored
            // no earlier)
            if times[j] > times[i] || (!events[j] && times[j] >= times[i]) {
                if risk_scores[i] > risk_scores[j] {
                    concordant += 1.0;
                } else if risk_scores[i] < risk_scores[j] {
                    discordant += 1.0;
                } else {
                    tied_risk += 1.0;
                }
            }
        }
    }

    let comparable = concordant + discordant + tied_risk;
    if comparable == 0.0 {
        return Err(FusionError::numerical_error(
            "concordance: no comparable pairs",
        ));
    }
    Ok((concordant + 0.5 * tied_risk) / comparable)
}

/// Log partial likelihood (Breslow) of risk scores against observed
/// survival, stabilized with log-sum-exp
pub fn log_partial_likelihood(
    risk_scores: &[f64],
    observations: &[SurvivalObservation],
) -> f64 {
    let n = observations.len();
    let mut event_times: Vec<f64> = observations
        .iter()
        .filter(|o| o.event)
        .map(|o| o.time)
        .collect();
    event_times.sort_by(|a, b| a.total_cmp(b));
    event_times.dedup();

    let mut loglik = 0.0;
    for &event_time in &event_times {
        let risk_set: Vec<usize> = (0..n)
            .filter(|&i| observations[i].time >= event_time)
            .collect();
        if risk_set.is_empty() {
            continue;
        }

        let max_risk = risk_set
            .iter()
            .map(|&i| risk_scores[i])
            .fold(f64::NEG_INFINITY, f64::max);
        let log_sum_exp = max_risk
            + risk_set
                .iter()
                .map(|&i| (risk_scores[i] - max_risk).exp())
                .sum::<f64>()
                .ln();

        for i in 0..n {
            if observations[i].event && observations[i].time == event_time {
                loglik += risk_scores[i] - log_sum_exp;
            }
        }
    }
    loglik
}

/// Result of the single-covariate Cox fit
#[derive(Debug, Clone, Copy)]
pub struct CoxSummary {
    /// Fitted coefficient of the sole covariate
    pub coefficient: f64,
    /// Concordance index of the fitted risk scores
    pub concordance_index: f64,
    /// Log partial likelihood at the fitted coefficient
    pub log_likelihood: f64,
    pub n_iterations: usize,
    pub converged: bool,
}

/// Fit a Cox proportional-hazards model with a single covariate via
/// Newton-Raphson on the Breslow partial likelihood.
///
/// A constant covariate carries no information: the gradient vanishes at
/// zero and the fit converges immediately with a chance-level concordance.
pub fn fit_single_covariate_cox(
    covariate: &[f64],
    observations: &[SurvivalObservation],
) -> Result<CoxSummary> {
    let n = observations.len();
    if covariate.len() != n {
        return Err(FusionError::numerical_error(
            "cox: covariate and observations must have the same length",
        ));
    }
    if n == 0 {
        return Err(FusionError::numerical_error("cox: empty input"));
    }

    let mut event_times: Vec<f64> = observations
        .iter()
        .filter(|o| o.event)
        .map(|o| o.time)
        .collect();
    event_times.sort_by(|a, b| a.total_cmp(b));
    event_times.dedup();

    let mut beta = 0.0_f64;
    let mut converged = false;
    let mut iterations = 0;

    for iteration in 0..50 {
        iterations = iteration + 1;
        let mut gradient = 0.0;
        let mut information = 0.0;

        for &event_time in &event_times {
            let risk_set: Vec<usize> = (0..n)
                .filter(|&i| observations[i].time >= event_time)
                .collect();
            if risk_set.is_empty() {
                continue;
            }

            let weights: Vec<f64> = risk_set
                .iter()
                .map(|&i| (beta * covariate[i]).exp())
                .collect();
            let weight_sum: f64 = weights.iter().sum();
            let weighted_x: f64 = risk_set
                .iter()
                .zip(&weights)
                .map(|(&i, w)| w * covariate[i])
                .sum::<f64>()
                / weight_sum;
            let weighted_x2: f64 = risk_set
                .iter()
                .zip(&weights)
                .map(|(&i, w)| w * covariate[i] * covariate[i])
                .sum::<f64>()
                / weight_sum;

            let events_here = (0..n)
                .filter(|&i| observations[i].event && observations[i].time == event_time);
            for i in events_here {
                gradient += covariate[i] - weighted_x;
                information += weighted_x2 - weighted_x * weighted_x;
            }
        }

        if information.abs() < 1e-12 {
            converged = true;
            break;
        }

        let step = gradient / information;
        beta += step;
        if !beta.is_finite() {
            return Err(FusionError::numerical_error(
                "cox: Newton-Raphson diverged",
            ));
        }
        if step.abs() < 1e-9 {
            converged = true;
            break;
        }
    }

    let risk_scores: Vec<f64> = covariate.iter().map(|x| beta * x).collect();
    let log_likelihood = log_partial_likelihood(&risk_scores, observations);

    let times: Vec<f64> = observations.iter().map(|o| o.time).collect();
    let events: Vec<bool> = observations.iter().map(|o| o.event).collect();
    let concordance = concordance_index(
        ArrayView1::from(risk_scores.as_slice()),
        ArrayView1::from(times.as_slice()),
        &events,
    )
    // No comparable pairs collapses to chance level
    .unwrap_or(0.5);

    debug!(
        "Cox fit: beta={:.6}, loglik={:.4}, converged={} after {} iterations",
        beta, log_likelihood, converged, iterations
    );

    Ok(CoxSummary {
        coefficient: beta,
        concordance_index: concordance,
        log_likelihood,
        n_iterations: iterations,
        converged,
    })
}

/// Mean squared error between predictions and observed values
pub fn mean_squared_error(predicted: &[f64], observed: &[f64]) -> Result<f64> {
    if predicted.len() != observed.len() || predicted.is_empty() {
        return Err(FusionError::numerical_error(
            "mse: predictions and observations must be non-empty and paired",
        ));
    }
    let n = predicted.len() as f64;
    Ok(predicted
        .iter()
        .zip(observed)
        .map(|(p, o)| (p - o) * (p - o))
        .sum::<f64>()
        / n)
}

/// Coefficient of determination R² of predictions against observed values
pub fn r_squared(predicted: &[f64], observed: &[f64]) -> Result<f64> {
    if predicted.len() != observed.len() || predicted.is_empty() {
        return Err(FusionError::numerical_error(
            "r2: predictions and observations must be non-empty and paired",
        ));
    }
    let mean_observed = observed.iter().sum::<f64>() / observed.len() as f64;
    let ss_total: f64 = observed
        .iter()
        .map(|o| (o - mean_observed) * (o - mean_observed))
        .sum();
    let ss_residual: f64 = predicted
        .iter()
        .zip(observed)
        .map(|(p, o)| (o - p) * (o - p))
        .sum();
    if ss_total == 0.0 {
        return Ok(0.0);
    }
    Ok(1.0 - ss_residual / ss_total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    fn obs(pairs: &[(bool, f64)]) -> Vec<SurvivalObservation> {
        pairs
            .iter()
            .map(|&(event, time)| SurvivalObservation::new(event, time))
            .collect()
    }

    #[test]
    fn test_perfect_concordance() {
        let times = Array1::from(vec![1.0, 2.0, 3.0, 4.0]);
        let events = vec![true, true, true, true];
        // Risk perfectly anti-correlated with survival time
        let risk = Array1::from(vec![4.0, 3.0, 2.0, 1.0]);

        let c = concordance_index(risk.view(), times.view(), &events).unwrap();
        assert_relative_eq!(c, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_tied_risk_is_chance_level() {
        let times = Array1::from(vec![1.0, 2.0, 3.0]);
        let events = vec![true, true, true];
        let risk = Array1::from(vec![1.0, 1.0, 1.0]);

        let c = concordance_index(risk.view(), times.view(), &events).unwrap();
        assert_relative_eq!(c, 0.5, epsilon = 1e-10);
    }

    #[test]
    fn test_no_comparable_pairs_is_an_error() {
        let times = Array1::from(vec![5.0]);
        let events = vec![true];
        let risk = Array1::from(vec![1.0]);
        assert!(concordance_index(risk.view(), times.view(), &events).is_err());
    }

    #[test]
    fn test_log_partial_likelihood_zero_risk() {
        // With all-zero risk scores the likelihood is -Σ ln(|risk set|)
        let observations = obs(&[(true, 1.0), (true, 2.0), (true, 3.0)]);
        let loglik = log_partial_likelihood(&[0.0, 0.0, 0.0], &observations);
        let expected = -(3.0_f64.ln() + 2.0_f64.ln() + 1.0_f64.ln());
        assert_relative_eq!(loglik, expected, epsilon = 1e-10);
    }

    #[test]
    fn test_cox_fit_separating_covariate() {
        // Covariate 1 mostly dies early, covariate 0 mostly lives long; the
        // overlap keeps the maximum-likelihood estimate finite
        let observations = obs(&[
            (true, 1.0),
            (true, 2.0),
            (true, 10.0),
            (true, 3.0),
            (true, 11.0),
            (true, 12.0),
        ]);
        let covariate = [1.0, 1.0, 1.0, 0.0, 0.0, 0.0];

        let summary = fit_single_covariate_cox(&covariate, &observations).unwrap();
        assert!(summary.converged);
        assert!(summary.coefficient > 0.0);
        assert!(summary.concordance_index > 0.65);
        assert!(summary.log_likelihood.is_finite());
    }

    #[test]
    fn test_cox_fit_perfect_separation_stays_finite() {
        // Perfectly separated groups push the coefficient towards infinity;
        // the information guard still terminates with finite outputs
        let observations = obs(&[
            (true, 1.0),
            (true, 2.0),
            (true, 10.0),
            (true, 11.0),
        ]);
        let summary =
            fit_single_covariate_cox(&[1.0, 1.0, 0.0, 0.0], &observations).unwrap();
        assert!(summary.coefficient.is_finite());
        assert!(summary.log_likelihood.is_finite());
        assert!(summary.concordance_index > 0.8);
    }

    #[test]
    fn test_cox_fit_constant_covariate() {
        let observations = obs(&[(true, 1.0), (true, 2.0), (false, 3.0)]);
        let summary = fit_single_covariate_cox(&[2.0, 2.0, 2.0], &observations).unwrap();
        assert!(summary.converged);
        assert_eq!(summary.coefficient, 0.0);
        assert_relative_eq!(summary.concordance_index, 0.5);
    }

    #[test]
    fn test_mse_and_r_squared() {
        let observed = [1.0, 2.0, 3.0, 4.0];
        let perfect = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(mean_squared_error(&perfect, &observed).unwrap(), 0.0);
        assert_relative_eq!(r_squared(&perfect, &observed).unwrap(), 1.0);

        let off = [2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(mean_squared_error(&off, &observed).unwrap(), 1.0);
        assert!(r_squared(&off, &observed).unwrap() < 1.0);
    }
}
