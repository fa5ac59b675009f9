pub mod groups;
pub mod metrics;

use crate::fusion::SurvivalObservation;
use serde::{Deserialize, Serialize};

/// One step of a Kaplan-Meier survival curve, directly chartable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KaplanMeierPoint {
    pub time: f64,
    pub probability: f64,
}

/// A labelled survival group with its Kaplan-Meier curve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurvivalGroup {
    pub label: String,
    pub curve: Vec<KaplanMeierPoint>,
}

/// Product-limit Kaplan-Meier estimate as step-function points.
///
/// Ties at a time value collapse into a single step, censored observations
/// reduce the risk set without dropping the curve, and a single observation
/// produces a well-formed single-step curve rather than an error.
pub fn kaplan_meier_curve(observations: &[SurvivalObservation]) -> Vec<KaplanMeierPoint> {
    let mut points = vec![KaplanMeierPoint {
        time: 0.0,
        probability: 1.0,
    }];
    if observations.is_empty() {
        return points;
    }

    let mut order: Vec<usize> = (0..observations.len()).collect();
    order.sort_by(|&a, &b| observations[a].time.total_cmp(&observations[b].time));

    let mut at_risk = observations.len() as f64;
    let mut survival = 1.0;

    let mut i = 0;
    while i < order.len() {
        let time = observations[order[i]].time;
        let mut events = 0.0;
        let mut censored = 0.0;
        while i < order.len() && observations[order[i]].time == time {
            if observations[order[i]].event {
                events += 1.0;
            } else {
                censored += 1.0;
            }
            i += 1;
        }

        if events > 0.0 && at_risk > 0.0 {
            survival *= 1.0 - events / at_risk;
            points.push(KaplanMeierPoint {
                time,
                probability: survival,
            });
        }
        at_risk -= events + censored;
    }

    points
}
