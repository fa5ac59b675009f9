pub mod joiner;

use crate::error::{FusionError, Result};
use crate::source::clinical::AttributeFrame;
use crate::source::SampleSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Event values treated as a positive survival event when they appear as a
/// substring of a clinical cell (case-sensitive)
pub const COMMON_INTEREST_VALUES: &[&str] = &["DEAD", "DECEASE", "DEATH"];

/// Cooperative stop signal. Long-running stages check it between chunks and
/// pairs; nothing is preempted mid-computation.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`FusionError::Stopped`] when the flag is raised
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(FusionError::Stopped)
        } else {
            Ok(())
        }
    }
}

/// Sorted intersection of sample identifiers across all present sources.
///
/// Absent sources are skipped without affecting the result, and the order of
/// the input sources never changes the output. An empty final intersection
/// (including the zero-present-sources case) is the distinguished
/// no-samples-in-common outcome: a terminal state for the owning
/// experiment, not a transient error.
pub fn common_samples(sources: &[Option<&dyn SampleSource>]) -> Result<Vec<String>> {
    let mut intersection: Option<BTreeSet<String>> = None;

    for source in sources.iter().flatten() {
        let samples: BTreeSet<String> = source.samples()?.into_iter().collect();
        intersection = Some(match intersection {
            None => samples,
            Some(previous) => previous.intersection(&samples).cloned().collect(),
        });
        debug!(
            "Sample intersection now holds {} samples",
            intersection.as_ref().map(|s| s.len()).unwrap_or(0)
        );
    }

    match intersection {
        Some(set) if !set.is_empty() => {
            let samples: Vec<String> = set.into_iter().collect();
            info!("{} samples in common across sources", samples.len());
            Ok(samples)
        }
        _ => Err(FusionError::NoSamplesInCommon),
    }
}

/// One normalized survival observation: whether the event occurred and the
/// observed (or censored) time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurvivalObservation {
    pub event: bool,
    pub time: f64,
}

impl SurvivalObservation {
    pub fn new(event: bool, time: f64) -> Self {
        Self { event, time }
    }
}

/// Keyword configuration for coercing raw clinical event values to booleans
#[derive(Debug, Clone)]
pub struct EventCoercion {
    keywords: Vec<String>,
}

impl Default for EventCoercion {
    fn default() -> Self {
        Self {
            keywords: COMMON_INTEREST_VALUES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl EventCoercion {
    pub fn with_keywords(keywords: Vec<String>) -> Self {
        Self { keywords }
    }

    /// Coerce a raw clinical event cell to a boolean. `1` (integer or
    /// string) and any value containing one of the configured keywords
    /// (case-sensitive substring) are events; everything else is not.
    /// Total over any input; this never fails.
    pub fn coerce(&self, value: &str) -> bool {
        let trimmed = value.trim();
        trimmed == "1" || self.keywords.iter().any(|k| trimmed.contains(k.as_str()))
    }
}

/// Build survival observations from a two-column clinical frame.
///
/// By fixed convention the event column comes first and the second column is
/// ALWAYS the time column, whatever its name. Unparseable times become NaN
/// and are dropped by the downstream cleaning step.
pub fn observations_from_frame(
    frame: &AttributeFrame,
    coercion: &EventCoercion,
) -> Vec<SurvivalObservation> {
    frame
        .values
        .iter()
        .map(|row| {
            let event = coercion.coerce(row.first().map(String::as_str).unwrap_or(""));
            let time = row
                .get(1)
                .and_then(|t| t.trim().parse::<f64>().ok())
                .unwrap_or(f64::NAN);
            SurvivalObservation::new(event, time)
        })
        .collect()
}
