//! The correlation pass: stream the GEM source in bounded chunks and
//! correlate every GEM row against every requested gene, then adjust the
//! surviving p-values. Also the per-pair entry point that computes and
//! memoizes the diagnostic statistical properties.

use crate::error::Result;
use crate::fusion::{common_samples, CancelFlag};
use crate::pipeline::store::ResultStore;
use crate::pipeline::{
    CorrelationExperiment, GeneGemCombination, DISPLAY_DECIMALS,
};
use crate::source::{Frame, Source};
use crate::stats::correction::adjust;
use crate::stats::correlation::correlate;
use crate::stats::properties::{compute_statistical_properties, SourceStatisticalProperties};
use crate::utils::round_to;
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Most diagnostics need at least this many paired samples
pub const NUMBER_OF_NEEDED_SAMPLES: usize = 3;

/// Result of a correlation run, before persistence
#[derive(Debug)]
pub struct CorrelationOutcome {
    pub combinations: Vec<GeneGemCombination>,
    /// Pairs actually evaluated (after the standard-deviation filters)
    pub evaluated_pairs: usize,
}

fn finite_std(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return 0.0;
    }
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    let ss: f64 = finite.iter().map(|v| (v - mean) * (v - mean)).sum();
    (ss / (finite.len() - 1) as f64).sqrt()
}

/// Pair the two vectors and drop positions where either value is missing
fn paired_finite(gene: &[f64], gem: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut gene_out = Vec::with_capacity(gene.len());
    let mut gem_out = Vec::with_capacity(gem.len());
    for (g, m) in gene.iter().zip(gem) {
        if g.is_finite() && m.is_finite() {
            gene_out.push(*g);
            gem_out.push(*m);
        }
    }
    (gene_out, gem_out)
}

/// Load the requested gene rows restricted to the samples in common.
/// Streamed in chunks so only the requested genes are ever held.
fn load_gene_rows(
    source: &Source,
    genes: &[String],
    samples: &[String],
    chunk_size: usize,
    cancel: &CancelFlag,
) -> Result<Frame> {
    let wanted: Option<HashSet<String>> = if genes.is_empty() {
        None
    } else {
        Some(genes.iter().cloned().collect())
    };

    let mut collected = Frame::with_columns(samples.to_vec());
    for chunk in source.chunked_frames(chunk_size)? {
        cancel.check()?;
        let chunk = chunk?.select_columns(samples);
        for (label, row) in chunk.index.into_iter().zip(chunk.values) {
            if wanted.as_ref().map_or(true, |w| w.contains(&label)) {
                collected.push_row(label, row);
            }
        }
    }
    Ok(collected)
}

/// Run the full correlation pass for an experiment.
///
/// The GEM source is streamed one chunk at a time; each chunk's rows are
/// correlated against the gene matrix in parallel with deterministic output
/// order. Pairs below the configured absolute-correlation threshold are
/// discarded, and adjusted p-values are computed over the surviving set.
pub fn run_correlation_experiment(
    experiment: &mut CorrelationExperiment,
    cancel: &CancelFlag,
) -> Result<CorrelationOutcome> {
    let samples = common_samples(&experiment.get_all_sources())?;
    let config = experiment.config.clone();

    let genes = load_gene_rows(
        &experiment.mrna_source,
        &experiment.gene_list,
        &samples,
        config.chunk_size,
        cancel,
    )?;
    info!(
        "Correlating {} genes against the {} source over {} samples",
        genes.n_rows(),
        experiment.gem_source.kind(),
        samples.len()
    );

    // Gene rows below the gene std threshold never participate
    let gene_stds: Vec<f64> = genes.values.iter().map(|row| finite_std(row)).collect();
    let active_genes: Vec<usize> = (0..genes.n_rows())
        .filter(|&i| gene_stds[i] >= config.minimum_std_gene)
        .collect();
    if active_genes.len() < genes.n_rows() {
        debug!(
            "{} genes skipped by the standard-deviation filter",
            genes.n_rows() - active_genes.len()
        );
    }

    let wanted_gems: Option<HashSet<String>> = if experiment.gem_list.is_empty() {
        None
    } else {
        Some(experiment.gem_list.iter().cloned().collect())
    };

    let mut combinations: Vec<GeneGemCombination> = Vec::new();
    let mut evaluated = 0usize;

    for chunk in experiment.gem_source.chunked_frames(config.chunk_size)? {
        cancel.check()?;
        let chunk = chunk?.select_columns(&samples);

        let rows: Vec<(String, Vec<f64>)> = chunk
            .index
            .into_iter()
            .zip(chunk.values)
            .filter(|(label, _)| wanted_gems.as_ref().map_or(true, |w| w.contains(label)))
            .collect();

        // One chunk in memory at a time; order-preserving parallel map
        let chunk_results: Vec<(usize, Vec<GeneGemCombination>)> = rows
            .par_iter()
            .map(|(gem_label, gem_row)| {
                if finite_std(gem_row) < config.minimum_std_gem {
                    return (0usize, Vec::new());
                }
                let mut found = Vec::new();
                let mut pairs = 0usize;
                for &gene_idx in &active_genes {
                    let (gene_values, gem_values) =
                        paired_finite(&genes.values[gene_idx], gem_row);
                    if gene_values.len() < NUMBER_OF_NEEDED_SAMPLES {
                        continue;
                    }
                    pairs += 1;
                    match correlate(&gene_values, &gem_values, config.method) {
                        Ok((correlation, p_value)) => {
                            if correlation.abs() >= config.minimum_coefficient_threshold {
                                found.push(GeneGemCombination {
                                    id: 0,
                                    experiment_id: experiment.id,
                                    gene: genes.index[gene_idx].clone(),
                                    gem: gem_label.clone(),
                                    correlation,
                                    p_value,
                                    adjusted_p_value: None,
                                });
                            }
                        }
                        Err(e) => {
                            warn!(
                                "Correlation failed for {}/{}: {}",
                                genes.index[gene_idx], gem_label, e
                            );
                        }
                    }
                }
                (pairs, found)
            })
            .collect();

        for (pairs, mut found) in chunk_results {
            evaluated += pairs;
            combinations.append(&mut found);
        }
    }

    // Adjusted p-values are computed over the full surviving set
    let p_values: Vec<f64> = combinations.iter().map(|c| c.p_value).collect();
    let adjusted = adjust(&p_values, config.adjustment)?;
    for (combination, adjusted_p) in combinations.iter_mut().zip(adjusted) {
        combination.adjusted_p_value = Some(adjusted_p);
    }

    experiment.evaluated_row_count = Some(evaluated);
    experiment.result_total_row_count = Some(combinations.len());
    info!(
        "Correlation pass evaluated {} pairs, {} passed the threshold",
        evaluated,
        combinations.len()
    );

    Ok(CorrelationOutcome {
        combinations,
        evaluated_pairs: evaluated,
    })
}

/// Paired gene/GEM values with the sample identifiers backing them
#[derive(Debug)]
pub struct PairData {
    pub gene_values: Vec<f64>,
    pub gem_values: Vec<f64>,
    pub samples: Vec<String>,
}

/// Fetch the paired value vectors for one gene/GEM combination, restricted
/// to the experiment's resolved sample set. Positions where either value is
/// missing are dropped together with their sample identifier.
pub fn valid_pair_data(
    experiment: &CorrelationExperiment,
    gene: &str,
    gem: &str,
) -> Result<PairData> {
    let samples = common_samples(&experiment.get_all_sources())?;
    let gene_row = experiment
        .mrna_source
        .specific_row_for_samples(gene, &samples)?;
    let gem_row = experiment
        .gem_source
        .specific_row_for_samples(gem, &samples)?;

    let mut gene_values = Vec::new();
    let mut gem_values = Vec::new();
    let mut kept_samples = Vec::new();
    for ((g, m), sample) in gene_row.iter().zip(&gem_row).zip(samples) {
        if g.is_finite() && m.is_finite() {
            gene_values.push(*g);
            gem_values.push(*m);
            kept_samples.push(sample);
        }
    }

    Ok(PairData {
        gene_values,
        gem_values,
        samples: kept_samples,
    })
}

/// What a statistical-properties request returns to the client
pub struct PropertiesPayload {
    /// Absent when there is too little data
    pub properties: Option<Arc<SourceStatisticalProperties>>,
    /// Gene values, rounded for display when the data is usable
    pub gene_data: Vec<f64>,
    /// GEM values, rounded for display when the data is usable
    pub gem_data: Vec<f64>,
    /// False when fewer than the needed paired samples exist
    pub is_data_ok: bool,
}

/// Statistical properties for one combination, memoized per combination id.
///
/// Fewer than [`NUMBER_OF_NEEDED_SAMPLES`] paired samples is not an error:
/// the diagnostics are withheld and `is_data_ok` is false. On the first
/// successful request the bundle is computed and cached atomically; every
/// later request returns the identical stored record.
pub fn combination_statistical_properties(
    store: &ResultStore,
    experiment: &CorrelationExperiment,
    combination: &GeneGemCombination,
) -> Result<PropertiesPayload> {
    let pair = valid_pair_data(experiment, &combination.gene, &combination.gem)?;

    if pair.gene_values.len() < NUMBER_OF_NEEDED_SAMPLES {
        return Ok(PropertiesPayload {
            properties: None,
            gene_data: pair.gene_values,
            gem_data: pair.gem_values,
            is_data_ok: false,
        });
    }

    let properties = store.get_or_compute_properties(combination.id, || {
        compute_statistical_properties(
            &pair.gene_values,
            &pair.gem_values,
            &pair.samples,
            &pair.samples,
        )
    })?;

    // Rounded copies bound the payload; the cached record keeps full precision
    let gene_data = pair
        .gene_values
        .iter()
        .map(|v| round_to(*v, DISPLAY_DECIMALS))
        .collect();
    let gem_data = pair
        .gem_values
        .iter()
        .map(|v| round_to(*v, DISPLAY_DECIMALS))
        .collect();

    Ok(PropertiesPayload {
        properties: Some(properties),
        gene_data,
        gem_data,
        is_data_ok: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::CorrelationConfig;
    use crate::source::{MoleculeKind, TabularFile};
    use crate::stats::correlation::CorrelationMethod;
    use std::io::Write;

    fn molecular_file(content: &str) -> tempfile::TempPath {
        let mut file = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.into_temp_path()
    }

    fn experiment(
        mrna: &tempfile::TempPath,
        gem: &tempfile::TempPath,
        config: CorrelationConfig,
    ) -> CorrelationExperiment {
        CorrelationExperiment::new(
            1,
            "test",
            1,
            Source::uploaded(TabularFile::open(mrna).unwrap(), MoleculeKind::Mrna),
            Source::uploaded(TabularFile::open(gem).unwrap(), MoleculeKind::Mirna),
            config,
        )
    }

    #[test]
    fn test_correlation_pass_finds_strong_pairs() {
        let mrna = molecular_file(
            "\tS1\tS2\tS3\tS4\tS5\nG1\t1\t2\t3\t4\t5\nG2\t5\t1\t4\t2\t3\n",
        );
        // M1 tracks G1 exactly, M2 is shuffled noise
        let gem = molecular_file(
            "\tS1\tS2\tS3\tS4\tS5\nM1\t2\t4\t6\t8\t10\nM2\t3\t1\t5\t2\t4\n",
        );

        let config = CorrelationConfig {
            minimum_coefficient_threshold: 0.9,
            minimum_std_gem: 0.0,
            chunk_size: 1,
            ..CorrelationConfig::default()
        };
        let mut experiment = experiment(&mrna, &gem, config);
        let outcome = run_correlation_experiment(&mut experiment, &CancelFlag::new()).unwrap();

        let strong: Vec<&GeneGemCombination> = outcome
            .combinations
            .iter()
            .filter(|c| c.gene == "G1" && c.gem == "M1")
            .collect();
        assert_eq!(strong.len(), 1);
        assert!((strong[0].correlation - 1.0).abs() < 1e-10);
        assert!(strong[0].adjusted_p_value.is_some());
        assert_eq!(experiment.evaluated_row_count, Some(4));
        assert_eq!(
            experiment.result_total_row_count,
            Some(outcome.combinations.len())
        );
    }

    #[test]
    fn test_chunk_size_does_not_change_the_result() {
        let mrna = molecular_file(
            "\tS1\tS2\tS3\tS4\nG1\t1\t2\t3\t4\nG2\t4\t3\t2\t1\nG3\t1\t3\t2\t4\n",
        );
        let gem = molecular_file(
            "\tS1\tS2\tS3\tS4\nM1\t2\t4\t6\t8\nM2\t8\t6\t4\t2\nM3\t1\t2\t2\t3\n",
        );

        let outcome_of = |chunk_size: usize| {
            let config = CorrelationConfig {
                minimum_coefficient_threshold: 0.5,
                minimum_std_gem: 0.0,
                chunk_size,
                ..CorrelationConfig::default()
            };
            let mut exp = experiment(&mrna, &gem, config);
            let outcome = run_correlation_experiment(&mut exp, &CancelFlag::new()).unwrap();
            outcome
                .combinations
                .iter()
                .map(|c| (c.gene.clone(), c.gem.clone(), c.correlation))
                .collect::<Vec<_>>()
        };

        assert_eq!(outcome_of(1), outcome_of(100));
    }

    #[test]
    fn test_gem_std_filter_skips_flat_rows() {
        let mrna = molecular_file("\tS1\tS2\tS3\tS4\nG1\t1\t2\t3\t4\n");
        let gem = molecular_file("\tS1\tS2\tS3\tS4\nM1\t5\t5\t5\t5\n");

        let config = CorrelationConfig {
            minimum_coefficient_threshold: 0.0,
            minimum_std_gem: 0.2,
            ..CorrelationConfig::default()
        };
        let mut exp = experiment(&mrna, &gem, config);
        let outcome = run_correlation_experiment(&mut exp, &CancelFlag::new()).unwrap();
        assert!(outcome.combinations.is_empty());
        assert_eq!(outcome.evaluated_pairs, 0);
    }

    #[test]
    fn test_no_samples_in_common_propagates() {
        let mrna = molecular_file("\tS1\nG1\t1\n");
        let gem = molecular_file("\tS2\nM1\t1\n");

        let mut exp = experiment(&mrna, &gem, CorrelationConfig::default());
        let err = run_correlation_experiment(&mut exp, &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, crate::error::FusionError::NoSamplesInCommon));
    }

    #[test]
    fn test_kendall_method_runs() {
        let mrna = molecular_file("\tS1\tS2\tS3\tS4\nG1\t1\t2\t3\t4\n");
        let gem = molecular_file("\tS1\tS2\tS3\tS4\nM1\t1\t3\t5\t7\n");

        let config = CorrelationConfig {
            method: CorrelationMethod::Kendall,
            minimum_coefficient_threshold: 0.9,
            minimum_std_gem: 0.0,
            ..CorrelationConfig::default()
        };
        let mut exp = experiment(&mrna, &gem, config);
        let outcome = run_correlation_experiment(&mut exp, &CancelFlag::new()).unwrap();
        assert_eq!(outcome.combinations.len(), 1);
    }

    #[test]
    fn test_insufficient_pair_data_is_soft() {
        // Only 2 samples in common: the properties request must not fail
        let mrna = molecular_file("\tS1\tS2\nG1\t1\t2\n");
        let gem = molecular_file("\tS1\tS2\nM1\t2\t4\n");

        let exp = experiment(&mrna, &gem, CorrelationConfig::default());
        let store = ResultStore::new();
        let combination = GeneGemCombination {
            id: 1,
            experiment_id: 1,
            gene: "G1".to_string(),
            gem: "M1".to_string(),
            correlation: 1.0,
            p_value: 0.0,
            adjusted_p_value: None,
        };

        let payload =
            combination_statistical_properties(&store, &exp, &combination).unwrap();
        assert!(!payload.is_data_ok);
        assert!(payload.properties.is_none());
        assert!(store.statistical_properties(1).is_none());
    }

    #[test]
    fn test_properties_memoized_and_rounded() {
        let mrna = molecular_file(
            "\tS1\tS2\tS3\tS4\tS5\nG1\t1.23456\t2.1\t3.4\t4.2\t5.9\n",
        );
        let gem = molecular_file(
            "\tS1\tS2\tS3\tS4\tS5\nM1\t2.0\t4.1\t6.2\t8.0\t9.9\n",
        );

        let exp = experiment(&mrna, &gem, CorrelationConfig::default());
        let store = ResultStore::new();
        let combination = GeneGemCombination {
            id: 3,
            experiment_id: 1,
            gene: "G1".to_string(),
            gem: "M1".to_string(),
            correlation: 0.99,
            p_value: 0.001,
            adjusted_p_value: None,
        };

        let first = combination_statistical_properties(&store, &exp, &combination).unwrap();
        assert!(first.is_data_ok);
        assert_eq!(first.gene_data[0], 1.235); // display rounding
        let cached = first.properties.unwrap();
        // The cached record keeps full precision
        assert!(cached.number_of_samples_evaluated == 5);

        let second = combination_statistical_properties(&store, &exp, &combination).unwrap();
        assert!(Arc::ptr_eq(&cached, &second.properties.unwrap()));
    }

    #[test]
    fn test_missing_gene_row_propagates() {
        let mrna = molecular_file("\tS1\tS2\tS3\nG1\t1\t2\t3\n");
        let gem = molecular_file("\tS1\tS2\tS3\nM1\t1\t2\t3\n");

        let exp = experiment(&mrna, &gem, CorrelationConfig::default());
        let err = valid_pair_data(&exp, "UNKNOWN", "M1").unwrap_err();
        assert!(matches!(err, crate::error::FusionError::RowNotFound { .. }));
    }
}
