use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use omicsfuse::cli::{
    parse_args, setup_logging, Commands, CorrelateArgs, InspectArgs, ValidateArgs,
};
use omicsfuse::fusion::{CancelFlag, EventCoercion};
use omicsfuse::model::TrainedModel;
use omicsfuse::pipeline::correlation::run_correlation_experiment;
use omicsfuse::pipeline::store::ResultStore;
use omicsfuse::pipeline::validation::{
    kaplan_meier_by_attribute, kaplan_meier_by_clustering, run_statistical_validation,
};
use omicsfuse::pipeline::{CorrelationConfig, CorrelationExperiment, StatisticalValidation};
use omicsfuse::source::clinical::SurvivalColumnTuple;
use omicsfuse::source::{ClinicalSource, MoleculeKind, Source, TabularFile};
use omicsfuse::stats::correction::AdjustmentMethod;
use omicsfuse::stats::correlation::CorrelationMethod;
use omicsfuse::utils;
use serde_json::json;
use std::time::Instant;
use tracing::{error, info};

fn main() {
    let cli = parse_args();

    setup_logging(cli.verbose);

    info!("{}", omicsfuse::info());

    let result = match cli.command {
        Commands::Correlate(args) => run_correlate(args),
        Commands::Validate(args) => run_validate(args),
        Commands::Inspect(args) => run_inspect(args),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn spinner(message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_message(message);
    bar.enable_steady_tick(std::time::Duration::from_millis(120));
    bar
}

fn run_correlate(args: CorrelateArgs) -> Result<()> {
    let started = Instant::now();

    let method = CorrelationMethod::from_str(&args.method)
        .with_context(|| format!("Unknown correlation method: {}", args.method))?;
    let adjustment = AdjustmentMethod::from_str(&args.adjustment)
        .with_context(|| format!("Unknown adjustment method: {}", args.adjustment))?;
    let gem_kind = MoleculeKind::from_str(&args.gem_kind)
        .with_context(|| format!("Unknown GEM kind: {}", args.gem_kind))?;
    utils::validation::in_range(args.threshold, 0.0, 1.0, "threshold")?;
    utils::validation::positive(args.chunk_size as i64, "chunk size")?;

    let mrna_source = Source::uploaded(TabularFile::open(&args.mrna)?, MoleculeKind::Mrna);
    let gem_source = Source::uploaded(TabularFile::open(&args.gem)?, gem_kind);

    let config = CorrelationConfig {
        method,
        adjustment,
        minimum_coefficient_threshold: args.threshold,
        minimum_std_gene: args.min_std_gene,
        minimum_std_gem: args.min_std_gem,
        chunk_size: args.chunk_size,
    };
    let mut experiment =
        CorrelationExperiment::new(1, "cli-correlation", 0, mrna_source, gem_source, config);
    if let Some(clinical) = &args.clinical {
        experiment.clinical_source = Some(ClinicalSource::uploaded(
            TabularFile::open(clinical)?,
            Vec::new(),
        ));
    }
    if let Some(genes) = &args.genes {
        experiment.gene_list = genes
            .split(',')
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect();
    }

    info!("Input mRNA source: {:?}", args.mrna);
    info!("Input GEM source: {:?} ({})", args.gem, gem_kind);

    let bar = spinner("Computing correlations");
    let outcome = run_correlation_experiment(&mut experiment, &CancelFlag::new())
        .context("Correlation experiment failed")?;
    bar.finish_and_clear();

    let store = ResultStore::new();
    let combinations = store.save_combinations(experiment.id, outcome.combinations);

    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() {
            utils::ensure_dir(parent)?;
        }
    }
    let report = json!({
        "method": method.to_string(),
        "adjustment": adjustment.to_string(),
        "evaluated_pairs": outcome.evaluated_pairs,
        "combinations": combinations,
    });
    std::fs::write(&args.output, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("Failed to write {:?}", args.output))?;

    info!(
        "Evaluated {} pairs, kept {} combinations in {}",
        utils::format_number(outcome.evaluated_pairs),
        utils::format_number(combinations.len()),
        utils::format_duration(started.elapsed().as_secs_f64())
    );
    info!("Results written to {:?}", args.output);
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<()> {
    let started = Instant::now();

    let model = TrainedModel::load(&args.model)
        .with_context(|| format!("Failed to load model from {:?}", args.model))?;

    let survival_tuple = SurvivalColumnTuple::new(&args.event_column, &args.time_column);
    let clinical_source = ClinicalSource::uploaded(
        TabularFile::open(&args.clinical)?,
        vec![survival_tuple.clone()],
    );

    let mut molecular_sources: Vec<(Source, Vec<String>)> = Vec::new();
    let declared = [
        (&args.mrna, MoleculeKind::Mrna),
        (&args.mirna, MoleculeKind::Mirna),
        (&args.cna, MoleculeKind::Cna),
        (&args.methylation, MoleculeKind::Methylation),
    ];
    for (path, kind) in declared {
        if let Some(path) = path {
            let source = Source::uploaded(TabularFile::open(path)?, kind);
            let molecules = source.molecule_identifiers()?;
            molecular_sources.push((source, molecules));
        }
    }
    if molecular_sources.is_empty() {
        bail!("At least one molecular source is required");
    }

    let mut validation = StatisticalValidation::new(
        1,
        "cli-validation",
        0,
        model,
        clinical_source,
        molecular_sources,
        survival_tuple,
    );

    let store = ResultStore::new();
    let coercion = EventCoercion::default();
    let cancel = CancelFlag::new();

    let bar = spinner("Running statistical validation");
    run_statistical_validation(&mut validation, &store, &coercion, args.chunk_size, &cancel)
        .context("Statistical validation failed")?;

    let groups = if validation.model.is_regression() {
        match &args.attribute {
            Some(attribute) => Some(serde_json::to_value(kaplan_meier_by_attribute(
                &validation,
                attribute,
                &coercion,
                args.chunk_size,
                &cancel,
            )?)?),
            None => None,
        }
    } else {
        Some(serde_json::to_value(kaplan_meier_by_clustering(
            &validation,
            &store,
            &coercion,
            args.chunk_size,
            &cancel,
        )?)?)
    };
    bar.finish_and_clear();

    let report = json!({
        "mean_squared_error": validation.mean_squared_error,
        "c_index": validation.c_index,
        "log_likelihood": validation.log_likelihood,
        "r_squared": validation.r_squared,
        "source_results": validation.source_results,
        "kaplan_meier": groups,
    });
    std::fs::write(&args.output, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("Failed to write {:?}", args.output))?;

    info!(
        "Validation finished in {}",
        utils::format_duration(started.elapsed().as_secs_f64())
    );
    info!("Report written to {:?}", args.output);
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    let file = TabularFile::open(&args.input)?;

    if args.clinical {
        let source = ClinicalSource::uploaded(file, Vec::new());
        let samples = source.samples()?;
        let attributes = source.attributes()?;
        println!("Clinical source: {:?}", args.input);
        println!("Samples: {}", utils::format_number(samples.len()));
        println!("Attributes ({}):", attributes.len());
        for attribute in attributes {
            println!("  {}", attribute);
        }
    } else {
        let rows = file.row_count()?;
        let samples = file.column_names()?;
        println!("Molecular source: {:?}", args.input);
        println!("Rows: {}", utils::format_number(rows));
        println!("Samples: {}", utils::format_number(samples.len()));
        for sample in samples.iter().take(10) {
            println!("  {}", sample);
        }
        if samples.len() > 10 {
            println!("  ... and {} more", utils::format_number(samples.len() - 10));
        }
    }
    Ok(())
}
