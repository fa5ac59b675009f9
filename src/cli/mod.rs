use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// omicsfuse: multi-omics data fusion and survival validation
#[derive(Parser, Debug)]
#[command(name = "omicsfuse")]
#[command(about = "Multi-omics data fusion and survival validation pipeline")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Correlate a gene source against a GEM source
    Correlate(CorrelateArgs),

    /// Validate a trained model against clinical and molecular sources
    Validate(ValidateArgs),

    /// Inspect a source: samples, rows, attributes
    Inspect(InspectArgs),
}

/// Correlation experiment arguments
#[derive(Parser, Debug)]
pub struct CorrelateArgs {
    /// Gene expression source (TSV/CSV, optionally gzipped)
    #[arg(long, required = true)]
    pub mrna: PathBuf,

    /// GEM source file
    #[arg(long, required = true)]
    pub gem: PathBuf,

    /// GEM molecule kind (mirna, cna, methylation)
    #[arg(long, default_value = "mirna")]
    pub gem_kind: String,

    /// Optional clinical source restricting the sample set
    #[arg(long)]
    pub clinical: Option<PathBuf>,

    /// Correlation method (pearson, spearman, kendall)
    #[arg(short, long, default_value = "pearson")]
    pub method: String,

    /// p-value adjustment method (bh, by, bonferroni)
    #[arg(short, long, default_value = "bh")]
    pub adjustment: String,

    /// Minimum absolute correlation to keep a pair
    #[arg(short, long, default_value = "0.7")]
    pub threshold: f64,

    /// Minimum standard deviation for genes
    #[arg(long, default_value = "0.0")]
    pub min_std_gene: f64,

    /// Minimum standard deviation for GEM molecules
    #[arg(long, default_value = "0.2")]
    pub min_std_gem: f64,

    /// Rows per chunk while streaming sources
    #[arg(long, default_value = "500")]
    pub chunk_size: usize,

    /// Comma-separated genes to evaluate (all when omitted)
    #[arg(long)]
    pub genes: Option<String>,

    /// Output file for the resulting combinations (JSON)
    #[arg(short, long, default_value = "combinations.json")]
    pub output: PathBuf,
}

/// Statistical validation arguments
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Trained model checkpoint (JSON)
    #[arg(short, long, required = true)]
    pub model: PathBuf,

    /// Clinical source file (samples as rows)
    #[arg(long, required = true)]
    pub clinical: PathBuf,

    /// Gene expression source
    #[arg(long)]
    pub mrna: Option<PathBuf>,

    /// miRNA source
    #[arg(long)]
    pub mirna: Option<PathBuf>,

    /// Copy-number source
    #[arg(long)]
    pub cna: Option<PathBuf>,

    /// Methylation source
    #[arg(long)]
    pub methylation: Option<PathBuf>,

    /// Clinical column holding the survival event
    #[arg(long, required = true)]
    pub event_column: String,

    /// Clinical column holding the survival time
    #[arg(long, required = true)]
    pub time_column: String,

    /// Clinical attribute for regression-mode Kaplan-Meier grouping
    #[arg(long)]
    pub attribute: Option<String>,

    /// Rows per chunk while streaming sources
    #[arg(long, default_value = "500")]
    pub chunk_size: usize,

    /// Output file for the validation report (JSON)
    #[arg(short, long, default_value = "validation.json")]
    pub output: PathBuf,
}

/// Inspection arguments
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Source file to inspect
    #[arg(short, long, required = true)]
    pub input: PathBuf,

    /// Treat the source as clinical data (samples as rows)
    #[arg(long)]
    pub clinical: bool,
}

/// Parse CLI arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Setup logging based on verbosity
pub fn setup_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::parse_from([
            "omicsfuse",
            "correlate",
            "--mrna",
            "genes.tsv",
            "--gem",
            "mirna.tsv",
        ]);

        match cli.command {
            Commands::Correlate(args) => {
                assert_eq!(args.mrna, PathBuf::from("genes.tsv"));
                assert_eq!(args.threshold, 0.7);
                assert_eq!(args.method, "pearson");
                assert_eq!(args.chunk_size, 500);
            }
            _ => panic!("Expected Correlate command"),
        }
    }

    #[test]
    fn test_validate_args() {
        let cli = Cli::parse_from([
            "omicsfuse",
            "validate",
            "-m",
            "model.json",
            "--clinical",
            "clinical.tsv",
            "--mrna",
            "genes.tsv",
            "--event-column",
            "OS_STATUS",
            "--time-column",
            "OS_MONTHS",
        ]);

        match cli.command {
            Commands::Validate(args) => {
                assert_eq!(args.model, PathBuf::from("model.json"));
                assert_eq!(args.event_column, "OS_STATUS");
                assert!(args.mirna.is_none());
            }
            _ => panic!("Expected Validate command"),
        }
    }
}
