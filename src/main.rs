#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::uninlined_format_args)]

mod csv_reader;
mod error;
mod ml;
mod structs;

use clap::Parser;
use ml::clustering::DEFAULT_MAX_ITERATIONS;
use ml::pipeline::ClusterConfig;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use structs::{ClassifyError, CsvData, FeatureMatrix, LogObserver, Result};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Tiltclass - k-means classification of AreTomo3 tilt-series metrics
#[derive(Parser, Debug)]
#[command(name = "tiltclass")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// CSV metrics file generated by AreTomo3
    #[arg(short, long, alias = "in_csv")]
    in_csv: PathBuf,

    /// Number of k-means classes
    #[arg(short = 'k', long, alias = "num_classes", default_value = "3")]
    num_classes: usize,

    /// Output CSV file for saving classes
    #[arg(short, long, alias = "out_csv")]
    out_csv: PathBuf,

    /// Treat input as TSV instead of CSV
    #[arg(long)]
    tsv: bool,

    /// Maximum k-means iterations
    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
    max_iterations: usize,

    /// Seed for centroid initialization (random if omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Optional JSON file for the run summary
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Two-letter short flags accepted by the AreTomo3 `KmeanMetrics` tool
const LEGACY_SHORT_FLAGS: [(&str, &str); 3] = [
    ("-ic", "--in-csv"),
    ("-nc", "--num-classes"),
    ("-oc", "--out-csv"),
];

/// Rewrite legacy two-letter short flags to their long form
///
/// clap bundles `-ic` as `-i c`, so the tokens are swapped before parsing.
fn expand_legacy_flags<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            LEGACY_SHORT_FLAGS
                .iter()
                .find(|(short, _)| arg.to_str() == Some(*short))
                .map_or(arg, |(_, long)| OsString::from(*long))
        })
        .collect()
}

fn main() {
    let args = Args::parse_from(expand_legacy_flags(std::env::args_os()));
    init_logging(args.verbose);

    if let Err(e) = run(&args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn run(args: &Args) -> Result<()> {
    tracing::info!("Input metrics file: {}", args.in_csv.display());
    tracing::info!("Number of classes:  {}", args.num_classes);
    tracing::info!("Output label file:  {}", args.out_csv.display());

    let config = ClusterConfig {
        clusters: args.num_classes,
        max_iterations: args.max_iterations,
        seed: args.seed,
    };

    run_classify(
        &args.in_csv,
        &args.out_csv,
        args.summary_json.as_deref(),
        &config,
        args.tsv,
    )
}

/// Classify the tilt series of one metrics file
fn run_classify(
    csv_path: &Path,
    out_path: &Path,
    summary_path: Option<&Path>,
    config: &ClusterConfig,
    tsv: bool,
) -> Result<()> {
    if !csv_path.exists() {
        return Err(ClassifyError::Config(format!(
            "CSV file not found: {}",
            csv_path.display()
        )));
    }
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let csv_data = CsvData::from_file(csv_path, tsv)?;
    tracing::info!(
        "Loaded {} rows x {} columns",
        csv_data.row_count(),
        csv_data.col_count()
    );

    let features = FeatureMatrix::from_csv(&csv_data)?;
    tracing::info!(
        "Clustering {} tilt series on {} metrics: {}",
        features.n_samples(),
        features.n_features(),
        features.names().join(", ")
    );

    let result = ml::pipeline::run_pipeline(&features, config, &mut LogObserver)?;

    for line in ml::output::build_summary(&result).lines() {
        tracing::info!("{line}");
    }

    ml::output::write_labels(out_path, &result.assignment)?;
    tracing::info!("Labels have been saved in: {}", out_path.display());

    if let Some(path) = summary_path {
        ml::output::write_summary_json(path, csv_path, &result)?;
        tracing::info!("Summary has been saved in: {}", path.display());
    }

    Ok(())
}
