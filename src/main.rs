use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use kdtree_nn::{brute_force, text_format, KdTree, Neighbor, PointSet};

#[derive(Parser, Debug)]
#[command(name = "kdtree", about = "Build k-d trees and answer nearest-neighbor queries")]
struct Cli {
    /// Verbose logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a tree from a point file and persist it.
    Build {
        /// Points, one comma-separated row per line
        #[arg(long, default_value = "sample_data.csv")]
        input: PathBuf,
        /// Where to write the persisted tree
        #[arg(long, default_value = "tree.csv")]
        output: PathBuf,
    },

    /// Answer nearest-neighbor queries against a persisted tree.
    Query {
        #[arg(long, default_value = "tree.csv")]
        tree: PathBuf,
        #[arg(long, default_value = "query_data.csv")]
        queries: PathBuf,
        /// `<index> <distance>` per query, `-` for stdout
        #[arg(long, default_value = "output.csv")]
        output: PathBuf,
        /// Run the query batch this many times and log the timing
        #[arg(long, default_value_t = 1)]
        repeat: usize,
        /// Re-serialize the loaded tree here (round-trip check)
        #[arg(long)]
        echo_tree: Option<PathBuf>,
    },

    /// Answer the same queries with a linear scan, for validation.
    BruteForce {
        #[arg(long, default_value = "sample_data.csv")]
        input: PathBuf,
        #[arg(long, default_value = "query_data.csv")]
        queries: PathBuf,
        #[arg(long, default_value = "bf_output.csv")]
        output: PathBuf,
    },

    /// Write uniformly distributed random points.
    Generate {
        #[arg(long)]
        count: usize,
        #[arg(long)]
        dimension: usize,
        #[arg(long, default_value = "sample_data.csv")]
        output: PathBuf,
        /// Seed for reproducible data
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value_t = -1000.0, allow_negative_numbers = true)]
        min: f64,
        #[arg(long, default_value_t = 1000.0, allow_negative_numbers = true)]
        max: f64,
    },

    /// Check two result files against each other on distance.
    Compare {
        #[arg(default_value = "bf_output.csv")]
        expected: PathBuf,
        #[arg(default_value = "output.csv")]
        actual: PathBuf,
        /// Relative tolerance on distances
        #[arg(long, default_value_t = 1e-9)]
        tolerance: f64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    match cli.command {
        Commands::Build { input, output } => cmd_build(&input, &output),
        Commands::Query { tree, queries, output, repeat, echo_tree } => {
            cmd_query(&tree, &queries, &output, repeat, echo_tree.as_deref())
        }
        Commands::BruteForce { input, queries, output } => cmd_brute_force(&input, &queries, &output),
        Commands::Generate { count, dimension, output, seed, min, max } => {
            cmd_generate(count, dimension, &output, seed, min, max)
        }
        Commands::Compare { expected, actual, tolerance } => cmd_compare(&expected, &actual, tolerance),
    }
}

// Logs go to stderr so results written to stdout stay clean.
fn setup_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn cmd_build(input: &Path, output: &Path) -> anyhow::Result<()> {
    let points: PointSet<f64> = text_format::load_points(input)
        .with_context(|| format!("Error reading points from {}", input.display()))?;
    info!(points = points.len(), dimension = points.dimension(), "loaded {}", input.display());

    let tree = KdTree::build(points).context("Error building tree")?;
    text_format::save_tree(output, &tree)
        .with_context(|| format!("Error writing tree to {}", output.display()))?;
    info!(depth = tree.depth(), "wrote tree to {}", output.display());
    Ok(())
}

fn cmd_query(
    tree_path: &Path,
    queries_path: &Path,
    output: &Path,
    repeat: usize,
    echo_tree: Option<&Path>,
) -> anyhow::Result<()> {
    let tree: KdTree<f64> = text_format::load_tree(tree_path)
        .with_context(|| format!("Error reading tree from {}", tree_path.display()))?;
    info!(points = tree.len(), dimension = tree.dimension(), "loaded tree from {}", tree_path.display());

    if let Some(echo) = echo_tree {
        text_format::save_tree(echo, &tree)
            .with_context(|| format!("Error writing tree to {}", echo.display()))?;
        debug!("re-serialized tree to {}", echo.display());
    }

    let queries: PointSet<f64> = text_format::load_points(queries_path)
        .with_context(|| format!("Error reading queries from {}", queries_path.display()))?;

    let started = Instant::now();
    let mut results = Vec::new();
    for _ in 0..repeat.max(1) {
        results = queries
            .iter()
            .enumerate()
            .map(|(i, q)| tree.nearest(q).with_context(|| format!("Error answering query {}", i)))
            .collect::<anyhow::Result<Vec<_>>>()?;
    }
    info!(
        queries = queries.len(),
        rounds = repeat.max(1),
        elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
        "answered queries"
    );

    write_output(output, &results)
}

fn cmd_brute_force(input: &Path, queries_path: &Path, output: &Path) -> anyhow::Result<()> {
    let points: PointSet<f64> = text_format::load_points(input)
        .with_context(|| format!("Error reading points from {}", input.display()))?;
    let queries: PointSet<f64> = text_format::load_points(queries_path)
        .with_context(|| format!("Error reading queries from {}", queries_path.display()))?;

    let results = brute_force::nearest_batch(&points, &queries).context("Error running linear scan")?;
    info!(points = points.len(), queries = queries.len(), "answered queries by linear scan");

    write_output(output, &results)
}

fn cmd_generate(
    count: usize,
    dimension: usize,
    output: &Path,
    seed: Option<u64>,
    min: f64,
    max: f64,
) -> anyhow::Result<()> {
    if dimension == 0 {
        bail!("dimension must be at least 1");
    }
    if !(min < max) {
        bail!("min ({}) must be below max ({})", min, max);
    }

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let rows: Vec<Vec<f64>> = (0..count)
        .map(|_| (0..dimension).map(|_| rng.gen_range(min..max)).collect())
        .collect();
    let points = PointSet::new(rows)?;

    text_format::save_points(output, &points)
        .with_context(|| format!("Error writing points to {}", output.display()))?;
    info!(count, dimension, "wrote random points to {}", output.display());
    Ok(())
}

/// A query whose two answers disagree on distance.
#[derive(Debug)]
struct Mismatch {
    line: usize,
    expected: (usize, f64),
    actual: (usize, f64),
    delta: f64,
}

/// Line-by-line outcome of comparing two result files.
#[derive(Debug, Default)]
struct Comparison {
    ties: usize,
    mismatches: Vec<Mismatch>,
}

/// Pairs up results by line. A pair whose distance delta is not finite counts as a mismatch.
fn compare_results(expected: &[(usize, f64)], actual: &[(usize, f64)], tolerance: f64) -> Comparison {
    let mut outcome = Comparison::default();
    for (line, (&e, &a)) in expected.iter().zip(actual.iter()).enumerate() {
        let delta = (e.1 - a.1).abs();
        if !delta.is_finite() || delta > tolerance * e.1.abs().max(1.0) {
            outcome.mismatches.push(Mismatch { line: line + 1, expected: e, actual: a, delta });
        } else if e.0 != a.0 {
            // Same distance, different point: an exact tie.
            outcome.ties += 1;
        }
    }
    outcome
}

fn cmd_compare(expected_path: &Path, actual_path: &Path, tolerance: f64) -> anyhow::Result<()> {
    let expected = read_results(expected_path)?;
    let actual = read_results(actual_path)?;
    if expected.len() != actual.len() {
        bail!(
            "{} has {} results but {} has {}",
            expected_path.display(),
            expected.len(),
            actual_path.display(),
            actual.len()
        );
    }

    let Comparison { ties, mismatches } = compare_results(&expected, &actual, tolerance);
    println!(
        "{} results compared, {} ties on distance, {} mismatches",
        expected.len(),
        ties,
        mismatches.len()
    );
    if let Some(worst) = mismatches.iter().max_by_key(|m| OrderedFloat(m.delta)) {
        warn!(
            line = worst.line,
            expected_index = worst.expected.0,
            expected_distance = worst.expected.1,
            actual_index = worst.actual.0,
            actual_distance = worst.actual.1,
            "worst mismatch"
        );
        bail!("{} of {} results disagree", mismatches.len(), expected.len());
    }
    Ok(())
}

fn read_results(path: &Path) -> anyhow::Result<Vec<(usize, f64)>> {
    let file = File::open(path).with_context(|| format!("Error opening file: {}", path.display()))?;
    text_format::read_results(BufReader::new(file))
        .with_context(|| format!("Error reading results from {}", path.display()))
}

fn write_output(output: &Path, results: &[Neighbor<f64>]) -> anyhow::Result<()> {
    let mut writer: Box<dyn Write> = if output == Path::new("-") {
        Box::new(io::stdout().lock())
    } else {
        let file = File::create(output).with_context(|| format!("Error opening file: {}", output.display()))?;
        Box::new(BufWriter::new(file))
    };
    text_format::write_results(&mut writer, results)
        .with_context(|| format!("Error writing results to {}", output.display()))?;
    writer.flush()?;
    info!(results = results.len(), "wrote {}", output.display());
    Ok(())
}
