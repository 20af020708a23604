use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use lexaxis_axes::{AxisBuilder, AxisQualityFilter, QualityReport};
use lexaxis_contexts::{
    ContextEvaluator, CorpusLoad, MaskedLmOracle, ModelId, SelectionPolicy, StubOracle,
};
use lexaxis_projection::{load_pole_vectors, AxisProjector, PoleSet, VocabularyOrder};
use lexaxis_vector_store::{
    load_term_vectors, save_json, AggregationMode, EmbeddingAggregator, StandardizationStats,
};
use serde::Serialize;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

mod config;
mod http_oracle;

pub use config::{LexaxisConfig, OracleConfig, OracleMode};
pub use http_oracle::HttpOracle;

#[derive(Parser)]
#[command(name = "lexaxis")]
#[command(about = "Thesaurus axes, diagnostic contexts and term-to-axis bias scores", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,

    /// Config file (default: ./lexaxis.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Select diagnostic contexts for every axis side with a masked-LM oracle
    Contexts(ContextsArgs),

    /// Score axes from held-out probe words and keep those separating both sides
    Quality(QualityArgs),

    /// Compute per-dimension mean/std over raw embedding partitions
    Stats(StatsArgs),

    /// Re-aggregate partition embeddings into one vector per term (or term and year)
    Aggregate(AggregateArgs),

    /// Score every term against every accepted axis
    Project(ProjectArgs),
}

#[derive(Args)]
struct ContextsArgs {
    /// Thesaurus TSV: `axis_id \t left,words \t right,words`
    #[arg(long)]
    thesaurus: PathBuf,

    /// Corpus TSV: `line_id \t text`
    #[arg(long)]
    corpus: PathBuf,

    /// Output file for the context selection
    #[arg(long, default_value = "contexts.json")]
    out: PathBuf,

    /// Model id (overrides config)
    #[arg(long)]
    model: Option<ModelId>,

    /// Selection policy: substitution|probability (overrides config)
    #[arg(long)]
    policy: Option<SelectionPolicy>,

    /// Substitutes per context (overrides config)
    #[arg(long)]
    top_k: Option<usize>,

    /// Probability policy: contexts kept by synonym mass (overrides config)
    #[arg(long)]
    top_n: Option<usize>,

    /// Probability policy: contexts kept by synonym minus antonym mass (overrides config)
    #[arg(long)]
    top_m: Option<usize>,

    /// Sentences per oracle call (overrides config)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Oracle calls in flight (overrides config)
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Debug: only evaluate the first N axes and log their contexts
    #[arg(long)]
    inspect_first: Option<usize>,

    /// Write raw substitute predictions as TSV (substitution policy)
    #[arg(long)]
    predictions_log: Option<PathBuf>,
}

#[derive(Args)]
struct QualityArgs {
    /// Probe TSV: `axis_id \t word \t predicted \t left|right`
    #[arg(long)]
    probes: PathBuf,

    /// Output file for the quality report
    #[arg(long, default_value = "quality.json")]
    out: PathBuf,
}

#[derive(Args)]
struct StatsArgs {
    /// Directory with `<stem>.json` and `<stem>_wordcounts.json` partitions
    #[arg(long)]
    embeddings: PathBuf,

    /// Output file for the statistics
    #[arg(long, default_value = "stats.json")]
    out: PathBuf,

    /// Expected vector width (default: width of the first record)
    #[arg(long)]
    dimension: Option<usize>,
}

#[derive(Args)]
struct AggregateArgs {
    /// Directory with `<stem>.json` and `<stem>_wordcounts.json` partitions
    #[arg(long)]
    embeddings: PathBuf,

    /// Output file for aggregated vectors
    #[arg(long)]
    out: PathBuf,

    /// Aggregate per term and year instead of per term
    #[arg(long)]
    yearly: bool,

    /// Also write standardized vectors using these statistics
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Output file for standardized vectors (default: `<out>_standardized.json`)
    #[arg(long, requires = "stats")]
    standardized_out: Option<PathBuf>,

    /// Expected vector width (default: width of the first record)
    #[arg(long)]
    dimension: Option<usize>,
}

#[derive(Args)]
struct ProjectArgs {
    /// Thesaurus TSV the axes come from
    #[arg(long)]
    thesaurus: PathBuf,

    /// Quality report written by `quality`
    #[arg(long)]
    quality: PathBuf,

    /// Pole vectors JSON: `[{axis_id, side, word, vector}]`
    #[arg(long)]
    poles: PathBuf,

    /// Aggregated term vectors `{term: vector}`
    #[arg(long)]
    vectors: PathBuf,

    /// Standardize term and pole vectors with these statistics
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Keep pole vectors unstandardized even when --stats is given
    #[arg(long)]
    raw_poles: bool,

    /// Directory for scores.json and vocab_order.txt
    #[arg(long, default_value = "results")]
    out_dir: PathBuf,
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = LexaxisConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Contexts(args) => run_contexts(args, config).await?,
        Commands::Quality(args) => run_quality(&args)?,
        Commands::Stats(args) => run_stats(&args)?,
        Commands::Aggregate(args) => run_aggregate(&args)?,
        Commands::Project(args) => run_project(&args)?,
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_oracle(config: &LexaxisConfig) -> Result<Arc<dyn MaskedLmOracle>> {
    let oracle: Arc<dyn MaskedLmOracle> = match config.oracle.mode {
        OracleMode::Stub => {
            log::info!("Using stub oracle ({})", config.model);
            Arc::new(StubOracle::new(config.model))
        }
        OracleMode::Http => {
            log::info!(
                "Using HTTP oracle at {} ({})",
                config.oracle.endpoint,
                config.model
            );
            Arc::new(HttpOracle::new(
                &config.oracle.endpoint,
                config.model,
                Duration::from_millis(config.oracle.timeout_ms),
            )?)
        }
    };
    Ok(oracle)
}

/// Command-line values win over `lexaxis.toml`.
fn apply_overrides(args: &ContextsArgs, config: &mut LexaxisConfig) {
    if let Some(model) = args.model {
        config.model = model;
    }
    let contexts = &mut config.contexts;
    if let Some(policy) = args.policy {
        contexts.policy = policy;
    }
    if let Some(top_k) = args.top_k {
        contexts.top_k = top_k;
    }
    if let Some(top_n) = args.top_n {
        contexts.top_n = top_n;
    }
    if let Some(top_m) = args.top_m {
        contexts.top_m = top_m;
    }
    if let Some(batch_size) = args.batch_size {
        contexts.batch_size = batch_size;
    }
    if let Some(max_in_flight) = args.max_in_flight {
        contexts.max_in_flight = max_in_flight;
    }
    if args.inspect_first.is_some() {
        contexts.debug_inspect_first = args.inspect_first;
    }
    contexts.keep_predictions |= args.predictions_log.is_some();
}

async fn run_contexts(args: ContextsArgs, mut config: LexaxisConfig) -> Result<()> {
    apply_overrides(&args, &mut config);
    config.validate()?;

    let thesaurus = AxisBuilder::load(&args.thesaurus)
        .with_context(|| format!("Failed to load thesaurus {}", args.thesaurus.display()))?;
    let corpus = CorpusLoad::load(&args.corpus)
        .with_context(|| format!("Failed to load corpus {}", args.corpus.display()))?;

    let oracle = build_oracle(&config)?;
    let evaluator = ContextEvaluator::new(oracle, config.contexts.clone())?;
    let selection = evaluator.evaluate(&thesaurus, &corpus).await?;
    selection
        .save(&args.out)
        .with_context(|| format!("Failed to write {}", args.out.display()))?;

    if let Some(path) = &args.predictions_log {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = std::io::BufWriter::new(file);
        selection.write_prediction_log(&mut writer)?;
        writer
            .flush()
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    print_json(&json!({
        "out": args.out,
        "model": selection.model,
        "policy": selection.policy,
        "axes": thesaurus.len(),
        "thesaurus": thesaurus.report(),
        "needs_fallback": selection.needs_fallback.len(),
        "report": selection.report,
    }))
}

fn run_quality(args: &QualityArgs) -> Result<()> {
    let probes = AxisQualityFilter::load_probes(&args.probes)
        .with_context(|| format!("Failed to load probes {}", args.probes.display()))?;
    let report = AxisQualityFilter::evaluate(&probes.scores);
    let report = QualityReport {
        malformed_probes: probes.malformed,
        ..report
    };
    report
        .save(&args.out)
        .with_context(|| format!("Failed to write {}", args.out.display()))?;
    print_json(&json!({
        "out": args.out,
        "probes": probes.scores.len(),
        "malformed_probes": report.malformed_probes,
        "accepted": report.accepted.len(),
        "rejected": report.rejected.len(),
    }))
}

fn run_stats(args: &StatsArgs) -> Result<()> {
    let (stats, report) = StandardizationStats::from_dir(&args.embeddings, args.dimension)
        .with_context(|| {
            format!(
                "Failed to compute statistics over {}",
                args.embeddings.display()
            )
        })?;
    stats
        .save(&args.out)
        .with_context(|| format!("Failed to write {}", args.out.display()))?;
    print_json(&json!({ "out": args.out, "report": report }))
}

fn standardized_path(out: &Path) -> PathBuf {
    let stem = out
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("vectors");
    out.with_file_name(format!("{stem}_standardized.json"))
}

fn run_aggregate(args: &AggregateArgs) -> Result<()> {
    let mode = if args.yearly {
        AggregationMode::Yearly
    } else {
        AggregationMode::Overall
    };
    let mut aggregator = EmbeddingAggregator::new(mode);
    if let Some(dimension) = args.dimension {
        aggregator = aggregator.with_dimension(dimension);
    }
    let stats = args
        .stats
        .as_ref()
        .map(|path| {
            StandardizationStats::load(path)
                .with_context(|| format!("Failed to load statistics {}", path.display()))
        })
        .transpose()?;

    let aggregation = aggregator
        .aggregate_dir(&args.embeddings)
        .with_context(|| format!("Failed to aggregate {}", args.embeddings.display()))?;

    let standardized_out = stats.as_ref().map(|_| {
        args.standardized_out
            .clone()
            .unwrap_or_else(|| standardized_path(&args.out))
    });
    match mode {
        AggregationMode::Overall => {
            let vectors = aggregation.overall();
            let standardized = stats
                .as_ref()
                .map(|s| s.standardize_table(&vectors))
                .transpose()?;
            save_json(&args.out, &vectors)?;
            if let (Some(table), Some(path)) = (standardized, &standardized_out) {
                save_json(path, &table)?;
            }
        }
        AggregationMode::Yearly => {
            let vectors = aggregation.yearly();
            let standardized = stats
                .as_ref()
                .map(|s| s.standardize_yearly(&vectors))
                .transpose()?;
            save_json(&args.out, &vectors)?;
            if let (Some(table), Some(path)) = (standardized, &standardized_out) {
                save_json(path, &table)?;
            }
        }
    }

    print_json(&json!({
        "out": args.out,
        "standardized_out": standardized_out,
        "mode": mode,
        "report": aggregation.report,
    }))
}

fn run_project(args: &ProjectArgs) -> Result<()> {
    let thesaurus = AxisBuilder::load(&args.thesaurus)
        .with_context(|| format!("Failed to load thesaurus {}", args.thesaurus.display()))?;
    let quality = QualityReport::load(&args.quality)
        .with_context(|| format!("Failed to load quality report {}", args.quality.display()))?;
    let stats = args
        .stats
        .as_ref()
        .map(|path| {
            StandardizationStats::load(path)
                .with_context(|| format!("Failed to load statistics {}", path.display()))
        })
        .transpose()?;
    let pole_stats = if args.raw_poles { None } else { stats.as_ref() };

    let pole_vectors = load_pole_vectors(&args.poles)
        .with_context(|| format!("Failed to load pole vectors {}", args.poles.display()))?;
    let poles = PoleSet::build(&pole_vectors, &thesaurus, pole_stats)?;
    let terms = load_term_vectors(&args.vectors)
        .with_context(|| format!("Failed to load term vectors {}", args.vectors.display()))?;

    let vocab_path = args.out_dir.join(lexaxis_projection::VOCAB_ORDER_FILE);
    let (vocabulary, reused) =
        VocabularyOrder::resolve(&vocab_path, &terms.keys().cloned().collect())?;

    let projection = AxisProjector::new(&thesaurus, &quality).project(
        &poles,
        &terms,
        stats.as_ref(),
        vocabulary,
        reused,
    )?;
    projection
        .save(&args.out_dir)
        .with_context(|| format!("Failed to write results to {}", args.out_dir.display()))?;

    print_json(&json!({
        "out_dir": args.out_dir,
        "report": projection.report,
    }))
}
