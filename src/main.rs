use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fare_timing::config::{load_config, write_default_config, BaselineSource, OutlierStrategy, PipelineConfig};
use fare_timing::data::JsonRecordStore;
use fare_timing::engine::results::print_overview;
use fare_timing::engine::{BacktestRunner, BaselineProvider, ReferencePrices};
use fare_timing::ml::currency::normalize_set;
use fare_timing::ml::model::{BuyClassifier, LogisticClassifier};
use fare_timing::ml::outlier::model_for;
use fare_timing::ml::{filter_outliers, DatasetVariant, FeatureBuilder, MatrixStore};
use fare_timing::types::{EvalSplit, MatrixSet, Route};

#[derive(Parser)]
#[command(name = "fare-timing")]
#[command(version = "0.1.0")]
#[command(about = "Buy-or-wait airfare timing pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "pipeline.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build raw train/test matrices from the per-route record files
    BuildFeatures,
    /// Convert the raw matrices to EUR
    Normalize,
    /// Drop training rows whose label disagrees with a 2-way clustering
    FilterOutliers {
        /// centroid (k-means) or mixture (gaussian mixture)
        #[arg(short, long, default_value = "centroid")]
        strategy: OutlierStrategy,
    },
    /// Backtest the classifier-driven purchase policy
    Evaluate {
        /// Only evaluate this route (e.g. BCN_BUD); defaults to all routes
        #[arg(short, long)]
        route: Option<Route>,
        /// Dataset variant to train and evaluate on
        #[arg(long)]
        variant: Option<DatasetVariant>,
        /// train (in-sample) or test
        #[arg(short, long)]
        split: Option<EvalSplit>,
        /// Number of trials to average over
        #[arg(short, long)]
        trials: Option<usize>,
        /// Write the reports as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Log every row of one route next to its prediction
    Inspect {
        #[arg(short, long)]
        route: Route,
        #[arg(long)]
        variant: Option<DatasetVariant>,
    },
    /// Write the default configuration file
    InitConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG overrides the verbosity flag
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    if cli.json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    info!("fare-timing v0.1.0");

    if let Commands::InitConfig = cli.command {
        return write_default_config(&cli.config);
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::BuildFeatures => build_features(&config)?,
        Commands::Normalize => normalize(&config)?,
        Commands::FilterOutliers { strategy } => run_outlier_filter(&config, strategy)?,
        Commands::Evaluate { route, variant, split, trials, output } => {
            let mut config = config;
            if let Some(variant) = variant {
                config.evaluation.variant = variant;
            }
            if let Some(split) = split {
                config.evaluation.split = split;
            }
            if let Some(trials) = trials {
                config.evaluation.trials = trials;
            }
            let routes = match route {
                Some(route) => vec![route],
                None => Route::ALL.to_vec(),
            };
            run_evaluation(&config, &routes, output.as_deref())?;
        }
        Commands::Inspect { route, variant } => {
            let mut config = config;
            if let Some(variant) = variant {
                config.evaluation.variant = variant;
            }
            inspect_route(&config, route)?;
        }
        Commands::InitConfig => {}
    }

    Ok(())
}

fn build_features(config: &PipelineConfig) -> Result<()> {
    info!("━━━ Building feature matrices ━━━");
    info!("Dataset: {}/{}", config.paths.data_dir.display(), config.paths.dataset);
    info!("Labels: {} ({})", config.features.label_policy, config.features.label_policy.description());

    let source = JsonRecordStore::new(&config.paths.data_dir, config.paths.dataset.clone());
    let builder = FeatureBuilder::new(&config.features)?;
    let set = builder
        .build_from_source(&source)
        .context("Failed to build feature matrices")?;

    log_set_sizes(&set);
    store(config).save(DatasetVariant::Raw, &set)?;
    info!("✓ Saved {} matrices", DatasetVariant::Raw);
    Ok(())
}

fn normalize(config: &PipelineConfig) -> Result<()> {
    info!("━━━ Normalizing prices to EUR ━━━");
    let store = store(config);
    let raw = load_variant(&store, DatasetVariant::Raw)?;
    let normalized = normalize_set(&raw)?;
    store.save(DatasetVariant::CurrencyNormalized, &normalized)?;
    info!("✓ Saved {} matrices", DatasetVariant::CurrencyNormalized);
    Ok(())
}

fn run_outlier_filter(config: &PipelineConfig, strategy: OutlierStrategy) -> Result<()> {
    let source = config.outlier.source_variant;
    let target = match strategy {
        OutlierStrategy::Centroid => DatasetVariant::CentroidFiltered,
        OutlierStrategy::Mixture => DatasetVariant::MixtureFiltered,
    };
    info!("━━━ Filtering outliers: {} -> {} ━━━", source, target);

    let store = store(config);
    let set = load_variant(&store, source)?;
    let mut model = model_for(strategy, &config.outlier);
    let (train, report) = filter_outliers(&set.train, model.as_mut())
        .with_context(|| format!("Outlier filtering with {:?} failed", strategy))?;

    info!(
        "✓ Kept {} of {} training rows ({} waits, {} buys)",
        report.kept, report.total, report.kept_waits, report.kept_buys
    );

    // Test rows are never filtered
    let filtered = MatrixSet { train, test: set.test };
    store.save(target, &filtered)?;
    info!("✓ Saved {} matrices", target);
    Ok(())
}

fn run_evaluation(config: &PipelineConfig, routes: &[Route], output: Option<&Path>) -> Result<()> {
    info!("━━━ Backtesting buy-or-wait policy ━━━");
    info!("Variant: {}", config.evaluation.variant);
    info!("Split: {}", config.evaluation.split);
    info!("Trials: {}", config.evaluation.trials);
    info!("Routes: {}", routes.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", "));

    let store = store(config);
    let set = load_variant(&store, config.evaluation.variant)?;
    let mut runner = runner(config, &store)?;
    let reports = runner.run(&set, routes).context("Backtest failed")?;

    for report in &reports {
        report.print_summary();
    }
    if reports.len() > 1 {
        print_overview(&reports);
    }

    if let Some(path) = output {
        let body = serde_json::to_string_pretty(&reports)?;
        std::fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("✓ Reports written to {}", path.display());
    }
    Ok(())
}

fn inspect_route(config: &PipelineConfig, route: Route) -> Result<()> {
    info!("━━━ Inspecting {} ({}) ━━━", route, config.evaluation.variant);
    let store = store(config);
    let set = load_variant(&store, config.evaluation.variant)?;
    let mut runner = runner(config, &store)?;
    let evaluation = runner.inspect(&set, route)?;

    info!(
        "✓ {} cohorts, {} fell back to state {}, avg price {:.2}",
        evaluation.cohorts.len(),
        evaluation.fallback_count(),
        config.evaluation.floor_state,
        evaluation.average_price()
    );
    if evaluation.fallback_count() == evaluation.cohorts.len() {
        warn!("No buy signal fired for any {} cohort", route);
    }
    Ok(())
}

fn runner(
    config: &PipelineConfig,
    store: &MatrixStore,
) -> Result<BacktestRunner<impl FnMut(u64) -> Box<dyn BuyClassifier>>> {
    let baselines = match config.evaluation.baseline {
        BaselineSource::Static => BaselineProvider::Static,
        BaselineSource::Files => {
            let dir = config
                .paths
                .reference_dir
                .clone()
                .ok_or_else(|| anyhow!("baseline = files requires paths.reference_dir"))?;
            BaselineProvider::Files(ReferencePrices::new(dir))
        }
    };

    let settings = config.classifier.clone();
    let factory = move |seed: u64| -> Box<dyn BuyClassifier> {
        // Gradient descent from zero weights is deterministic; the seed only
        // matters to classifiers with random initialisation
        debug!("Fresh classifier for seed {}", seed);
        Box::new(LogisticClassifier::new(&settings))
    };

    let runner = BacktestRunner::new(
        config.evaluation.clone(),
        config.classifier.clone(),
        baselines,
        factory,
    );

    // In-sample scoring replays the unfiltered training rows
    let variant = config.evaluation.variant;
    if config.evaluation.split == EvalSplit::Train && variant.is_filtered() {
        let source = config.outlier.source_variant;
        info!("In-sample rows taken from {} (model fitted on {})", source, variant);
        let unfiltered = load_variant(store, source)?;
        return Ok(runner.with_in_sample_rows(unfiltered.train));
    }
    Ok(runner)
}

fn store(config: &PipelineConfig) -> MatrixStore {
    MatrixStore::new(&config.paths.matrix_dir)
}

fn load_variant(store: &MatrixStore, variant: DatasetVariant) -> Result<MatrixSet> {
    if !store.exists(variant) {
        return Err(anyhow!(
            "No {} matrices under {}; run the earlier pipeline stages first",
            variant,
            store.variant_dir(variant).display()
        ));
    }
    let set = store
        .load(variant)
        .with_context(|| format!("Failed to load {} matrices", variant))?;
    log_set_sizes(&set);
    Ok(set)
}

fn log_set_sizes(set: &MatrixSet) {
    let (train_waits, train_buys) = set.train.label_counts();
    let (test_waits, test_buys) = set.test.label_counts();
    info!("  Train rows: {} ({} wait, {} buy)", set.train.len(), train_waits, train_buys);
    info!("  Test rows:  {} ({} wait, {} buy)", set.test.len(), test_waits, test_buys);
}
