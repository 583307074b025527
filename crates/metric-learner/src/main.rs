//! metric-learner CLI
//!
//! Records predictions for a named metric, walks a human through correcting
//! their scores, and tunes the metric's demonstrations on the corrections.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

use metric_learner::{
    BootstrapFewShot, DEFAULT_DATA_DIR, InstanceStore, LM, MetricEvaluator, MetricModule,
    MetricState, MseMetric, format_score, init_tracing, label_instances,
    optimize_metric_module_with, truncate,
};

/// Learn an LM-backed quality metric from human-corrected scores.
///
/// Typical loop:
///   metric-learner -m qa record --input "2+2?" --prediction "4" --auto-score
///   metric-learner -m qa label
///   metric-learner -m qa optimize
///   metric-learner -m qa evaluate
#[derive(Parser, Debug)]
#[command(name = "metric-learner")]
#[command(version)]
#[command(about, long_about = None)]
struct Cli {
    /// Name of the metric; records live under `<data-dir>/<metric>`
    #[arg(short, long, global = true, default_value = "default")]
    metric: String,

    /// Base directory for recorded instances (relative paths resolve under $HOME)
    #[arg(long, global = true, env = "METRIC_LEARNER_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Scoring model as `provider:model`
    #[arg(long, global = true, env = "METRIC_LEARNER_MODEL", default_value = "openai:gpt-4o-mini")]
    model: String,

    /// Metric state file (template and demonstrations).
    /// Defaults to `<data-dir>/<metric>.state.json`.
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a prediction to be labeled later
    Record {
        #[arg(long)]
        input: String,
        #[arg(long)]
        prediction: String,
        #[arg(long)]
        gold: Option<String>,
        /// Model score to store alongside the instance
        #[arg(long, conflicts_with = "auto_score")]
        score: Option<f32>,
        /// Score the prediction with the current metric before recording
        #[arg(long)]
        auto_score: bool,
    },
    /// Interactively correct scores of unlabeled instances
    Label,
    /// List recorded instances
    List {
        #[arg(long, conflicts_with = "unlabeled")]
        labeled: bool,
        #[arg(long)]
        unlabeled: bool,
    },
    /// Show record counts
    Stats,
    /// Score one prediction with the current metric
    Score {
        #[arg(long)]
        input: String,
        #[arg(long)]
        prediction: String,
        #[arg(long)]
        gold: Option<String>,
    },
    /// Tune demonstrations on the labeled instances and save the metric state
    Optimize {
        /// Demos kept from runs that match the human score
        #[arg(long, default_value = "4")]
        max_demos: usize,
        /// Largest accepted squared error between model and human score
        #[arg(long, default_value = "0.04")]
        max_error: f32,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Compare the metric's scores with the human scores
    Evaluate {
        /// Scoring calls in flight
        #[arg(long, default_value = "8")]
        concurrency: usize,
    },
    /// Print the current template and demonstrations
    Show,
    /// Write all records to a JSON-lines file
    Export { path: PathBuf },
    /// Add records from a JSON-lines file
    Import { path: PathBuf },
}

fn state_path(cli: &Cli, store: &InstanceStore) -> PathBuf {
    cli.state.clone().unwrap_or_else(|| {
        store
            .data_dir()
            .with_file_name(format!("{}.state.json", store.metric_name()))
    })
}

fn load_metric(cli: &Cli, path: &Path) -> Result<MetricModule<LM>> {
    let lm = LM::from_model_string(&cli.model, None)?;

    if path.exists() {
        MetricModule::load(lm, path)
    } else {
        info!(path = %path.display(), "no saved metric state, using the default template");
        Ok(MetricModule::new(lm))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let store = InstanceStore::with_base_dir(&cli.metric, &cli.data_dir)?;
    let state = state_path(&cli, &store);

    match &cli.command {
        Command::Record {
            input,
            prediction,
            gold,
            score,
            auto_score,
        } => {
            let score = if *auto_score {
                let metric = load_metric(&cli, &state)?;
                Some(metric.score(input, prediction, gold.as_deref()).await?)
            } else {
                *score
            };
            let path = store.save_instance(input, prediction, gold.as_deref(), score)?;
            println!("Saved instance to {}", path.display());
        }
        Command::Label => {
            let stdin = io::stdin();
            label_instances(&store, stdin.lock(), io::stdout())?;
        }
        Command::List { labeled, unlabeled } => {
            let instances = if *labeled {
                store.labeled_instances()?
            } else if *unlabeled {
                store.unlabeled_instances()?
            } else {
                store.load_instances()?
            };
            for instance in &instances {
                let fmt_score = |s: Option<f32>| s.map_or("-".to_string(), |s| format!("{s:.2}"));
                println!(
                    "{}  score={}  user_score={}  input={:?}",
                    instance.datetime,
                    fmt_score(instance.score),
                    fmt_score(instance.user_score),
                    truncate(&instance.input, 60),
                );
            }
        }
        Command::Stats => {
            let stats = store.stats()?;
            println!("metric:    {}", store.metric_name());
            println!("total:     {}", stats.total);
            println!("labeled:   {}", stats.labeled);
            println!("unlabeled: {}", stats.unlabeled);
        }
        Command::Score {
            input,
            prediction,
            gold,
        } => {
            let metric = load_metric(&cli, &state)?;
            let score = metric.score(input, prediction, gold.as_deref()).await?;
            println!("{}", format_score(score));
        }
        Command::Optimize {
            max_demos,
            max_error,
            seed,
        } => {
            let mut metric = load_metric(&cli, &state)?;
            let dataset = store.labeled_dataset()?;
            let optimizer = BootstrapFewShot::builder()
                .max_bootstrapped_demos(*max_demos)
                .metric_threshold(-max_error)
                .maybe_seed(*seed)
                .build();

            match optimize_metric_module_with(&mut metric, dataset, &optimizer, &MseMetric).await? {
                Some(report) => {
                    metric
                        .save(&state)
                        .with_context(|| format!("failed to save {}", state.display()))?;
                    println!(
                        "Optimized with {} bootstrapped and {} labeled demos ({} runs, {} failed).",
                        report.bootstrapped, report.labeled, report.attempted, report.failed
                    );
                    println!("Saved metric state to {}", state.display());
                }
                None => println!("No labeled data available for optimization."),
            }
        }
        Command::Evaluate { concurrency } => {
            let metric = load_metric(&cli, &state)?;
            let evaluator = MetricEvaluator::new(&metric, &store).with_concurrency(*concurrency);
            match evaluator.evaluate().await? {
                Some(report) => println!("{report}"),
                None => println!("No labeled data available for evaluation."),
            }
        }
        Command::Show => {
            let saved = if state.exists() {
                MetricState::load(&state)?
            } else {
                MetricState::default()
            };
            print!("{}", saved.describe());
        }
        Command::Export { path } => {
            let count = store.export_jsonl(path)?;
            println!("Exported {count} instances to {}", path.display());
        }
        Command::Import { path } => {
            let count = store.import_jsonl(path)?;
            println!("Imported {count} instances from {}", path.display());
        }
    }

    Ok(())
}
