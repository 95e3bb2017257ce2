//! PolicyGuard CLI: policy-driven moderation of tabular text.
//!
//! ## Commands
//!
//! - `process`: moderate every row of a CSV and write results plus a review sheet
//! - `review`: derive a review sheet from an existing results file
//! - `generate`: write a synthetic labelled dataset
//! - `validate`: check a policy against the schema (and optionally probe the classifier)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use policyguard::config::FailureMode;
use policyguard::dataset::{self, DatasetOptions};
use policyguard::table::{self, InputTable};
use policyguard::{telemetry, AppConfig, BatchCfg, BatchRunner, BatchSummary, Reason};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_POLICY_PATH: &str = "policies/default_policy.json";

#[derive(Parser)]
#[command(name = "policyguard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Policy-driven content moderation for tabular text", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines (and a JSON summary)
    #[arg(long, global = true)]
    json: bool,

    /// Config file (default: $POLICYGUARD_CONFIG_PATH or config/policyguard.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Moderate a CSV file against a policy
    Process {
        /// Input CSV
        #[arg(short, long)]
        file: PathBuf,

        /// Policy document (JSON)
        #[arg(short, long, default_value = DEFAULT_POLICY_PATH)]
        policy: PathBuf,

        /// Schema override (default: $POLICYGUARD_SCHEMA_PATH or policies/policy_schema.json)
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Results CSV (default: <input>_moderated.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Review sheet (default: <input>_review.csv)
        #[arg(short, long)]
        review: Option<PathBuf>,

        /// Column holding the text to moderate
        #[arg(long)]
        text_column: Option<String>,

        /// open | closed
        #[arg(long)]
        failure_mode: Option<FailureMode>,

        /// Records in flight at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Skip the semantic classifier; only rules decide
        #[arg(long)]
        rules_only: bool,
    },

    /// Build a review sheet from a results CSV
    Review {
        /// Results CSV with a `flagged` column
        #[arg(long)]
        results: PathBuf,

        /// Review sheet path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Generate a synthetic labelled dataset
    Generate {
        #[arg(short, long, default_value = "data/synthetic_dataset.csv")]
        output: PathBuf,

        #[arg(long, default_value = "10000")]
        total: usize,

        /// Share of toxic rows (half keyword, half subtle)
        #[arg(long, default_value = "0.05")]
        toxic_ratio: f64,

        /// RNG seed for a reproducible dataset
        #[arg(long)]
        seed: Option<u64>,

        /// Take keyword vocabulary from this policy's keyword rules
        #[arg(long)]
        policy: Option<PathBuf>,
    },

    /// Validate a policy document
    Validate {
        #[arg(short, long, default_value = DEFAULT_POLICY_PATH)]
        policy: PathBuf,

        #[arg(long)]
        schema: Option<PathBuf>,

        /// Also send one sample text to the classifier
        #[arg(long)]
        probe: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    telemetry::init_tracing(cli.verbose, cli.json);

    match cli.command {
        Commands::Process {
            file,
            policy,
            schema,
            output,
            review,
            text_column,
            failure_mode,
            concurrency,
            rules_only,
        } => {
            let mut cfg = AppConfig::load(cli.config.as_deref()).context("loading config")?;
            if let Some(col) = text_column {
                cfg.run.text_column = col;
            }
            if let Some(mode) = failure_mode {
                cfg.run.failure_mode = mode;
            }
            if let Some(n) = concurrency {
                cfg.run.concurrency = n.max(1);
            }
            if rules_only {
                cfg.ai.enabled = false;
            }
            let output = output.unwrap_or_else(|| sibling(&file, "moderated"));
            let review = review.unwrap_or_else(|| sibling(&file, "review"));
            process(cfg, &file, &policy, schema.as_deref(), &output, &review, cli.json).await
        }
        Commands::Review { results, output } => {
            let n = table::derive_review_sheet(&results, &output)
                .with_context(|| format!("deriving review sheet from {}", results.display()))?;
            report_review(n, &output);
            Ok(())
        }
        Commands::Generate {
            output,
            total,
            toxic_ratio,
            seed,
            policy,
        } => generate(&output, total, toxic_ratio, seed, policy.as_deref()),
        Commands::Validate {
            policy,
            schema,
            probe,
        } => {
            let mut cfg = AppConfig::load(cli.config.as_deref()).context("loading config")?;
            if !probe {
                cfg.ai.enabled = false;
            }
            let rt = policyguard::bootstrap::Runtime::build(cfg, &policy, schema.as_deref())?;
            println!(
                "policy '{}' v{} is valid ({} rules)",
                rt.policy.name(),
                rt.policy.version(),
                rt.policy.rules().len()
            );
            if probe {
                rt.quick_probe().await;
            }
            Ok(())
        }
    }
}

async fn process(
    cfg: AppConfig,
    input: &Path,
    policy: &Path,
    schema: Option<&Path>,
    output: &Path,
    review: &Path,
    json: bool,
) -> Result<()> {
    // Everything that can make the run pointless fails here, before any record.
    let rt = policyguard::bootstrap::Runtime::build(cfg, policy, schema)?;
    let table = InputTable::read(input, &rt.cfg.run.text_column)
        .with_context(|| format!("reading input {}", input.display()))?;
    info!(
        file = %input.display(),
        rows = table.len(),
        column = table.text_column(),
        "input loaded"
    );

    let (headers, records) = table.into_parts();
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after in-flight records");
            on_signal.cancel();
        }
    });

    let runner = BatchRunner::new(
        rt.moderator(),
        BatchCfg {
            concurrency: rt.cfg.run.concurrency,
            progress_every: rt.cfg.run.progress_every,
        },
    )
    .with_cancellation(cancel);
    let outcome = runner.run(records).await;

    table::write_results(output, &headers, &outcome.rows)
        .with_context(|| format!("writing results {}", output.display()))?;
    info!(path = %output.display(), rows = outcome.rows.len(), "results written");
    let flagged = table::write_review_sheet(review, &headers, &outcome.rows)
        .with_context(|| format!("writing review sheet {}", review.display()))?;
    report_review(flagged, review);

    print_summary(&outcome.summary, json)?;
    Ok(())
}

fn generate(
    output: &Path,
    total: usize,
    toxic_ratio: f64,
    seed: Option<u64>,
    policy: Option<&Path>,
) -> Result<()> {
    let mut opts = DatasetOptions {
        total,
        toxic_ratio,
        ..Default::default()
    };
    if let Some(path) = policy {
        let policy = policyguard::policy::load(path)
            .with_context(|| format!("loading policy {}", path.display()))?;
        let keywords: Vec<String> = policy
            .rules()
            .iter()
            .filter(|r| matches!(r, policyguard::policy::Rule::Keyword { .. }))
            .flat_map(|r| r.values().iter().cloned())
            .collect();
        if !keywords.is_empty() {
            opts.keywords = keywords;
        }
    }

    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    };
    let rows = dataset::generate(&opts, &mut rng);
    dataset::write_dataset(output, &rows)
        .with_context(|| format!("writing dataset {}", output.display()))?;
    println!("generated {} rows → {}", rows.len(), output.display());
    Ok(())
}

fn report_review(count: usize, path: &Path) {
    if count == 0 {
        println!("no flagged rows; review sheet not written");
    } else {
        println!("{count} flagged rows → {}", path.display());
    }
}

fn print_summary(summary: &BatchSummary, json: bool) -> Result<()> {
    if json {
        let mut value = serde_json::to_value(summary)?;
        value["finished_at"] = serde_json::Value::String(chrono::Utc::now().to_rfc3339());
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!(
        "processed {}/{} rows, {} flagged{}",
        summary.processed,
        summary.total,
        summary.flagged,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    for reason in Reason::ALL {
        let n = summary.count(reason);
        if n > 0 {
            println!("  {:<24}{n}", reason.as_str());
        }
    }
    let fallbacks = summary.fallbacks();
    if fallbacks > 0 {
        println!(
            "  {fallbacks} rows fell back to the failure default \
             ({} api_error, {} client_not_initialized)",
            summary.count(Reason::ApiError),
            summary.count(Reason::ClientNotInitialized)
        );
    }
    Ok(())
}

/// `data/input.csv` → `data/input_<suffix>.csv`
fn sibling(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    input.with_file_name(format!("{stem}_{suffix}.csv"))
}
