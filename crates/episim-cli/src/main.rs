//! EpiSim CLI - validate generated epidemic model artifacts
//!
//! The `episim` command drives the validation core from files on disk.
//!
//! ## Commands
//!
//! - `check`: Parse and validate a model specification
//! - `evaluate`: Compare a saved artifact output against a specification
//! - `validate`: Run artifacts in the sandbox with bounded repair
//! - `history`: Verify and summarise a persisted run history

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{info, Level};

use episim_core::{
    parse_trajectory, read_history_json, write_history_json, write_report_md, CommandRepairer,
    Comparator, DirectoryGenerator, Entrypoint, LogFormat, MetricRegistry, MetricStatus,
    ModelSpecification, NoRepair, RunError, RunHistory, ValidationConfig, ValidationReport,
};

#[derive(Parser)]
#[command(name = "episim")]
#[command(author = "EpiSim Developers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sandboxed validation and bounded repair of epidemic model artifacts", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a model specification
    Check {
        /// Path to the model specification (JSON)
        #[arg(short, long)]
        spec: PathBuf,
    },

    /// Compare a saved artifact output against a specification's expected results
    Evaluate {
        /// Path to the model specification (JSON)
        #[arg(short, long)]
        spec: PathBuf,

        /// Artifact stdout captured to a file
        #[arg(short, long)]
        trajectory: PathBuf,

        /// Validation config (TOML)
        #[arg(short, long, env = "EPISIM_CONFIG")]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Execute an artifact directory in the sandbox, repairing until it passes
    Validate {
        /// Path to the model specification (JSON)
        #[arg(short, long)]
        spec: PathBuf,

        /// Directory holding the generated artifact files
        #[arg(short, long)]
        artifacts: PathBuf,

        /// Entrypoint command, run inside the artifact directory (e.g. `python3 model.py`)
        #[arg(short, long, num_args = 1.., required = true, allow_hyphen_values = true)]
        entrypoint: Vec<String>,

        /// Repair command: reads a repair request on stdin, prints the replacement artifact set
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        repair_cmd: Vec<String>,

        /// Validation config (TOML)
        #[arg(short, long, env = "EPISIM_CONFIG")]
        config: Option<PathBuf>,

        /// Per-execution timeout in milliseconds (overrides config)
        #[arg(long, env = "EPISIM_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Maximum executions per run (overrides config)
        #[arg(long, env = "EPISIM_MAX_ATTEMPTS")]
        max_attempts: Option<u32>,

        /// Write the Markdown reproduction report here
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write the JSON run history (plus `.digest` sidecar) here
        #[arg(long)]
        history: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Verify a persisted run history against its digest and summarise it
    History {
        /// Path to the history JSON
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    episim_core::init_tracing(LogFormat::from_json_flag(cli.json), level);

    match cli.command {
        Commands::Check { spec } => cmd_check(&spec),
        Commands::Evaluate {
            spec,
            trajectory,
            config,
            format,
        } => cmd_evaluate(&spec, &trajectory, config.as_deref(), format),
        Commands::Validate {
            spec,
            artifacts,
            entrypoint,
            repair_cmd,
            config,
            timeout_ms,
            max_attempts,
            report,
            history,
            format,
        } => {
            let opts = ValidateOptions {
                spec,
                artifacts,
                entrypoint,
                repair_cmd,
                config,
                timeout_ms,
                max_attempts,
                report,
                history,
                format,
            };
            cmd_validate(opts).await
        }
        Commands::History { path } => cmd_history(&path),
    }
}

fn load_spec(path: &Path) -> Result<ModelSpecification> {
    let spec = ModelSpecification::from_json_file(path)
        .with_context(|| format!("Failed to load specification {:?}", path))?;
    spec.validate()
        .with_context(|| format!("Invalid specification {:?}", path))?;
    Ok(spec)
}

fn load_config(path: Option<&Path>) -> Result<ValidationConfig> {
    match path {
        Some(p) => ValidationConfig::from_file(p)
            .with_context(|| format!("Failed to load config {:?}", p)),
        None => Ok(ValidationConfig::default()),
    }
}

/// Parse and validate a specification
fn cmd_check(spec_path: &Path) -> Result<()> {
    let spec = load_spec(spec_path)?;
    println!("✓ {} is valid", spec.name);
    println!("  compartments: {}", spec.compartments.join(", "));
    println!("  parameters:   {}", spec.parameters.len());
    println!("  horizon:      {}", spec.simulation_horizon);
    println!("  expected:     {}", spec.expected_results.len());
    for er in &spec.expected_results {
        println!(
            "    - {} = {} (±{:.1}%){}",
            er.metric,
            er.expected,
            er.tolerance * 100.0,
            er.source
                .as_deref()
                .map(|s| format!(" [{}]", s))
                .unwrap_or_default()
        );
    }
    Ok(())
}

/// Compare a saved artifact output against a specification
fn cmd_evaluate(
    spec_path: &Path,
    trajectory_path: &Path,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let spec = load_spec(spec_path)?;
    let config = load_config(config_path)?;
    let stdout = std::fs::read(trajectory_path)
        .with_context(|| format!("Failed to read trajectory {:?}", trajectory_path))?;
    let trajectory = parse_trajectory(&stdout, &spec.compartments)
        .with_context(|| format!("Output in {:?} breaks the output contract", trajectory_path))?;

    let comparator = Comparator::new(MetricRegistry::standard(), config.metrics);
    let report = comparator.evaluate(&trajectory, &spec, 1);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }

    if !report.all_passed {
        anyhow::bail!("{}", report.summary());
    }
    Ok(())
}

struct ValidateOptions {
    spec: PathBuf,
    artifacts: PathBuf,
    entrypoint: Vec<String>,
    repair_cmd: Vec<String>,
    config: Option<PathBuf>,
    timeout_ms: Option<u64>,
    max_attempts: Option<u32>,
    report: Option<PathBuf>,
    history: Option<PathBuf>,
    format: OutputFormat,
}

/// Run the bounded validation and repair loop
async fn cmd_validate(opts: ValidateOptions) -> Result<()> {
    let spec = load_spec(&opts.spec)?;
    let mut config = load_config(opts.config.as_deref())?;
    if let Some(ms) = opts.timeout_ms {
        config.sandbox.timeout_ms = ms;
    }
    if let Some(n) = opts.max_attempts {
        config.repair.max_attempts = n;
    }
    config.validate().context("Invalid validation settings")?;

    let entrypoint = Entrypoint::from_words(&opts.entrypoint)?;
    let generator = DirectoryGenerator::new(&opts.artifacts, entrypoint);
    let orchestrator = config.orchestrator();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; cancelling validation run");
            let _ = cancel_tx.send(true);
        }
    });

    let outcome = if opts.repair_cmd.is_empty() {
        orchestrator
            .run_with_cancel(&spec, &generator, &NoRepair, cancel_rx)
            .await
    } else {
        let repairer = CommandRepairer::new(
            Entrypoint::from_words(&opts.repair_cmd)?,
            config.repair_timeout(),
        );
        orchestrator
            .run_with_cancel(&spec, &generator, &repairer, cancel_rx)
            .await
    };

    let history = match &outcome {
        Ok(run) => RunHistory::from_validated(&spec, run),
        Err(RunError::RepairExhausted(run)) => RunHistory::from_exhausted(&spec, run),
        Err(e) => anyhow::bail!("Validation run failed: {}", e),
    };

    if let Some(path) = &opts.report {
        write_report_md(path, &history)?;
        info!(path = %path.display(), "reproduction report written");
    }
    if let Some(path) = &opts.history {
        let digest = write_history_json(path, &history)?;
        info!(path = %path.display(), digest = %digest.display(), "run history written");
    }

    match opts.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&history)?),
        OutputFormat::Text => print_history(&history),
    }

    if !history.passed {
        anyhow::bail!(
            "{} failed validation after {} execution(s)",
            history.model_name,
            history.executions
        );
    }
    Ok(())
}

/// Verify and summarise a persisted run history
fn cmd_history(path: &Path) -> Result<()> {
    let history = read_history_json(path)?;
    println!("Digest verified for {:?}", path);
    print_history(&history);
    Ok(())
}

fn print_history(history: &RunHistory) {
    println!("Run {} ({})", history.run_id, history.model_name);
    println!(
        "  status:     {}",
        if history.passed { "PASSED" } else { "FAILED" }
    );
    println!("  executions: {}", history.executions);
    println!("  repairs:    {}", history.repairs.len());
    println!("  artifacts:  {}", history.final_artifact_digest);
    if let Some(err) = &history.repair_error {
        println!("  repair error: {}", err);
    }
    for report in &history.reports {
        println!();
        print_report(report);
    }
}

fn print_report(report: &ValidationReport) {
    println!("{}", report.summary());
    if let Some(err) = &report.execution_error {
        println!("  ✗ {}", err);
        if let Some(stderr) = err.stderr.as_deref() {
            for line in stderr.lines().take(20) {
                println!("    | {}", line);
            }
        }
        return;
    }
    for m in &report.metrics {
        let mark = match (&m.status, m.passed) {
            (MetricStatus::NotComputable { .. }, _) => "?",
            (_, true) => "✓",
            (_, false) => "✗",
        };
        let detail = match (&m.status, m.actual, m.match_percent) {
            (MetricStatus::NotComputable { reason }, _, _) => format!("not computable: {}", reason),
            (_, Some(actual), Some(pct)) => format!("actual {} ({:.2}% off)", actual, pct),
            (_, Some(actual), None) => format!("actual {} (deviation undefined)", actual),
            (_, None, _) => "no value".to_string(),
        };
        println!(
            "  {} {:<20} expected {:<12} {}",
            mark, m.metric, m.expected, detail
        );
    }
}
