//! hardloop - harden a smart contract through attack / patch / verify rounds
//!
//! ## Commands
//!
//! - `run`: run a pipeline against a contract and persist the report
//! - `extract`: pull a structured value out of mixed tool output
//! - `check-config`: validate a configuration and print its phases
//! - `show-report`: print a persisted run report

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hardloop_core::telemetry::{init_tracing, level_for_verbosity};
use hardloop_core::{
    extract_structured, read_run_report, write_run_report, Artifact, Disposition, Generator,
    Orchestrator, PipelineConfig, RunReport,
};
use hardloop_tools::{registry, ChatGenerator, HardloopConfig};
use tracing::{info, warn};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG: &str = "hardloop.toml";

const DEFAULT_REPORT_DIR: &str = ".hardloop/runs";

#[derive(Parser)]
#[command(name = "hardloop")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Phase-gated verification and repair for smart contracts", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines and machine-readable output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline against a contract
    Run {
        /// Contract source file
        contract: PathBuf,

        /// Configuration file (default: ./hardloop.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Pipeline preset, overriding the configuration
        #[arg(short, long)]
        preset: Option<String>,

        /// Run verifiers on the host instead of inside the container
        #[arg(long)]
        local: bool,

        /// Directory run reports are written to
        #[arg(long, default_value = DEFAULT_REPORT_DIR)]
        report_dir: PathBuf,

        /// Write the final artifact here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Extract the value stored under a key from tool output
    Extract {
        /// Key to look for (e.g. test_results, detectors, errors)
        key: String,

        /// Read from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Validate a configuration and print the resolved pipeline
    CheckConfig {
        /// Configuration file (default: ./hardloop.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Pipeline preset, overriding the configuration
        #[arg(short, long)]
        preset: Option<String>,
    },

    /// Print a persisted run report
    ShowReport {
        /// Run ID
        run_id: String,

        /// Directory run reports were written to
        #[arg(long, default_value = DEFAULT_REPORT_DIR)]
        report_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json, level_for_verbosity(cli.verbose));

    let result = match cli.command {
        Commands::Run {
            contract,
            config,
            preset,
            local,
            report_dir,
            output,
        } => {
            cmd_run(
                &contract,
                config.as_deref(),
                preset.as_deref(),
                local,
                &report_dir,
                output.as_deref(),
                cli.json,
            )
            .await
        }
        Commands::Extract { key, file } => cmd_extract(&key, file.as_deref()).map(|_| ExitCode::SUCCESS),
        Commands::CheckConfig { config, preset } => {
            cmd_check_config(config.as_deref(), preset.as_deref(), cli.json).map(|_| ExitCode::SUCCESS)
        }
        Commands::ShowReport { run_id, report_dir } => {
            cmd_show_report(&run_id, &report_dir, cli.json).map(|_| ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

/// Process exit status for a finished run.
fn exit_status_for(disposition: Disposition) -> u8 {
    match disposition {
        Disposition::Safe => 0,
        Disposition::Unsafe => 2,
        Disposition::Inconclusive => 3,
        Disposition::Fatal => 4,
    }
}

fn load_config(path: Option<&Path>, preset: Option<&str>) -> Result<HardloopConfig> {
    let mut config = match path {
        Some(path) => HardloopConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None if Path::new(DEFAULT_CONFIG).exists() => HardloopConfig::load(Path::new(DEFAULT_CONFIG))
            .with_context(|| format!("Failed to load config {DEFAULT_CONFIG}"))?,
        None => HardloopConfig::from_env(),
    };
    if let Some(preset) = preset {
        config.pipeline.preset = preset.to_string();
    }
    Ok(config)
}

async fn cmd_run(
    contract: &Path,
    config_path: Option<&Path>,
    preset: Option<&str>,
    local: bool,
    report_dir: &Path,
    output: Option<&Path>,
    json: bool,
) -> Result<ExitCode> {
    let mut config = load_config(config_path, preset)?;
    if local {
        config.sandbox.use_docker = false;
    }
    let pipeline = config.pipeline_config()?;

    let source = std::fs::read_to_string(contract)
        .with_context(|| format!("Failed to read contract {:?}", contract))?;
    let artifact = Artifact::new(config.sandbox.artifact_name.clone(), source);

    let generator: Option<Arc<dyn Generator>> = if pipeline.needs_generator() {
        Some(Arc::new(ChatGenerator::new(config.generator.clone())?))
    } else {
        None
    };
    let verifiers = registry(&config.sandbox, &pipeline);

    info!(
        contract = %contract.display(),
        preset = %config.pipeline.preset,
        docker = config.sandbox.use_docker,
        "starting run"
    );

    let orchestrator = Orchestrator::new(pipeline, verifiers, generator)?;
    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current phase");
            cancel.cancel();
        }
    });

    let report = orchestrator.run(artifact).await;

    let report_path = write_run_report(&report, report_dir)
        .with_context(|| format!("Failed to write report to {:?}", report_dir))?;
    if let Some(path) = output {
        std::fs::write(path, &report.final_artifact.source)
            .with_context(|| format!("Failed to write final artifact to {:?}", path))?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
        println!("Report: {}", report_path.display());
    }

    Ok(ExitCode::from(exit_status_for(report.disposition())))
}

fn print_summary(report: &RunReport) {
    println!("Run {}", report.run_id);
    println!("Outcome: {}", report.outcome);
    println!(
        "Rounds: {}  Repairs: {}  Steps: {}  Final version: {}",
        report.round, report.repairs, report.steps, report.final_artifact.version
    );
    println!();
    for verdict in &report.verdicts {
        println!(
            "  {:<16} {:<10} {}",
            verdict.phase.to_string(),
            verdict.outcome.to_string(),
            verdict.summary
        );
    }
    if let Some(diagnostic) = report.final_diagnostic() {
        println!();
        println!("Last diagnostic:");
        for line in diagnostic.lines().take(20) {
            println!("  {line}");
        }
    }
}

fn cmd_extract(key: &str, file: Option<&Path>) -> Result<()> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    let value = extract_structured(&raw, key)
        .with_context(|| format!("No structured value under key {key:?}"))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cmd_check_config(path: Option<&Path>, preset: Option<&str>, json: bool) -> Result<()> {
    let config = load_config(path, preset)?;
    let pipeline = config.pipeline_config()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&pipeline)?);
        return Ok(());
    }

    print_pipeline(&config, &pipeline);
    Ok(())
}

fn print_pipeline(config: &HardloopConfig, pipeline: &PipelineConfig) {
    println!("Preset: {}", config.pipeline.preset);
    println!("Entry: {}", pipeline.entry);
    println!(
        "Max rounds: {}  Max steps: {}  Retry ceiling: {}",
        pipeline.max_rounds, pipeline.max_steps, pipeline.default_retry_ceiling
    );
    println!(
        "Generator: {} at {}",
        config.generator.model, config.generator.base_url
    );
    if config.sandbox.use_docker {
        println!("Sandbox: docker image {}", config.sandbox.image);
    } else {
        println!("Sandbox: host");
    }
    println!();
    for phase in &pipeline.phases {
        println!("  {} ({})", phase.id, phase.kind.label());
        println!("    pass -> {}", phase.routes.on_pass);
        println!("    fail -> {}", phase.routes.on_fail);
        println!("    tool error -> {}", phase.routes.on_tool_error);
    }
}

fn cmd_show_report(run_id: &str, dir: &Path, json: bool) -> Result<()> {
    let report = read_run_report(run_id, dir)
        .with_context(|| format!("Failed to read report {run_id} from {:?}", dir))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
        println!();
        println!("Transitions:");
        for t in &report.transitions {
            println!("  {:>3}. {} [{}] -> {}", t.step, t.phase, t.outcome, next_label(&t.next));
        }
    }
    Ok(())
}

fn next_label(next: &hardloop_core::pipeline::Next) -> String {
    match next {
        hardloop_core::pipeline::Next::Phase(id) => id.to_string(),
        hardloop_core::pipeline::Next::Terminal(disposition) => disposition.to_string(),
    }
}
