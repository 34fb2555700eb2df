//! CLI entrypoint for the handlegate scenario harness.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use handlegate_harness::structured_log::{LogEmitter, validate_log_file};
use handlegate_harness::{Scenario, ScenarioReport, run_scenario};

/// Scenario tooling for handlegate debug sessions.
#[derive(Debug, Parser)]
#[command(name = "handlegate-harness")]
#[command(about = "Replay handle-lifecycle scenarios against the debug tracker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a scenario file and print its report.
    Run {
        /// Scenario JSON path.
        #[arg(long)]
        scenario: PathBuf,
        /// Structured JSONL log path (if omitted, the log is only hashed).
        #[arg(long)]
        log: Option<PathBuf>,
        /// Output report path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Run id used in trace ids.
        #[arg(long, default_value = "local")]
        run_id: String,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        /// JSONL log path.
        #[arg(long)]
        log: PathBuf,
    },
}

fn write_report(report: &ScenarioReport, output: Option<&PathBuf>) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
    match output {
        Some(path) => std::fs::write(path, json + "\n"),
        None => writeln!(std::io::stdout(), "{json}"),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            scenario,
            log,
            output,
            run_id,
        } => {
            let loaded = Scenario::from_file(&scenario)?;
            eprintln!(
                "Running scenario '{}' ({} steps) from {}",
                loaded.name,
                loaded.steps.len(),
                scenario.display()
            );
            let report = match &log {
                Some(path) => {
                    let mut emitter = LogEmitter::to_file(path, &loaded.name, &run_id)?;
                    run_scenario(&loaded, &mut emitter)?
                }
                None => {
                    let mut emitter = LogEmitter::new(std::io::sink(), &loaded.name, &run_id);
                    run_scenario(&loaded, &mut emitter)?
                }
            };
            write_report(&report, output.as_ref())?;

            for failure in &report.failures {
                eprintln!("FAIL step {} ({}): {}", failure.step, failure.op, failure.message);
            }
            if !report.passed {
                return Err(format!(
                    "scenario '{}' failed: {} of {} steps",
                    report.scenario,
                    report.failures.len(),
                    report.steps
                )
                .into());
            }
            eprintln!("PASS {} (log sha256 {})", report.scenario, report.log_sha256);
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            for err in &errors {
                eprintln!("{err}");
            }
            if !errors.is_empty() {
                return Err(format!("{} errors in {lines} lines", errors.len()).into());
            }
            eprintln!("{}: {lines} lines OK", log.display());
        }
    }

    Ok(())
}
