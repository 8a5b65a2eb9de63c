//! CLI entrypoint for the ntposix scenario harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ntposix_harness::structured_log::{LogEmitter, validate_log_file};
use ntposix_harness::{Scenario, ScenarioRunner, inventory};

/// Scenario tooling for ntposix.
#[derive(Debug, Parser)]
#[command(name = "ntposix-harness")]
#[command(about = "Scenario harness for the ntposix descriptor layer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a scenario against a fresh simulated kernel.
    Run {
        /// Scenario JSON file.
        #[arg(long)]
        scenario: PathBuf,
        /// Output JSONL log path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Output report path (JSON; a `.md` extension writes markdown).
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// List the device namespace of the default simulated kernel.
    Devices,
    /// Validate a JSONL log against the schema.
    ValidateLog {
        #[arg(long)]
        log: PathBuf,
    },
    /// Print the Win32 error to errno table as JSON.
    ErrnoTable,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            scenario,
            log,
            report,
        } => {
            let scenario = Scenario::from_file(&scenario)?;
            let mut runner = ScenarioRunner::new(&scenario)?;
            let result = match log {
                Some(path) => {
                    let mut emitter = LogEmitter::to_file(&path, &scenario.name)?;
                    runner.run(&scenario, &mut emitter)?
                }
                None => runner.run(&scenario, &mut LogEmitter::discard())?,
            };

            match report {
                Some(path) if path.extension().and_then(|s| s.to_str()) == Some("md") => {
                    std::fs::write(&path, result.to_markdown())?;
                }
                Some(path) => std::fs::write(&path, result.to_json())?,
                None => println!("{}", result.to_json()),
            }
            eprintln!(
                "{}: {}/{} steps passed (sha256 {})",
                result.scenario, result.passed, result.total, result.sha256
            );
            if !result.all_passed() {
                return Err(format!("{} step(s) failed", result.failed).into());
            }
        }
        Command::Devices => {
            let rows = inventory::list_devices()?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            for err in &errors {
                eprintln!("{err}");
            }
            if !errors.is_empty() {
                return Err(format!("{} error(s) in {lines} line(s)", errors.len()).into());
            }
            eprintln!("{}: {lines} line(s) valid", log.display());
        }
        Command::ErrnoTable => {
            println!("{}", serde_json::to_string_pretty(&inventory::errno_table())?);
        }
    }

    Ok(())
}
