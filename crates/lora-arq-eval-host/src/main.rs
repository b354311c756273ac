use anyhow::{Result, bail};
use clap::Parser;
use lora_arq_simulator::{ScenarioRun, scenario_runner};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless grader for LoRa ARQ scenarios")]
struct Args {
    /// Scenario TOML files to execute.
    #[arg(long = "scenario", required = true)]
    scenarios: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    info!("lora-arq-eval-host starting...");

    let mut failed = Vec::new();
    for path in &args.scenarios {
        let run = scenario_runner::run_scenario_file(path)?;
        log_summary(&run);
        if !run.passed() {
            failed.push(run.name);
        }
    }

    if !failed.is_empty() {
        bail!("{} scenario(s) failed: {}", failed.len(), failed.join(", "));
    }
    info!("All {} scenario(s) passed", args.scenarios.len());
    Ok(())
}

fn log_summary(run: &ScenarioRun) {
    let report = &run.report;
    let delivered = report.outcomes.iter().filter(|o| o.succeeded()).count();
    info!(
        "[{}] duration: {} ms | frames: {} | sends delivered: {}/{} | deliveries: {}",
        run.name,
        report.duration_ms,
        report.frames.len(),
        delivered,
        report.outcomes.len(),
        report.deliveries.len()
    );
    for assertion in &run.assertions {
        if assertion.passed {
            info!("  pass: {} ({})", assertion.assertion, assertion.detail);
        } else {
            error!("  FAIL: {} ({})", assertion.assertion, assertion.detail);
        }
    }
}
