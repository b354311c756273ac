use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use lora_arq_abstract::{ArqConfig, NodeId, RadioConfig, SimConfig, generated_text};
use lora_arq_simulator::{SimulationReport, Simulator, scenario_runner};

#[derive(Parser, Debug)]
#[command(author, version, about = "LoRa ARQ channel simulator")]
struct Args {
    /// Load a scenario from disk.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Type `<from> [@<to>] <text>` lines to send through the simulated channel.
    #[arg(long, default_value_t = false, conflicts_with = "scenario")]
    interactive: bool,

    /// Node ids of the default and interactive runs.
    #[arg(long, value_delimiter = ',', default_value = "A,B")]
    nodes: Vec<String>,

    #[arg(long, default_value_t = 0.1)]
    loss_rate: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 4)]
    window_size: usize,

    /// Write a JSON trace of the finished simulation.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    info!("lora-arq-sim-cli starting…");

    let report = if let Some(path) = &args.scenario {
        let run = scenario_runner::run_scenario_file(path)?;
        for assertion in &run.assertions {
            let mark = if assertion.passed { "ok" } else { "FAILED" };
            println!("[{mark}] {} ({})", assertion.assertion, assertion.detail);
        }
        run.report
    } else if args.interactive {
        run_interactive(&args)?
    } else {
        run_default_sim(&args)?
    };

    print_outcomes(&report);
    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &report)?;
    }
    Ok(())
}

fn build_sim(args: &Args) -> Result<Simulator> {
    if args.nodes.len() < 2 {
        bail!("need at least two nodes, got {:?}", args.nodes);
    }
    let config = SimConfig {
        loss_rate: args.loss_rate,
        min_latency: 5,
        max_latency: 40,
        seed: args.seed,
        ..Default::default()
    };
    let arq = ArqConfig {
        window_size: args.window_size,
        ..Default::default()
    };
    Simulator::new(
        config,
        arq,
        RadioConfig::default(),
        args.nodes.iter().map(|n| NodeId::new(n.as_str())),
    )
    .context("Invalid simulator configuration")
}

fn run_default_sim(args: &Args) -> Result<SimulationReport> {
    let mut sim = build_sim(args)?;
    let from = NodeId::new(args.nodes[0].as_str());
    let to = NodeId::new(args.nodes[1].as_str());
    sim.schedule_send(1000, from.clone(), None, "hello over LoRa");
    sim.schedule_send(2000, from.clone(), Some(to), generated_text(450));
    sim.schedule_send(3000, from, None, generated_text(1000));

    info!("Starting default headless simulation…");
    sim.run_until_complete();
    info!("Simulation complete.");
    Ok(sim.export_report())
}

fn run_interactive(args: &Args) -> Result<SimulationReport> {
    let mut sim = build_sim(args)?;
    println!("nodes: {}", args.nodes.join(", "));
    println!("send with `<from> [@<to>] <text>`, end with an empty line or EOF");

    let stdin = io::stdin();
    let mut seen = 0;
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let Some((from, to, text)) = parse_console_line(line) else {
            println!("expected `<from> [@<to>] <text>`");
            continue;
        };
        if !sim.node_ids().iter().any(|id| id.as_str() == from) {
            println!("unknown node `{from}`");
            continue;
        }
        let now = sim.current_time();
        sim.schedule_send(now, NodeId::new(from), to.map(NodeId::new), text.to_string());
        sim.run_until_complete();

        for delivery in &sim.deliveries()[seen..] {
            println!(
                "{} <- {} #{}: {}",
                delivery.to, delivery.from, delivery.seq, delivery.text
            );
        }
        seen = sim.deliveries().len();
        if let Some(outcome) = sim.outcomes().last() {
            match &outcome.report {
                Some(r) => println!(
                    "#{} acked by {} after {} attempt(s), pdr {:.1}%, {:.0} bit/s",
                    r.seq, r.acked_by, r.attempts, r.pdr, r.goodput_bps
                ),
                None => println!(
                    "send failed: {}",
                    outcome.error.as_deref().unwrap_or("unknown error")
                ),
            }
        }
        io::stdout().flush().context("Failed to flush stdout")?;
    }
    Ok(sim.export_report())
}

/// Split `A @B some text` into `("A", Some("B"), "some text")`.
fn parse_console_line(line: &str) -> Option<(&str, Option<&str>, &str)> {
    let (from, rest) = line.split_once(char::is_whitespace)?;
    let rest = rest.trim_start();
    let (to, text) = match rest.strip_prefix('@') {
        Some(addressed) => {
            let (to, text) = addressed.split_once(char::is_whitespace)?;
            (Some(to), text.trim_start())
        }
        None => (None, rest),
    };
    if text.is_empty() {
        return None;
    }
    Some((from, to, text))
}

fn print_outcomes(report: &SimulationReport) {
    info!(
        "Simulation duration: {} ms | frames: {} | deliveries: {} | sends: {}",
        report.duration_ms,
        report.frames.len(),
        report.deliveries.len(),
        report.outcomes.len()
    );
    for outcome in &report.outcomes {
        let status = if outcome.succeeded() { "delivered" } else { "failed" };
        info!(
            "{} #{:?} {status} in {} ms over {} attempt(s)",
            outcome.from,
            outcome.seq,
            outcome.finished_at.saturating_sub(outcome.started_at),
            outcome.attempts
        );
    }
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize simulation trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::parse_console_line;

    #[test]
    fn console_line_broadcast() {
        assert_eq!(
            parse_console_line("A hello there"),
            Some(("A", None, "hello there"))
        );
    }

    #[test]
    fn console_line_addressed() {
        assert_eq!(
            parse_console_line("A @B  hi"),
            Some(("A", Some("B"), "hi"))
        );
    }

    #[test]
    fn console_line_needs_text() {
        assert_eq!(parse_console_line("A"), None);
        assert_eq!(parse_console_line("A @B"), None);
    }
}
