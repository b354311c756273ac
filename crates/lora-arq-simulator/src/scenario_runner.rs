use anyhow::{Context, bail};
use lora_arq_abstract::{
    ArqConfig, NodeId, SimConfig, TestAction, TestAssertion, TestScenario, generated_text,
};
use lora_arq_core::sanitize;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::engine::Simulator;
use crate::trace::SimulationReport;

#[derive(Debug, Clone, Serialize)]
pub struct AssertionResult {
    pub assertion: String,
    pub passed: bool,
    pub detail: String,
}

/// A finished scenario: the trace plus the verdict of every assertion.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioRun {
    pub name: String,
    pub report: SimulationReport,
    pub assertions: Vec<AssertionResult>,
}

impl ScenarioRun {
    pub fn passed(&self) -> bool {
        self.assertions.iter().all(|a| a.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &AssertionResult> {
        self.assertions.iter().filter(|a| !a.passed)
    }
}

pub fn load_scenario(path: &Path) -> anyhow::Result<TestScenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    toml::from_str(&content).context("Failed to parse scenario")
}

pub fn run_scenario_file(path: &Path) -> anyhow::Result<ScenarioRun> {
    let scenario = load_scenario(path)?;
    run_scenario(&scenario)
}

/// Build a simulator with the scenario's nodes, overrides, sends and drop rules.
pub fn build_simulator(scenario: &TestScenario) -> anyhow::Result<Simulator> {
    if scenario.nodes.len() < 2 {
        bail!("scenario `{}` needs at least two nodes", scenario.name);
    }
    let mut config = SimConfig::default();
    scenario.config.apply_to(&mut config);
    let mut arq = ArqConfig::default();
    scenario.arq.apply_to(&mut arq);

    let ids: Vec<NodeId> = scenario.nodes.iter().map(|n| NodeId::new(n.as_str())).collect();
    let mut sim = Simulator::new(config, arq, scenario.radio.clone(), ids.clone())
        .context("Invalid scenario configuration")?;

    let known = |name: &str| ids.iter().any(|id| id.as_str() == name);
    for action in &scenario.actions {
        match action {
            TestAction::Send {
                time,
                from,
                to,
                text,
                length,
            } => {
                if !known(from) {
                    bail!("send from unknown node `{from}`");
                }
                let body = expected_text(text, length).context("send needs `text` or `length`")?;
                sim.schedule_send(
                    *time,
                    NodeId::new(from.as_str()),
                    to.as_deref().map(NodeId::new),
                    body,
                );
            }
            TestAction::DropFrames(rule) => {
                if let Some(from) = &rule.from
                    && !known(from)
                {
                    bail!("drop rule for unknown node `{from}`");
                }
                sim.add_drop_rule(rule.clone());
            }
        }
    }
    Ok(sim)
}

pub fn run_scenario(scenario: &TestScenario) -> anyhow::Result<ScenarioRun> {
    info!("Running Scenario: {}", scenario.name);
    if !scenario.description.is_empty() {
        info!("Description: {}", scenario.description);
    }

    let mut sim = build_simulator(scenario)?;
    sim.run_until_complete();
    let report = sim.export_report();

    let mut assertions = Vec::with_capacity(scenario.assertions.len());
    for assertion in &scenario.assertions {
        assertions.push(check(assertion, &report)?);
    }
    let run = ScenarioRun {
        name: scenario.name.clone(),
        report,
        assertions,
    };
    if run.passed() {
        info!("Test Scenario Passed!");
    } else {
        for failure in run.failures() {
            warn!("Assertion Failed: {} ({})", failure.assertion, failure.detail);
        }
    }
    Ok(run)
}

fn expected_text(text: &Option<String>, length: &Option<usize>) -> Option<String> {
    text.clone().or_else(|| length.map(generated_text))
}

fn check(assertion: &TestAssertion, report: &SimulationReport) -> anyhow::Result<AssertionResult> {
    let result = |name: String, passed: bool, detail: String| AssertionResult {
        assertion: name,
        passed,
        detail,
    };

    Ok(match assertion {
        TestAssertion::Delivered { to, text, length } => {
            let expected =
                expected_text(text, length).context("`delivered` needs `text` or `length`")?;
            // Compare with what actually went over the air.
            let expected = String::from_utf8_lossy(&sanitize(expected.as_bytes())).into_owned();
            let to = NodeId::new(to.as_str());
            let count = report
                .deliveries_to(&to)
                .filter(|d| d.text == expected)
                .count();
            result(
                format!("delivered to {to} ({} bytes)", expected.len()),
                count > 0,
                format!("{count} matching deliveries"),
            )
        }
        TestAssertion::DeliveryCount { to, count } => {
            let to = NodeId::new(to.as_str());
            let actual = report.deliveries_to(&to).count();
            result(
                format!("{to} delivers {count} messages"),
                actual == *count,
                format!("delivered {actual}"),
            )
        }
        TestAssertion::SendSucceeded { from, seq } => {
            let outcome = report.outcome(&NodeId::new(from.as_str()), *seq);
            result(
                format!("{from} #{seq} succeeds"),
                outcome.is_some_and(|o| o.succeeded()),
                describe_outcome(outcome),
            )
        }
        TestAssertion::SendFailed { from, seq } => {
            let outcome = report.outcome(&NodeId::new(from.as_str()), *seq);
            result(
                format!("{from} #{seq} fails"),
                outcome.is_some_and(|o| !o.succeeded()),
                describe_outcome(outcome),
            )
        }
        TestAssertion::Attempts { from, seq, count } => {
            let outcome = report.outcome(&NodeId::new(from.as_str()), *seq);
            result(
                format!("{from} #{seq} takes {count} attempts"),
                outcome.is_some_and(|o| o.attempts == *count),
                describe_outcome(outcome),
            )
        }
        TestAssertion::FrameCount {
            kind,
            from,
            min,
            max,
        } => {
            let from = from.as_deref().map(NodeId::new);
            let actual = report.frame_count(*kind, from.as_ref());
            let within = actual >= *min && max.is_none_or(|max| actual <= max);
            let sender = from.map_or_else(|| "anyone".to_string(), |f| f.to_string());
            let upper = max.map_or("∞".to_string(), |m| m.to_string());
            result(
                format!("{kind} frames by {sender} in [{min}, {upper}]"),
                within,
                format!("counted {actual}"),
            )
        }
        TestAssertion::MaxDuration { ms } => result(
            format!("finishes within {ms} ms"),
            report.duration_ms <= *ms,
            format!("ran {} ms", report.duration_ms),
        ),
    })
}

fn describe_outcome(outcome: Option<&crate::trace::SendOutcome>) -> String {
    match outcome {
        None => "no such send".to_string(),
        Some(o) if o.succeeded() => format!("acknowledged after {} attempts", o.attempts),
        Some(o) => format!(
            "failed after {} attempts: {}",
            o.attempts,
            o.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> TestScenario {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn passing_scenario() {
        let scenario = parse(
            r#"
            name = "fragmented broadcast"
            nodes = ["A", "B"]

            [config]
            min_latency = 10
            max_latency = 10

            [[actions]]
            type = "send"
            time = 0
            from = "A"
            length = 450

            [[assertions]]
            type = "delivered"
            to = "B"
            length = 450

            [[assertions]]
            type = "send_succeeded"
            from = "A"
            seq = 0

            [[assertions]]
            type = "frame_count"
            kind = "fragment"
            from = "A"
            min = 3
            max = 3
            "#,
        );
        let run = run_scenario(&scenario).unwrap();
        assert!(run.passed(), "{:?}", run.failures().collect::<Vec<_>>());
    }

    #[test]
    fn bundled_scenarios_pass() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scenarios");
        for file in [
            "single_frame.toml",
            "lost_final_ack.toml",
            "go_back_n.toml",
            "silent_peer.toml",
            "lossy_channel.toml",
        ] {
            let run = run_scenario_file(&dir.join(file)).unwrap();
            assert!(
                run.passed(),
                "{file}: {:?}",
                run.failures().collect::<Vec<_>>()
            );
        }
    }

    #[test]
    fn failing_assertion_is_reported_not_raised() {
        let scenario = parse(
            r#"
            name = "wrong expectation"
            nodes = ["A", "B"]

            [[actions]]
            type = "send"
            time = 0
            from = "A"
            text = "hi"

            [[assertions]]
            type = "send_failed"
            from = "A"
            seq = 0
            "#,
        );
        let run = run_scenario(&scenario).unwrap();
        assert!(!run.passed());
        assert_eq!(run.failures().count(), 1);
    }

    #[test]
    fn unknown_node_is_an_error() {
        let scenario = parse(
            r#"
            name = "typo"
            nodes = ["A", "B"]

            [[actions]]
            type = "send"
            time = 0
            from = "C"
            text = "hi"
            "#,
        );
        assert!(run_scenario(&scenario).is_err());
    }

    #[test]
    fn send_without_body_is_an_error() {
        let scenario = parse(
            r#"
            name = "empty"
            nodes = ["A", "B"]

            [[actions]]
            type = "send"
            time = 0
            from = "A"
            "#,
        );
        assert!(build_simulator(&scenario).is_err());
    }
}
