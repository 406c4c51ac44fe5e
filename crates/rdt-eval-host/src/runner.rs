use anyhow::{Context, anyhow, bail};
use bytes::Bytes;
use rdt_abstract::{
    EngineConfig, LossConfig, ProtocolKind, ScenarioAssertion, TransferOutcome, TransferScenario,
};
use rdt_cli::{PayloadSource, ReliableServer};
use rdt_core::{NetContext, TransferStats, TracingSink};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Receiver-side bound used unless the scenario sets its own, so a broken
/// transfer fails the run instead of hanging it.
const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub protocol: ProtocolKind,
    pub engine: EngineConfig,
    pub loss: LossConfig,
    pub duration_ms: u64,
    pub outcome: TransferOutcome,
    pub bytes_expected: usize,
    pub bytes_received: usize,
    pub receiver: TransferStats,
    /// Missing when the responder worker failed before reporting.
    pub responder: Option<ResponderSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponderSummary {
    pub outcome: TransferOutcome,
    pub stats: TransferStats,
}

pub fn load_scenario(path: &Path) -> anyhow::Result<TransferScenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    toml::from_str(&content).context("Failed to parse scenario")
}

/// Run one scenario against a server on the loopback interface and check
/// every assertion, stopping at the first one that fails.
pub fn run_scenario(scenario: &TransferScenario) -> anyhow::Result<ScenarioReport> {
    info!("Running Scenario: {}", scenario.name);
    if !scenario.description.is_empty() {
        info!("Description: {}", scenario.description);
    }

    let mut engine = EngineConfig {
        receive_timeout_ms: Some(DEFAULT_RECEIVE_TIMEOUT_MS),
        ..EngineConfig::default()
    };
    let mut loss = LossConfig::default();
    scenario.config.apply_to(&mut loss, &mut engine);
    engine.validate()?;
    loss.validate()?;

    let expected = scenario.payload.materialize();
    let ctx = NetContext::with_sink(TracingSink);
    let mut server = ReliableServer::bind(
        ctx,
        "127.0.0.1:0",
        PayloadSource::Inline(Bytes::from(expected.clone())),
        engine.clone(),
    )?;
    server.start();
    let port = server.local_addr()?.port();

    let started = Instant::now();
    let transfer = server.request_transfer("127.0.0.1", port, scenario.protocol, loss.clone())?;
    let duration_ms = started.elapsed().as_millis() as u64;

    let responder = server
        .join_workers()
        .into_iter()
        .next()
        .map(|worker| ResponderSummary {
            outcome: worker.report.outcome,
            stats: worker.report.stats,
        });
    server.close();

    let report = ScenarioReport {
        name: scenario.name.clone(),
        protocol: scenario.protocol,
        engine,
        loss,
        duration_ms,
        outcome: transfer.outcome,
        bytes_expected: expected.len(),
        bytes_received: transfer.payload.len(),
        receiver: transfer.stats.clone(),
        responder,
    };

    for assertion in &scenario.assertions {
        match assertion {
            ScenarioAssertion::PayloadIntact => {
                if transfer.payload.as_ref() != expected.as_slice() {
                    return Err(anyhow!(
                        "Assertion Failed: received {} bytes that differ from the {} bytes sent",
                        transfer.payload.len(),
                        expected.len()
                    ));
                }
            }
            ScenarioAssertion::Outcome { expect } => {
                if transfer.outcome != *expect {
                    return Err(anyhow!(
                        "Assertion Failed: transfer ended {:?}, expected {:?}",
                        transfer.outcome,
                        expect
                    ));
                }
            }
            ScenarioAssertion::MaxDuration { ms } => {
                if duration_ms > *ms {
                    return Err(anyhow!(
                        "Assertion Failed: transfer took {} ms, limit {} ms",
                        duration_ms,
                        ms
                    ));
                }
            }
            ScenarioAssertion::ReceiverAcks { min, max } => {
                let sent = transfer.stats.acks_sent;
                if sent < *min {
                    bail!("Assertion Failed: receiver sent {sent} ACKs, expected min {min}");
                }
                if let Some(max) = max {
                    if sent > *max {
                        bail!("Assertion Failed: receiver sent {sent} ACKs, expected max {max}");
                    }
                }
            }
        }
    }

    info!("Test Scenario Passed!");
    Ok(report)
}

pub fn write_report(path: &Path, report: &ScenarioReport) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize scenario report")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write report file {}", path.display()))?;
    Ok(())
}
