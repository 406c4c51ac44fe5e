use anyhow::Result;
use clap::Parser;
use rdt_eval_host::{ScenarioReport, load_scenario, run_scenario, write_report};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless grader for GBN / SR transfer scenarios")]
struct Args {
    /// Path to the scenario TOML file to execute.
    #[arg(long)]
    scenario: PathBuf,

    /// Write the JSON report here.
    #[arg(long)]
    report_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    info!("rdt-eval-host starting...");

    let scenario = load_scenario(&args.scenario)?;
    let report = run_scenario(&scenario)?;
    log_summary(&report);

    if let Some(path) = &args.report_out {
        write_report(path, &report)?;
        info!("Report written to {}", path.display());
    }
    Ok(())
}

fn log_summary(report: &ScenarioReport) {
    info!(
        "{} transfer: {} ms | {}/{} bytes | ACKs sent: {} | outcome: {:?}",
        report.protocol,
        report.duration_ms,
        report.bytes_received,
        report.bytes_expected,
        report.receiver.acks_sent,
        report.outcome
    );
    if let Some(responder) = &report.responder {
        info!(
            "responder: {} segments | {} retransmissions | max outstanding {}",
            responder.stats.segments_sent,
            responder.stats.retransmissions,
            responder.stats.max_outstanding
        );
    }
}
