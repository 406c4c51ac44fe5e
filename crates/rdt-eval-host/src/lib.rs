pub mod runner;

pub use runner::{ResponderSummary, ScenarioReport, load_scenario, run_scenario, write_report};
