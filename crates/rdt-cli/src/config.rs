use anyhow::{Context, Result};
use rdt_abstract::EngineConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings of the interactive binary, usually from `--config <file.toml>`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CliConfig {
    /// `host:port` to listen on. Prompted for when absent.
    pub listen: Option<String>,
    /// File served to `-testgbn` / `-testsr` requests.
    pub payload: PathBuf,
    pub log_file: PathBuf,
    /// How long a plain message waits for its reply.
    pub reply_timeout_ms: u64,
    pub engine: EngineConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            listen: None,
            payload: PathBuf::from(crate::payload::DEFAULT_PAYLOAD_FILE),
            log_file: PathBuf::from("log.log"),
            reply_timeout_ms: 2_000,
            engine: EngineConfig::default(),
        }
    }
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: CliConfig =
            toml::from_str(&content).context("Failed to parse config file")?;
        config.engine.validate()?;
        Ok(config)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}
