use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Pacing and timeout knobs shared by both engines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed delay between two responder cycles (and between handshake polls).
    pub tick_ms: u64,
    /// Receiver-side safety net. `None` blocks forever on every receive.
    pub receive_timeout_ms: Option<u64>,
    /// Responder gives up after this many consecutive cycles without an ACK.
    pub max_idle_cycles: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: 500,
            receive_timeout_ms: None,
            max_idle_cycles: 200,
        }
    }
}

impl EngineConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout_ms.map(Duration::from_millis)
    }
}

/// Independent loss probabilities applied at the receiving endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LossConfig {
    /// Probability that an arriving data segment is treated as lost.
    pub data_loss: f64,
    /// Probability that an ACK is withheld.
    pub ack_loss: f64,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            data_loss: 0.0,
            ack_loss: 0.0,
            seed: None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    Probability { name: &'static str, value: f64 },
    #[error("tick_ms must be positive")]
    ZeroTick,
}

impl LossConfig {
    pub fn new(data_loss: f64, ack_loss: f64) -> Self {
        Self {
            data_loss,
            ack_loss,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("data_loss", self.data_loss), ("ack_loss", self.ack_loss)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Probability { name, value });
            }
        }
        Ok(())
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        Ok(())
    }
}

/// Optional overrides layered on top of the defaults, e.g. from a scenario file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverride {
    pub data_loss: Option<f64>,
    pub ack_loss: Option<f64>,
    pub seed: Option<u64>,
    pub tick_ms: Option<u64>,
    pub receive_timeout_ms: Option<u64>,
    pub max_idle_cycles: Option<u32>,
}

impl ConfigOverride {
    pub fn apply_to(&self, loss: &mut LossConfig, engine: &mut EngineConfig) {
        if let Some(v) = self.data_loss {
            loss.data_loss = v;
        }
        if let Some(v) = self.ack_loss {
            loss.ack_loss = v;
        }
        if let Some(v) = self.seed {
            loss.seed = Some(v);
        }
        if let Some(v) = self.tick_ms {
            engine.tick_ms = v;
        }
        if let Some(v) = self.receive_timeout_ms {
            engine.receive_timeout_ms = Some(v);
        }
        if let Some(v) = self.max_idle_cycles {
            engine.max_idle_cycles = v;
        }
    }
}
