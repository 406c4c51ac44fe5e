use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rdt_abstract::{ConfigError, LossConfig};

/// Independent drop decisions for arriving data and outgoing ACKs.
///
/// Only the receiving endpoint samples; the sender never drops anything.
#[derive(Debug, Clone)]
pub struct LossSimulator {
    config: LossConfig,
    rng: StdRng,
}

impl LossSimulator {
    pub fn new(config: LossConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Never drops anything.
    pub fn lossless() -> Self {
        Self::build(LossConfig::default())
    }

    fn build(config: LossConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { config, rng }
    }

    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    pub fn drop_data(&mut self) -> bool {
        self.rng.random::<f64>() < self.config.data_loss
    }

    pub fn drop_ack(&mut self) -> bool {
        self.rng.random::<f64>() < self.config.ack_loss
    }
}

impl Default for LossSimulator {
    fn default() -> Self {
        Self::lossless()
    }
}
