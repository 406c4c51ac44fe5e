use crate::config::ConfigOverride;
use crate::interface::{ProtocolKind, TransferOutcome};
use serde::Deserialize;

/// A transfer scenario as written in a TOML file for the grader.
#[derive(Deserialize, Debug, Clone)]
pub struct TransferScenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub protocol: ProtocolKind,
    pub payload: PayloadSpec,
    #[serde(default)]
    pub config: ConfigOverride,
    #[serde(default)]
    pub assertions: Vec<ScenarioAssertion>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSpec {
    /// `n` bytes of a fixed, non-repeating-per-chunk pattern.
    Bytes(usize),
    Text(String),
}

impl PayloadSpec {
    pub fn materialize(&self) -> Vec<u8> {
        match self {
            // 251 is prime, so consecutive 1024-byte chunks never line up.
            PayloadSpec::Bytes(n) => (0..*n).map(|i| (i.wrapping_mul(31) % 251) as u8).collect(),
            PayloadSpec::Text(text) => text.as_bytes().to_vec(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioAssertion {
    /// The receiver reassembled exactly the bytes the responder was given.
    PayloadIntact,
    /// Terminal condition reported by the receiver.
    Outcome { expect: TransferOutcome },
    /// Wall-clock limit for the whole transfer.
    MaxDuration { ms: u64 },
    /// Number of ACK datagrams the receiver actually put on the wire.
    ReceiverAcks { min: u32, max: Option<u32> },
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
name = "gbn-lossy"
description = "GBN over a 20% lossy link"
protocol = "gbn"
payload = { bytes = 5000 }

[config]
data_loss = 0.2
ack_loss = 0.2
seed = 7

[[assertions]]
type = "payload_intact"

[[assertions]]
type = "outcome"
expect = "completed"

[[assertions]]
type = "receiver_acks"
min = 6
"#;

    #[test]
    fn parses_scenario_file() {
        let scenario: TransferScenario = toml::from_str(SCENARIO).unwrap();
        assert_eq!(scenario.protocol, ProtocolKind::Gbn);
        assert_eq!(scenario.payload.materialize().len(), 5000);
        assert_eq!(scenario.config.seed, Some(7));
        assert_eq!(scenario.assertions.len(), 3);
        assert!(matches!(
            scenario.assertions[1],
            ScenarioAssertion::Outcome {
                expect: TransferOutcome::Completed
            }
        ));
        assert!(matches!(
            scenario.assertions[2],
            ScenarioAssertion::ReceiverAcks { min: 6, max: None }
        ));
    }

    #[test]
    fn byte_pattern_differs_between_chunks() {
        let bytes = PayloadSpec::Bytes(2048).materialize();
        assert_ne!(bytes[..1024], bytes[1024..]);
    }
}
