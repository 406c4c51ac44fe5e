pub mod config;
pub mod interface;
pub mod scenario;
pub mod segment;

pub use interface::{Channel, LogSink, NullSink, ProtocolKind, TransferOutcome};
pub use segment::{DATAGRAM_BUFFER_LEN, Inbound, MAX_PAYLOAD_LEN, Segment, SegmentError};

pub use config::{ConfigError, ConfigOverride, EngineConfig, LossConfig};
pub use scenario::{PayloadSpec, ScenarioAssertion, TransferScenario};
