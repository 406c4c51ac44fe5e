pub mod channel;
pub mod context;
pub mod gbn;
pub mod loss;
pub mod protocol;
pub mod seq;
pub mod sink;
pub mod sr;

pub use channel::{MemoryChannel, UdpChannel};
pub use context::NetContext;
pub use gbn::GbnEngine;
pub use loss::LossSimulator;
pub use protocol::{
    ReliableProtocol, ResponseReport, Transfer, TransferError, TransferStats, engine_for, resolve,
};
pub use seq::{SeqSpace, SlotRing};
pub use sink::{FileSink, FnSink, LockedSink, TracingSink};
pub use sr::SrEngine;

pub use rdt_abstract::{
    Channel, EngineConfig, LogSink, LossConfig, NullSink, ProtocolKind, TransferOutcome,
};
