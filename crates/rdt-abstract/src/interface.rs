use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// The unreliable datagram transport the engines run on.
///
/// Implementations may drop datagrams silently. Every method takes `&self` so
/// a channel can be shared between a dispatcher and the engine it starts.
pub trait Channel: Send + Sync {
    /// Send one datagram to `dest`.
    fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> io::Result<()>;

    /// Non-blocking receive. `Ok(None)` means nothing is queued right now.
    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    /// Blocking receive. With a `timeout`, `Ok(None)` is returned once it
    /// elapses; without one the call waits until a datagram arrives.
    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Destination for human-readable protocol events, one line per call.
pub trait LogSink: Send + Sync {
    fn log(&self, line: &str);
}

/// Discards every line. Default sink of a freshly built engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _line: &str) {}
}

/// The two reliable-transfer protocols a session can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Gbn,
    Sr,
}

impl ProtocolKind {
    /// Instruction a receiver sends to ask a server for a test transfer.
    pub fn instruction(self) -> &'static str {
        match self {
            ProtocolKind::Gbn => "-testgbn",
            ProtocolKind::Sr => "-testsr",
        }
    }

    pub fn from_instruction(text: &str) -> Option<Self> {
        match text {
            "-testgbn" => Some(ProtocolKind::Gbn),
            "-testsr" => Some(ProtocolKind::Sr),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Gbn => f.write_str("GBN"),
            ProtocolKind::Sr => f.write_str("SR"),
        }
    }
}

impl FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gbn" => Ok(ProtocolKind::Gbn),
            "sr" => Ok(ProtocolKind::Sr),
            other => Err(format!("unknown protocol '{other}', expected gbn or sr")),
        }
    }
}

/// How a transfer ended, from the point of view of the side that reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    Completed,
    /// No handshake ack after the probe was sent.
    HandshakeTimeout,
    /// SR end request never echoed, or GBN end marker never acknowledged.
    EndUnconfirmed,
    /// Too many consecutive responder cycles without any ACK.
    PeerUnresponsive,
    /// Receiver-side safety timeout elapsed.
    ReceiveTimeout,
}

impl TransferOutcome {
    pub fn is_success(self) -> bool {
        self == TransferOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_kind_parses_names_and_instructions() {
        assert_eq!("GBN".parse::<ProtocolKind>(), Ok(ProtocolKind::Gbn));
        assert_eq!("sr".parse::<ProtocolKind>(), Ok(ProtocolKind::Sr));
        assert!("tcp".parse::<ProtocolKind>().is_err());

        for kind in [ProtocolKind::Gbn, ProtocolKind::Sr] {
            assert_eq!(ProtocolKind::from_instruction(kind.instruction()), Some(kind));
        }
        assert_eq!(ProtocolKind::from_instruction("-time"), None);
    }
}
