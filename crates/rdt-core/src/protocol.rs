use crate::channel::UdpChannel;
use crate::context::NetContext;
use crate::gbn::GbnEngine;
use crate::loss::LossSimulator;
use crate::sr::SrEngine;
use bytes::Bytes;
use rdt_abstract::segment::{DATAGRAM_BUFFER_LEN, Inbound, Segment};
use rdt_abstract::{
    Channel, ConfigError, EngineConfig, LogSink, ProtocolKind, SegmentError, TransferOutcome,
};
use serde::Serialize;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tracing::debug;

/// Consecutive empty polls after the probe before a responder gives up.
pub const HANDSHAKE_POLLS: u32 = 20;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("channel I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("cannot resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Segment(#[from] SegmentError),
}

/// Counters collected by one side of a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    /// Data and end segments put on the wire, retransmissions included.
    pub segments_sent: u32,
    pub retransmissions: u32,
    pub acks_received: u32,
    /// Largest number of unacknowledged segments the sender ever had.
    pub max_outstanding: u32,
    /// Data and end segments that reached the receiver.
    pub segments_received: u32,
    /// Arrivals discarded by the loss simulator.
    pub segments_dropped: u32,
    /// Arrivals that were out of order, duplicated or outside the window.
    pub segments_ignored: u32,
    pub acks_sent: u32,
    pub acks_dropped: u32,
}

/// What the responder reports once its state machine stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseReport {
    pub outcome: TransferOutcome,
    pub payload_len: usize,
    pub stats: TransferStats,
}

/// What the receiver hands back.
///
/// `payload` holds every byte delivered in order, which is the full payload
/// when `outcome` is [`TransferOutcome::Completed`] and a prefix otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub payload: Bytes,
    pub outcome: TransferOutcome,
    pub stats: TransferStats,
}

impl Transfer {
    /// The payload interpreted as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// A reliable-transfer protocol usable from either end.
pub trait ReliableProtocol: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    fn config(&self) -> &EngineConfig;

    fn set_log_sink(&mut self, sink: Arc<dyn LogSink>);

    /// Send `payload` to `peer` over `channel` and report how it went.
    fn respond(
        &self,
        channel: &dyn Channel,
        peer: SocketAddr,
        payload: &[u8],
    ) -> Result<ResponseReport, TransferError>;

    /// Wait for a responder's probe on `channel` and reassemble its payload.
    ///
    /// `peer` is replaced by the source address of the probe.
    fn receive_on(
        &self,
        channel: &dyn Channel,
        peer: SocketAddr,
        loss: &mut LossSimulator,
    ) -> Result<Transfer, TransferError>;

    /// Ask the server at `host:port` for a test transfer and receive it on a
    /// fresh ephemeral socket.
    fn run_as_receiver(
        &self,
        ctx: &NetContext,
        host: &str,
        port: u16,
        loss: &mut LossSimulator,
    ) -> Result<Transfer, TransferError> {
        let target = resolve(host, port)?;
        let channel = UdpChannel::ephemeral_for(target)?;
        ctx.log(&format!(
            "requesting {} transfer from {target} (data loss {}, ack loss {})",
            self.kind(),
            loss.config().data_loss,
            loss.config().ack_loss
        ));
        channel.send_to(self.kind().instruction().as_bytes(), target)?;
        self.receive_on(&channel, target, loss)
    }
}

/// Build the engine for `kind`, logging through the context's sink.
pub fn engine_for(
    kind: ProtocolKind,
    ctx: &NetContext,
    config: EngineConfig,
) -> Box<dyn ReliableProtocol> {
    match kind {
        ProtocolKind::Gbn => Box::new(GbnEngine::new(ctx).with_config(config)),
        ProtocolKind::Sr => Box::new(SrEngine::new(ctx).with_config(config)),
    }
}

pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransferError> {
    let resolve_error = |source| TransferError::Resolve {
        host: host.to_owned(),
        port,
        source,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(resolve_error)?
        .next()
        .ok_or_else(|| resolve_error(io::Error::new(io::ErrorKind::NotFound, "no address")))
}

/// Logging shared by the engines: the pluggable sink plus a tracing event.
pub(crate) fn emit(sink: &dyn LogSink, kind: ProtocolKind, line: &str) {
    debug!(protocol = %kind, "{line}");
    sink.log(&format!("[{kind}] {line}"));
}

pub(crate) fn send(
    channel: &dyn Channel,
    segment: &Segment,
    peer: SocketAddr,
) -> Result<(), TransferError> {
    channel.send_to(&segment.encode()?, peer)?;
    Ok(())
}

/// Responder side of the two-byte handshake.
///
/// Sends the probe once and polls for the ack, sleeping one tick per empty
/// poll. Returns `false` after [`HANDSHAKE_POLLS`] empty polls.
pub(crate) fn probe_peer(
    channel: &dyn Channel,
    peer: SocketAddr,
    tick: std::time::Duration,
) -> Result<bool, TransferError> {
    send(channel, &Segment::Handshake, peer)?;
    let mut buf = [0u8; DATAGRAM_BUFFER_LEN];
    let mut empty_polls = 0;
    loop {
        match channel.try_recv_from(&mut buf)? {
            Some((len, from)) => match Segment::decode(&buf[..len], Inbound::AtResponder) {
                Ok(Segment::HandshakeAck) if from == peer => return Ok(true),
                Ok(other) => debug!("ignoring {other} from {from} during handshake"),
                Err(e) => debug!("undecodable datagram from {from}: {e}"),
            },
            None => {
                empty_polls += 1;
                if empty_polls >= HANDSHAKE_POLLS {
                    return Ok(false);
                }
                thread::sleep(tick);
            }
        }
    }
}

/// Receiver-side counterpart: answer a probe and adopt its source as peer.
pub(crate) fn accept_probe(
    channel: &dyn Channel,
    from: SocketAddr,
    peer: &mut SocketAddr,
) -> Result<(), TransferError> {
    *peer = from;
    send(channel, &Segment::HandshakeAck, from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use std::time::Duration;

    #[test]
    fn resolve_accepts_literal_addresses() {
        let addr = resolve("127.0.0.1", 9000).unwrap();
        assert_eq!(addr, "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn probe_gives_up_after_twenty_empty_polls() {
        let (a, b) = (
            "10.0.0.1:1".parse().unwrap(),
            "10.0.0.2:2".parse().unwrap(),
        );
        let (responder, receiver) = MemoryChannel::pair(a, b);
        let ready = probe_peer(&responder, b, Duration::from_millis(1)).unwrap();
        assert!(!ready);

        let mut buf = [0u8; 4];
        let (len, _) = receiver.try_recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..len], &[205]);
        assert_eq!(responder.sent().len(), 1);
    }

    #[test]
    fn probe_ignores_acks_from_strangers() {
        let (a, b) = (
            "10.0.0.1:1".parse().unwrap(),
            "10.0.0.2:2".parse().unwrap(),
        );
        let (responder, receiver) = MemoryChannel::pair(a, b);
        receiver.send_to(&[200], a).unwrap();
        // The ack comes from `b`, but we expect it from somewhere else.
        let stranger = "10.0.0.3:3".parse().unwrap();
        let ready = probe_peer(&responder, stranger, Duration::from_millis(1)).unwrap();
        assert!(!ready);
    }
}
