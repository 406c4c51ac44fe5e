//! Selective Repeat.
//!
//! Sixteen sequence numbers, eight-slot windows on both sides. Every data
//! segment has its own timer and its own ACK, so only what was actually lost
//! goes out again. The receiver buffers out-of-order arrivals inside its
//! window and delivers them once the gap before them closes.
//!
//! After the last data slot is acknowledged the responder sends a zero-length
//! end request tagged `base + 1` and waits for the receiver to echo it back as
//! an ACK.

use crate::context::NetContext;
use crate::loss::LossSimulator;
use crate::protocol::{
    HANDSHAKE_POLLS, ReliableProtocol, ResponseReport, Transfer, TransferError, TransferStats,
    accept_probe, emit, probe_peer, send,
};
use crate::seq::{SeqSpace, SlotRing};
use bytes::{Bytes, BytesMut};
use rdt_abstract::segment::{DATAGRAM_BUFFER_LEN, Inbound, MAX_PAYLOAD_LEN, Segment};
use rdt_abstract::{Channel, EngineConfig, LogSink, NullSink, ProtocolKind, TransferOutcome};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use tracing::debug;

pub const SPACE: SeqSpace = SeqSpace::new(16, 8);
const SLOTS: usize = SPACE.modulus() as usize;

/// Ticks a sent slot may stay unacknowledged before it is sent again.
pub const SLOT_TIMEOUT: u32 = 20;

/// Polls per end request.
pub const END_POLLS: u32 = 20;

pub const MAX_END_ATTEMPTS: u32 = 5;

pub struct SrEngine {
    config: EngineConfig,
    sink: Arc<dyn LogSink>,
}

impl Default for SrEngine {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            sink: Arc::new(NullSink),
        }
    }
}

impl SrEngine {
    pub fn new(ctx: &NetContext) -> Self {
        Self {
            config: EngineConfig::default(),
            sink: ctx.sink(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    fn log(&self, line: &str) {
        emit(&*self.sink, ProtocolKind::Sr, line);
    }

    /// Ask the receiver to close and wait for the echo.
    fn end_transmission(
        &self,
        channel: &dyn Channel,
        peer: SocketAddr,
        base: u8,
        stats: &mut TransferStats,
    ) -> Result<TransferOutcome, TransferError> {
        let tag = SPACE.add(base, 1);
        let mut buf = [0u8; DATAGRAM_BUFFER_LEN];
        for attempt in 1..=MAX_END_ATTEMPTS {
            send(channel, &Segment::End { seq: tag }, peer)?;
            stats.segments_sent += 1;
            if attempt > 1 {
                stats.retransmissions += 1;
            }
            self.log(&format!("end request {tag}, attempt {attempt}"));

            for _ in 0..END_POLLS {
                if let Some((len, from)) = channel.try_recv_from(&mut buf)? {
                    match Segment::decode(&buf[..len], Inbound::AtResponder) {
                        Ok(Segment::Ack { seq }) if from == peer => {
                            stats.acks_received += 1;
                            if seq == tag {
                                self.log("end request echoed, transfer complete");
                                return Ok(TransferOutcome::Completed);
                            }
                        }
                        Ok(other) => debug!("ignoring {other} from {from}"),
                        Err(e) => debug!("undecodable datagram from {from}: {e}"),
                    }
                }
                thread::sleep(self.config.tick());
            }
        }
        self.log("end request never echoed, closing");
        Ok(TransferOutcome::EndUnconfirmed)
    }
}

#[derive(Debug, Default)]
struct SenderWindow {
    /// Slot at the window base.
    base: u8,
    /// Data index of the window base.
    total_seq: usize,
    wait: SlotRing<u32, SLOTS>,
    acked: SlotRing<bool, SLOTS>,
    sent: SlotRing<bool, SLOTS>,
    /// Set once a slot has been transmitted at least once.
    ever_sent: SlotRing<bool, SLOTS>,
}

impl SenderWindow {
    /// In-window offsets that still have data behind them.
    fn live_slots(&self, chunks: usize) -> impl Iterator<Item = (u8, usize)> + use<> {
        let (base, total) = (self.base, self.total_seq);
        (0..SPACE.window())
            .map(move |i| (SPACE.add(base, i), total + usize::from(i)))
            .filter(move |(_, idx)| *idx < chunks)
    }

    fn outstanding(&self, chunks: usize) -> u32 {
        self.live_slots(chunks)
            .filter(|(slot, _)| self.sent[*slot] && !self.acked[*slot])
            .count() as u32
    }

    /// Record an ACK. Slots outside the window (or past the data) are ignored.
    fn acknowledge(&mut self, seq: u8, chunks: usize) -> bool {
        let offset = SPACE.distance(self.base, seq);
        if offset >= SPACE.window() || self.total_seq + usize::from(offset) >= chunks {
            return false;
        }
        self.acked[seq] = true;
        true
    }

    /// Advance over the contiguous acknowledged run at the base.
    fn slide(&mut self) -> usize {
        let mut moved = 0;
        while self.acked[self.base] {
            let base = self.base;
            self.acked[base] = false;
            self.sent[base] = false;
            self.ever_sent[base] = false;
            self.wait[base] = 0;
            self.base = SPACE.add(base, 1);
            self.total_seq += 1;
            moved += 1;
        }
        moved
    }
}

#[derive(Debug, Default)]
struct ReceiverWindow {
    base: u8,
    received: SlotRing<bool, SLOTS>,
    buffered: SlotRing<Bytes, SLOTS>,
}

impl ReceiverWindow {
    /// Buffer an in-window segment and deliver whatever became contiguous.
    /// Returns `false` for out-of-window and duplicate arrivals.
    fn accept(&mut self, seq: u8, chunk: Bytes, out: &mut BytesMut) -> bool {
        if !SPACE.in_window(self.base, seq) || self.received[seq] {
            return false;
        }
        self.received[seq] = true;
        self.buffered[seq] = chunk;
        while self.received[self.base] {
            let base = self.base;
            self.received[base] = false;
            out.extend_from_slice(&self.buffered.take(base));
            self.base = SPACE.add(base, 1);
        }
        true
    }
}

impl ReliableProtocol for SrEngine {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Sr
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn set_log_sink(&mut self, sink: Arc<dyn LogSink>) {
        self.sink = sink;
    }

    fn respond(
        &self,
        channel: &dyn Channel,
        peer: SocketAddr,
        payload: &[u8],
    ) -> Result<ResponseReport, TransferError> {
        let chunks: Vec<&[u8]> = payload.chunks(MAX_PAYLOAD_LEN).collect();
        let mut stats = TransferStats::default();
        let finish = |outcome, stats| ResponseReport {
            outcome,
            payload_len: payload.len(),
            stats,
        };

        self.log(&format!("probing {peer}"));
        if !probe_peer(channel, peer, self.config.tick())? {
            self.log(&format!(
                "handshake timed out after {HANDSHAKE_POLLS} polls, giving up"
            ));
            return Ok(finish(TransferOutcome::HandshakeTimeout, stats));
        }
        self.log(&format!(
            "connected, sending {} bytes in {} segments",
            payload.len(),
            chunks.len()
        ));

        let mut w = SenderWindow::default();
        let mut idle_cycles = 0u32;
        let mut buf = [0u8; DATAGRAM_BUFFER_LEN];
        while w.total_seq < chunks.len() {
            let live: Vec<(u8, usize)> = w.live_slots(chunks.len()).collect();

            for &(slot, _) in &live {
                if w.sent[slot] && !w.acked[slot] {
                    w.wait[slot] += 1;
                    if w.wait[slot] >= SLOT_TIMEOUT {
                        w.wait[slot] = 0;
                        w.sent[slot] = false;
                        self.log(&format!("slot {slot} timed out"));
                    }
                }
            }

            for &(slot, idx) in &live {
                if !w.sent[slot] && !w.acked[slot] {
                    let segment = Segment::data(slot, Bytes::copy_from_slice(chunks[idx]));
                    send(channel, &segment, peer)?;
                    stats.segments_sent += 1;
                    if w.ever_sent[slot] {
                        stats.retransmissions += 1;
                    }
                    w.sent[slot] = true;
                    w.ever_sent[slot] = true;
                    w.wait[slot] = 0;
                    self.log(&format!("sent {segment}"));
                }
            }
            stats.max_outstanding = stats.max_outstanding.max(w.outstanding(chunks.len()));

            let mut heard = false;
            while let Some((len, from)) = channel.try_recv_from(&mut buf)? {
                match Segment::decode(&buf[..len], Inbound::AtResponder) {
                    Ok(Segment::Ack { seq }) if from == peer => {
                        stats.acks_received += 1;
                        heard = true;
                        if w.acknowledge(seq, chunks.len()) {
                            self.log(&format!("ACK {seq}"));
                        } else {
                            self.log(&format!("ACK {seq} outside window, ignored"));
                        }
                    }
                    Ok(other) => debug!("ignoring {other} from {from}"),
                    Err(e) => debug!("undecodable datagram from {from}: {e}"),
                }
            }

            let moved = w.slide();
            if moved > 0 {
                debug!(base = w.base, delivered = w.total_seq, "window slid by {moved}");
            }

            if heard {
                idle_cycles = 0;
            } else {
                idle_cycles += 1;
                if idle_cycles >= self.config.max_idle_cycles {
                    self.log(&format!("no ACK for {idle_cycles} cycles, peer unresponsive"));
                    return Ok(finish(TransferOutcome::PeerUnresponsive, stats));
                }
            }

            if w.total_seq < chunks.len() {
                thread::sleep(self.config.tick());
            }
        }

        let outcome = self.end_transmission(channel, peer, w.base, &mut stats)?;
        Ok(finish(outcome, stats))
    }

    fn receive_on(
        &self,
        channel: &dyn Channel,
        peer: SocketAddr,
        loss: &mut LossSimulator,
    ) -> Result<Transfer, TransferError> {
        let mut peer = peer;
        let mut connected = false;
        let mut window = ReceiverWindow::default();
        let mut payload = BytesMut::new();
        let mut stats = TransferStats::default();
        let mut buf = [0u8; DATAGRAM_BUFFER_LEN];

        loop {
            let Some((len, from)) = channel.recv_from(&mut buf, self.config.receive_timeout())?
            else {
                self.log("receive timed out");
                return Ok(Transfer {
                    payload: payload.freeze(),
                    outcome: TransferOutcome::ReceiveTimeout,
                    stats,
                });
            };
            let segment = match Segment::decode(&buf[..len], Inbound::AtReceiver) {
                Ok(segment) => segment,
                Err(e) => {
                    debug!("undecodable datagram from {from}: {e}");
                    continue;
                }
            };

            match segment {
                Segment::Handshake if !connected || from == peer => {
                    accept_probe(channel, from, &mut peer)?;
                    connected = true;
                    self.log(&format!("handshake from {from}"));
                }
                Segment::Data { seq, .. } | Segment::End { seq } if connected && from == peer => {
                    stats.segments_received += 1;
                    if loss.drop_data() {
                        stats.segments_dropped += 1;
                        self.log(&format!("{segment} lost"));
                        continue;
                    }

                    let mut finished = false;
                    match segment {
                        Segment::Data { seq, payload: chunk } => {
                            if window.accept(seq, chunk, &mut payload) {
                                self.log(&format!(
                                    "buffered DATA seq={seq}, base now {}",
                                    window.base
                                ));
                            } else {
                                stats.segments_ignored += 1;
                                self.log(&format!("DATA seq={seq} duplicate or outside window"));
                            }
                        }
                        _ if SPACE.in_window(window.base, seq) => finished = true,
                        _ => {
                            stats.segments_ignored += 1;
                            self.log(&format!("end request {seq} outside window"));
                        }
                    }

                    // Every arrival that survived loss is acknowledged,
                    // duplicates and out-of-window ones included.
                    if loss.drop_ack() {
                        stats.acks_dropped += 1;
                        self.log(&format!("ACK {seq} lost"));
                    } else {
                        send(channel, &Segment::Ack { seq }, peer)?;
                        stats.acks_sent += 1;
                    }

                    if finished {
                        self.log(&format!("end request received, {} bytes", payload.len()));
                        return Ok(Transfer {
                            payload: payload.freeze(),
                            outcome: TransferOutcome::Completed,
                            stats,
                        });
                    }
                }
                other => debug!("ignoring {other} from {from}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_reorders_inside_window() {
        let mut window = ReceiverWindow::default();
        let mut out = BytesMut::new();

        assert!(window.accept(1, Bytes::from_static(b"B"), &mut out));
        assert!(window.accept(2, Bytes::from_static(b"C"), &mut out));
        assert!(out.is_empty());
        assert!(window.accept(0, Bytes::from_static(b"A"), &mut out));
        assert_eq!(&out[..], b"ABC");
        assert_eq!(window.base, 3);
    }

    #[test]
    fn receiver_refuses_duplicates_and_far_segments() {
        let mut window = ReceiverWindow::default();
        let mut out = BytesMut::new();

        assert!(window.accept(2, Bytes::from_static(b"x"), &mut out));
        assert!(!window.accept(2, Bytes::from_static(b"x"), &mut out));
        // 8 ahead of base 0 is the first slot outside the window.
        assert!(!window.accept(8, Bytes::from_static(b"y"), &mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn receiver_window_wraps() {
        let mut window = ReceiverWindow {
            base: 14,
            ..Default::default()
        };
        let mut out = BytesMut::new();
        assert!(window.accept(1, Bytes::from_static(b"3"), &mut out));
        assert!(window.accept(15, Bytes::from_static(b"1"), &mut out));
        assert!(window.accept(0, Bytes::from_static(b"2"), &mut out));
        assert!(window.accept(14, Bytes::from_static(b"0"), &mut out));
        assert_eq!(&out[..], b"0123");
        assert_eq!(window.base, 2);
    }

    #[test]
    fn sender_ignores_acks_outside_window() {
        let mut w = SenderWindow::default();
        assert!(w.acknowledge(3, 10));
        assert!(!w.acknowledge(9, 10));
        assert!(!w.acknowledge(15, 10));
        // Slot 5 has no data behind it.
        assert!(!w.acknowledge(5, 5));
    }

    #[test]
    fn sender_slides_over_contiguous_run_only() {
        let mut w = SenderWindow::default();
        for seq in [0, 1, 3] {
            w.acknowledge(seq, 10);
        }
        assert_eq!(w.slide(), 2);
        assert_eq!((w.base, w.total_seq), (2, 2));
        assert!(w.acked[3]);
        assert_eq!(w.live_slots(10).count(), 8);
        assert_eq!(w.live_slots(5).count(), 3);
    }
}
