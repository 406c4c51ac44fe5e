//! Go-Back-N.
//!
//! The responder keeps up to ten segments in flight, tags them `1..=20` and
//! relies on cumulative ACKs. Ten empty polls in a row roll the window back to
//! the last acknowledged segment and everything after it is sent again. The
//! payload is followed by a zero-length end marker that goes through the same
//! window, so the transfer only counts as complete once the receiver has
//! acknowledged the marker.
//!
//! The receiver accepts strictly in order and answers every arrival it keeps
//! (in order or not) with the last in-order sequence number.

use crate::context::NetContext;
use crate::loss::LossSimulator;
use crate::protocol::{
    HANDSHAKE_POLLS, ReliableProtocol, ResponseReport, Transfer, TransferError, TransferStats,
    accept_probe, emit, probe_peer, send,
};
use crate::seq::SeqSpace;
use bytes::{Bytes, BytesMut};
use rdt_abstract::segment::{DATAGRAM_BUFFER_LEN, Inbound, MAX_PAYLOAD_LEN, Segment};
use rdt_abstract::{Channel, EngineConfig, LogSink, NullSink, ProtocolKind, TransferOutcome};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use tracing::debug;

pub const SPACE: SeqSpace = SeqSpace::new(20, 10);

/// Consecutive empty polls that trigger a go-back.
pub const RETRANSMIT_AFTER: u32 = 10;

/// Go-backs allowed while only the end marker is outstanding.
pub const MAX_END_ATTEMPTS: u32 = 5;

/// Successor of a one-based tag: `1, 2, .., 20, 1, ..`. `next_tag(0) == 1`.
pub fn next_tag(seq: u8) -> u8 {
    seq % SPACE.modulus() + 1
}

pub struct GbnEngine {
    config: EngineConfig,
    sink: Arc<dyn LogSink>,
}

impl Default for GbnEngine {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            sink: Arc::new(NullSink),
        }
    }
}

impl GbnEngine {
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
        emit(&*self.sink, ProtocolKind::Gbn, line);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckEffect {
    Advanced,
    Duplicate,
    /// Older than the window; only proves the peer is alive.
    Stale,
    /// The receiver is ahead of a rolled-back window.
    FastForward,
}

#[derive(Debug, Default)]
struct SenderState {
    cur_seq: u8,
    cur_ack: u8,
    /// Units (chunks plus end marker) sent up to `cur_seq`.
    total_seq: usize,
    /// Highest `total_seq` ever reached, to tell retransmissions apart.
    high_water: usize,
    wait_count: u32,
    end_attempt: u32,
    idle_cycles: u32,
}

impl SenderState {
    fn outstanding(&self) -> u8 {
        SPACE.distance(self.cur_ack, self.cur_seq)
    }

    fn can_send(&self) -> bool {
        self.outstanding() < SPACE.window()
    }

    fn on_ack(&mut self, seq: u8) -> AckEffect {
        self.wait_count = 0;
        self.idle_cycles = 0;
        let ahead = SPACE.distance(self.cur_ack, seq);
        let outstanding = self.outstanding();
        if ahead == 0 {
            return AckEffect::Duplicate;
        }
        // A full window is acknowledged by `ahead == window`.
        if ahead <= outstanding {
            self.cur_ack = seq;
            return AckEffect::Advanced;
        }
        if ahead > SPACE.window() {
            return AckEffect::Stale;
        }
        self.total_seq += usize::from(ahead - outstanding);
        self.high_water = self.high_water.max(self.total_seq);
        self.cur_seq = seq;
        self.cur_ack = seq;
        AckEffect::FastForward
    }

    /// Roll back to the last ACK. Returns how many segments were unsent.
    fn go_back(&mut self) -> u8 {
        let step = self.outstanding();
        self.cur_seq = self.cur_ack;
        self.total_seq = self.total_seq.saturating_sub(usize::from(step));
        step
    }
}

impl ReliableProtocol for GbnEngine {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Gbn
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
        let units = chunks.len() + 1;
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

        let mut st = SenderState::default();
        let mut buf = [0u8; DATAGRAM_BUFFER_LEN];
        loop {
            if st.can_send() && st.total_seq < units {
                let seq = next_tag(st.cur_seq);
                let segment = match chunks.get(st.total_seq) {
                    Some(chunk) => Segment::data(seq, Bytes::copy_from_slice(chunk)),
                    None => Segment::End { seq },
                };
                send(channel, &segment, peer)?;
                stats.segments_sent += 1;
                if st.total_seq < st.high_water {
                    stats.retransmissions += 1;
                }
                st.cur_seq = seq;
                st.total_seq += 1;
                st.high_water = st.high_water.max(st.total_seq);
                stats.max_outstanding = stats.max_outstanding.max(st.outstanding().into());
                self.log(&format!("sent {segment}"));
            }

            match channel.try_recv_from(&mut buf)? {
                Some((len, from)) if from == peer => {
                    match Segment::decode(&buf[..len], Inbound::AtResponder) {
                        Ok(Segment::Ack { seq }) => {
                            stats.acks_received += 1;
                            let effect = st.on_ack(seq);
                            self.log(&format!("ACK {seq} ({effect:?})"));
                            if st.outstanding() == 0 && st.total_seq == units {
                                self.log("end marker acknowledged, transfer complete");
                                return Ok(finish(TransferOutcome::Completed, stats));
                            }
                        }
                        Ok(other) => debug!("ignoring {other} from {from}"),
                        Err(e) => debug!("undecodable datagram from {from}: {e}"),
                    }
                }
                Some((_, from)) => debug!("ignoring datagram from stranger {from}"),
                None => {
                    st.wait_count += 1;
                    st.idle_cycles += 1;
                    if st.wait_count >= RETRANSMIT_AFTER {
                        st.wait_count = 0;
                        let only_end = st.total_seq == units && st.outstanding() == 1;
                        if only_end {
                            st.end_attempt += 1;
                            if st.end_attempt > MAX_END_ATTEMPTS {
                                self.log("end marker never acknowledged, closing");
                                return Ok(finish(TransferOutcome::EndUnconfirmed, stats));
                            }
                        }
                        let step = st.go_back();
                        if step > 0 {
                            self.log(&format!(
                                "timeout, going back {step} segments to seq {}",
                                next_tag(st.cur_ack)
                            ));
                        }
                    }
                    if st.idle_cycles >= self.config.max_idle_cycles {
                        self.log(&format!(
                            "no ACK for {} cycles, peer unresponsive",
                            st.idle_cycles
                        ));
                        return Ok(finish(TransferOutcome::PeerUnresponsive, stats));
                    }
                }
            }
            thread::sleep(self.config.tick());
        }
    }

    fn receive_on(
        &self,
        channel: &dyn Channel,
        peer: SocketAddr,
        loss: &mut LossSimulator,
    ) -> Result<Transfer, TransferError> {
        let mut peer = peer;
        let mut connected = false;
        let mut ack: u8 = 0;
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
                Segment::Data { .. } | Segment::End { .. } if connected && from == peer => {
                    stats.segments_received += 1;
                    if loss.drop_data() {
                        stats.segments_dropped += 1;
                        self.log(&format!("{segment} lost"));
                        continue;
                    }

                    let mut finished = false;
                    match segment {
                        Segment::Data { seq, payload: chunk } if seq == next_tag(ack) => {
                            ack = seq;
                            payload.extend_from_slice(&chunk);
                            self.log(&format!("accepted DATA seq={seq}"));
                        }
                        Segment::End { seq } if seq == next_tag(ack) => {
                            ack = seq;
                            finished = true;
                        }
                        other => {
                            stats.segments_ignored += 1;
                            self.log(&format!("expected seq {}, ignoring {other}", next_tag(ack)));
                        }
                    }

                    if loss.drop_ack() {
                        stats.acks_dropped += 1;
                        self.log(&format!("ACK {ack} lost"));
                    } else {
                        send(channel, &Segment::Ack { seq: ack }, peer)?;
                        stats.acks_sent += 1;
                    }

                    if finished {
                        self.log(&format!("end marker received, {} bytes", payload.len()));
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
