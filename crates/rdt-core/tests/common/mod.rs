#![allow(dead_code)]

use bytes::Bytes;
use rdt_core::{
    Channel, EngineConfig, FnSink, LogSink, LossSimulator, MemoryChannel, NetContext, NullSink,
    ProtocolKind, ResponseReport, Transfer, engine_for,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;

pub fn responder_addr() -> SocketAddr {
    "10.0.0.1:4000".parse().unwrap()
}

pub fn receiver_addr() -> SocketAddr {
    "10.0.0.2:5000".parse().unwrap()
}

/// Fast pacing so transfers finish in milliseconds.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        tick_ms: 2,
        receive_timeout_ms: Some(5_000),
        max_idle_cycles: 1_000,
    }
}

/// A linked pair whose responder end already has a handshake ack queued.
/// Nothing else ever comes back from the receiver end.
pub fn silent_peer() -> (MemoryChannel, MemoryChannel) {
    let (responder, receiver) = MemoryChannel::pair(responder_addr(), receiver_addr());
    receiver.send_to(&[200], responder_addr()).unwrap();
    (responder, receiver)
}

/// A sink that keeps every line, and a handle to read them back.
pub fn recording_sink() -> (Arc<dyn LogSink>, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&lines);
    let sink: Arc<dyn LogSink> =
        Arc::new(FnSink(move |line: &str| recorded.lock().unwrap().push(line.to_owned())));
    (sink, lines)
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

pub struct PairRun {
    pub report: ResponseReport,
    pub transfer: Transfer,
    pub responder_sent: Vec<Bytes>,
    pub receiver_sent: Vec<Bytes>,
}

/// Run a responder and a receiver against each other over a memory link.
///
/// `prepare` can install drop rules on the (responder, receiver) ends first.
pub fn run_pair(
    kind: ProtocolKind,
    config: EngineConfig,
    payload: &[u8],
    mut loss: LossSimulator,
    prepare: impl FnOnce(&MemoryChannel, &MemoryChannel),
) -> PairRun {
    let ctx = NetContext::with_sink(NullSink);
    let engine = engine_for(kind, &ctx, config);
    let (responder, receiver) = MemoryChannel::pair(responder_addr(), receiver_addr());
    prepare(&responder, &receiver);

    let (report, transfer) = thread::scope(|s| {
        let sending = s.spawn(|| engine.respond(&responder, receiver_addr(), payload));
        let transfer = engine
            .receive_on(&receiver, responder_addr(), &mut loss)
            .unwrap();
        (sending.join().unwrap().unwrap(), transfer)
    });

    PairRun {
        report,
        transfer,
        responder_sent: responder.sent(),
        receiver_sent: receiver.sent(),
    }
}
