mod common;

use common::{fast_config, pattern};
use rdt_core::{
    Channel, LossConfig, LossSimulator, NetContext, NullSink, ProtocolKind, TransferOutcome,
    UdpChannel, engine_for,
};
use std::thread;
use std::time::Duration;

#[test]
fn both_protocols_over_real_sockets() {
    let ctx = NetContext::with_sink(NullSink);
    for kind in [ProtocolKind::Gbn, ProtocolKind::Sr] {
        let engine = engine_for(kind, &ctx, fast_config());
        let responder = UdpChannel::bind("127.0.0.1:0").unwrap();
        let receiver = UdpChannel::bind("127.0.0.1:0").unwrap();
        let responder_addr = responder.local_addr().unwrap();
        let receiver_addr = receiver.local_addr().unwrap();
        let payload = pattern(7 * 1024 + 11);
        let mut loss = LossSimulator::new(LossConfig::new(0.1, 0.1).with_seed(3)).unwrap();

        let (report, transfer) = thread::scope(|s| {
            let sending = s.spawn(|| engine.respond(&responder, receiver_addr, &payload));
            let transfer = engine
                .receive_on(&receiver, responder_addr, &mut loss)
                .unwrap();
            (sending.join().unwrap().unwrap(), transfer)
        });

        assert_eq!(transfer.outcome, TransferOutcome::Completed, "{kind}");
        assert_eq!(transfer.payload.as_ref(), payload.as_slice(), "{kind}");
        assert_eq!(report.payload_len, payload.len());
    }
}

/// A one-shot stand-in for the session server: waits for a test
/// instruction and answers from a fresh socket.
fn serve_once(listener: UdpChannel, payload: Vec<u8>) {
    let ctx = NetContext::with_sink(NullSink);
    let mut buf = [0u8; 64];
    let (len, requester) = listener
        .recv_from(&mut buf, Some(Duration::from_secs(5)))
        .unwrap()
        .unwrap();
    let text = std::str::from_utf8(&buf[..len]).unwrap();
    let kind = ProtocolKind::from_instruction(text).unwrap();

    let worker = UdpChannel::ephemeral_for(requester).unwrap();
    let report = engine_for(kind, &ctx, fast_config())
        .respond(&worker, requester, &payload)
        .unwrap();
    assert_eq!(report.outcome, TransferOutcome::Completed);
}

#[test]
fn receiver_requests_transfer_and_follows_worker_socket() {
    for kind in [ProtocolKind::Gbn, ProtocolKind::Sr] {
        let listener = UdpChannel::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let payload = b"hello from a per-transfer socket".repeat(100);
        let expected = payload.clone();

        let server = thread::spawn(move || serve_once(listener, payload));

        let ctx = NetContext::with_sink(NullSink);
        let engine = engine_for(kind, &ctx, fast_config());
        let transfer = engine
            .run_as_receiver(&ctx, "127.0.0.1", port, &mut LossSimulator::lossless())
            .unwrap();
        server.join().unwrap();

        assert_eq!(transfer.outcome, TransferOutcome::Completed, "{kind}");
        assert_eq!(transfer.payload.as_ref(), expected.as_slice(), "{kind}");
    }
}

#[test]
fn unresolvable_host_is_an_error() {
    let ctx = NetContext::with_sink(NullSink);
    let engine = engine_for(ProtocolKind::Gbn, &ctx, fast_config());
    let result = engine.run_as_receiver(
        &ctx,
        "host.invalid",
        9,
        &mut LossSimulator::lossless(),
    );
    assert!(result.is_err());
}
