use crate::clock;
use crate::instruction::{Instruction, QUIT_REPLY};
use crate::payload::PayloadSource;
use anyhow::{Context, Result};
use rdt_abstract::{Channel, DATAGRAM_BUFFER_LEN, EngineConfig, LossConfig, ProtocolKind};
use rdt_core::{
    LossSimulator, NetContext, ResponseReport, Transfer, UdpChannel, engine_for, resolve,
};
use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// Sleep between two empty polls of the listening socket.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A finished responder run started by a test instruction.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub kind: ProtocolKind,
    pub peer: SocketAddr,
    pub report: ResponseReport,
}

/// Reports of finished workers kept for [`ReliableServer::join_workers`].
const MAX_KEPT_REPORTS: usize = 64;

#[derive(Default)]
struct WorkerPool {
    running: Vec<JoinHandle<Option<WorkerReport>>>,
    finished: VecDeque<WorkerReport>,
}

impl WorkerPool {
    /// Join every worker that already returned and keep its report.
    fn reap(&mut self) {
        let (done, running): (Vec<_>, Vec<_>) =
            self.running.drain(..).partition(|h| h.is_finished());
        self.running = running;
        for handle in done {
            match handle.join() {
                Ok(Some(report)) => {
                    if self.finished.len() == MAX_KEPT_REPORTS {
                        self.finished.pop_front();
                    }
                    self.finished.push_back(report);
                }
                Ok(None) => {}
                Err(_) => warn!("responder thread panicked"),
            }
        }
    }
}

type Workers = Arc<Mutex<WorkerPool>>;

/// The session server: answers instructions on one UDP socket and serves
/// test transfers from per-request worker sockets.
pub struct ReliableServer {
    ctx: NetContext,
    channel: Arc<UdpChannel>,
    payload: PayloadSource,
    config: EngineConfig,
    running: Arc<AtomicBool>,
    dispatcher: Option<JoinHandle<()>>,
    workers: Workers,
}

impl ReliableServer {
    pub fn bind(
        ctx: NetContext,
        addr: impl ToSocketAddrs,
        payload: PayloadSource,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let channel = UdpChannel::bind(addr).context("Failed to bind listening socket")?;
        Ok(Self {
            ctx,
            channel: Arc::new(channel),
            payload,
            config,
            running: Arc::new(AtomicBool::new(false)),
            dispatcher: None,
            workers: Arc::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.channel.local_addr()
    }

    pub fn context(&self) -> &NetContext {
        &self.ctx
    }

    /// Start answering instructions. Calling it twice has no effect.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let dispatcher = Dispatcher {
            ctx: self.ctx.clone(),
            channel: Arc::clone(&self.channel),
            payload: self.payload.clone(),
            config: self.config.clone(),
            running: Arc::clone(&self.running),
            workers: Arc::clone(&self.workers),
        };
        if let Ok(addr) = self.channel.local_addr() {
            info!("server listening on {addr}");
        }
        self.dispatcher = Some(thread::spawn(move || dispatcher.run()));
    }

    /// Stop the dispatcher. Transfers already running finish on their own.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                warn!("dispatcher thread panicked");
            }
        }
    }

    /// Wait for every responder started so far and collect their reports.
    ///
    /// Reports of workers that finished earlier are included, up to the
    /// most recent 64.
    pub fn join_workers(&self) -> Vec<WorkerReport> {
        let (handles, mut reports): (Vec<_>, Vec<_>) = match self.workers.lock() {
            Ok(mut pool) => (
                pool.running.drain(..).collect(),
                pool.finished.drain(..).collect(),
            ),
            Err(_) => return Vec::new(),
        };
        reports.extend(handles.into_iter().filter_map(|h| h.join().ok().flatten()));
        reports
    }

    /// Responder threads still running.
    pub fn active_workers(&self) -> usize {
        match self.workers.lock() {
            Ok(mut pool) => {
                pool.reap();
                pool.running.len()
            }
            Err(_) => 0,
        }
    }

    /// Ask the server at `host:port` for a test transfer and receive it.
    pub fn request_transfer(
        &self,
        host: &str,
        port: u16,
        kind: ProtocolKind,
        loss: LossConfig,
    ) -> Result<Transfer> {
        let mut loss = LossSimulator::new(loss)?;
        let engine = engine_for(kind, &self.ctx, self.config.clone());
        let transfer = engine
            .run_as_receiver(&self.ctx, host, port, &mut loss)
            .with_context(|| format!("{kind} transfer from {host}:{port} failed"))?;
        info!(
            "{kind} transfer from {host}:{port} ended {:?} with {} bytes",
            transfer.outcome,
            transfer.payload.len()
        );
        Ok(transfer)
    }

    /// Send one text datagram and wait for a single reply.
    ///
    /// Returns an empty string when nothing comes back within `timeout`.
    pub fn send_message(
        &self,
        host: &str,
        port: u16,
        text: &str,
        timeout: Duration,
    ) -> Result<String> {
        let target = resolve(host, port)?;
        let channel = UdpChannel::ephemeral_for(target)?;
        channel.send_to(text.as_bytes(), target)?;

        let mut buf = [0u8; DATAGRAM_BUFFER_LEN];
        Ok(match channel.recv_from(&mut buf, Some(timeout))? {
            Some((len, _)) => String::from_utf8_lossy(&buf[..len]).into_owned(),
            None => String::new(),
        })
    }
}

impl Drop for ReliableServer {
    fn drop(&mut self) {
        self.close();
    }
}

struct Dispatcher {
    ctx: NetContext,
    channel: Arc<UdpChannel>,
    payload: PayloadSource,
    config: EngineConfig,
    running: Arc<AtomicBool>,
    workers: Workers,
}

impl Dispatcher {
    fn run(self) {
        let mut buf = [0u8; DATAGRAM_BUFFER_LEN];
        while self.running.load(Ordering::Acquire) {
            match self.channel.try_recv_from(&mut buf) {
                Ok(Some((len, from))) => {
                    let instruction = Instruction::parse(&buf[..len]);
                    if let Err(e) = self.handle(instruction, from) {
                        warn!("failed to answer {from}: {e}");
                    }
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    warn!("listening socket receive failed: {e}");
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
        info!("dispatcher stopped");
    }

    fn handle(&self, instruction: Instruction, from: SocketAddr) -> io::Result<()> {
        match instruction {
            Instruction::Time => self.reply(&clock::now_string(), from),
            Instruction::Quit => self.reply(QUIT_REPLY, from),
            Instruction::Echo(text) if text.is_empty() => Ok(()),
            Instruction::Echo(text) => self.reply(&text, from),
            Instruction::Test(kind) => {
                self.spawn_responder(kind, from);
                Ok(())
            }
        }
    }

    fn reply(&self, text: &str, to: SocketAddr) -> io::Result<()> {
        self.channel.send_to(text.as_bytes(), to)
    }

    fn spawn_responder(&self, kind: ProtocolKind, peer: SocketAddr) {
        let payload = match self.payload.load() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("cannot load payload for {kind} request from {peer}: {e}");
                self.ctx.log(&format!("payload unavailable: {e}"));
                return;
            }
        };
        info!("{kind} request from {peer}, {} bytes", payload.len());

        let ctx = self.ctx.clone();
        let config = self.config.clone();
        let handle = thread::spawn(move || {
            let engine = engine_for(kind, &ctx, config);
            let channel = match UdpChannel::ephemeral_for(peer) {
                Ok(channel) => channel,
                Err(e) => {
                    warn!("cannot open worker socket for {peer}: {e}");
                    return None;
                }
            };
            match engine.respond(&channel, peer, &payload) {
                Ok(report) => {
                    info!("{kind} response to {peer} ended {:?}", report.outcome);
                    Some(WorkerReport { kind, peer, report })
                }
                Err(e) => {
                    warn!("{kind} response to {peer} failed: {e}");
                    None
                }
            }
        });

        if let Ok(mut pool) = self.workers.lock() {
            pool.reap();
            pool.running.push(handle);
        }
    }
}
