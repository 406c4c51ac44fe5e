//! [`Channel`] implementations: real UDP sockets and an in-process link.

use bytes::Bytes;
use rdt_abstract::Channel;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// A [`Channel`] over a std UDP socket.
///
/// The socket is switched between blocking and non-blocking mode on every
/// call, so one channel should be driven from one thread at a time.
#[derive(Debug)]
pub struct UdpChannel {
    socket: UdpSocket,
}

impl UdpChannel {
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(Self {
            socket: UdpSocket::bind(addr)?,
        })
    }

    /// Bind an OS-assigned port in the same address family as `peer`.
    pub fn ephemeral_for(peer: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        Self::bind(local)
    }
}

impl From<UdpSocket> for UdpChannel {
    fn from(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl Channel for UdpChannel {
    fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.socket.send_to(datagram, dest).map(|_| ())
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        self.socket.set_nonblocking(true)?;
        loop {
            match self.socket.recv_from(buf) {
                Ok(got) => return Ok(Some(got)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // ICMP port unreachable from an earlier send on some platforms.
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        if timeout == Some(Duration::ZERO) {
            return self.try_recv_from(buf);
        }
        self.socket.set_nonblocking(false)?;
        self.socket.set_read_timeout(timeout)?;
        loop {
            match self.socket.recv_from(buf) {
                Ok(got) => return Ok(Some(got)),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(None);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// One end of an in-process datagram link, for tests.
///
/// Every datagram passed to `send_to` is recorded, including the ones removed
/// by a one-shot drop rule. Datagrams addressed to anything but the peer are
/// discarded, as a real network would.
pub struct MemoryChannel {
    addr: SocketAddr,
    peer: SocketAddr,
    to_peer: Sender<(Bytes, SocketAddr)>,
    inbox: Mutex<Receiver<(Bytes, SocketAddr)>>,
    // Keeps our own inbox connected so receives behave like a socket.
    _inbox_tx: Sender<(Bytes, SocketAddr)>,
    sent: Mutex<Vec<Bytes>>,
    drop_rules: Mutex<Vec<DropRule>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DropRule {
    /// First payload-bearing datagram tagged with this sequence number.
    Data(u8),
    /// First one-byte datagram carrying this value.
    Short(u8),
}

impl DropRule {
    fn matches(self, datagram: &[u8]) -> bool {
        match (self, datagram) {
            (DropRule::Data(seq), [first, _, ..]) => *first == seq,
            (DropRule::Short(seq), [only]) => *only == seq,
            _ => false,
        }
    }
}

impl MemoryChannel {
    /// Two connected ends, addressed as `a` and `b`.
    pub fn pair(a: SocketAddr, b: SocketAddr) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel();
        let (b_tx, b_rx) = mpsc::channel();
        let left = Self::end(a, b, b_tx.clone(), a_rx, a_tx.clone());
        let right = Self::end(b, a, a_tx, b_rx, b_tx);
        (left, right)
    }

    fn end(
        addr: SocketAddr,
        peer: SocketAddr,
        to_peer: Sender<(Bytes, SocketAddr)>,
        inbox: Receiver<(Bytes, SocketAddr)>,
        inbox_tx: Sender<(Bytes, SocketAddr)>,
    ) -> Self {
        Self {
            addr,
            peer,
            to_peer,
            inbox: Mutex::new(inbox),
            _inbox_tx: inbox_tx,
            sent: Mutex::new(Vec::new()),
            drop_rules: Mutex::new(Vec::new()),
        }
    }

    /// Lose the first data segment this end sends with sequence `seq`.
    pub fn drop_data_once(&self, seq: u8) {
        self.push_rule(DropRule::Data(seq));
    }

    /// Lose the first one-byte datagram (ACK or end marker) carrying `seq`.
    pub fn drop_short_once(&self, seq: u8) {
        self.push_rule(DropRule::Short(seq));
    }

    fn push_rule(&self, rule: DropRule) {
        if let Ok(mut rules) = self.drop_rules.lock() {
            rules.push(rule);
        }
    }

    /// Every datagram this end has sent, in order.
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn consume_rule(&self, datagram: &[u8]) -> bool {
        let Ok(mut rules) = self.drop_rules.lock() else {
            return false;
        };
        match rules.iter().position(|r| r.matches(datagram)) {
            Some(pos) => {
                rules.remove(pos);
                true
            }
            None => false,
        }
    }

    fn inbox(&self) -> io::Result<std::sync::MutexGuard<'_, Receiver<(Bytes, SocketAddr)>>> {
        self.inbox
            .lock()
            .map_err(|_| io::Error::other("memory channel inbox poisoned"))
    }
}

impl Channel for MemoryChannel {
    fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> io::Result<()> {
        let datagram = Bytes::copy_from_slice(datagram);
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(datagram.clone());
        }
        if dest != self.peer {
            debug!("memory channel {}: no route to {dest}", self.addr);
            return Ok(());
        }
        if self.consume_rule(&datagram) {
            debug!("memory channel {}: dropping {:?} by rule", self.addr, datagram);
            return Ok(());
        }
        // A closed peer behaves like an unbound port.
        let _ = self.to_peer.send((datagram, self.addr));
        Ok(())
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.inbox()?.try_recv() {
            Ok((datagram, from)) => Ok(Some(copy_into(buf, &datagram, from))),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => Ok(None),
        }
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        let inbox = self.inbox()?;
        let got = match timeout {
            Some(t) => match inbox.recv_timeout(t) {
                Ok(got) => got,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return Ok(None),
            },
            None => inbox
                .recv()
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "memory link closed"))?,
        };
        Ok(Some(copy_into(buf, &got.0, got.1)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

/// Copy like a datagram socket does: excess bytes are truncated.
fn copy_into(buf: &mut [u8], datagram: &[u8], from: SocketAddr) -> (usize, SocketAddr) {
    let len = datagram.len().min(buf.len());
    buf[..len].copy_from_slice(&datagram[..len]);
    (len, from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> (SocketAddr, SocketAddr) {
        (
            "10.0.0.1:4000".parse().unwrap(),
            "10.0.0.2:5000".parse().unwrap(),
        )
    }

    #[test]
    fn memory_pair_delivers_with_source_address() {
        let (a, b) = addrs();
        let (left, right) = MemoryChannel::pair(a, b);
        left.send_to(b"hello", b).unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = right.try_recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, a);
        assert!(right.try_recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn memory_recv_times_out_empty() {
        let (a, b) = addrs();
        let (_left, right) = MemoryChannel::pair(a, b);
        let mut buf = [0u8; 4];
        let got = right
            .recv_from(&mut buf, Some(Duration::from_millis(5)))
            .unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn drop_rules_fire_once_and_still_record() {
        let (a, b) = addrs();
        let (left, right) = MemoryChannel::pair(a, b);
        left.drop_data_once(3);
        left.drop_short_once(3);

        left.send_to(&[3], b).unwrap();
        left.send_to(&[3, 9], b).unwrap();
        left.send_to(&[3, 9], b).unwrap();

        let mut buf = [0u8; 4];
        let (len, _) = right.try_recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..len], &[3, 9]);
        assert!(right.try_recv_from(&mut buf).unwrap().is_none());
        assert_eq!(left.sent().len(), 3);
    }

    #[test]
    fn udp_try_recv_is_non_blocking() {
        let channel = UdpChannel::bind("127.0.0.1:0").unwrap();
        let mut buf = [0u8; 8];
        assert!(channel.try_recv_from(&mut buf).unwrap().is_none());
        assert!(
            channel
                .recv_from(&mut buf, Some(Duration::from_millis(5)))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn udp_loopback_round_trip() {
        let a = UdpChannel::bind("127.0.0.1:0").unwrap();
        let b = UdpChannel::ephemeral_for(a.local_addr().unwrap()).unwrap();
        let a_addr = a.local_addr().unwrap();
        b.send_to(b"-time", a_addr).unwrap();

        let mut buf = [0u8; 16];
        let (len, _) = a
            .recv_from(&mut buf, Some(Duration::from_secs(2)))
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"-time");
    }
}
