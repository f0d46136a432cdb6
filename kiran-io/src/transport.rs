//! UDP transport
//!
//! Thin single-owner wrapper around one datagram socket. The transport
//! imposes no framing; callers map its outcomes onto their channel's
//! error surface. Receives take a per-call deadline implemented with the
//! socket read timeout, so a loop that checks a stop flag between calls
//! cancels within one deadline.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

/// Outcome of a bounded receive.
pub enum RecvOutcome {
    /// Datagram received: byte count and sender.
    Data(usize, SocketAddr),
    /// The deadline passed without a datagram.
    Timeout,
}

/// Single datagram socket with deadline-bounded receives.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind to a local address. Port 0 selects an ephemeral port.
    pub fn bind<A: ToSocketAddrs>(local: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        Ok(Self { socket })
    }

    /// Allow broadcast sends on this socket.
    pub fn enable_broadcast(&self) -> io::Result<()> {
        self.socket.set_broadcast(true)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn send_to<A: ToSocketAddrs>(&self, buf: &[u8], remote: A) -> io::Result<usize> {
        self.socket.send_to(buf, remote)
    }

    /// Receive one datagram or give up after `deadline`.
    ///
    /// OS-level timeout kinds are folded into [`RecvOutcome::Timeout`];
    /// anything else is a hard receive error.
    pub fn recv(&self, buf: &mut [u8], deadline: Duration) -> io::Result<RecvOutcome> {
        // A zero read timeout means "block forever" to the OS; clamp up
        let deadline = deadline.max(Duration::from_millis(1));
        self.socket.set_read_timeout(Some(deadline))?;
        match self.socket.recv_from(buf) {
            Ok((n, peer)) => Ok(RecvOutcome::Data(n, peer)),
            Err(e) if is_timeout(&e) => Ok(RecvOutcome::Timeout),
            Err(e) => Err(e),
        }
    }

    /// Drain any queued datagrams without blocking.
    pub fn drain(&self, buf: &mut [u8]) {
        if self.socket.set_nonblocking(true).is_err() {
            return;
        }
        while self.socket.recv_from(buf).is_ok() {}
        let _ = self.socket.set_nonblocking(false);
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recv_timeout_elapses() {
        let transport = UdpTransport::bind("127.0.0.1:0").unwrap();
        let mut buf = [0u8; 64];
        match transport.recv(&mut buf, Duration::from_millis(20)).unwrap() {
            RecvOutcome::Timeout => {}
            RecvOutcome::Data(..) => panic!("no datagram was sent"),
        }
    }

    #[test]
    fn test_loopback_send_recv() {
        let a = UdpTransport::bind("127.0.0.1:0").unwrap();
        let b = UdpTransport::bind("127.0.0.1:0").unwrap();
        a.send_to(b"ping", b.local_addr().unwrap()).unwrap();

        let mut buf = [0u8; 64];
        match b.recv(&mut buf, Duration::from_millis(500)).unwrap() {
            RecvOutcome::Data(n, peer) => {
                assert_eq!(&buf[..n], b"ping");
                assert_eq!(peer, a.local_addr().unwrap());
            }
            RecvOutcome::Timeout => panic!("datagram lost on loopback"),
        }
    }
}
