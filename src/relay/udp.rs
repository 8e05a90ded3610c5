//! UDP NAT relay
//!
//! Maps each client address to an ephemeral upstream socket. One reply task
//! per entry forwards upstream packets back, rewriting headers according to
//! the relay's role, and evicts the entry after the idle timeout.

use crate::common::Address;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

/// Scratch buffer size for datagram I/O.
pub const UDP_BUF_SIZE: usize = 64 * 1024;

/// A datagram endpoint. Cipher wrappers compose over the plain socket and
/// present the same surface.
#[async_trait]
pub trait Datagram: Send + Sync {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Datagram for UdpSocket {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// Which rewrite the reply task applies to upstream packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Server replying toward the client: prepend the sender's address.
    RemoteServer,
    /// Client replying to a fixed-tunnel user: strip the address header.
    RelayClient,
    /// Client replying to a SOCKS5-UDP user: prepend RSV/FRAG bytes.
    SocksClient,
}

/// Client-address-keyed table of upstream sockets.
pub struct NatMap {
    entries: Mutex<HashMap<SocketAddr, Arc<dyn Datagram>>>,
    timeout: Duration,
}

impl NatMap {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(NatMap {
            entries: Mutex::new(HashMap::new()),
            timeout,
        })
    }

    pub fn get(&self, peer: &SocketAddr) -> Option<Arc<dyn Datagram>> {
        self.entries.lock().get(peer).cloned()
    }

    fn remove(&self, peer: &SocketAddr) -> Option<Arc<dyn Datagram>> {
        self.entries.lock().remove(peer)
    }

    /// Insert an entry and spawn its reply task. The task owns the upstream
    /// socket; when it exits (idle timeout or error) the entry is removed
    /// and the socket dropped.
    pub fn add(
        self: &Arc<Self>,
        peer: SocketAddr,
        downstream: Arc<dyn Datagram>,
        upstream: Arc<dyn Datagram>,
        role: Role,
    ) {
        self.entries.lock().insert(peer, upstream.clone());

        let nm = self.clone();
        tokio::spawn(async move {
            if let Err(e) = reply_loop(&*downstream, peer, &*upstream, nm.timeout, role).await {
                debug!("UDP reply for {} ended: {}", peer, e);
            }
            nm.remove(&peer);
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Forward upstream packets to `peer` with a rolling read deadline.
async fn reply_loop(
    downstream: &dyn Datagram,
    peer: SocketAddr,
    upstream: &dyn Datagram,
    timeout: Duration,
    role: Role,
) -> io::Result<()> {
    let mut buf = vec![0u8; UDP_BUF_SIZE];

    loop {
        let (n, raddr) = match tokio::time::timeout(timeout, upstream.recv_from(&mut buf)).await {
            Err(_) => {
                trace!("UDP entry for {} idle, evicting", peer);
                return Ok(());
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(v)) => v,
        };

        match role {
            Role::RemoteServer => {
                let mut out = Address::from(raddr).to_bytes(raddr.port());
                out.extend_from_slice(&buf[..n]);
                downstream.send_to(&out, peer).await?;
            }
            Role::RelayClient => match Address::split(&buf[..n]) {
                Some((_, _, len)) => {
                    downstream.send_to(&buf[len..n], peer).await?;
                }
                None => {
                    debug!("UDP reply for {} missing address header, dropped", peer);
                }
            },
            Role::SocksClient => {
                let mut out = Vec::with_capacity(3 + n);
                out.extend_from_slice(&[0, 0, 0]);
                out.extend_from_slice(&buf[..n]);
                downstream.send_to(&out, peer).await?;
            }
        }
    }
}
