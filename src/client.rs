//! Client-side UDP services
//!
//! TCP inbounds live in `inbound`; these loops cover the two client UDP
//! paths, both backed by the NAT table: fixed-target tunnels and the SOCKS5
//! UDP relay.

use crate::common::net::listen_addr;
use crate::common::Address;
use crate::crypto::Cipher;
use crate::relay::{Datagram, NatMap, Role, UDP_BUF_SIZE};
use crate::shadow;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

pub async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| Error::connection(format!("cannot resolve {}", addr)))
}

/// Fixed-target UDP tunnel: every datagram from a local client goes to
/// `target` through the server; replies come back with the source header
/// stripped.
pub async fn udp_tunnel(
    laddr: &str,
    server: &str,
    target: &str,
    cipher: Arc<Cipher>,
    timeout: Duration,
) -> Result<()> {
    let server_addr = resolve(server).await?;
    let (address, port) = Address::parse(target)
        .ok_or_else(|| Error::config(format!("invalid target address {:?}", target)))?;

    let socket: Arc<UdpSocket> = Arc::new(UdpSocket::bind(listen_addr(laddr)).await?);
    let nat = NatMap::new(timeout);
    info!("UDP tunnel {} <-> {} <-> {}", laddr, server, target);

    let mut buf = vec![0u8; UDP_BUF_SIZE];
    let header = address.to_bytes(port);
    buf[..header.len()].copy_from_slice(&header);

    loop {
        let (n, peer) = match socket.recv_from(&mut buf[header.len()..]).await {
            Ok(v) => v,
            Err(e) => {
                warn!("UDP local read error: {}", e);
                continue;
            }
        };

        let upstream = match nat.get(&peer) {
            Some(u) => u,
            None => {
                let ephemeral = match UdpSocket::bind("0.0.0.0:0").await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("UDP local listen error: {}", e);
                        continue;
                    }
                };
                let upstream = shadow::wrap_datagram(ephemeral, &cipher);
                nat.add(
                    peer,
                    socket.clone() as Arc<dyn Datagram>,
                    upstream.clone(),
                    Role::RelayClient,
                );
                upstream
            }
        };

        if let Err(e) = upstream.send_to(&buf[..header.len() + n], server_addr).await {
            warn!("UDP local write error: {}", e);
        }
    }
}

/// SOCKS5 UDP relay: datagrams arrive as `RSV RSV FRAG ‖ address ‖ payload`;
/// the header past FRAG is already the Shadowsocks request format.
pub async fn udp_socks(
    socket: UdpSocket,
    server: &str,
    cipher: Arc<Cipher>,
    timeout: Duration,
) -> Result<()> {
    let server_addr = resolve(server).await?;
    let socket: Arc<UdpSocket> = Arc::new(socket);
    let nat = NatMap::new(timeout);

    let mut buf = vec![0u8; UDP_BUF_SIZE];
    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!("UDP local read error: {}", e);
                continue;
            }
        };
        if n < 3 || buf[2] != 0 {
            debug!("dropping fragmented or malformed SOCKS UDP packet from {}", peer);
            continue;
        }

        let upstream = match nat.get(&peer) {
            Some(u) => u,
            None => {
                let ephemeral = match UdpSocket::bind("0.0.0.0:0").await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("UDP local listen error: {}", e);
                        continue;
                    }
                };
                if let Some((address, port, _)) = Address::split(&buf[3..n]) {
                    debug!(
                        "UDP socks {} -> {} via {}",
                        peer,
                        address.to_string_with_port(port),
                        server
                    );
                }
                let upstream = shadow::wrap_datagram(ephemeral, &cipher);
                nat.add(
                    peer,
                    socket.clone() as Arc<dyn Datagram>,
                    upstream.clone(),
                    Role::SocksClient,
                );
                upstream
            }
        };

        if let Err(e) = upstream.send_to(&buf[3..n], server_addr).await {
            warn!("UDP local write error: {}", e);
        }
    }
}
