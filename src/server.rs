//! Server-side services: decrypt, read the destination header, egress.

use crate::common::net::{configure_tcp_stream, listen_addr, Address};
use crate::crypto::Cipher;
use crate::relay::{self, Datagram, NatMap, Role, UDP_BUF_SIZE};
use crate::shadow;
use crate::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, error, info, warn};

/// Accept encrypted connections, read the in-band destination, and relay.
pub async fn tcp_remote(addr: &str, cipher: Arc<Cipher>) -> Result<()> {
    let listener = TcpListener::bind(listen_addr(addr)).await?;
    tcp_remote_with(listener, cipher).await
}

pub async fn tcp_remote_with(listener: TcpListener, cipher: Arc<Cipher>) -> Result<()> {
    info!("listening TCP on {}", listener.local_addr()?);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let cipher = cipher.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_conn(stream, peer, cipher).await {
                        debug!("connection from {}: {}", peer, e);
                    }
                });
            }
            Err(e) => error!("accept error: {}", e),
        }
    }
}

async fn handle_conn(stream: TcpStream, peer: SocketAddr, cipher: Arc<Cipher>) -> Result<()> {
    configure_tcp_stream(&stream);
    let mut sc = shadow::wrap_stream(stream, &cipher);

    let (address, port) = Address::read_from(&mut sc).await?;
    let target = address.to_string_with_port(port);
    debug!("proxy {} <-> {}", peer, target);

    let upstream = TcpStream::connect(&target).await?;
    configure_tcp_stream(&upstream);

    let (sent, received) = relay::relay(sc, upstream).await?;
    debug!(
        "proxy {} <-> {} done (sent: {}, received: {})",
        peer, target, sent, received
    );
    Ok(())
}

/// Accept encrypted datagrams and NAT them to their requested targets.
pub async fn udp_remote(addr: &str, cipher: Arc<Cipher>, timeout: Duration) -> Result<()> {
    let socket = UdpSocket::bind(listen_addr(addr)).await?;
    udp_remote_with(socket, cipher, timeout).await
}

pub async fn udp_remote_with(socket: UdpSocket, cipher: Arc<Cipher>, timeout: Duration) -> Result<()> {
    info!("listening UDP on {}", socket.local_addr()?);
    let downstream = shadow::wrap_datagram(socket, &cipher);
    let nat = NatMap::new(timeout);

    let mut buf = vec![0u8; UDP_BUF_SIZE];
    loop {
        let (n, peer) = match downstream.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!("UDP remote read error: {}", e);
                continue;
            }
        };

        let Some((address, port, header_len)) = Address::split(&buf[..n]) else {
            debug!("failed to split target address from packet from {}", peer);
            continue;
        };

        let target = match crate::client::resolve(&address.to_string_with_port(port)).await {
            Ok(t) => t,
            Err(e) => {
                warn!("failed to resolve target UDP address: {}", e);
                continue;
            }
        };

        let upstream = match nat.get(&peer) {
            Some(u) => u,
            None => {
                let ephemeral = match UdpSocket::bind("0.0.0.0:0").await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("UDP remote listen error: {}", e);
                        continue;
                    }
                };
                let upstream: Arc<dyn Datagram> = Arc::new(ephemeral);
                nat.add(peer, downstream.clone(), upstream.clone(), Role::RemoteServer);
                upstream
            }
        };

        if let Err(e) = upstream.send_to(&buf[header_len..n], target).await {
            warn!("UDP remote write error: {}", e);
        }
    }
}
