//! Client-side TCP listeners
//!
//! Every listener yields accepted connections that know their intended
//! target. Sources: the SOCKS5 handshake, a preconfigured tunnel target,
//! the OS redirect tables, and TPROXY's transparent local address.

pub mod redirect;

use crate::common::net::{configure_tcp_stream, listen_addr, Address};
use crate::common::socks::{self, Command};
use crate::outbound::PriorityDialer;
use crate::relay;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// How a listener learns each connection's destination.
#[derive(Debug, Clone)]
pub enum TargetSource {
    /// RFC 1928 handshake; `udp_addr` advertises the UDP relay when set.
    Socks { udp_addr: Option<SocketAddr> },
    /// Fixed target, no handshake.
    Tunnel { address: Address, port: u16 },
    /// Linux netfilter REDIRECT (`SO_ORIGINAL_DST`).
    Redirect { ipv6: bool },
    /// Linux TPROXY; the local address already is the destination.
    Tproxy,
    /// macOS PF `DIOCNATLOOK`.
    Pf,
}

/// A bound TCP listener plus its target source.
pub struct TcpInbound {
    listener: TcpListener,
    source: TargetSource,
    name: &'static str,
}

impl TcpInbound {
    pub async fn socks(addr: &str, udp_addr: Option<SocketAddr>) -> Result<Self> {
        Ok(TcpInbound {
            listener: TcpListener::bind(listen_addr(addr)).await?,
            source: TargetSource::Socks { udp_addr },
            name: "socks",
        })
    }

    pub async fn tunnel(addr: &str, target: &str) -> Result<Self> {
        let (address, port) = Address::parse(target)
            .ok_or_else(|| Error::config(format!("invalid tunnel target {:?}", target)))?;
        Ok(TcpInbound {
            listener: TcpListener::bind(listen_addr(addr)).await?,
            source: TargetSource::Tunnel { address, port },
            name: "tcptun",
        })
    }

    pub async fn redirect(addr: &str, ipv6: bool) -> Result<Self> {
        Ok(TcpInbound {
            listener: TcpListener::bind(listen_addr(addr)).await?,
            source: TargetSource::Redirect { ipv6 },
            name: if ipv6 { "redir6" } else { "redir" },
        })
    }

    pub async fn tproxy(addr: &str) -> Result<Self> {
        let sa: SocketAddr = listen_addr(addr)
            .parse()
            .map_err(|e| Error::config(format!("invalid tproxy address {:?}: {}", addr, e)))?;
        Ok(TcpInbound {
            listener: redirect::tproxy_listener(sa)?,
            source: TargetSource::Tproxy,
            name: "tproxy",
        })
    }

    pub async fn pf(addr: &str) -> Result<Self> {
        Ok(TcpInbound {
            listener: TcpListener::bind(listen_addr(addr)).await?,
            source: TargetSource::Pf,
            name: "pf",
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop: one handler task per connection. Accept errors are
    /// logged and the loop continues.
    pub async fn run(self, dialer: Arc<PriorityDialer>) -> Result<()> {
        info!("{} listening on {}", self.name, self.listener.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let source = self.source.clone();
                    let dialer = dialer.clone();
                    let name = self.name;
                    tokio::spawn(async move {
                        if let Err(e) = handle_conn(stream, source, dialer).await {
                            debug!("{} connection from {}: {}", name, peer, e);
                        }
                    });
                }
                Err(e) => error!("{} accept error: {}", self.name, e),
            }
        }
    }
}

async fn handle_conn(
    mut stream: TcpStream,
    source: TargetSource,
    dialer: Arc<PriorityDialer>,
) -> Result<()> {
    configure_tcp_stream(&stream);

    let (address, port) = match source {
        TargetSource::Socks { udp_addr } => {
            let hs = socks::handshake(&mut stream, udp_addr).await?;
            if hs.command == Command::UdpAssociate {
                // The UDP listener does the actual work; hold the control
                // connection open until the client goes away.
                let mut buf = [0u8; 64];
                while stream.read(&mut buf).await.map_or(false, |n| n > 0) {}
                return Ok(());
            }
            (hs.address, hs.port)
        }
        TargetSource::Tunnel { address, port } => (address, port),
        TargetSource::Redirect { ipv6 } => {
            let dst = redirect::original_dst(&stream, ipv6)?;
            (Address::from(dst), dst.port())
        }
        TargetSource::Tproxy => {
            let dst = stream.local_addr()?;
            (Address::from(dst), dst.port())
        }
        TargetSource::Pf => {
            let dst = redirect::nat_lookup(&stream)?;
            (Address::from(dst), dst.port())
        }
    };

    let peer = stream.peer_addr()?;
    let remote = dialer.dial(&address, port).await?;

    let (sent, received) = relay::relay(stream, remote).await?;
    debug!(
        "proxy {} <-> {} done (sent: {}, received: {})",
        peer,
        address.to_string_with_port(port),
        sent,
        received
    );
    Ok(())
}
