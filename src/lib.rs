//! Shadowgate - a Shadowsocks client and server
//!
//! The cryptographic core is the Shadowsocks framing layer: AEAD records
//! over TCP, self-contained AEAD datagrams over UDP, and the legacy
//! IV-prefixed stream ciphers. On top sit the relay state machines and the
//! listeners that feed them.
//!
//! # Architecture
//!
//! ```text
//!  +-----------+     +-----------+     +------------+
//!  | inbound/  | --> | outbound/ | --> |  relay/    |
//!  | (targets) |     | (dialer)  |     | (tcp, udp) |
//!  +-----------+     +-----+-----+     +-----+------+
//!                          |                 |
//!                    +-----v-----------------v----+
//!                    |          shadow/           |
//!                    | (AEAD / legacy framing)    |
//!                    +-------------+--------------+
//!                                  |
//!                          +-------v-------+
//!                          |    crypto/    |
//!                          | (registry/kdf)|
//!                          +---------------+
//! ```

pub mod client;
pub mod common;
pub mod config;
pub mod crypto;
pub mod inbound;
pub mod outbound;
pub mod plugin;
pub mod relay;
pub mod server;
pub mod shadow;

pub use common::{Address, Error, Result};
pub use config::Config;

use crate::crypto::Cipher;
use crate::inbound::TcpInbound;
use crate::outbound::PriorityDialer;
use std::future::Future;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{error, info};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bring up every configured service and run until SIGINT/SIGTERM (or
/// until the plugin dies, which exits with code 2).
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let mut plugin_handle = None;
    if config.server.is_empty() {
        start_client(&config, &mut plugin_handle).await?;
    } else {
        start_server(&config, &mut plugin_handle).await?;
    }

    wait_for_shutdown(plugin_handle).await
}

fn spawn_service<F>(name: &'static str, fut: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            error!("{} service failed: {}", name, e);
        }
    });
}

async fn start_client(config: &Config, plugin_handle: &mut Option<plugin::Plugin>) -> Result<()> {
    let mut endpoints = config.client.clone();

    // UDP bypasses the plugin: SIP003 covers the TCP transport only.
    let udp_server = endpoints[0].addr.clone();

    if let Some(name) = &config.plugin {
        let (new_addr, handle) =
            plugin::start(name, &config.plugin_opts, &endpoints[0].addr, false).await?;
        endpoints[0].addr = new_addr;
        *plugin_handle = Some(handle);
    }

    let mut servers = Vec::with_capacity(endpoints.len());
    for ep in &endpoints {
        let cipher = Arc::new(Cipher::pick(&ep.cipher, &ep.key, &ep.password)?);
        servers.push((ep.addr.clone(), cipher));
    }
    let udp_cipher = servers[0].1.clone();
    let dialer = PriorityDialer::new(servers);

    for (laddr, target) in config.udp_tun.clone() {
        let cipher = udp_cipher.clone();
        let server = udp_server.clone();
        let timeout = config.udp_timeout;
        spawn_service("udptun", async move {
            client::udp_tunnel(&laddr, &server, &target, cipher, timeout).await
        });
    }

    for (laddr, target) in config.tcp_tun.clone() {
        let inbound = TcpInbound::tunnel(&laddr, &target).await?;
        info!("TCP tunnel {} -> {}", laddr, target);
        spawn_service("tcptun", inbound.run(dialer.clone()));
    }

    if let Some(socks_addr) = config.socks.clone() {
        let udp_addr = if config.udp {
            let socket = UdpSocket::bind(common::net::listen_addr(&socks_addr)).await?;
            let local = socket.local_addr()?;
            let cipher = udp_cipher.clone();
            let server = udp_server.clone();
            let timeout = config.udp_timeout;
            spawn_service("socks-udp", async move {
                client::udp_socks(socket, &server, cipher, timeout).await
            });
            Some(local)
        } else {
            None
        };
        let inbound = TcpInbound::socks(&socks_addr, udp_addr).await?;
        spawn_service("socks", inbound.run(dialer.clone()));
    }

    if let Some(addr) = &config.redir {
        let inbound = TcpInbound::redirect(addr, false).await?;
        spawn_service("redir", inbound.run(dialer.clone()));
    }

    if let Some(addr) = &config.redir6 {
        let inbound = TcpInbound::redirect(addr, true).await?;
        spawn_service("redir6", inbound.run(dialer.clone()));
    }

    if let Some(addr) = &config.tproxy_tcp {
        let inbound = TcpInbound::tproxy(addr).await?;
        spawn_service("tproxy", inbound.run(dialer.clone()));
    }

    Ok(())
}

async fn start_server(config: &Config, plugin_handle: &mut Option<plugin::Plugin>) -> Result<()> {
    for (i, ep) in config.server.iter().enumerate() {
        let cipher = Arc::new(Cipher::pick(&ep.cipher, &ep.key, &ep.password)?.with_replay_filter());

        let mut tcp_addr = ep.addr.clone();
        if i == 0 {
            if let Some(name) = &config.plugin {
                let (new_addr, handle) =
                    plugin::start(name, &config.plugin_opts, &ep.addr, true).await?;
                tcp_addr = new_addr;
                *plugin_handle = Some(handle);
            }
        }

        if config.udp {
            let addr = ep.addr.clone();
            let cipher = cipher.clone();
            let timeout = config.udp_timeout;
            spawn_service("udp-remote", async move {
                server::udp_remote(&addr, cipher, timeout).await
            });
        }

        spawn_service("tcp-remote", async move {
            server::tcp_remote(&tcp_addr, cipher).await
        });
    }

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn wait_for_shutdown(mut plugin: Option<plugin::Plugin>) -> Result<()> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    match &mut plugin {
        Some(p) => {
            tokio::select! {
                _ = &mut shutdown => {}
                status = p.wait() => {
                    error!("plugin exited ({:?})", status);
                    std::process::exit(2);
                }
            }
        }
        None => shutdown.await,
    }

    info!("received shutdown signal");
    if let Some(p) = plugin {
        p.shutdown().await;
    }
    Ok(())
}
