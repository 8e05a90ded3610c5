//! AEAD packet framing for datagrams
//!
//! Each packet is self-contained: `salt ‖ sealed(payload, nonce = 0)`. The
//! salt feeds HKDF, so the all-zero nonce is unique per packet.

use crate::crypto::{derive_subkey, AeadCipher, Cipher};
use crate::relay::Datagram;
use crate::{Error, Result};
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::debug;

/// Encrypt one datagram payload.
pub fn seal_packet(cipher: &Cipher, payload: &[u8]) -> Result<Vec<u8>> {
    let kind = cipher.kind();
    let mut salt = vec![0u8; kind.salt_size()];
    OsRng.fill_bytes(&mut salt);

    let subkey = derive_subkey(cipher.key(), &salt);
    let aead = AeadCipher::new(kind, &subkey)?;
    let nonce = vec![0u8; kind.nonce_size()];
    let sealed = aead.seal(&nonce, payload)?;

    let mut out = Vec::with_capacity(salt.len() + sealed.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt and authenticate one datagram.
pub fn open_packet(cipher: &Cipher, packet: &[u8]) -> Result<Vec<u8>> {
    let kind = cipher.kind();
    if packet.len() < kind.salt_size() + kind.tag_size() {
        return Err(Error::ShortPacket);
    }

    let (salt, sealed) = packet.split_at(kind.salt_size());
    if let Some(filter) = cipher.replay_filter() {
        if !filter.observe(salt) {
            return Err(Error::Replay);
        }
    }

    let subkey = derive_subkey(cipher.key(), salt);
    let aead = AeadCipher::new(kind, &subkey)?;
    let nonce = vec![0u8; kind.nonce_size()];
    aead.open(&nonce, sealed)
}

/// A UDP socket speaking the AEAD packet protocol.
pub struct ShadowUdp {
    socket: UdpSocket,
    cipher: Arc<Cipher>,
}

impl ShadowUdp {
    pub fn new(socket: UdpSocket, cipher: Arc<Cipher>) -> Self {
        ShadowUdp { socket, cipher }
    }
}

#[async_trait]
impl Datagram for ShadowUdp {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let packet = seal_packet(&self.cipher, buf).map_err(io::Error::from)?;
        self.socket.send_to(&packet, addr).await?;
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut raw = vec![0u8; crate::relay::UDP_BUF_SIZE];
        loop {
            let (n, addr) = self.socket.recv_from(&mut raw).await?;
            match open_packet(&self.cipher, &raw[..n]) {
                Ok(plain) => {
                    if plain.len() > buf.len() {
                        return Err(io::Error::from(Error::ShortBuffer));
                    }
                    buf[..plain.len()].copy_from_slice(&plain);
                    return Ok((plain.len(), addr));
                }
                // Undecryptable datagrams are dropped, not fatal.
                Err(e) => debug!("dropping UDP packet from {}: {}", addr, e),
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
