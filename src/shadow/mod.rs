//! Shadowsocks framing layers: AEAD stream/packet, legacy stream cipher,
//! and the replay salt filter.

pub mod legacy;
pub mod packet;
pub mod replay;
pub mod stream;

pub use legacy::{open_legacy_packet, seal_legacy_packet, LegacyStream, LegacyUdp};
pub use packet::{open_packet, seal_packet, ShadowUdp};
pub use replay::SaltFilter;
pub use stream::{ShadowStream, MAX_PAYLOAD};

use crate::crypto::Cipher;
use crate::relay::Datagram;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UdpSocket;

/// A wrapped connection: whatever the cipher produced.
pub trait ProxyStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ProxyStream for T {}

/// Apply the cipher's stream protocol to a connection. `dummy` passes the
/// connection through untouched.
pub fn wrap_stream<S>(stream: S, cipher: &Arc<Cipher>) -> Box<dyn ProxyStream>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let kind = cipher.kind();
    if kind.is_aead() {
        Box::new(ShadowStream::new(stream, cipher.clone()))
    } else if kind.is_stream() {
        Box::new(LegacyStream::new(stream, cipher.clone()))
    } else {
        Box::new(stream)
    }
}

/// Apply the cipher's packet protocol to a UDP socket.
pub fn wrap_datagram(socket: UdpSocket, cipher: &Arc<Cipher>) -> Arc<dyn Datagram> {
    let kind = cipher.kind();
    if kind.is_aead() {
        Arc::new(ShadowUdp::new(socket, cipher.clone()))
    } else if kind.is_stream() {
        Arc::new(LegacyUdp::new(socket, cipher.clone()))
    } else {
        Arc::new(socket)
    }
}
