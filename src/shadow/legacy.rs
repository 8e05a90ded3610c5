//! Legacy IV-prefixed stream-cipher framing
//!
//! `iv ‖ XOR_keystream(payload…)` with no authentication or length hiding.
//! Preserved for interoperability with pre-AEAD peers only; do not deploy
//! for anything that needs integrity.

use crate::crypto::{stream, Cipher, StreamCrypter};
use crate::relay::Datagram;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use rand::rngs::OsRng;
use rand::RngCore;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UdpSocket;
use tracing::debug;

const WRITE_CHUNK: usize = 32 * 1024;

/// A stream-cipher protected stream wrapping `S`.
pub struct LegacyStream<S> {
    inner: S,
    cipher: Arc<Cipher>,

    dec: Option<StreamCrypter>,
    iv_buf: BytesMut,
    pending: BytesMut,

    enc: Option<StreamCrypter>,
    out: BytesMut,
}

impl<S> LegacyStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(inner: S, cipher: Arc<Cipher>) -> Self {
        LegacyStream {
            inner,
            cipher,
            dec: None,
            iv_buf: BytesMut::new(),
            pending: BytesMut::new(),
            enc: None,
            out: BytesMut::new(),
        }
    }

    fn poll_flush_out(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.out.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.out))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write zero",
                )));
            }
            self.out.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<S> AsyncRead for LegacyStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending.split_to(n));
                return Poll::Ready(Ok(()));
            }

            let mut chunk = [0u8; 8 * 1024];
            let mut read_buf = ReadBuf::new(&mut chunk);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read_buf))?;
            let filled = read_buf.filled();
            if filled.is_empty() {
                return if this.dec.is_none() && !this.iv_buf.is_empty() {
                    Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "truncated IV",
                    )))
                } else {
                    Poll::Ready(Ok(()))
                };
            }

            match &mut this.dec {
                Some(dec) => {
                    let mut data = filled.to_vec();
                    dec.apply(&mut data);
                    this.pending.extend_from_slice(&data);
                }
                None => {
                    this.iv_buf.extend_from_slice(filled);
                    let iv_size = this.cipher.kind().iv_size();
                    if this.iv_buf.len() < iv_size {
                        continue;
                    }
                    let iv = this.iv_buf.split_to(iv_size);
                    let mut dec =
                        stream::decrypter(this.cipher.kind(), this.cipher.key(), &iv)?;
                    let mut rest = this.iv_buf.split();
                    if !rest.is_empty() {
                        dec.apply(&mut rest);
                        this.pending.extend_from_slice(&rest);
                    }
                    this.dec = Some(dec);
                }
            }
        }
    }
}

impl<S> AsyncWrite for LegacyStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_flush_out(cx))?;

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        if this.enc.is_none() {
            let kind = this.cipher.kind();
            let mut iv = vec![0u8; kind.iv_size()];
            OsRng.fill_bytes(&mut iv);
            this.enc = Some(stream::encrypter(kind, this.cipher.key(), &iv)?);
            this.out.extend_from_slice(&iv);
        }

        let chunk = &buf[..buf.len().min(WRITE_CHUNK)];
        let mut data = chunk.to_vec();
        if let Some(enc) = &mut this.enc {
            enc.apply(&mut data);
        }
        this.out.extend_from_slice(&data);

        let _ = this.poll_flush_out(cx)?;
        Poll::Ready(Ok(chunk.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_flush_out(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_flush_out(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

/// Encrypt one datagram payload: fresh IV then keystream.
pub fn seal_legacy_packet(cipher: &Cipher, payload: &[u8]) -> Result<Vec<u8>> {
    let kind = cipher.kind();
    let mut out = vec![0u8; kind.iv_size() + payload.len()];
    let (iv, body) = out.split_at_mut(kind.iv_size());
    OsRng.fill_bytes(iv);
    body.copy_from_slice(payload);
    stream::encrypter(kind, cipher.key(), iv)?.apply(body);
    Ok(out)
}

/// Decrypt one datagram.
pub fn open_legacy_packet(cipher: &Cipher, packet: &[u8]) -> Result<Vec<u8>> {
    let kind = cipher.kind();
    if packet.len() < kind.iv_size() {
        return Err(Error::ShortPacket);
    }
    let (iv, body) = packet.split_at(kind.iv_size());
    let mut plain = body.to_vec();
    stream::decrypter(kind, cipher.key(), iv)?.apply(&mut plain);
    Ok(plain)
}

/// A UDP socket speaking the legacy packet framing.
pub struct LegacyUdp {
    socket: UdpSocket,
    cipher: Arc<Cipher>,
}

impl LegacyUdp {
    pub fn new(socket: UdpSocket, cipher: Arc<Cipher>) -> Self {
        LegacyUdp { socket, cipher }
    }
}

#[async_trait]
impl Datagram for LegacyUdp {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let packet = seal_legacy_packet(&self.cipher, buf).map_err(io::Error::from)?;
        self.socket.send_to(&packet, addr).await?;
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut raw = vec![0u8; crate::relay::UDP_BUF_SIZE];
        loop {
            let (n, addr) = self.socket.recv_from(&mut raw).await?;
            match open_legacy_packet(&self.cipher, &raw[..n]) {
                Ok(plain) => {
                    if plain.len() > buf.len() {
                        return Err(io::Error::from(Error::ShortBuffer));
                    }
                    buf[..plain.len()].copy_from_slice(&plain);
                    return Ok((plain.len(), addr));
                }
                Err(e) => debug!("dropping UDP packet from {}: {}", addr, e),
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherKind;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn cipher(kind: CipherKind) -> Arc<Cipher> {
        Arc::new(Cipher::pick(kind.name(), &[], "legacy-pass").unwrap())
    }

    #[tokio::test]
    async fn test_stream_round_trip_all_kinds() {
        for kind in [
            CipherKind::Aes128Ctr,
            CipherKind::Aes192Ctr,
            CipherKind::Aes256Ctr,
            CipherKind::Aes128Cfb,
            CipherKind::Aes192Cfb,
            CipherKind::Aes256Cfb,
            CipherKind::Chacha20Ietf,
        ] {
            let c = cipher(kind);
            let (a, b) = duplex(256 * 1024);
            let mut tx = LegacyStream::new(a, c.clone());
            let mut rx = LegacyStream::new(b, c);

            let payload = vec![0x3Cu8; 50_000];
            let expected = payload.clone();

            let writer = tokio::spawn(async move {
                tx.write_all(&payload).await.unwrap();
                tx.shutdown().await.unwrap();
            });

            let mut got = Vec::new();
            rx.read_to_end(&mut got).await.unwrap();
            assert_eq!(got, expected, "{} round trip", kind);
            writer.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_wire_is_iv_prefixed() {
        let c = cipher(CipherKind::Aes256Ctr);
        let (a, mut b) = duplex(4096);
        let mut tx = LegacyStream::new(a, c.clone());
        tx.write_all(b"hello").await.unwrap();
        tx.shutdown().await.unwrap();
        drop(tx);

        let mut wire = Vec::new();
        b.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire.len(), c.kind().iv_size() + 5);
        // Keystream output must not leak the plaintext.
        assert_ne!(&wire[c.kind().iv_size()..], b"hello");
    }

    #[tokio::test]
    async fn test_truncated_iv_is_error() {
        let c = cipher(CipherKind::Aes128Ctr);
        let (a, mut b) = duplex(4096);
        let mut rx = LegacyStream::new(a, c);
        b.write_all(&[0u8; 7]).await.unwrap();
        drop(b);

        let mut got = Vec::new();
        let err = rx.read_to_end(&mut got).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_packet_round_trip() {
        let c = cipher(CipherKind::Chacha20Ietf);
        let packet = seal_legacy_packet(&c, b"datagram").unwrap();
        assert_eq!(packet.len(), c.kind().iv_size() + 8);
        assert_eq!(open_legacy_packet(&c, &packet).unwrap(), b"datagram");
    }

    #[test]
    fn test_packet_too_short() {
        let c = cipher(CipherKind::Aes128Cfb);
        assert!(matches!(
            open_legacy_packet(&c, &[0u8; 15]),
            Err(Error::ShortPacket)
        ));
    }
}
