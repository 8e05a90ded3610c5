//! AEAD record framing over a byte stream
//!
//! Wire layout: `salt ‖ (sealed_len ‖ sealed_payload)*`. The salt is emitted
//! (or consumed) lazily on first use of each direction; each seal/open
//! advances that direction's little-endian nonce.

use crate::crypto::{derive_subkey, increment_nonce, AeadCipher, Cipher};
use crate::Error;
use bytes::{Buf, BytesMut};
use rand::rngs::OsRng;
use rand::RngCore;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Maximum payload bytes per record; the length word's high two bits are
/// reserved and zero.
pub const MAX_PAYLOAD: usize = 0x3FFF;

enum ReadState {
    Salt,
    Length,
    Data(usize),
}

/// An AEAD-protected stream wrapping `S`.
pub struct ShadowStream<S> {
    inner: S,
    cipher: Arc<Cipher>,

    // Read direction
    read_cipher: Option<AeadCipher>,
    read_nonce: Vec<u8>,
    read_state: ReadState,
    read_buf: BytesMut,
    payload: BytesMut,
    read_eof: bool,

    // Write direction
    write_cipher: Option<AeadCipher>,
    write_nonce: Vec<u8>,
    out: BytesMut,
}

impl<S> ShadowStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(inner: S, cipher: Arc<Cipher>) -> Self {
        let nonce_size = cipher.kind().nonce_size();
        ShadowStream {
            inner,
            cipher,
            read_cipher: None,
            read_nonce: vec![0u8; nonce_size],
            read_state: ReadState::Salt,
            read_buf: BytesMut::with_capacity(4096),
            payload: BytesMut::new(),
            read_eof: false,
            write_cipher: None,
            write_nonce: vec![0u8; nonce_size],
            out: BytesMut::new(),
        }
    }

    /// Decrypt every complete record currently buffered.
    fn advance_read(&mut self) -> io::Result<()> {
        let kind = self.cipher.kind();
        let tag = kind.tag_size();

        loop {
            match self.read_state {
                ReadState::Salt => {
                    let salt_size = kind.salt_size();
                    if self.read_buf.len() < salt_size {
                        return Ok(());
                    }
                    let salt = self.read_buf.split_to(salt_size);
                    if let Some(filter) = self.cipher.replay_filter() {
                        if !filter.observe(&salt) {
                            return Err(Error::Replay.into());
                        }
                    }
                    let subkey = derive_subkey(self.cipher.key(), &salt);
                    self.read_cipher = Some(AeadCipher::new(kind, &subkey)?);
                    self.read_state = ReadState::Length;
                }
                ReadState::Length => {
                    if self.read_buf.len() < 2 + tag {
                        return Ok(());
                    }
                    let sealed = self.read_buf.split_to(2 + tag);
                    let cipher = self
                        .read_cipher
                        .as_ref()
                        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "cipher not ready"))?;
                    let len_bytes = cipher.open(&self.read_nonce, &sealed)?;
                    increment_nonce(&mut self.read_nonce);
                    let len = (((len_bytes[0] as usize) << 8) | len_bytes[1] as usize) & MAX_PAYLOAD;
                    self.read_state = ReadState::Data(len);
                }
                ReadState::Data(len) => {
                    if self.read_buf.len() < len + tag {
                        return Ok(());
                    }
                    let sealed = self.read_buf.split_to(len + tag);
                    let cipher = self
                        .read_cipher
                        .as_ref()
                        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "cipher not ready"))?;
                    let plain = cipher.open(&self.read_nonce, &sealed)?;
                    increment_nonce(&mut self.read_nonce);
                    self.payload.extend_from_slice(&plain);
                    self.read_state = ReadState::Length;
                    if !self.payload.is_empty() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Seal one record (≤ MAX_PAYLOAD bytes) into the output buffer,
    /// emitting the session salt first if this is the first write.
    fn seal_record(&mut self, chunk: &[u8]) -> io::Result<()> {
        debug_assert!(chunk.len() <= MAX_PAYLOAD);
        let kind = self.cipher.kind();

        if self.write_cipher.is_none() {
            let mut salt = vec![0u8; kind.salt_size()];
            OsRng.fill_bytes(&mut salt);
            let subkey = derive_subkey(self.cipher.key(), &salt);
            self.write_cipher = Some(AeadCipher::new(kind, &subkey)?);
            self.out
                .reserve(kind.salt_size() + 2 + kind.tag_size() + MAX_PAYLOAD + kind.tag_size());
            self.out.extend_from_slice(&salt);
        }

        let cipher = self
            .write_cipher
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "cipher not ready"))?;

        let len_bytes = (chunk.len() as u16).to_be_bytes();
        let sealed_len = cipher.seal(&self.write_nonce, &len_bytes)?;
        increment_nonce(&mut self.write_nonce);
        let sealed_payload = cipher.seal(&self.write_nonce, chunk)?;
        increment_nonce(&mut self.write_nonce);

        self.out.extend_from_slice(&sealed_len);
        self.out.extend_from_slice(&sealed_payload);
        Ok(())
    }

    /// Push pending ciphertext into the inner stream.
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

impl<S> AsyncRead for ShadowStream<S>
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
            // Leftover plaintext from a previous record goes out first.
            if !this.payload.is_empty() {
                let n = this.payload.len().min(buf.remaining());
                buf.put_slice(&this.payload.split_to(n));
                return Poll::Ready(Ok(()));
            }

            this.advance_read()?;
            if !this.payload.is_empty() {
                continue;
            }

            if this.read_eof {
                // EOF on a record boundary is a clean end of stream;
                // anything else is truncation.
                let clean = this.read_buf.is_empty()
                    && matches!(this.read_state, ReadState::Salt | ReadState::Length);
                return if clean {
                    Poll::Ready(Ok(()))
                } else {
                    Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "truncated record",
                    )))
                };
            }

            let mut chunk = [0u8; 8 * 1024];
            let mut read_buf = ReadBuf::new(&mut chunk);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read_buf))?;
            let filled = read_buf.filled();
            if filled.is_empty() {
                this.read_eof = true;
            } else {
                this.read_buf.extend_from_slice(filled);
            }
        }
    }
}

impl<S> AsyncWrite for ShadowStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        // A previous record may still be in flight; never tear one.
        ready!(this.poll_flush_out(cx))?;

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let chunk = &buf[..buf.len().min(MAX_PAYLOAD)];
        this.seal_record(chunk)?;
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
