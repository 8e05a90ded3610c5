//! Bidirectional TCP relay

use crate::{Error, Result};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const COPY_BUF_SIZE: usize = 16 * 1024;

/// Copy between `a` and `b` in both directions until both terminate.
/// Returns bytes copied a→b and b→a.
///
/// When one direction hits EOF its peer's write side is shut down (TCP
/// half-close) so the opposite pending read observes EOF instead of
/// blocking. A failed direction cancels the other promptly. Timeout-class
/// errors count as normal completion; the first real error is reported.
pub async fn relay<A, B>(a: A, b: B) -> Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Send + Unpin,
    B: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (mut ar, mut aw) = tokio::io::split(a);
    let (mut br, mut bw) = tokio::io::split(b);

    let a_to_b = copy_half(&mut ar, &mut bw);
    let b_to_a = copy_half(&mut br, &mut aw);

    let (up, down) = tokio::try_join!(a_to_b, b_to_a).map_err(Error::Io)?;
    Ok((up, down))
}

/// Copy src to dst until EOF or error, then half-close dst.
async fn copy_half<R, W>(src: &mut R, dst: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut copied = 0u64;

    let result = loop {
        match src.read(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => {
                if let Err(e) = dst.write_all(&buf[..n]).await {
                    break Err(e);
                }
                copied += n as u64;
            }
            Err(e) => break Err(e),
        }
    };

    // Wake the peer direction: it sees EOF on its next read.
    let _ = dst.shutdown().await;

    match result {
        Ok(()) => Ok(copied),
        Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(copied),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    // One side writes 1 MB then half-closes; the other echoes everything
    // back. The relay must terminate cleanly with matching byte counts.
    #[tokio::test]
    async fn test_echo_with_half_close() {
        let (l_near, l_far) = duplex(64 * 1024);
        let (r_near, r_far) = duplex(64 * 1024);

        const TOTAL: usize = 1_000_000;

        let writer = tokio::spawn(async move {
            let (mut rd, mut wr) = tokio::io::split(l_far);
            let send = async {
                let chunk = vec![0xABu8; 8192];
                let mut left = TOTAL;
                while left > 0 {
                    let n = left.min(chunk.len());
                    wr.write_all(&chunk[..n]).await.unwrap();
                    left -= n;
                }
                wr.shutdown().await.unwrap();
            };
            let recv = async {
                let mut buf = vec![0u8; 8192];
                let mut got = 0usize;
                loop {
                    let n = rd.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    got += n;
                }
                got
            };
            let ((), got) = tokio::join!(send, recv);
            got
        });

        let echo = tokio::spawn(async move {
            let (mut rd, mut wr) = tokio::io::split(r_far);
            let mut buf = vec![0u8; 8192];
            loop {
                let n = rd.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                wr.write_all(&buf[..n]).await.unwrap();
            }
            wr.shutdown().await.unwrap();
        });

        let (sent, received) = relay(l_near, r_near).await.unwrap();
        assert_eq!(sent, TOTAL as u64);
        assert_eq!(received, TOTAL as u64);

        assert_eq!(writer.await.unwrap(), TOTAL);
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_immediate_eof_both_sides() {
        let (l_near, l_far) = duplex(1024);
        let (r_near, r_far) = duplex(1024);
        drop(l_far);
        drop(r_far);

        let (sent, received) = relay(l_near, r_near).await.unwrap();
        assert_eq!(sent, 0);
        assert_eq!(received, 0);
    }
}
