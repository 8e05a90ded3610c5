//! Latency-ranked multi-server dialer
//!
//! Each candidate server carries a smoothed dial latency, its last dial
//! time, and an inflight counter, all plain atomics updated with relaxed
//! ordering. A dial picks the current minimum-latency server from a
//! snapshot and opportunistically probes the others in the background.

use crate::common::net::{configure_tcp_stream, Address};
use crate::crypto::Cipher;
use crate::shadow::{self, ProxyStream};
use crate::{Error, Result};
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, trace};

const EWMA_WEIGHT: i64 = 4;
/// Dial timeout; also the latency penalty recorded for a failed dial.
const DIAL_TIMEOUT: Duration = Duration::from_secs(2);
/// Minimum age before a non-best server is probed again.
const PROBE_COOLDOWN: Duration = Duration::from_secs(10);

/// Exponentially weighted moving average, 4:1 toward history.
fn smooth(old: i64, measured: i64) -> i64 {
    if old > 0 {
        (EWMA_WEIGHT * old + measured) / (EWMA_WEIGHT + 1)
    } else {
        measured
    }
}

/// One candidate Shadowsocks server.
pub struct Server {
    addr: String,
    cipher: Arc<Cipher>,
    latency: AtomicI64,
    last: AtomicI64,
    inflight: AtomicI32,
}

impl Server {
    fn new(addr: String, cipher: Arc<Cipher>) -> Arc<Self> {
        Arc::new(Server {
            addr,
            cipher,
            latency: AtomicI64::new(0),
            last: AtomicI64::new(0),
            inflight: AtomicI32::new(0),
        })
    }

    /// Dial the server, folding the measured (or penalized) dial time into
    /// the latency average.
    async fn dial(&self, epoch: Instant) -> Result<TcpStream> {
        self.inflight.fetch_add(1, Ordering::Relaxed);
        let t0 = Instant::now();
        self.last
            .store(t0.duration_since(epoch).as_nanos() as i64, Ordering::Relaxed);

        let result = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&self.addr)).await;

        let measured = match &result {
            Ok(Ok(_)) => t0.elapsed(),
            _ => DIAL_TIMEOUT,
        };
        let old = self.latency.load(Ordering::Relaxed);
        let new = smooth(old, measured.as_nanos() as i64);
        self.latency.store(new, Ordering::Relaxed);
        self.inflight.fetch_sub(1, Ordering::Relaxed);
        trace!("probe {} [{} ms]", self.addr, new / 1_000_000);

        match result {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(Error::connection(format!(
                "failed to connect to {}: {}",
                self.addr, e
            ))),
            Err(_) => Err(Error::timeout(format!("dial {} timed out", self.addr))),
        }
    }
}

/// Multi-server dialer returning shadowed connections to the currently
/// fastest server.
pub struct PriorityDialer {
    servers: Vec<Arc<Server>>,
    epoch: Instant,
    cooldown: Duration,
}

impl PriorityDialer {
    pub fn new(servers: Vec<(String, Arc<Cipher>)>) -> Arc<Self> {
        let servers = servers
            .into_iter()
            .map(|(addr, cipher)| Server::new(addr, cipher))
            .collect();
        Arc::new(PriorityDialer {
            servers,
            epoch: Instant::now(),
            cooldown: PROBE_COOLDOWN,
        })
    }

    /// Index of the minimum positive latency; falls back to the first
    /// server while nothing has been measured. Snapshot-based, staleness is
    /// acceptable.
    fn best_index(&self) -> usize {
        let mut best = 0;
        let mut min = i64::MAX;
        for (i, s) in self.servers.iter().enumerate() {
            let l = s.latency.load(Ordering::Relaxed);
            if l > 0 && l < min {
                best = i;
                min = l;
            }
        }
        best
    }

    fn probe_due(&self, server: &Server) -> bool {
        if server.inflight.load(Ordering::Relaxed) > 0 {
            return false;
        }
        let last = server.last.load(Ordering::Relaxed);
        if last == 0 {
            return true;
        }
        self.epoch.elapsed().as_nanos() as i64 - last >= self.cooldown.as_nanos() as i64
    }

    fn spawn_probes(&self, best: usize) {
        for (i, server) in self.servers.iter().enumerate() {
            if i == best || !self.probe_due(server) {
                continue;
            }
            let server = server.clone();
            let epoch = self.epoch;
            tokio::spawn(async move {
                if let Ok(conn) = server.dial(epoch).await {
                    drop(conn);
                }
            });
        }
    }

    /// Open a shadowed connection to `target` through the best server. The
    /// destination header is written before the connection is handed back.
    pub async fn dial(&self, target: &Address, port: u16) -> Result<Box<dyn ProxyStream>> {
        let best = self.best_index();
        self.spawn_probes(best);

        let server = &self.servers[best];
        debug!(
            "dialing {} via {}",
            target.to_string_with_port(port),
            server.addr
        );

        let stream = server.dial(self.epoch).await?;
        configure_tcp_stream(&stream);

        let mut conn = shadow::wrap_stream(stream, &server.cipher);
        conn.write_all(&target.to_bytes(port)).await?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> Arc<Cipher> {
        Arc::new(Cipher::pick("aes-128-gcm", &[], "pw").unwrap())
    }

    #[test]
    fn test_smooth_first_measurement_taken_verbatim() {
        assert_eq!(smooth(0, 1_000), 1_000);
    }

    #[test]
    fn test_smooth_weighted_history() {
        // (4 * 1000 + 6000) / 5
        assert_eq!(smooth(1_000, 6_000), 2_000);
        // History dominates a single outlier.
        assert!(smooth(1_000, 100_000) < 100_000 / 4);
    }

    #[tokio::test]
    async fn test_best_index_prefers_lowest_positive() {
        let d = PriorityDialer::new(vec![
            ("127.0.0.1:1".to_string(), test_cipher()),
            ("127.0.0.1:2".to_string(), test_cipher()),
            ("127.0.0.1:3".to_string(), test_cipher()),
        ]);
        d.servers[0].latency.store(5_000, Ordering::Relaxed);
        d.servers[1].latency.store(3_000, Ordering::Relaxed);
        d.servers[2].latency.store(0, Ordering::Relaxed); // unprobed
        assert_eq!(d.best_index(), 1);
    }

    #[tokio::test]
    async fn test_best_index_unprobed_falls_back_to_first() {
        let d = PriorityDialer::new(vec![
            ("127.0.0.1:1".to_string(), test_cipher()),
            ("127.0.0.1:2".to_string(), test_cipher()),
        ]);
        assert_eq!(d.best_index(), 0);
    }

    #[tokio::test]
    async fn test_probe_due_respects_cooldown_and_inflight() {
        let d = PriorityDialer::new(vec![("127.0.0.1:1".to_string(), test_cipher())]);
        let s = &d.servers[0];

        // Never dialed: due.
        assert!(d.probe_due(s));

        // Just dialed: inside the cooldown window.
        s.last
            .store(d.epoch.elapsed().as_nanos() as i64, Ordering::Relaxed);
        assert!(!d.probe_due(s));

        // Probe already running: never due.
        s.last.store(1, Ordering::Relaxed);
        s.inflight.store(1, Ordering::Relaxed);
        assert!(!d.probe_due(s));
    }
}
