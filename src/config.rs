//! Runtime configuration assembled from CLI flags and `ss://` URLs

use crate::crypto::CipherKind;
use crate::{Error, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use std::time::Duration;
use url::Url;

/// One Shadowsocks endpoint: where, and with what cipher credentials.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub addr: String,
    pub cipher: String,
    pub password: String,
    pub key: Vec<u8>,
}

impl Endpoint {
    /// Accepts `ss://cipher:password@host:port` or a bare `host:port`
    /// combined with the discrete flags.
    pub fn parse(s: &str, cipher: &str, password: &str, key: &[u8]) -> Result<Endpoint> {
        if let Some(rest) = s.strip_prefix("ss://") {
            let url = Url::parse(&format!("ss://{}", rest))
                .map_err(|e| Error::parse(format!("invalid server URL {:?}: {}", s, e)))?;
            // Server listen URLs may leave the host empty (ss://…@:8488).
            let host = url.host_str().unwrap_or("");
            let port = url
                .port()
                .ok_or_else(|| Error::parse(format!("server URL {:?} missing port", s)))?;
            let url_cipher = url.username();
            return Ok(Endpoint {
                addr: format!("{}:{}", host, port),
                cipher: if url_cipher.is_empty() {
                    cipher.to_string()
                } else {
                    url_cipher.to_string()
                },
                password: url.password().unwrap_or(password).to_string(),
                key: key.to_vec(),
            });
        }
        Ok(Endpoint {
            addr: s.to_string(),
            cipher: cipher.to_string(),
            password: password.to_string(),
            key: key.to_vec(),
        })
    }
}

/// Full process configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub verbose: bool,
    pub udp: bool,
    pub udp_timeout: Duration,
    pub client: Vec<Endpoint>,
    pub server: Vec<Endpoint>,
    pub socks: Option<String>,
    pub redir: Option<String>,
    pub redir6: Option<String>,
    pub tproxy_tcp: Option<String>,
    pub tcp_tun: Vec<(String, String)>,
    pub udp_tun: Vec<(String, String)>,
    pub plugin: Option<String>,
    pub plugin_opts: String,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.client.is_empty() && self.server.is_empty() {
            return Err(Error::config("need at least one of -c or -s"));
        }
        for ep in self.client.iter().chain(self.server.iter()) {
            let kind = CipherKind::try_from(ep.cipher.as_str())?;
            if kind == CipherKind::Dummy {
                return Err(Error::config(
                    "the dummy cipher is a test fixture and cannot be used in production",
                ));
            }
            if ep.key.is_empty() && ep.password.is_empty() {
                return Err(Error::config(format!(
                    "server {:?} has neither password nor key",
                    ep.addr
                )));
            }
        }
        if !self.client.is_empty() && !self.server.is_empty() {
            return Err(Error::config("client and server modes are exclusive"));
        }
        Ok(())
    }
}

/// Decode a `-key` argument (URL-safe base64).
pub fn decode_key(s: &str) -> Result<Vec<u8>> {
    URL_SAFE
        .decode(s)
        .map_err(|e| Error::parse(format!("invalid base64 key: {}", e)))
}

/// Encode freshly generated key bytes for `-keygen`.
pub fn encode_key(key: &[u8]) -> String {
    URL_SAFE.encode(key)
}

/// Parse `120s` / `2m` / `1h` / plain seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (value, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let value: u64 = value
        .parse()
        .map_err(|_| Error::parse(format!("invalid duration {:?}", s)))?;
    let secs = match unit {
        "s" | "" => value,
        "m" => value * 60,
        "h" => value * 3600,
        _ => return Err(Error::parse(format!("invalid duration {:?}", s))),
    };
    Ok(Duration::from_secs(secs))
}

/// Parse `laddr1=raddr1,laddr2=raddr2,...`
pub fn parse_pairs(s: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for item in s.split(',') {
        let (l, r) = item
            .split_once('=')
            .ok_or_else(|| Error::parse(format!("invalid tunnel pair {:?}", item)))?;
        pairs.push((l.to_string(), r.to_string()));
    }
    Ok(pairs)
}
