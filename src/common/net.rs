//! Network utilities and the SOCKS5 address codec

use crate::{Error, Result};
use socket2::SockRef;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

/// SOCKS5 address types as defined in RFC 1928 section 5.
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// Maximum size of a serialized SOCKS5 address in bytes.
pub const MAX_ADDR_LEN: usize = 1 + 1 + 255 + 2;

/// Expand Go-style listen addresses: `:8488` means every interface.
pub fn listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
}

/// SOCKS5 address (without the trailing port)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 address
    Ipv4(Ipv4Addr),
    /// IPv6 address
    Ipv6(Ipv6Addr),
    /// Domain name
    Domain(String),
}

impl Address {
    /// Read an address and port in SOCKS5 wire format. Reads exactly one
    /// ATYP byte, then the minimum bytes needed for that type.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(Self, u16)> {
        let mut atyp = [0u8; 1];
        reader.read_exact(&mut atyp).await?;

        match atyp[0] {
            ATYP_IPV4 => {
                let mut buf = [0u8; 6];
                reader.read_exact(&mut buf).await?;
                let addr = Address::Ipv4(Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]));
                let port = u16::from_be_bytes([buf[4], buf[5]]);
                Ok((addr, port))
            }
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                reader.read_exact(&mut len).await?;
                let len = len[0] as usize;
                let mut buf = vec![0u8; len + 2];
                reader.read_exact(&mut buf).await?;
                let domain = String::from_utf8(buf[..len].to_vec())
                    .map_err(|e| Error::parse(format!("Invalid domain: {}", e)))?;
                let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
                Ok((Address::Domain(domain), port))
            }
            ATYP_IPV6 => {
                let mut buf = [0u8; 18];
                reader.read_exact(&mut buf).await?;
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&buf[..16]);
                let addr = Address::Ipv6(Ipv6Addr::from(ip));
                let port = u16::from_be_bytes([buf[16], buf[17]]);
                Ok((addr, port))
            }
            t => Err(Error::AddressUnsupported(t)),
        }
    }

    /// Peek-parse an address and port from the beginning of a buffer.
    /// Returns the parsed address and the number of bytes it occupies, or
    /// None if the buffer is short or the ATYP unknown.
    pub fn split(buf: &[u8]) -> Option<(Self, u16, usize)> {
        if buf.is_empty() {
            return None;
        }
        let addr_len = match buf[0] {
            ATYP_IPV4 => 1 + 4 + 2,
            ATYP_DOMAIN => {
                if buf.len() < 2 {
                    return None;
                }
                1 + 1 + buf[1] as usize + 2
            }
            ATYP_IPV6 => 1 + 16 + 2,
            _ => return None,
        };
        if buf.len() < addr_len {
            return None;
        }

        let addr = match buf[0] {
            ATYP_IPV4 => Address::Ipv4(Ipv4Addr::new(buf[1], buf[2], buf[3], buf[4])),
            ATYP_DOMAIN => {
                let n = buf[1] as usize;
                Address::Domain(String::from_utf8_lossy(&buf[2..2 + n]).to_string())
            }
            _ => {
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&buf[1..17]);
                Address::Ipv6(Ipv6Addr::from(ip))
            }
        };
        let port = u16::from_be_bytes([buf[addr_len - 2], buf[addr_len - 1]]);
        Some((addr, port, addr_len))
    }

    /// Parse a "host:port" string. IP literals become the corresponding
    /// ATYP; everything else is a domain (rejected above 255 bytes).
    pub fn parse(s: &str) -> Option<(Self, u16)> {
        // Bracketed IPv6 or plain host; the port is after the last colon.
        if let Ok(sa) = s.parse::<SocketAddr>() {
            return Some((Address::from(sa.ip()), sa.port()));
        }
        let (host, port) = s.rsplit_once(':')?;
        let port = port.parse::<u16>().ok()?;
        if host.len() > 255 || host.is_empty() {
            return None;
        }
        Some((Address::Domain(host.to_string()), port))
    }

    /// Append the SOCKS5 wire encoding to a buffer.
    pub fn write_bytes(&self, port: u16, buf: &mut Vec<u8>) {
        match self {
            Address::Ipv4(ip) => {
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(&ip.octets());
            }
            Address::Ipv6(ip) => {
                buf.push(ATYP_IPV6);
                buf.extend_from_slice(&ip.octets());
            }
            Address::Domain(domain) => {
                let bytes = domain.as_bytes();
                debug_assert!(bytes.len() <= 255);
                buf.push(ATYP_DOMAIN);
                buf.push(bytes.len() as u8);
                buf.extend_from_slice(bytes);
            }
        }
        buf.extend_from_slice(&port.to_be_bytes());
    }

    /// SOCKS5 wire encoding.
    pub fn to_bytes(&self, port: u16) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_len());
        self.write_bytes(port, &mut buf);
        buf
    }

    /// Length of the SOCKS5 wire encoding (including port).
    pub fn serialized_len(&self) -> usize {
        match self {
            Address::Ipv4(_) => 1 + 4 + 2,
            Address::Ipv6(_) => 1 + 16 + 2,
            Address::Domain(d) => 1 + 1 + d.len() + 2,
        }
    }

    /// "host:port" form; the reverse of `parse`.
    pub fn to_string_with_port(&self, port: u16) -> String {
        match self {
            Address::Ipv4(ip) => format!("{}:{}", ip, port),
            Address::Ipv6(ip) => format!("[{}]:{}", ip, port),
            Address::Domain(d) => format!("{}:{}", d, port),
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Address::Ipv4(v4),
            IpAddr::V6(v6) => Address::Ipv6(v6),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(sa: SocketAddr) -> Self {
        Address::from(sa.ip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_addr() {
        assert_eq!(listen_addr(":8488"), "0.0.0.0:8488");
        assert_eq!(listen_addr("127.0.0.1:8488"), "127.0.0.1:8488");
    }

    #[test]
    fn test_parse_ipv4() {
        let (addr, port) = Address::parse("127.0.0.1:8080").unwrap();
        assert_eq!(addr, Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(port, 8080);
    }

    #[test]
    fn test_parse_ipv6() {
        let (addr, port) = Address::parse("[::1]:53").unwrap();
        assert!(matches!(addr, Address::Ipv6(_)));
        assert_eq!(port, 53);
    }

    #[test]
    fn test_parse_domain() {
        let (addr, port) = Address::parse("example.com:443").unwrap();
        assert_eq!(addr, Address::Domain("example.com".to_string()));
        assert_eq!(port, 443);
    }

    #[test]
    fn test_parse_rejects_long_domain() {
        let host = "a".repeat(256);
        assert!(Address::parse(&format!("{}:80", host)).is_none());
    }

    #[test]
    fn test_round_trip_format() {
        for s in ["127.0.0.1:8080", "[::1]:53", "example.com:443"] {
            let (addr, port) = Address::parse(s).unwrap();
            assert_eq!(addr.to_string_with_port(port), s);
        }
    }

    #[test]
    fn test_split() {
        let (addr, port) = Address::parse("192.168.0.1:8080").unwrap();
        let mut buf = addr.to_bytes(port);
        buf.extend_from_slice(b"payload");

        let (parsed, p, n) = Address::split(&buf).unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(p, 8080);
        assert_eq!(&buf[n..], b"payload");
    }

    #[test]
    fn test_split_short_or_unknown() {
        assert!(Address::split(&[]).is_none());
        assert!(Address::split(&[0x01, 1, 2]).is_none());
        assert!(Address::split(&[0x09, 0, 0, 0, 0, 0, 0]).is_none());
    }

    #[tokio::test]
    async fn test_read_from() {
        let bytes = [0x01, 127, 0, 0, 1, 0x1F, 0x90];
        let mut reader = &bytes[..];
        let (addr, port) = Address::read_from(&mut reader).await.unwrap();
        assert_eq!(addr, Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(port, 8080);
    }

    #[tokio::test]
    async fn test_read_from_unknown_atyp() {
        let bytes = [0x05, 0, 0];
        let mut reader = &bytes[..];
        let err = Address::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::AddressUnsupported(0x05)));
    }

    #[test]
    fn test_serialized_len() {
        let (addr, _) = Address::parse("example.com:443").unwrap();
        assert_eq!(addr.serialized_len(), 1 + 1 + 11 + 2);
        assert_eq!(addr.to_bytes(443).len(), addr.serialized_len());
    }
}
