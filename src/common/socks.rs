//! SOCKS5 protocol (RFC 1928), server side

use super::net::Address;
use crate::{Error, Result};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const SOCKS5_VERSION: u8 = 0x05;

// Authentication methods
pub const AUTH_NO_AUTH: u8 = 0x00;
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

// Commands
pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

// Reply codes
pub const REP_SUCCEEDED: u8 = 0x00;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;

/// SOCKS5 command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    UdpAssociate,
}

/// Result of a completed SOCKS5 handshake: the command and the request's
/// destination address.
#[derive(Debug)]
pub struct HandshakeResult {
    pub command: Command,
    pub address: Address,
    pub port: u16,
}

/// Perform the server side of the SOCKS5 handshake: method negotiation
/// accepting only "no auth", then the request. CONNECT is acknowledged with
/// an all-zero bound address; UDP ASSOCIATE (when `udp_addr` is given) with
/// the UDP relay's bound address.
pub async fn handshake<S>(stream: &mut S, udp_addr: Option<SocketAddr>) -> Result<HandshakeResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Method negotiation: VER, NMETHODS, METHODS...
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    if head[0] != SOCKS5_VERSION {
        return Err(Error::protocol(format!(
            "Unsupported SOCKS version: {}",
            head[0]
        )));
    }
    let n = head[1] as usize;
    let mut methods = [0u8; 255];
    stream.read_exact(&mut methods[..n]).await?;

    if !methods[..n].contains(&AUTH_NO_AUTH) {
        stream
            .write_all(&[SOCKS5_VERSION, AUTH_NO_ACCEPTABLE])
            .await?;
        return Err(Error::auth("no acceptable authentication method"));
    }
    stream.write_all(&[SOCKS5_VERSION, AUTH_NO_AUTH]).await?;

    // Request: VER, CMD, RSV, ATYP, ADDR, PORT
    let mut header = [0u8; 3];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS5_VERSION {
        return Err(Error::protocol(format!(
            "Unsupported SOCKS version: {}",
            header[0]
        )));
    }

    let (address, port) = Address::read_from(stream).await?;

    match header[1] {
        CMD_CONNECT => {
            stream
                .write_all(&[SOCKS5_VERSION, REP_SUCCEEDED, 0, 0x01, 0, 0, 0, 0, 0, 0])
                .await?;
            Ok(HandshakeResult {
                command: Command::Connect,
                address,
                port,
            })
        }
        CMD_UDP_ASSOCIATE => match udp_addr {
            Some(relay) => {
                let mut reply = vec![SOCKS5_VERSION, REP_SUCCEEDED, 0];
                Address::from(relay).write_bytes(relay.port(), &mut reply);
                stream.write_all(&reply).await?;
                Ok(HandshakeResult {
                    command: Command::UdpAssociate,
                    address,
                    port,
                })
            }
            None => {
                reply_error(stream, REP_COMMAND_NOT_SUPPORTED).await?;
                Err(Error::unsupported("UDP not enabled"))
            }
        },
        cmd => {
            reply_error(stream, REP_COMMAND_NOT_SUPPORTED).await?;
            Err(Error::protocol(format!("Unknown SOCKS5 command: {}", cmd)))
        }
    }
}

async fn reply_error<W: AsyncWrite + Unpin>(writer: &mut W, rep: u8) -> Result<()> {
    writer
        .write_all(&[SOCKS5_VERSION, rep, 0, 0x01, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}
