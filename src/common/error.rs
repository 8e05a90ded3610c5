//! Error types

use std::io;
use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("key size error: need {0}-byte key")]
    KeySize(usize),

    #[error("cipher not supported: {0}")]
    CipherNotSupported(String),

    #[error("unknown address type: {0}")]
    AddressUnsupported(u8),

    #[error("short packet")]
    ShortPacket,

    #[error("short buffer")]
    ShortBuffer,

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("replayed salt")]
    Replay,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn auth<S: Into<String>>(msg: S) -> Self {
        Error::Auth(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::Parse(msg.into())
    }

    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Error::Connection(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        match e {
            Error::Io(e) => e,
            Error::Auth(_) | Error::Replay => {
                io::Error::new(io::ErrorKind::InvalidData, e.to_string())
            }
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::KeySize(32);
        assert_eq!(e.to_string(), "key size error: need 32-byte key");
    }

    #[test]
    fn test_error_to_io() {
        let e: io::Error = Error::Replay.into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);
    }
}
