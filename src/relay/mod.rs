//! TCP and UDP relay primitives

pub mod tcp;
pub mod udp;

pub use tcp::relay;
pub use udp::{Datagram, NatMap, Role, UDP_BUF_SIZE};
