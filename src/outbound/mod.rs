//! Outbound dialing

pub mod dialer;

pub use dialer::PriorityDialer;
