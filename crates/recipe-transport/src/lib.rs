//! # RECIPE-D Transport
//!
//! Datagram links between the host-side lifecycle driver and hops.
//!
//! This crate provides:
//! - The [`Transport`](transport::Transport) trait shared by all hop links
//! - A Tokio UDP transport tuned with `socket2`
//! - An in-memory transport pair for simulated, in-process hops

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod transport;
pub mod udp_async;

pub use memory::MemoryTransport;
pub use transport::{Transport, TransportError, TransportResult, TransportStats};
pub use udp_async::AsyncUdpTransport;

/// Largest datagram a hop link is expected to carry
pub const MAX_DATAGRAM_SIZE: usize = 2048;
