//! Packet lifecycle: the host side that walks packets hop by hop.
//!
//! - [`PacketLifecycle`]: one packet's `CREATED → IN_FLIGHT → CONTINUING |
//!   TERMINATED` state machine
//! - [`LifecycleDriver`]: runs many lifecycles concurrently over a transport,
//!   with per-hop timeouts and bounded retries
//! - [`PacketTrace`]: the ordered observation records of a finished packet

pub mod config;
pub mod driver;
pub mod error;
pub mod record;
pub mod state;

pub use config::{DriverConfig, RetryConfig};
pub use driver::{DriverStats, LifecycleDriver, verify_hop};
pub use error::LifecycleError;
pub use record::{HopRecord, PacketTrace, TerminationReason, Verification};
pub use state::{PacketLifecycle, PacketState, Step};
