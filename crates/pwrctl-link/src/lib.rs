//! pwrctl-link - Transport selection and endpoint reachability
//!
//! The CLI only goes through this crate to reach a board: it parses a
//! transport specification, opens the transport and pairs it with the
//! register map in a [`Session`](pwrctl_core::Session).
//!
//! ```text
//!   pwrctl (CLI) ──> pwrctl-link ──> transport crates (pwrctl-dummy, ...)
//!                        │
//!                        └──> pwrctl-core (Session, DeviceTree)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use pwrctl_core::{board, BoardConfig};
//! use pwrctl_link::open_session;
//!
//! let tree = board::build_tree(&BoardConfig::default())?;
//! let mut session = open_session("dummy", tree, None)?;
//! let snapshot = session.read_all()?;
//! ```

pub mod error;
pub mod reachability;
pub mod registry;

pub use error::{LinkError, Result};
pub use reachability::{wait_until_reachable, PingProbe, Probe};
pub use registry::{
    available_transports, find_transport, open_session, open_transport, parse_transport_params,
    BoxedTransport, Limited, TransportInfo, TransportParams,
};
