//! pwrctl-core - Register access and PROM update sequencing for the
//! power-control FPGA board
//!
//! This crate provides:
//! - A memory transport contract the register layer is written against
//! - Typed register, command and memory-window nodes with little-endian
//!   bit-field packing and sibling-preserving writes
//! - Derived variables converting raw ADC codes to physical values
//! - A device tree with additive addressing and batched bulk reads
//! - The board's register maps and a TOML board configuration
//! - The firmware update state machine
//!
//! # Example
//!
//! ```ignore
//! use pwrctl_core::{board, BoardConfig, Session};
//!
//! let tree = board::build_tree(&BoardConfig::default())?;
//! let mut session = Session::open("dummy", transport, tree);
//! let version = session.read("Core.AxiVersion.FpgaVersion")?;
//! ```

pub mod address;
pub mod bits;
pub mod board;
pub mod config;
pub mod derived;
pub mod devices;
pub mod error;
pub mod image;
pub mod register;
pub mod session;
pub mod transport;
pub mod tree;
pub mod update;

#[cfg(test)]
mod test_support;

pub use config::BoardConfig;
pub use derived::{DerivedVariable, Linear, Transform};
pub use error::{Error, Result, TransportError, TransportErrorKind, TransportOp};
pub use image::FirmwareImage;
pub use register::{AccessMode, CommandAction, EnumMap, MemoryBlock, RegisterNode, RemoteCommand, Value};
pub use session::Session;
pub use transport::{MemoryTransport, SharedTransport};
pub use tree::{Device, DeviceTree, Node, Snapshot};
pub use update::{FirmwareUpdate, UpdateFailure, UpdateOptions, UpdateReport, UpdateState};
