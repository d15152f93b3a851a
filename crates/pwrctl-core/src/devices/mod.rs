//! Register maps of the board's device blocks
//!
//! Each module exposes a `device()` builder returning a [`crate::Device`]
//! whose offsets are relative to the block base. Placement happens in
//! [`crate::board::build_tree`].

pub mod axi_version;
pub mod lambda;
pub mod ltc2945;
pub mod prom;
pub mod xadc;
