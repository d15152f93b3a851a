//! CLI command implementations
//!
//! Every command except `tree` and `list-transports` goes through a
//! [`Session`](pwrctl_core::Session) opened by `pwrctl-link`.

pub mod access;
mod list;
pub mod tree;
pub mod update;

pub use list::list_transports;
