//! Error types for pwrctl-core
//!
//! All component-level operations surface these errors to their immediate
//! caller. Only the update orchestrator interprets a transport failure as
//! expected (the post-reload settle window).

use core::fmt;

use crate::register::AccessMode;
use thiserror::Error;

/// Direction of a failed transport operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
    /// `read_range`
    Read,
    /// `write_range`
    Write,
}

impl fmt::Display for TransportOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Underlying cause of a transport failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// No response within the transport timeout
    Timeout,
    /// The endpoint cannot be reached (link down, board rebooting)
    Unreachable,
    /// The endpoint answered but refused the transaction
    Rejected,
    /// Any other I/O failure
    Io(String),
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Unreachable => write!(f, "endpoint unreachable"),
            Self::Rejected => write!(f, "rejected by endpoint"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

/// A failed `read_range` / `write_range` round trip
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{op} of {len} bytes at 0x{addr:08X} failed: {kind}")]
pub struct TransportError {
    /// Operation that failed
    pub op: TransportOp,
    /// Base address of the transaction
    pub addr: u64,
    /// Transaction length in bytes
    pub len: usize,
    /// Underlying cause
    pub kind: TransportErrorKind,
}

impl TransportError {
    /// Failed read of `len` bytes at `addr`
    pub fn read(addr: u64, len: usize, kind: TransportErrorKind) -> Self {
        Self {
            op: TransportOp::Read,
            addr,
            len,
            kind,
        }
    }

    /// Failed write of `len` bytes at `addr`
    pub fn write(addr: u64, len: usize, kind: TransportErrorKind) -> Self {
        Self {
            op: TransportOp::Write,
            addr,
            len,
            kind,
        }
    }
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    // Addressing errors
    /// A path segment does not exist at its level
    #[error("unknown node: {0}")]
    UnknownNode(String),
    /// A child with this name already exists in the device
    #[error("duplicate node '{name}' in device '{device}'")]
    DuplicateNode {
        /// Device being built
        device: String,
        /// Rejected child name
        name: String,
    },
    /// The node exists but is of another kind than the operation needs
    #[error("node '{path}' is not a {expected}")]
    WrongNodeKind {
        /// Path of the node
        path: String,
        /// Kind the operation expected
        expected: &'static str,
    },
    /// Offsets along the path overflow the transport address range
    #[error("address of '{0}' overflows the transport address range")]
    AddressOverflow(String),
    /// Field declaration violates a register invariant
    #[error("invalid field '{name}': {reason}")]
    InvalidField {
        /// Field name
        name: String,
        /// What is wrong with it
        reason: String,
    },

    // Access errors
    /// Write to a read-only field (or read of a write-only one)
    #[error("access denied: '{name}' is {mode}")]
    AccessDenied {
        /// Field name
        name: String,
        /// Declared access mode
        mode: AccessMode,
    },
    /// Operation not available for this node
    #[error("'{name}': {reason}")]
    Unsupported {
        /// Node name
        name: String,
        /// Why the operation is unavailable
        reason: &'static str,
    },
    /// The field's encoding does not support this kind of access
    #[error("'{name}' is not a {expected} field")]
    EncodingMismatch {
        /// Field name
        name: String,
        /// Encoding the operation needs
        expected: &'static str,
    },

    // Value errors
    /// Raw value does not fit the field
    #[error("value 0x{value:X} does not fit the {bits}-bit field '{name}'")]
    ValueOutOfRange {
        /// Field name
        name: String,
        /// Rejected value
        value: u64,
        /// Field width in bits
        bits: u32,
    },
    /// String longer than the field
    #[error("string of {len} bytes exceeds the {max}-byte field '{name}'")]
    ValueTooLong {
        /// Field name
        name: String,
        /// Supplied length
        len: usize,
        /// Field length
        max: usize,
    },
    /// Byte window access outside the block
    #[error("{len} bytes at offset 0x{offset:X} exceed the {size}-byte block '{name}'")]
    OutOfBounds {
        /// Block name
        name: String,
        /// Offset inside the block
        offset: u32,
        /// Access length
        len: usize,
        /// Block size
        size: u32,
    },
    /// Physical value has no raw representation
    #[error("physical value {value} cannot be represented by '{name}'")]
    PhysicalOutOfRange {
        /// Derived variable name
        name: String,
        /// Rejected value
        value: f64,
    },
    /// Text could not be parsed as a value for the node
    #[error("'{text}' is not a valid value for '{name}'")]
    InvalidValue {
        /// Node name
        name: String,
        /// Rejected text
        text: String,
    },
    /// Decoded code has no label (the raw code is still usable)
    #[error("code {code} of '{name}' has no label")]
    UnmappedEnum {
        /// Field name
        name: String,
        /// Decoded code
        code: u64,
    },
    /// Label not present in the field's enum map
    #[error("'{label}' is not a valid label for '{name}'")]
    UnknownLabel {
        /// Field name
        name: String,
        /// Rejected label
        label: String,
    },

    // I/O errors
    /// Transport failure, propagated unchanged
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Failure observed while traversing the tree
    #[error("{path}: {source}")]
    AtPath {
        /// Path of the node being read
        path: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },
    /// Firmware image could not be read
    #[error("failed to read image {path}: {source}")]
    Image {
        /// Image path
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    // Update errors
    /// The PROM controller did not confirm a successful program
    #[error("PROM controller did not report program completion")]
    ProgramIncomplete,

    // Configuration errors
    /// Invalid board configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Attach the path of the node being processed
    pub fn at_path(self, path: impl Into<String>) -> Self {
        Error::AtPath {
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// The transport error at the root of this error, if any
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Error::Transport(e) => Some(e),
            Error::AtPath { source, .. } => source.transport(),
            _ => None,
        }
    }
}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let e = TransportError::read(0x001C_0000, 4, TransportErrorKind::Timeout);
        assert_eq!(
            e.to_string(),
            "read of 4 bytes at 0x001C0000 failed: timeout"
        );
    }

    #[test]
    fn test_transport_found_through_path() {
        let e: Error = TransportError::write(0x10, 1, TransportErrorKind::Unreachable).into();
        let wrapped = e.at_path("Core.AxiVersion.ScratchPad");
        assert!(wrapped.transport().is_some());
        assert!(wrapped.to_string().starts_with("Core.AxiVersion.ScratchPad: "));
    }
}
