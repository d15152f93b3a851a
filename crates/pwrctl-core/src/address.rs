//! Hierarchical addressing
//!
//! Every node sits at an offset relative to its parent device. Offsets
//! compose strictly additively from the root; no aliasing or overlap checks
//! are made, the tree builder places devices according to the fixed hardware
//! memory map. Nothing in this module performs I/O.

use core::fmt;
use core::str::FromStr;

use crate::error::{Error, Result};

/// Separator between path segments
pub const SEPARATOR: char = '.';

/// Dot-separated path of a node, relative to the tree root
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodePath {
    segments: Vec<String>,
}

impl NodePath {
    /// The root path
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse `Core.AxiVersion.FpgaVersion`; the empty string is the root
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Ok(Self::root());
        }
        let segments = path
            .split(SEPARATOR)
            .map(|s| {
                if s.is_empty() {
                    Err(Error::UnknownNode(path.to_string()))
                } else {
                    Ok(s.to_string())
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { segments })
    }

    /// Path segments from the root down
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether this is the root path
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Path of the parent node
    pub fn parent(&self) -> Option<NodePath> {
        let (_, rest) = self.segments.split_last()?;
        Some(Self {
            segments: rest.to_vec(),
        })
    }

    /// Extend the path by one segment
    pub fn child(&self, name: &str) -> NodePath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", SEPARATOR)?;
            }
            write!(f, "{}", s)?;
        }
        Ok(())
    }
}

impl FromStr for NodePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Resolved location of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Absolute byte address
    pub address: u64,
    /// Length of the byte range backing the node
    pub byte_width: u32,
    /// First bit of the field inside the range
    pub bit_offset: u32,
    /// Field width in bits
    pub bit_size: u32,
}

/// Join a prefix and a child name into a display path
pub(crate) fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", prefix, SEPARATOR, name)
    }
}

/// Add a relative offset to a base address
pub(crate) fn offset_by(base: u64, offset: u64, path: &str) -> Result<u64> {
    base.checked_add(offset)
        .ok_or_else(|| Error::AddressOverflow(path.to_string()))
}

/// Node names are non-empty and cannot contain the path separator
pub fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(SEPARATOR) {
        return Err(Error::InvalidField {
            name: name.to_string(),
            reason: format!("node names must be non-empty and free of '{}'", SEPARATOR),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let p = NodePath::parse("Core.AxiVersion.FpgaVersion").unwrap();
        assert_eq!(p.segments().len(), 3);
        assert_eq!(p.leaf(), Some("FpgaVersion"));
        assert_eq!(p.parent().unwrap().to_string(), "Core.AxiVersion");
        assert_eq!(p.to_string(), "Core.AxiVersion.FpgaVersion");
        assert!(NodePath::parse("").unwrap().is_root());
    }

    #[test]
    fn test_empty_segment_rejected() {
        assert!(matches!(
            NodePath::parse("Core..FpgaVersion"),
            Err(Error::UnknownNode(_))
        ));
        assert!(NodePath::parse("Core.").is_err());
    }

    #[test]
    fn test_offset_overflow() {
        assert_eq!(offset_by(0x1C_0000, 0x100, "x").unwrap(), 0x1C_0100);
        assert!(matches!(
            offset_by(u64::MAX, 1, "Deep.Node"),
            Err(Error::AddressOverflow(_))
        ));
    }

    #[test]
    fn test_check_name() {
        assert!(check_name("FpgaVersion").is_ok());
        assert!(check_name("").is_err());
        assert!(check_name("a.b").is_err());
    }
}
