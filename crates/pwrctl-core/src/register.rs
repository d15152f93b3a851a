//! Typed register accessors
//!
//! A [`RegisterNode`] is a view onto a bit-field inside a byte range at a
//! fixed absolute address. Nodes are declared with a relative offset and
//! receive their absolute address when the owning device is placed in the
//! tree. [`RemoteCommand`] and [`MemoryBlock`] are the two other leaf kinds:
//! a fixed-value trigger and a raw byte window.

use core::fmt;

use crate::address;
use crate::bits;
use crate::error::{Error, Result};
use crate::transport::{self, MemoryTransport};

/// Width of an AXI-Lite register word in bytes
pub const WORD_BYTES: u32 = 4;

/// Access mode of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read-only
    ReadOnly,
    /// Write-only (reads are not meaningful)
    WriteOnly,
    /// Read-write
    #[default]
    ReadWrite,
}

impl AccessMode {
    /// Reads are allowed
    pub fn readable(self) -> bool {
        !matches!(self, AccessMode::WriteOnly)
    }

    /// Writes are allowed
    pub fn writable(self) -> bool {
        !matches!(self, AccessMode::ReadOnly)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::ReadOnly => write!(f, "RO"),
            AccessMode::WriteOnly => write!(f, "WO"),
            AccessMode::ReadWrite => write!(f, "RW"),
        }
    }
}

/// Code-to-label table of an enumerated field
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnumMap {
    entries: Vec<(u64, String)>,
}

impl EnumMap {
    /// Build a map, rejecting duplicate codes
    pub fn new<'a>(entries: impl IntoIterator<Item = (u64, &'a str)>) -> Result<Self> {
        let mut map = EnumMap::default();
        for (code, label) in entries {
            if map.label(code).is_some() {
                return Err(Error::InvalidField {
                    name: label.to_string(),
                    reason: format!("enum code {} is mapped twice", code),
                });
            }
            map.entries.push((code, label.to_string()));
        }
        Ok(map)
    }

    /// The common `{0: Disabled, 1: Enabled}` map
    pub fn enabled() -> Self {
        EnumMap {
            entries: vec![(0, "Disabled".into()), (1, "Enabled".into())],
        }
    }

    /// Label of `code`
    pub fn label(&self, code: u64) -> Option<&str> {
        self.entries
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, l)| l.as_str())
    }

    /// Code of `label`
    pub fn code(&self, label: &str) -> Option<u64> {
        self.entries.iter().find(|(_, l)| l == label).map(|(c, _)| *c)
    }

    /// Iterate over `(code, label)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        self.entries.iter().map(|(c, l)| (*c, l.as_str()))
    }
}

/// How the raw bits of a field are interpreted
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Unsigned integer
    #[default]
    UnsignedInt,
    /// Single-bit flag
    Bool,
    /// Enumerated value
    EnumMap(EnumMap),
    /// Fixed-length byte string of the given length
    FixedString(u32),
}

/// A decoded value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unsigned integer field
    UInt(u64),
    /// Boolean field
    Bool(bool),
    /// Enumerated field; `label` is `None` for unmapped codes
    Enum {
        /// Raw code
        code: u64,
        /// Label, when mapped
        label: Option<String>,
    },
    /// String field
    Str(String),
    /// Physical value of a derived variable
    Float(f64),
}

impl Value {
    /// Integer view (codes for enums, 0/1 for flags)
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Bool(b) => Some(*b as u64),
            Value::Enum { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Floating point view
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            other => other.as_u64().map(|v| v as f64),
        }
    }

    /// String view
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Enum { label: Some(l), .. } => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::UInt(v) => write!(f, "0x{:X}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Enum {
                label: Some(l), ..
            } => write!(f, "{}", l),
            Value::Enum { code, label: None } => write!(f, "{} (unmapped)", code),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Float(v) => write!(f, "{:.3}", v),
        }
    }
}

/// A typed bit-field at a fixed address
#[derive(Debug, Clone)]
pub struct RegisterNode {
    name: String,
    description: String,
    relative_offset: u64,
    address: u64,
    bit_offset: u32,
    bit_size: u32,
    width: Option<u32>,
    mode: AccessMode,
    encoding: Encoding,
}

impl RegisterNode {
    /// A 32-bit read-write unsigned register at `offset`
    pub fn new(name: impl Into<String>, offset: u64) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            relative_offset: offset,
            address: offset,
            bit_offset: 0,
            bit_size: 32,
            width: None,
            mode: AccessMode::ReadWrite,
            encoding: Encoding::UnsignedInt,
        }
    }

    /// Place the field at `[bit_offset, bit_offset + bit_size)`
    pub fn bits(mut self, bit_offset: u32, bit_size: u32) -> Self {
        self.bit_offset = bit_offset;
        self.bit_size = bit_size;
        self
    }

    /// Declare the width of the containing register in bytes
    pub fn width(mut self, bytes: u32) -> Self {
        self.width = Some(bytes);
        self
    }

    /// Set the access mode
    pub fn mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    /// Shorthand for `mode(AccessMode::ReadOnly)`
    pub fn read_only(self) -> Self {
        self.mode(AccessMode::ReadOnly)
    }

    /// Decode as a flag
    pub fn boolean(mut self) -> Self {
        self.encoding = Encoding::Bool;
        self
    }

    /// Decode through an enum map
    pub fn enum_map(mut self, map: EnumMap) -> Self {
        self.encoding = Encoding::EnumMap(map);
        self
    }

    /// Decode as a fixed-length string of `len` bytes
    pub fn string(mut self, len: u32) -> Self {
        self.encoding = Encoding::FixedString(len);
        self.bit_offset = 0;
        self.bit_size = len * 8;
        self
    }

    /// Attach a description
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description text
    pub fn describe(&self) -> &str {
        &self.description
    }

    /// Offset inside the parent device
    pub fn relative_offset(&self) -> u64 {
        self.relative_offset
    }

    /// Absolute byte address
    pub fn address(&self) -> u64 {
        self.address
    }

    /// First bit of the field
    pub fn bit_offset(&self) -> u32 {
        self.bit_offset
    }

    /// Field width in bits
    pub fn bit_size(&self) -> u32 {
        self.bit_size
    }

    /// Access mode
    pub fn access(&self) -> AccessMode {
        self.mode
    }

    /// Encoding
    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    /// Length of the byte range read and written for this field
    pub fn byte_width(&self) -> u32 {
        if let Some(w) = self.width {
            return w;
        }
        match self.encoding {
            Encoding::FixedString(len) => len,
            _ => {
                let bytes = bits::bytes_for_bits(self.bit_offset + self.bit_size);
                bytes.div_ceil(WORD_BYTES) * WORD_BYTES
            }
        }
    }

    /// Label of `code` when the field is enumerated
    pub fn label_for(&self, code: u64) -> Option<&str> {
        match &self.encoding {
            Encoding::EnumMap(map) => map.label(code),
            _ => None,
        }
    }

    /// Check the declaration invariants
    pub(crate) fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidField {
            name: self.name.clone(),
            reason,
        };

        address::check_name(&self.name)?;

        if self.bit_size == 0 {
            return Err(invalid("bit size must be at least 1".into()));
        }
        let end = self.bit_offset as u64 + self.bit_size as u64;
        if end > self.byte_width() as u64 * 8 {
            return Err(invalid(format!(
                "bits [{}, {}) exceed the {}-byte register",
                self.bit_offset,
                end,
                self.byte_width()
            )));
        }

        match &self.encoding {
            Encoding::FixedString(len) => {
                if *len == 0 {
                    return Err(invalid("string length must be at least 1".into()));
                }
                if self.bit_offset != 0 || self.bit_size != len * 8 {
                    return Err(invalid("string fields must be byte aligned".into()));
                }
            }
            Encoding::Bool if self.bit_size != 1 => {
                return Err(invalid("boolean fields are one bit wide".into()));
            }
            Encoding::EnumMap(map) => {
                if let Some((code, _)) = map.iter().find(|(c, _)| !bits::fits(*c, self.bit_size)) {
                    return Err(invalid(format!(
                        "enum code {} does not fit {} bits",
                        code, self.bit_size
                    )));
                }
            }
            _ => {}
        }

        if !matches!(self.encoding, Encoding::FixedString(_)) && self.bit_size > 64 {
            return Err(invalid("numeric fields are at most 64 bits".into()));
        }
        Ok(())
    }

    pub(crate) fn shift(&mut self, base: u64) -> Result<()> {
        self.address = address::offset_by(base, self.relative_offset, &self.name)?;
        Ok(())
    }

    fn ensure_readable(&self) -> Result<()> {
        if self.mode.readable() {
            Ok(())
        } else {
            Err(Error::AccessDenied {
                name: self.name.clone(),
                mode: self.mode,
            })
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.mode.writable() {
            Ok(())
        } else {
            Err(Error::AccessDenied {
                name: self.name.clone(),
                mode: self.mode,
            })
        }
    }

    fn ensure_numeric(&self) -> Result<()> {
        match self.encoding {
            Encoding::FixedString(_) => Err(Error::EncodingMismatch {
                name: self.name.clone(),
                expected: "numeric",
            }),
            _ => Ok(()),
        }
    }

    fn ensure_string(&self) -> Result<u32> {
        match self.encoding {
            Encoding::FixedString(len) => Ok(len),
            _ => Err(Error::EncodingMismatch {
                name: self.name.clone(),
                expected: "string",
            }),
        }
    }

    /// Fetch the containing byte range
    pub fn read_bytes<T: MemoryTransport + ?Sized>(&self, t: &mut T) -> Result<Vec<u8>> {
        self.ensure_readable()?;
        let len = self.byte_width();
        log::trace!("read {} @ 0x{:08X} ({} bytes)", self.name, self.address, len);
        Ok(transport::read_split(t, self.address, len)?)
    }

    /// Extract the raw field value from the containing byte range
    pub fn decode_raw(&self, bytes: &[u8]) -> Result<u64> {
        self.ensure_numeric()?;
        Ok(bits::extract_bits(bytes, self.bit_offset, self.bit_size))
    }

    /// Decode the field from the containing byte range
    pub fn decode(&self, bytes: &[u8]) -> Result<Value> {
        Ok(match &self.encoding {
            Encoding::UnsignedInt => Value::UInt(self.decode_raw(bytes)?),
            Encoding::Bool => Value::Bool(self.decode_raw(bytes)? != 0),
            Encoding::EnumMap(map) => {
                let code = self.decode_raw(bytes)?;
                Value::Enum {
                    code,
                    label: map.label(code).map(str::to_string),
                }
            }
            Encoding::FixedString(len) => Value::Str(decode_string(bytes, *len as usize)),
        })
    }

    /// Read the raw field value
    ///
    /// Enumerated fields return their code even when it has no label.
    pub fn read_raw<T: MemoryTransport + ?Sized>(&self, t: &mut T) -> Result<u64> {
        self.ensure_numeric()?;
        let bytes = self.read_bytes(t)?;
        self.decode_raw(&bytes)
    }

    /// Read and decode the field
    pub fn read<T: MemoryTransport + ?Sized>(&self, t: &mut T) -> Result<Value> {
        let bytes = self.read_bytes(t)?;
        self.decode(&bytes)
    }

    /// Read an enumerated field and look up its label
    pub fn read_label<T: MemoryTransport + ?Sized>(&self, t: &mut T) -> Result<String> {
        let Encoding::EnumMap(map) = &self.encoding else {
            return Err(Error::EncodingMismatch {
                name: self.name.clone(),
                expected: "enum",
            });
        };
        let code = self.read_raw(t)?;
        map.label(code)
            .map(str::to_string)
            .ok_or_else(|| Error::UnmappedEnum {
                name: self.name.clone(),
                code,
            })
    }

    /// Everything [`RegisterNode::write_raw`] rejects before any I/O
    pub(crate) fn check_write(&self, value: u64) -> Result<()> {
        self.ensure_numeric()?;
        self.ensure_writable()?;
        self.check_value(value)
    }

    fn check_value(&self, value: u64) -> Result<()> {
        if bits::fits(value, self.bit_size) {
            Ok(())
        } else {
            Err(Error::ValueOutOfRange {
                name: self.name.clone(),
                value,
                bits: self.bit_size,
            })
        }
    }

    fn covers_range(&self) -> bool {
        self.bit_offset == 0 && self.bit_size == self.byte_width() * 8
    }

    /// Write the raw field value
    ///
    /// Fields that share their byte range with siblings are updated with a
    /// read-modify-write so the siblings keep their values. Write-only
    /// fields cannot be read back and zero the rest of the range.
    pub fn write_raw<T: MemoryTransport + ?Sized>(&self, t: &mut T, value: u64) -> Result<()> {
        self.check_write(value)?;

        let mut bytes = if self.covers_range() || !self.mode.readable() {
            vec![0u8; self.byte_width() as usize]
        } else {
            transport::read_split(t, self.address, self.byte_width())?
        };
        bits::insert_bits(&mut bytes, self.bit_offset, self.bit_size, value);

        log::trace!(
            "write {} @ 0x{:08X} = 0x{:X}",
            self.name,
            self.address,
            value
        );
        transport::write_split(t, self.address, &bytes)?;
        Ok(())
    }

    /// Posted write: the field value in an otherwise zeroed range, with no
    /// read beforehand
    pub fn post_raw<T: MemoryTransport + ?Sized>(&self, t: &mut T, value: u64) -> Result<()> {
        self.ensure_numeric()?;
        self.ensure_writable()?;
        self.check_value(value)?;

        let mut bytes = vec![0u8; self.byte_width() as usize];
        bits::insert_bits(&mut bytes, self.bit_offset, self.bit_size, value);
        log::trace!("post {} @ 0x{:08X} = 0x{:X}", self.name, self.address, value);
        transport::write_split(t, self.address, &bytes)?;
        Ok(())
    }

    /// Write a flag
    pub fn write_bool<T: MemoryTransport + ?Sized>(&self, t: &mut T, value: bool) -> Result<()> {
        self.write_raw(t, value as u64)
    }

    /// Write an enumerated field by label
    pub fn write_label<T: MemoryTransport + ?Sized>(&self, t: &mut T, label: &str) -> Result<()> {
        let Encoding::EnumMap(map) = &self.encoding else {
            return Err(Error::EncodingMismatch {
                name: self.name.clone(),
                expected: "enum",
            });
        };
        let code = map.code(label).ok_or_else(|| Error::UnknownLabel {
            name: self.name.clone(),
            label: label.to_string(),
        })?;
        self.write_raw(t, code)
    }

    /// Read a fixed-length string, trailing zero bytes stripped
    pub fn read_string<T: MemoryTransport + ?Sized>(&self, t: &mut T) -> Result<String> {
        let len = self.ensure_string()?;
        let bytes = self.read_bytes(t)?;
        Ok(decode_string(&bytes, len as usize))
    }

    /// Write a fixed-length string, zero padded to the field length
    pub fn write_string<T: MemoryTransport + ?Sized>(&self, t: &mut T, value: &str) -> Result<()> {
        let len = self.ensure_string()? as usize;
        self.ensure_writable()?;
        if value.len() > len {
            return Err(Error::ValueTooLong {
                name: self.name.clone(),
                len: value.len(),
                max: len,
            });
        }

        let mut bytes = vec![0u8; self.byte_width() as usize];
        bytes[..value.len()].copy_from_slice(value.as_bytes());
        transport::write_split(t, self.address, &bytes)?;
        Ok(())
    }
}

fn decode_string(bytes: &[u8], len: usize) -> String {
    let bytes = &bytes[..len.min(bytes.len())];
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// What invoking a command does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    /// Post a fixed value
    Post(u64),
    /// Post a fixed value, then read the field back
    PostThenRead(u64),
    /// Read the field (read-to-clear registers)
    Touch,
}

/// A register that performs an action when invoked; holds no state
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    register: RegisterNode,
    action: CommandAction,
}

impl RemoteCommand {
    /// Command backed by `register`
    pub fn new(register: RegisterNode, action: CommandAction) -> Self {
        Self { register, action }
    }

    /// The common "post 1 to bit 0" trigger
    pub fn trigger(name: impl Into<String>, offset: u64) -> Self {
        Self::new(
            RegisterNode::new(name, offset).bits(0, 1),
            CommandAction::Post(1),
        )
    }

    /// Node name
    pub fn name(&self) -> &str {
        self.register.name()
    }

    /// Backing register
    pub fn register(&self) -> &RegisterNode {
        &self.register
    }

    /// Configured action
    pub fn action(&self) -> CommandAction {
        self.action
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.register.validate()
    }

    pub(crate) fn shift(&mut self, base: u64) -> Result<()> {
        self.register.shift(base)
    }

    /// Perform the action; returns the value read back, if any
    pub fn invoke<T: MemoryTransport + ?Sized>(&self, t: &mut T) -> Result<Option<u64>> {
        log::debug!("invoke {} ({:?})", self.name(), self.action);
        match self.action {
            CommandAction::Post(v) => {
                self.register.post_raw(t, v)?;
                Ok(None)
            }
            CommandAction::PostThenRead(v) => {
                self.register.post_raw(t, v)?;
                self.register.read_raw(t).map(Some)
            }
            CommandAction::Touch => self.register.read_raw(t).map(Some),
        }
    }
}

/// A raw byte window
#[derive(Debug, Clone)]
pub struct MemoryBlock {
    name: String,
    relative_offset: u64,
    address: u64,
    size: u32,
    mode: AccessMode,
}

impl MemoryBlock {
    /// Read-write window of `size` bytes at `offset`
    pub fn new(name: impl Into<String>, offset: u64, size: u32) -> Self {
        Self {
            name: name.into(),
            relative_offset: offset,
            address: offset,
            size,
            mode: AccessMode::ReadWrite,
        }
    }

    /// Set the access mode
    pub fn mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offset inside the parent device
    pub fn relative_offset(&self) -> u64 {
        self.relative_offset
    }

    /// Absolute byte address
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Window size in bytes
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Access mode
    pub fn access(&self) -> AccessMode {
        self.mode
    }

    pub(crate) fn validate(&self) -> Result<()> {
        address::check_name(&self.name)?;
        if self.size == 0 {
            return Err(Error::InvalidField {
                name: self.name.clone(),
                reason: "memory block size must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub(crate) fn shift(&mut self, base: u64) -> Result<()> {
        self.address = address::offset_by(base, self.relative_offset, &self.name)?;
        Ok(())
    }

    fn check_bounds(&self, offset: u32, len: usize) -> Result<()> {
        if offset as u64 + len as u64 > self.size as u64 {
            return Err(Error::OutOfBounds {
                name: self.name.clone(),
                offset,
                len,
                size: self.size,
            });
        }
        Ok(())
    }

    /// Read `len` bytes at `offset` inside the window
    pub fn read<T: MemoryTransport + ?Sized>(
        &self,
        t: &mut T,
        offset: u32,
        len: u32,
    ) -> Result<Vec<u8>> {
        if !self.mode.readable() {
            return Err(Error::AccessDenied {
                name: self.name.clone(),
                mode: self.mode,
            });
        }
        self.check_bounds(offset, len as usize)?;
        let addr = address::offset_by(self.address, offset as u64, &self.name)?;
        Ok(transport::read_split(t, addr, len)?)
    }

    /// Write `data` at `offset` inside the window
    pub fn write<T: MemoryTransport + ?Sized>(
        &self,
        t: &mut T,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        if !self.mode.writable() {
            return Err(Error::AccessDenied {
                name: self.name.clone(),
                mode: self.mode,
            });
        }
        self.check_bounds(offset, data.len())?;
        let addr = address::offset_by(self.address, offset as u64, &self.name)?;
        transport::write_split(t, addr, data)?;
        Ok(())
    }
}
