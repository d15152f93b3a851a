//! Device tree
//!
//! Devices are named containers of registers, commands, memory windows,
//! derived variables and child devices. Every node receives its absolute
//! address when it is placed, so lookups by path never touch the transport.
//!
//! [`DeviceTree::read_all`] walks the tree depth-first. Inside each device it
//! runs the pre-read hook once, then fetches every readable register with as
//! few range reads as the transport allows. The fetched bytes are kept only
//! for the duration of that pass, so derived variables reuse them but a later
//! pass always re-reads the hardware.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::address::{self, Location, NodePath};
use crate::derived::DerivedVariable;
use crate::error::{Error, Result};
use crate::register::{Encoding, MemoryBlock, RegisterNode, RemoteCommand, Value};
use crate::transport::{self, MemoryTransport};

/// A node of the tree
#[derive(Debug, Clone)]
pub enum Node {
    /// Typed bit-field
    Register(RegisterNode),
    /// Fixed-value trigger
    Command(RemoteCommand),
    /// Raw byte window
    Memory(MemoryBlock),
    /// Computed physical value
    Derived(DerivedVariable),
    /// Child device
    Device(Device),
}

impl Node {
    /// Node name
    pub fn name(&self) -> &str {
        match self {
            Node::Register(r) => r.name(),
            Node::Command(c) => c.name(),
            Node::Memory(m) => m.name(),
            Node::Derived(d) => d.name(),
            Node::Device(d) => d.name(),
        }
    }

    /// Human readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Register(_) => "register",
            Node::Command(_) => "command",
            Node::Memory(_) => "memory",
            Node::Derived(_) => "derived",
            Node::Device(_) => "device",
        }
    }

    fn relative_offset(&self) -> Option<u64> {
        match self {
            Node::Register(r) => Some(r.relative_offset()),
            Node::Command(c) => Some(c.register().relative_offset()),
            Node::Memory(m) => Some(m.relative_offset()),
            Node::Derived(_) => None,
            Node::Device(d) => Some(d.relative_offset()),
        }
    }

    fn shift(&mut self, base: u64) -> Result<()> {
        match self {
            Node::Register(r) => r.shift(base),
            Node::Command(c) => c.shift(base),
            Node::Memory(m) => m.shift(base),
            Node::Derived(_) => Ok(()),
            Node::Device(d) => d.shift(base),
        }
    }
}

/// A named container of nodes
#[derive(Debug, Clone)]
pub struct Device {
    name: String,
    description: String,
    relative_offset: u64,
    address: u64,
    children: Vec<Node>,
    index: HashMap<String, usize>,
    pre_read: Option<usize>,
}

impl Device {
    /// Empty device
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            relative_offset: 0,
            address: 0,
            children: Vec::new(),
            index: HashMap::new(),
            pre_read: None,
        }
    }

    /// Attach a description
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    /// Device name
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

    /// Absolute base address
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Children in declaration order
    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Child by name
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|&i| &self.children[i])
    }

    /// Register child by name
    pub fn register(&self, name: &str) -> Option<&RegisterNode> {
        match self.child(name) {
            Some(Node::Register(r)) => Some(r),
            _ => None,
        }
    }

    /// The sampling trigger run before this device is bulk read
    pub fn pre_read(&self) -> Option<&RemoteCommand> {
        match self.pre_read.map(|i| &self.children[i]) {
            Some(Node::Command(c)) => Some(c),
            _ => None,
        }
    }

    fn insert(&mut self, mut node: Node) -> Result<usize> {
        let name = node.name().to_string();
        if self.index.contains_key(&name) {
            return Err(Error::DuplicateNode {
                device: self.name.clone(),
                name,
            });
        }
        node.shift(self.address)?;
        let slot = self.children.len();
        self.children.push(node);
        self.index.insert(name, slot);
        Ok(slot)
    }

    fn shift(&mut self, base: u64) -> Result<()> {
        self.address = address::offset_by(base, self.relative_offset, &self.name)?;
        for child in &mut self.children {
            child.shift(self.address)?;
        }
        Ok(())
    }

    /// Add a register
    pub fn add_register(&mut self, register: RegisterNode) -> Result<()> {
        register.validate()?;
        self.insert(Node::Register(register)).map(drop)
    }

    /// Add a command
    pub fn add_command(&mut self, command: RemoteCommand) -> Result<()> {
        command.validate()?;
        self.insert(Node::Command(command)).map(drop)
    }

    /// Add a memory window
    pub fn add_memory(&mut self, block: MemoryBlock) -> Result<()> {
        block.validate()?;
        self.insert(Node::Memory(block)).map(drop)
    }

    /// Add a derived variable over registers already in this device
    pub fn add_derived(&mut self, mut variable: DerivedVariable) -> Result<()> {
        address::check_name(variable.name())?;
        let invalid = |reason: String| Error::InvalidField {
            name: variable.name().to_string(),
            reason,
        };

        if variable.sources().is_empty() {
            return Err(invalid("derived variables need at least one source".into()));
        }
        let writable = variable.access().writable();
        if writable && !variable.invertible() {
            return Err(invalid("read-write derived variables need an inverse".into()));
        }

        let mut slots = Vec::with_capacity(variable.sources().len());
        for source in variable.sources() {
            let slot = self.index.get(source.as_str()).copied();
            let reg = match slot.map(|i| &self.children[i]) {
                Some(Node::Register(r)) => r,
                _ => {
                    return Err(invalid(format!(
                        "source '{}' is not a register of '{}'",
                        source, self.name
                    )))
                }
            };
            if matches!(reg.encoding(), Encoding::FixedString(_)) || !reg.access().readable() {
                return Err(invalid(format!("source '{}' cannot be read as a number", source)));
            }
            if writable && !reg.access().writable() {
                return Err(invalid(format!("source '{}' is not writable", source)));
            }
            slots.extend(slot);
        }
        variable.slots = slots;
        self.insert(Node::Derived(variable)).map(drop)
    }

    /// Place a child device at `offset` from this device's base
    pub fn add_device(&mut self, offset: u64, mut device: Device) -> Result<()> {
        address::check_name(&device.name)?;
        device.relative_offset = offset;
        self.insert(Node::Device(device)).map(drop)
    }

    /// Make the named command the pre-read hook of this device
    pub fn set_pre_read(&mut self, command: &str) -> Result<()> {
        match self.index.get(command).map(|&i| (i, &self.children[i])) {
            Some((i, Node::Command(_))) => {
                self.pre_read = Some(i);
                Ok(())
            }
            Some(_) => Err(Error::WrongNodeKind {
                path: command.to_string(),
                expected: "command",
            }),
            None => Err(Error::UnknownNode(command.to_string())),
        }
    }

    fn source(&self, slot: usize) -> Result<&RegisterNode> {
        match self.children.get(slot) {
            Some(Node::Register(r)) => Ok(r),
            _ => Err(Error::UnknownNode(format!("{}[{}]", self.name, slot))),
        }
    }

    fn get<T: MemoryTransport + ?Sized>(&self, t: &mut T, var: &DerivedVariable) -> Result<f64> {
        let raw = var
            .slots
            .iter()
            .map(|&slot| self.source(slot)?.read_raw(t))
            .collect::<Result<Vec<_>>>()?;
        Ok(var.compute(&raw))
    }

    fn set<T: MemoryTransport + ?Sized>(
        &self,
        t: &mut T,
        var: &DerivedVariable,
        value: f64,
    ) -> Result<()> {
        let raw = var.invert(value)?;
        let writes = var
            .slots
            .iter()
            .zip(raw)
            .map(|(&slot, code)| Ok((self.source(slot)?, code)))
            .collect::<Result<Vec<_>>>()?;
        // Nothing is written unless every source accepts its code
        for &(reg, code) in &writes {
            reg.check_write(code)?;
        }
        for (reg, code) in writes {
            reg.write_raw(t, code)?;
        }
        Ok(())
    }
}

/// One value of a bulk read
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Dot-separated node path
    pub path: String,
    /// Decoded value
    pub value: Value,
    /// Physical units, for derived variables
    pub units: Option<String>,
    /// Display precision, for derived variables
    pub precision: Option<usize>,
}

impl Entry {
    /// Value formatted for display
    pub fn display_value(&self) -> String {
        match (&self.value, self.precision) {
            (Value::Float(v), Some(p)) => match &self.units {
                Some(u) => format!("{:.*} {}", p, v, u),
                None => format!("{:.*}", p, v),
            },
            (value, _) => value.to_string(),
        }
    }
}

/// Result of [`DeviceTree::read_all`], in traversal order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: Vec<Entry>,
}

impl Snapshot {
    /// All entries
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Value at `path`
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|e| e.path == path)
            .map(|e| &e.value)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was read
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the entries
    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Register bytes fetched during one bulk-read pass of a device
struct ReadCache {
    spans: Vec<(u64, Vec<u8>)>,
}

impl ReadCache {
    fn fill<T: MemoryTransport + ?Sized>(dev: &Device, prefix: &str, t: &mut T) -> Result<Self> {
        let mut ranges: Vec<(u64, u32, &str)> = dev
            .children
            .iter()
            .filter_map(|c| match c {
                Node::Register(r) if r.access().readable() => {
                    Some((r.address(), r.byte_width(), r.name()))
                }
                _ => None,
            })
            .collect();
        ranges.sort_by_key(|&(addr, width, _)| (addr, width));
        ranges.dedup_by(|next, prev| next.0 == prev.0 && next.1 == prev.1);

        let batch = t.supports_range_reads();
        let max = t.max_transaction_len().max(1) as u64;
        let mut cache = ReadCache { spans: Vec::new() };
        let mut pending: Option<(u64, u64, &str)> = None;

        for (addr, width, name) in ranges {
            let end = addr.saturating_add(width as u64);
            if batch {
                if let Some((start, span_end, _)) = pending.as_mut() {
                    if addr <= *span_end && end.max(*span_end) - *start <= max {
                        *span_end = end.max(*span_end);
                        continue;
                    }
                }
            }
            if let Some(span) = pending.take() {
                cache.fetch(span, prefix, t)?;
            }
            pending = Some((addr, end, name));
        }
        if let Some(span) = pending {
            cache.fetch(span, prefix, t)?;
        }
        Ok(cache)
    }

    fn fetch<T: MemoryTransport + ?Sized>(
        &mut self,
        (start, end, first): (u64, u64, &str),
        prefix: &str,
        t: &mut T,
    ) -> Result<()> {
        let len = (end - start) as u32;
        log::trace!("bulk read 0x{:08X} ({} bytes) from {}", start, len, first);
        let bytes = transport::read_split(t, start, len)
            .map_err(|e| Error::from(e).at_path(address::join(prefix, first)))?;
        self.spans.push((start, bytes));
        Ok(())
    }

    fn get(&self, addr: u64, width: u32) -> Option<&[u8]> {
        self.spans.iter().find_map(|(start, bytes)| {
            let from = addr.checked_sub(*start)? as usize;
            bytes.get(from..from + width as usize)
        })
    }

    fn bytes<'c, T: MemoryTransport + ?Sized>(
        &'c self,
        reg: &RegisterNode,
        t: &mut T,
    ) -> Result<Cow<'c, [u8]>> {
        match self.get(reg.address(), reg.byte_width()) {
            Some(b) => Ok(Cow::Borrowed(b)),
            None => reg.read_bytes(t).map(Cow::Owned),
        }
    }
}

/// A rooted device tree
#[derive(Debug, Clone)]
pub struct DeviceTree {
    root: Device,
}

impl DeviceTree {
    /// Wrap a fully built root device
    pub fn new(root: Device) -> Self {
        Self { root }
    }

    /// Root device
    pub fn root(&self) -> &Device {
        &self.root
    }

    fn locate(&self, path: &str) -> Result<(&Device, &Node)> {
        let parsed = NodePath::parse(path)?;
        let Some((leaf, parents)) = parsed.segments().split_last() else {
            return Err(Error::UnknownNode(path.to_string()));
        };

        let mut dev = &self.root;
        for seg in parents {
            dev = match dev.child(seg) {
                Some(Node::Device(d)) => d,
                _ => return Err(Error::UnknownNode(path.to_string())),
            };
        }
        let node = dev
            .child(leaf)
            .ok_or_else(|| Error::UnknownNode(path.to_string()))?;
        Ok((dev, node))
    }

    /// Node at `path`
    pub fn find(&self, path: &str) -> Result<&Node> {
        self.locate(path).map(|(_, node)| node)
    }

    /// Device at `path`; the empty path is the root
    pub fn device(&self, path: &str) -> Result<&Device> {
        if path.is_empty() {
            return Ok(&self.root);
        }
        match self.find(path)? {
            Node::Device(d) => Ok(d),
            _ => Err(Error::WrongNodeKind {
                path: path.to_string(),
                expected: "device",
            }),
        }
    }

    /// Register at `path`
    pub fn register(&self, path: &str) -> Result<&RegisterNode> {
        match self.find(path)? {
            Node::Register(r) => Ok(r),
            _ => Err(Error::WrongNodeKind {
                path: path.to_string(),
                expected: "register",
            }),
        }
    }

    /// Command at `path`
    pub fn command(&self, path: &str) -> Result<&RemoteCommand> {
        match self.find(path)? {
            Node::Command(c) => Ok(c),
            _ => Err(Error::WrongNodeKind {
                path: path.to_string(),
                expected: "command",
            }),
        }
    }

    /// Memory window at `path`
    pub fn memory(&self, path: &str) -> Result<&MemoryBlock> {
        match self.find(path)? {
            Node::Memory(m) => Ok(m),
            _ => Err(Error::WrongNodeKind {
                path: path.to_string(),
                expected: "memory block",
            }),
        }
    }

    /// Absolute location of the node at `path`, composed from the relative
    /// offsets along the path
    pub fn resolve(&self, path: &str) -> Result<Location> {
        let parsed = NodePath::parse(path)?;
        let mut addr = self.root.address();
        let mut dev = &self.root;
        let mut node = None;

        for seg in parsed.segments() {
            if node.is_some() {
                return Err(Error::UnknownNode(path.to_string()));
            }
            let child = dev
                .child(seg)
                .ok_or_else(|| Error::UnknownNode(path.to_string()))?;
            let offset = child.relative_offset().ok_or_else(|| Error::WrongNodeKind {
                path: path.to_string(),
                expected: "addressable node",
            })?;
            addr = address::offset_by(addr, offset, path)?;
            match child {
                Node::Device(d) => dev = d,
                other => node = Some(other),
            }
        }

        let location = match node {
            Some(Node::Register(r)) => Location {
                address: addr,
                byte_width: r.byte_width(),
                bit_offset: r.bit_offset(),
                bit_size: r.bit_size(),
            },
            Some(Node::Command(c)) => Location {
                address: addr,
                byte_width: c.register().byte_width(),
                bit_offset: c.register().bit_offset(),
                bit_size: c.register().bit_size(),
            },
            Some(Node::Memory(m)) => Location {
                address: addr,
                byte_width: m.size(),
                bit_offset: 0,
                bit_size: m.size() * 8,
            },
            _ => Location {
                address: addr,
                byte_width: 0,
                bit_offset: 0,
                bit_size: 0,
            },
        };
        Ok(location)
    }

    /// Read and decode a register, or compute a derived variable
    pub fn read<T: MemoryTransport + ?Sized>(&self, t: &mut T, path: &str) -> Result<Value> {
        match self.locate(path)? {
            (_, Node::Register(r)) => r.read(t),
            (dev, Node::Derived(var)) => dev.get(t, var).map(Value::Float),
            _ => Err(Error::WrongNodeKind {
                path: path.to_string(),
                expected: "register or derived variable",
            }),
        }
    }

    /// Raw field value of the register at `path`
    pub fn read_raw<T: MemoryTransport + ?Sized>(&self, t: &mut T, path: &str) -> Result<u64> {
        self.register(path)?.read_raw(t)
    }

    /// Physical value of the derived variable at `path`
    pub fn get<T: MemoryTransport + ?Sized>(&self, t: &mut T, path: &str) -> Result<f64> {
        match self.locate(path)? {
            (dev, Node::Derived(var)) => dev.get(t, var),
            _ => Err(Error::WrongNodeKind {
                path: path.to_string(),
                expected: "derived variable",
            }),
        }
    }

    /// Write the derived variable at `path` through its inverse transform
    pub fn set<T: MemoryTransport + ?Sized>(&self, t: &mut T, path: &str, value: f64) -> Result<()> {
        match self.locate(path)? {
            (dev, Node::Derived(var)) => dev.set(t, var, value),
            _ => Err(Error::WrongNodeKind {
                path: path.to_string(),
                expected: "derived variable",
            }),
        }
    }

    /// Write a raw field value to the register at `path`
    pub fn write_raw<T: MemoryTransport + ?Sized>(
        &self,
        t: &mut T,
        path: &str,
        value: u64,
    ) -> Result<()> {
        self.register(path)?.write_raw(t, value)
    }

    /// Parse `text` according to the node's encoding and write it
    ///
    /// Integers accept decimal or `0x` hex, flags accept `true`/`false`/`1`/`0`,
    /// enumerated fields accept a label or a code, derived variables accept a
    /// physical value.
    pub fn write_str<T: MemoryTransport + ?Sized>(
        &self,
        t: &mut T,
        path: &str,
        text: &str,
    ) -> Result<()> {
        let invalid = |name: &str| Error::InvalidValue {
            name: name.to_string(),
            text: text.to_string(),
        };

        match self.locate(path)? {
            (_, Node::Register(r)) => match r.encoding() {
                Encoding::UnsignedInt => {
                    let v = parse_u64(text).ok_or_else(|| invalid(r.name()))?;
                    r.write_raw(t, v)
                }
                Encoding::Bool => {
                    let v = parse_bool(text).ok_or_else(|| invalid(r.name()))?;
                    r.write_bool(t, v)
                }
                Encoding::EnumMap(map) => match map.code(text) {
                    Some(code) => r.write_raw(t, code),
                    None => match parse_u64(text) {
                        Some(code) => r.write_raw(t, code),
                        None => r.write_label(t, text),
                    },
                },
                Encoding::FixedString(_) => r.write_string(t, text),
            },
            (dev, Node::Derived(var)) => {
                let v: f64 = text.trim().parse().map_err(|_| invalid(var.name()))?;
                dev.set(t, var, v)
            }
            _ => Err(Error::WrongNodeKind {
                path: path.to_string(),
                expected: "register or derived variable",
            }),
        }
    }

    /// Invoke the command at `path`
    pub fn invoke<T: MemoryTransport + ?Sized>(
        &self,
        t: &mut T,
        path: &str,
    ) -> Result<Option<u64>> {
        self.command(path)?.invoke(t)
    }

    /// Read every readable register and derived variable
    ///
    /// The first failure aborts the traversal and carries the path of the
    /// node being read.
    pub fn read_all<T: MemoryTransport + ?Sized>(&self, t: &mut T) -> Result<Snapshot> {
        let mut snapshot = Snapshot::default();
        read_device(&self.root, "", t, &mut snapshot)?;
        log::debug!("read_all: {} values", snapshot.len());
        Ok(snapshot)
    }

    /// Visit every node depth-first with its path and depth
    pub fn walk(&self, mut visit: impl FnMut(&str, usize, &Node)) {
        walk_device(&self.root, "", 0, &mut visit);
    }
}

fn read_device<T: MemoryTransport + ?Sized>(
    dev: &Device,
    prefix: &str,
    t: &mut T,
    out: &mut Snapshot,
) -> Result<()> {
    if let Some(hook) = dev.pre_read() {
        hook.invoke(t)
            .map_err(|e| e.at_path(address::join(prefix, hook.name())))?;
    }

    let cache = ReadCache::fill(dev, prefix, t)?;

    for child in dev.children() {
        let path = address::join(prefix, child.name());
        match child {
            Node::Register(r) if r.access().readable() => {
                let value = cache
                    .bytes(r, t)
                    .and_then(|bytes| r.decode(&bytes))
                    .map_err(|e| e.at_path(&path))?;
                out.entries.push(Entry {
                    path,
                    value,
                    units: None,
                    precision: None,
                });
            }
            Node::Derived(var) => {
                let raw = var
                    .slots
                    .iter()
                    .map(|&slot| {
                        let src = dev.source(slot)?;
                        let bytes = cache.bytes(src, t)?;
                        src.decode_raw(&bytes)
                    })
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| e.at_path(&path))?;
                out.entries.push(Entry {
                    path,
                    value: Value::Float(var.compute(&raw)),
                    units: Some(var.unit().to_string()).filter(|u| !u.is_empty()),
                    precision: Some(var.display_precision()),
                });
            }
            Node::Device(sub) => read_device(sub, &path, t, out)?,
            _ => {}
        }
    }
    Ok(())
}

fn walk_device(
    dev: &Device,
    prefix: &str,
    depth: usize,
    visit: &mut dyn FnMut(&str, usize, &Node),
) {
    for child in dev.children() {
        let path = address::join(prefix, child.name());
        visit(&path, depth, child);
        if let Node::Device(sub) = child {
            walk_device(sub, &path, depth + 1, visit);
        }
    }
}

fn parse_u64(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derived::{Linear, Transform};
    use crate::error::TransportOp;
    use crate::register::EnumMap;
    use crate::test_support::MemTransport;

    fn monitor() -> Device {
        let mut dev = Device::new("Mon");
        dev.add_register(RegisterNode::new("Enable", 0x0).bits(0, 1).boolean())
            .unwrap();
        dev.add_register(
            RegisterNode::new("Channel", 0x0)
                .bits(1, 2)
                .enum_map(EnumMap::new([(0, "Sense"), (1, "Vin")]).unwrap()),
        )
        .unwrap();
        dev.add_register(RegisterNode::new("Raw", 0x4).bits(4, 12).read_only())
            .unwrap();
        dev.add_register(RegisterNode::new("Limit", 0x8)).unwrap();
        dev.add_derived(
            DerivedVariable::linear("Volts", "Raw", Linear::ratio(3.0, 4096.0)).units("V"),
        )
        .unwrap();
        dev.add_derived(DerivedVariable::linear("LimitVolts", "Limit", Linear::scale(0.5)).read_write())
            .unwrap();
        dev.add_command(RemoteCommand::trigger("Trigger", 0x100)).unwrap();
        dev.set_pre_read("Trigger").unwrap();
        dev
    }

    fn tree() -> DeviceTree {
        let mut core = Device::new("Core");
        // Built inside-out: Mon is placed before Core gets its own offset
        core.add_device(0x200, monitor()).unwrap();
        core.add_register(RegisterNode::new("Version", 0x0).read_only())
            .unwrap();

        let mut root = Device::new("Root");
        root.add_device(0x1000, core).unwrap();
        DeviceTree::new(root)
    }

    #[test]
    fn test_resolve_composes_offsets() {
        let tree = tree();
        let loc = tree.resolve("Core.Mon.Raw").unwrap();
        assert_eq!(loc.address, 0x1204);
        assert_eq!((loc.bit_offset, loc.bit_size), (4, 12));
        assert_eq!(tree.register("Core.Mon.Raw").unwrap().address(), 0x1204);
        assert_eq!(tree.resolve("Core.Mon").unwrap().address, 0x1200);
        assert_eq!(tree.command("Core.Mon.Trigger").unwrap().register().address(), 0x1300);
    }

    #[test]
    fn test_unknown_node() {
        let tree = tree();
        assert!(matches!(tree.find("Core.Nope"), Err(Error::UnknownNode(_))));
        assert!(matches!(tree.resolve("Core.Version.Deeper"), Err(Error::UnknownNode(_))));
        assert!(matches!(
            tree.register("Core.Mon"),
            Err(Error::WrongNodeKind { .. })
        ));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut dev = Device::new("Dev");
        dev.add_register(RegisterNode::new("A", 0)).unwrap();
        assert!(matches!(
            dev.add_register(RegisterNode::new("A", 4)),
            Err(Error::DuplicateNode { .. })
        ));
    }

    #[test]
    fn test_address_overflow() {
        let mut inner = Device::new("Inner");
        inner.add_register(RegisterNode::new("Reg", 0x10)).unwrap();
        let mut root = Device::new("Root");
        assert!(matches!(
            root.add_device(u64::MAX - 4, inner),
            Err(Error::AddressOverflow(_))
        ));
    }

    #[test]
    fn test_derived_source_must_exist() {
        let mut dev = Device::new("Dev");
        let err = dev
            .add_derived(DerivedVariable::linear("V", "Missing", Linear::scale(1.0)))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidField { .. }));

        dev.add_register(RegisterNode::new("Ro", 0).read_only()).unwrap();
        assert!(dev
            .add_derived(DerivedVariable::linear("V", "Ro", Linear::scale(1.0)).read_write())
            .is_err());
    }

    #[test]
    fn test_read_all_batches_and_runs_hook_first() {
        let tree = tree();
        let mut t = MemTransport::new();
        t.poke_u32(0x1000, 0x0001_0203);
        t.poke_u32(0x1200, 0b011);
        t.poke_u32(0x1204, 2048 << 4);
        t.poke_u32(0x1208, 40);

        let snap = tree.read_all(&mut t).unwrap();

        // Core's own register, then the hook, then one range read of Mon
        assert_eq!(t.log()[0], (TransportOp::Read, 0x1000, 4));
        assert_eq!(t.log()[1], (TransportOp::Write, 0x1300, 4));
        assert_eq!(t.log()[2], (TransportOp::Read, 0x1200, 12));
        assert_eq!(t.log().len(), 3);

        assert_eq!(snap.get("Core.Mon.Enable"), Some(&Value::Bool(true)));
        assert_eq!(
            snap.get("Core.Mon.Channel"),
            Some(&Value::Enum {
                code: 1,
                label: Some("Vin".into())
            })
        );
        assert_eq!(snap.get("Core.Mon.Raw"), Some(&Value::UInt(2048)));
        assert_eq!(snap.get("Core.Mon.Volts"), Some(&Value::Float(1.5)));
        assert_eq!(snap.get("Core.Mon.LimitVolts"), Some(&Value::Float(20.0)));
        assert_eq!(snap.get("Core.Version"), Some(&Value::UInt(0x0001_0203)));

        let volts = snap.iter().find(|e| e.path == "Core.Mon.Volts").unwrap();
        assert_eq!(volts.display_value(), "1.500 V");
    }

    #[test]
    fn test_read_all_without_range_reads() {
        let tree = tree();
        let mut t = MemTransport::without_range_reads();
        tree.read_all(&mut t).unwrap();

        // Trigger, then one read per distinct register range
        assert_eq!(t.writes(), 1);
        assert_eq!(t.reads(), 4);
        assert!(t.log().iter().all(|&(_, _, len)| len == 4));
    }

    #[test]
    fn test_read_all_respects_max_transaction_len() {
        let tree = tree();
        let mut t = MemTransport::new().with_max_len(8);
        tree.read_all(&mut t).unwrap();
        assert_eq!(t.log()[2], (TransportOp::Read, 0x1200, 8));
        assert_eq!(t.log()[3], (TransportOp::Read, 0x1208, 4));
    }

    #[test]
    fn test_read_all_failure_carries_path() {
        let tree = tree();
        let mut t = MemTransport::without_range_reads();
        t.fail_read_at(0x1204);

        let err = tree.read_all(&mut t).unwrap_err();
        match &err {
            Error::AtPath { path, .. } => assert_eq!(path, "Core.Mon.Raw"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.transport().is_some());
        // Traversal stopped before Limit
        assert!(t.log().iter().all(|&(_, addr, _)| addr != 0x1208));
    }

    #[test]
    fn test_read_all_does_not_cache_across_passes() {
        let tree = tree();
        let mut t = MemTransport::new();
        t.poke_u32(0x1204, 100 << 4);
        let first = tree.read_all(&mut t).unwrap();
        t.poke_u32(0x1204, 200 << 4);
        let second = tree.read_all(&mut t).unwrap();

        assert_eq!(first.get("Core.Mon.Raw"), Some(&Value::UInt(100)));
        assert_eq!(second.get("Core.Mon.Raw"), Some(&Value::UInt(200)));
        assert_eq!(t.writes(), 2);
    }

    #[test]
    fn test_derived_get_and_set() {
        let tree = tree();
        let mut t = MemTransport::new();
        t.poke_u32(0x1204, 4095 << 4);

        let v = tree.get(&mut t, "Core.Mon.Volts").unwrap();
        assert!((v - 4095.0 * 3.0 / 4096.0).abs() < 1e-9);

        tree.set(&mut t, "Core.Mon.LimitVolts", 12.5).unwrap();
        assert_eq!(t.peek_u32(0x1208), 25);
        assert!(matches!(
            tree.set(&mut t, "Core.Mon.Volts", 1.0),
            Err(Error::Unsupported { .. })
        ));
    }

    #[test]
    fn test_derived_set_then_get() {
        let tree = tree();
        let mut t = MemTransport::new();
        for volts in [0.0, 12.5, 100.0] {
            tree.set(&mut t, "Core.Mon.LimitVolts", volts).unwrap();
            let back = tree.get(&mut t, "Core.Mon.LimitVolts").unwrap();
            assert!((back - volts).abs() < 1e-9);
        }
    }

    /// Splits an 8-bit value over two 4-bit registers
    struct Nibbles;

    impl Transform for Nibbles {
        fn forward(&self, raw: &[u64]) -> f64 {
            (raw[0] | raw[1] << 4) as f64
        }

        fn inverse(&self, value: f64) -> Option<Vec<u64>> {
            let v = value as u64;
            Some(vec![v & 0xF, v >> 4])
        }

        fn invertible(&self) -> bool {
            true
        }
    }

    fn split_device() -> DeviceTree {
        let mut dev = Device::new("Root");
        dev.add_register(RegisterNode::new("Lo", 0x0).bits(0, 4)).unwrap();
        dev.add_register(RegisterNode::new("Hi", 0x4).bits(0, 4)).unwrap();
        dev.add_derived(DerivedVariable::new("Word", &["Lo", "Hi"], Nibbles).read_write())
            .unwrap();
        DeviceTree::new(dev)
    }

    #[test]
    fn test_derived_set_checks_all_sources_first() {
        let tree = split_device();
        let mut t = MemTransport::new();

        assert!(matches!(
            tree.set(&mut t, "Word", 0x1F3 as f64),
            Err(Error::ValueOutOfRange { name, .. }) if name == "Hi"
        ));
        assert_eq!(t.writes(), 0);
        assert_eq!(t.peek_u32(0x0), 0);

        tree.set(&mut t, "Word", 0xA5 as f64).unwrap();
        assert_eq!((t.peek_u32(0x0), t.peek_u32(0x4)), (0x5, 0xA));
        assert_eq!(tree.get(&mut t, "Word").unwrap(), 0xA5 as f64);
    }

    #[test]
    fn test_resolve_is_stable() {
        let tree = tree();
        let first = tree.resolve("Core.Mon.Channel").unwrap();
        let second = tree.resolve("Core.Mon.Channel").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.address, 0x1200);
    }

    #[test]
    fn test_read_all_splits_wide_nodes() {
        let mut dev = Device::new("Root");
        dev.add_register(RegisterNode::new("BuildStamp", 0x800).string(256).read_only())
            .unwrap();
        let tree = DeviceTree::new(dev);
        let mut t = MemTransport::new().with_max_len(64);
        t.poke(0x800, b"pwrctl build");

        let snapshot = tree.read_all(&mut t).unwrap();
        assert_eq!(
            snapshot.get("BuildStamp"),
            Some(&Value::Str("pwrctl build".into()))
        );
        assert_eq!(t.reads(), 4);
        assert!(t.log().iter().all(|&(_, _, len)| len <= 64));
    }

    #[test]
    fn test_write_str_by_encoding() {
        let tree = tree();
        let mut t = MemTransport::new();

        tree.write_str(&mut t, "Core.Mon.Limit", "0x1F").unwrap();
        assert_eq!(t.peek_u32(0x1208), 0x1F);

        tree.write_str(&mut t, "Core.Mon.Enable", "true").unwrap();
        tree.write_str(&mut t, "Core.Mon.Channel", "Vin").unwrap();
        assert_eq!(t.peek_u32(0x1200), 0b011);

        assert!(matches!(
            tree.write_str(&mut t, "Core.Mon.Enable", "maybe"),
            Err(Error::InvalidValue { .. })
        ));
        assert!(matches!(
            tree.write_str(&mut t, "Core.Mon.Channel", "ADIN"),
            Err(Error::UnknownLabel { .. })
        ));
    }

    #[test]
    fn test_walk_visits_depth_first() {
        let tree = tree();
        let mut seen = Vec::new();
        tree.walk(|path, depth, node| seen.push((path.to_string(), depth, node.kind())));
        assert_eq!(seen[0], ("Core".to_string(), 0, "device"));
        assert_eq!(seen[1], ("Core.Mon".to_string(), 1, "device"));
        assert_eq!(seen[2].0, "Core.Mon.Enable");
        assert_eq!(seen.last().unwrap().0, "Core.Version");
    }
}
