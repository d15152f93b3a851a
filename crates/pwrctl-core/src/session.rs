//! Session lifecycle
//!
//! A session owns one transport connection and the register map it is
//! interpreted against. Opening the session acquires the transport and
//! closing it hands the transport back; there is no process-wide state.

use crate::error::Result;
use crate::register::Value;
use crate::transport::MemoryTransport;
use crate::tree::{DeviceTree, Snapshot};

/// Transport plus register map
pub struct Session<T: MemoryTransport> {
    name: String,
    transport: T,
    tree: DeviceTree,
}

impl<T: MemoryTransport> Session<T> {
    /// Start a session named `name` over `transport`
    pub fn open(name: impl Into<String>, transport: T, tree: DeviceTree) -> Self {
        let name = name.into();
        log::info!("Session '{}' opened", name);
        Self {
            name,
            transport,
            tree,
        }
    }

    /// Session name (the transport spec it was opened with)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register map
    pub fn tree(&self) -> &DeviceTree {
        &self.tree
    }

    /// Underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Borrow the map and the transport at the same time
    pub fn split(&mut self) -> (&DeviceTree, &mut T) {
        (&self.tree, &mut self.transport)
    }

    /// See [`DeviceTree::read`]
    pub fn read(&mut self, path: &str) -> Result<Value> {
        self.tree.read(&mut self.transport, path)
    }

    /// See [`DeviceTree::read_all`]
    pub fn read_all(&mut self) -> Result<Snapshot> {
        self.tree.read_all(&mut self.transport)
    }

    /// See [`DeviceTree::write_raw`]
    pub fn write_raw(&mut self, path: &str, value: u64) -> Result<()> {
        self.tree.write_raw(&mut self.transport, path, value)
    }

    /// See [`DeviceTree::write_str`]
    pub fn write_str(&mut self, path: &str, text: &str) -> Result<()> {
        self.tree.write_str(&mut self.transport, path, text)
    }

    /// See [`DeviceTree::set`]
    pub fn set(&mut self, path: &str, value: f64) -> Result<()> {
        self.tree.set(&mut self.transport, path, value)
    }

    /// See [`DeviceTree::invoke`]
    pub fn invoke(&mut self, path: &str) -> Result<Option<u64>> {
        self.tree.invoke(&mut self.transport, path)
    }

    /// End the session and release the transport
    pub fn close(self) -> T {
        log::info!("Session '{}' closed", self.name);
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::RegisterNode;
    use crate::tree::Device;
    use crate::test_support::MemTransport;

    #[test]
    fn test_session_round_trip() {
        let mut dev = Device::new("Root");
        dev.add_register(RegisterNode::new("ScratchPad", 0x4)).unwrap();
        let mut session = Session::open("mem", MemTransport::new(), DeviceTree::new(dev));

        session.write_str("ScratchPad", "0x55").unwrap();
        assert_eq!(session.read("ScratchPad").unwrap(), Value::UInt(0x55));
        assert_eq!(session.read_all().unwrap().len(), 1);

        let t = session.close();
        assert_eq!(t.peek_u32(0x4), 0x55);
    }
}
