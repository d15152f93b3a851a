//! AxiMicronN25Q PROM controller block
//!
//! The controller stages program data in a 256-byte buffer. Each chunk is
//! written to the buffer, its target address and length are latched and the
//! commit command moves it into the PROM. Every write is acknowledged by the
//! transport before the next one is issued. After the last chunk, finalize
//! runs the controller's image check and raises `PROG_DONE` on success.

use bitflags::bitflags;

use crate::address;
use crate::error::Result;
use crate::register::{MemoryBlock, RegisterNode, RemoteCommand};
use crate::transport::MemoryTransport;
use crate::tree::{Device, DeviceTree};

/// Device name inside the Core container
pub const NAME: &str = "AxiMicronN25Q";

/// Offset of the program buffer inside the block
pub const PROGRAM_BUFFER_OFFSET: u64 = 0x100;

/// Depth of the program buffer in bytes
pub const PROGRAM_BUFFER_SIZE: u32 = 0x100;

bitflags! {
    /// Status register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PromStatus: u32 {
        /// Erase and program are refused until the password is written
        const LOCKED     = 1 << 0;
        /// An erase, commit or finalize is in progress
        const BUSY       = 1 << 1;
        /// The last finalize verified the whole image
        const PROG_DONE  = 1 << 2;
        /// A commit or finalize failed
        const PROG_ERROR = 1 << 3;
    }
}

/// Register map of the PROM controller
pub fn device() -> Result<Device> {
    let mut dev = Device::new(NAME).description("Micron N25Q PROM programmer");

    dev.add_register(
        RegisterNode::new("PasswordLock", 0x000).description("Write the unlock token to enable programming"),
    )?;
    dev.add_register(
        RegisterNode::new("Status", 0x004)
            .read_only()
            .description("Controller status flags"),
    )?;
    dev.add_register(
        RegisterNode::new("ProgramAddress", 0x008).description("PROM address of the staged chunk"),
    )?;
    dev.add_register(
        RegisterNode::new("ProgramLength", 0x00C)
            .bits(0, 9)
            .description("Length of the staged chunk"),
    )?;
    dev.add_command(RemoteCommand::trigger("Erase", 0x010))?;
    dev.add_command(RemoteCommand::trigger("Commit", 0x014))?;
    dev.add_command(RemoteCommand::trigger("Finalize", 0x018))?;
    dev.add_register(
        RegisterNode::new("ImageSize", 0x01C).description("Total image size in bytes"),
    )?;
    dev.add_memory(MemoryBlock::new(
        "ProgramBuffer",
        PROGRAM_BUFFER_OFFSET,
        PROGRAM_BUFFER_SIZE,
    ))?;
    Ok(dev)
}

/// Typed handle over the PROM controller at a tree path
pub struct PromController<'a> {
    tree: &'a DeviceTree,
    path: String,
}

impl<'a> PromController<'a> {
    /// Handle for the controller at `path`
    pub fn new(tree: &'a DeviceTree, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        tree.device(&path)?;
        Ok(Self { tree, path })
    }

    fn register(&self, name: &str) -> Result<&'a RegisterNode> {
        self.tree.register(&address::join(&self.path, name))
    }

    fn command(&self, name: &str) -> Result<&'a RemoteCommand> {
        self.tree.command(&address::join(&self.path, name))
    }

    /// Write the unlock token
    pub fn unlock<T: MemoryTransport + ?Sized>(&self, t: &mut T, token: u32) -> Result<()> {
        log::debug!("Unlocking {}", self.path);
        self.register("PasswordLock")?.write_raw(t, token as u64)
    }

    /// Current status flags
    pub fn status<T: MemoryTransport + ?Sized>(&self, t: &mut T) -> Result<PromStatus> {
        let raw = self.register("Status")?.read_raw(t)?;
        Ok(PromStatus::from_bits_truncate(raw as u32))
    }

    /// Erase the region that will receive an image of `image_len` bytes
    pub fn erase<T: MemoryTransport + ?Sized>(&self, t: &mut T, image_len: u32) -> Result<()> {
        log::debug!("Erasing {} bytes", image_len);
        self.register("ImageSize")?.write_raw(t, image_len as u64)?;
        self.command("Erase")?.invoke(t).map(drop)
    }

    /// Stage `data` and commit it at PROM address `offset`
    pub fn program_chunk<T: MemoryTransport + ?Sized>(
        &self,
        t: &mut T,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        let buffer = self
            .tree
            .memory(&address::join(&self.path, "ProgramBuffer"))?;
        buffer.write(t, 0, data)?;
        self.register("ProgramAddress")?.write_raw(t, offset as u64)?;
        self.register("ProgramLength")?.write_raw(t, data.len() as u64)?;
        self.command("Commit")?.invoke(t).map(drop)
    }

    /// Close the program sequence for an image of `image_len` bytes
    pub fn finalize<T: MemoryTransport + ?Sized>(&self, t: &mut T, image_len: u32) -> Result<()> {
        self.register("ImageSize")?.write_raw(t, image_len as u64)?;
        self.command("Finalize")?.invoke(t).map(drop)
    }

    /// Whether the controller reports a successful program
    pub fn prog_done<T: MemoryTransport + ?Sized>(&self, t: &mut T) -> Result<bool> {
        let status = self.status(t)?;
        log::debug!("PROM status: {:?}", status);
        Ok(status.contains(PromStatus::PROG_DONE) && !status.contains(PromStatus::PROG_ERROR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, TransportOp};
    use crate::test_support::MemTransport;

    const BASE: u64 = 0x24_0000;

    fn tree() -> DeviceTree {
        let mut root = Device::new("Root");
        root.add_device(BASE, device().unwrap()).unwrap();
        DeviceTree::new(root)
    }

    #[test]
    fn test_program_chunk_sequence() {
        let tree = tree();
        let prom = PromController::new(&tree, NAME).unwrap();
        let mut t = MemTransport::new();

        prom.program_chunk(&mut t, 0x200, &[0xAA; 16]).unwrap();

        let writes: Vec<_> = t
            .log()
            .iter()
            .filter(|(op, _, _)| *op == TransportOp::Write)
            .map(|&(_, addr, len)| (addr - BASE, len))
            .collect();
        assert_eq!(writes, vec![(0x100, 16), (0x008, 4), (0x00C, 4), (0x014, 4)]);
        assert_eq!(t.peek(BASE + 0x100, 16), vec![0xAA; 16]);
        assert_eq!(t.peek_u32(BASE + 0x008), 0x200);
        assert_eq!(t.peek_u32(BASE + 0x00C), 16);
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        let tree = tree();
        let prom = PromController::new(&tree, NAME).unwrap();
        let mut t = MemTransport::new();
        assert!(matches!(
            prom.program_chunk(&mut t, 0, &[0u8; 0x101]),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(t.log().is_empty());
    }

    #[test]
    fn test_prog_done_flags() {
        let tree = tree();
        let prom = PromController::new(&tree, NAME).unwrap();
        let mut t = MemTransport::new();

        t.poke_u32(BASE + 0x004, PromStatus::PROG_DONE.bits());
        assert!(prom.prog_done(&mut t).unwrap());

        t.poke_u32(BASE + 0x004, (PromStatus::PROG_DONE | PromStatus::PROG_ERROR).bits());
        assert!(!prom.prog_done(&mut t).unwrap());

        t.poke_u32(BASE + 0x004, PromStatus::LOCKED.bits());
        assert!(!prom.prog_done(&mut t).unwrap());
    }

    #[test]
    fn test_unlock_writes_token() {
        let tree = tree();
        let prom = PromController::new(&tree, NAME).unwrap();
        let mut t = MemTransport::new();
        prom.unlock(&mut t, 0xDEAD_BEEF).unwrap();
        assert_eq!(t.peek_u32(BASE), 0xDEAD_BEEF);
    }

    #[test]
    fn test_missing_controller() {
        let tree = tree();
        assert!(PromController::new(&tree, "Core.Nope").is_err());
    }
}
