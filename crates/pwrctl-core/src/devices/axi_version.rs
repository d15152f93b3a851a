//! AxiVersion identity block

use core::fmt;

use crate::address;
use crate::error::Result;
use crate::register::{CommandAction, RegisterNode, RemoteCommand};
use crate::transport::MemoryTransport;
use crate::tree::{Device, DeviceTree};

/// Device name inside the Core container
pub const NAME: &str = "AxiVersion";

/// Length of the BuildStamp string
pub const BUILD_STAMP_LEN: u32 = 256;

/// Register map of the identity block
pub fn device() -> Result<Device> {
    let mut dev = Device::new(NAME).description("AXI-Lite version module");

    dev.add_register(
        RegisterNode::new("FpgaVersion", 0x000)
            .read_only()
            .description("FPGA firmware version"),
    )?;
    dev.add_register(
        RegisterNode::new("ScratchPad", 0x004).description("Register to test reads and writes"),
    )?;
    dev.add_register(
        RegisterNode::new("UpTimeCnt", 0x008)
            .read_only()
            .description("Seconds since last reset"),
    )?;
    dev.add_register(
        RegisterNode::new("FpgaReloadHalt", 0x100)
            .bits(0, 1)
            .boolean()
            .description("Used to halt automatic reloads via AxiVersion"),
    )?;
    dev.add_command(RemoteCommand::new(
        RegisterNode::new("FpgaReload", 0x104)
            .bits(0, 1)
            .description("Reload the FPGA from the attached PROM"),
        CommandAction::Post(1),
    ))?;
    dev.add_register(
        RegisterNode::new("FpgaReloadAddress", 0x108).description("Reload start address"),
    )?;
    dev.add_register(
        RegisterNode::new("UserReset", 0x10C)
            .bits(0, 1)
            .boolean()
            .description("Optional user reset"),
    )?;
    dev.add_register(
        RegisterNode::new("FdSerial", 0x300)
            .bits(0, 64)
            .read_only()
            .description("Board ID value read from DS2411 chip"),
    )?;
    dev.add_register(
        RegisterNode::new("DeviceId", 0x500)
            .read_only()
            .description("Device identification"),
    )?;
    dev.add_register(
        RegisterNode::new("DeviceDna", 0x700)
            .bits(0, 64)
            .read_only()
            .description("Xilinx device DNA value burned into FPGA"),
    )?;
    dev.add_register(
        RegisterNode::new("BuildStamp", 0x800)
            .string(BUILD_STAMP_LEN)
            .read_only()
            .description("Firmware build string"),
    )?;
    Ok(dev)
}

/// Identity snapshot used to compare firmware before and after an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// FpgaVersion
    pub fpga_version: u32,
    /// UpTimeCnt, in seconds
    pub up_time: u32,
    /// DeviceDna
    pub device_dna: u64,
    /// BuildStamp
    pub build_stamp: String,
}

impl Identity {
    /// Read the identity of the AxiVersion block at `path`
    pub fn read<T: MemoryTransport + ?Sized>(
        tree: &DeviceTree,
        path: &str,
        t: &mut T,
    ) -> Result<Self> {
        let reg = |name: &str| tree.register(&address::join(path, name));

        Ok(Self {
            fpga_version: reg("FpgaVersion")?.read_raw(t)? as u32,
            up_time: reg("UpTimeCnt")?.read_raw(t)? as u32,
            device_dna: reg("DeviceDna")?.read_raw(t)?,
            build_stamp: reg("BuildStamp")?.read_string(t)?,
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FwVersion    = 0x{:08X}", self.fpga_version)?;
        writeln!(f, "UpTime       = {}", format_up_time(self.up_time))?;
        writeln!(f, "DeviceDna    = 0x{:016X}", self.device_dna)?;
        write!(f, "BuildStamp   = {}", self.build_stamp)
    }
}

/// `3 days, 04:05:06`
pub fn format_up_time(secs: u32) -> String {
    let days = secs / 86_400;
    let rem = secs % 86_400;
    format!(
        "{} days, {:02}:{:02}:{:02}",
        days,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemTransport;

    fn tree() -> DeviceTree {
        let mut root = Device::new("Root");
        root.add_device(0x1C_0000, device().unwrap()).unwrap();
        DeviceTree::new(root)
    }

    #[test]
    fn test_identity_read() {
        let tree = tree();
        let mut t = MemTransport::new();
        t.poke_u32(0x1C_0000, 0x0001_0203);
        t.poke_u32(0x1C_0008, 90_061);
        t.poke(0x1C_0700, &0x0123_4567_89AB_CDEFu64.to_le_bytes());
        t.poke(0x1C_0800, b"PwrCtrl: Vivado v2016.4, built Mon");

        let id = Identity::read(&tree, NAME, &mut t).unwrap();
        assert_eq!(id.fpga_version, 0x0001_0203);
        assert_eq!(id.up_time, 90_061);
        assert_eq!(id.device_dna, 0x0123_4567_89AB_CDEF);
        assert_eq!(id.build_stamp, "PwrCtrl: Vivado v2016.4, built Mon");
        assert!(id.to_string().contains("FwVersion    = 0x00010203"));
    }

    #[test]
    fn test_reload_posts_one() {
        let tree = tree();
        let mut t = MemTransport::new();
        tree.invoke(&mut t, "AxiVersion.FpgaReload").unwrap();
        assert_eq!(t.peek_u32(0x1C_0104), 1);
        assert_eq!(t.reads(), 0);
    }

    #[test]
    fn test_format_up_time() {
        assert_eq!(format_up_time(0), "0 days, 00:00:00");
        assert_eq!(format_up_time(90_061), "1 days, 01:01:01");
    }
}
