//! Board assembly
//!
//! ```text
//! LsstPwrCtrlRoot
//! ├── Core                      (core_offset)
//! │   ├── AxiVersion            (version_slot * dev_stride)
//! │   ├── Xadc                  (xadc_slot * dev_stride)
//! │   └── AxiMicronN25Q         (prom_slot * dev_stride)
//! ├── <ltc2945 entries>         (configured offsets)
//! └── <lambda entries>          (configured offsets)
//! ```

use crate::config::BoardConfig;
use crate::devices::{axi_version, lambda, ltc2945, prom, xadc};
use crate::error::{Error, Result};
use crate::tree::{Device, DeviceTree};

/// Name of the core container
pub const CORE: &str = "Core";

/// Path of the identity block
pub const VERSION_PATH: &str = "Core.AxiVersion";

/// Path of the PROM controller
pub const PROM_PATH: &str = "Core.AxiMicronN25Q";

fn slot_offset(slot: u64, stride: u64, what: &str) -> Result<u64> {
    slot.checked_mul(stride)
        .ok_or_else(|| Error::Config(format!("{} slot {} overflows the address range", what, slot)))
}

/// Core container with the identity, XADC and PROM blocks
pub fn core(config: &BoardConfig) -> Result<Device> {
    let b = &config.board;
    let mut core = Device::new(CORE).description("Core Container");
    core.add_device(
        slot_offset(b.version_slot, b.dev_stride, axi_version::NAME)?,
        axi_version::device()?,
    )?;
    core.add_device(
        slot_offset(b.xadc_slot, b.dev_stride, xadc::NAME)?,
        xadc::device()?,
    )?;
    core.add_device(
        slot_offset(b.prom_slot, b.dev_stride, prom::NAME)?,
        prom::device()?,
    )?;
    Ok(core)
}

/// Build the full register map described by `config`
pub fn build_tree(config: &BoardConfig) -> Result<DeviceTree> {
    config.validate()?;

    let mut root = Device::new(config.board.root_name.as_str());
    root.add_device(config.board.core_offset, core(config)?)?;

    for m in &config.ltc2945 {
        log::debug!("LTC2945 '{}' at 0x{:08X} ({:?})", m.name, m.offset, m.layout);
        root.add_device(m.offset, ltc2945::device(&m.name, m.shunt, m.layout)?)?;
    }
    for l in &config.lambda {
        log::debug!("Lambda '{}' at 0x{:08X}", l.name, l.offset);
        root.add_device(l.offset, lambda::device(&l.name, l.v_scale, l.i_scale)?)?;
    }

    Ok(DeviceTree::new(root))
}
