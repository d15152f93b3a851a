//! Xilinx XADC on-chip monitor

use crate::derived::{DerivedVariable, Linear};
use crate::error::Result;
use crate::register::RegisterNode;
use crate::tree::Device;

/// Device name inside the Core container
pub const NAME: &str = "Xadc";

fn add_supply(dev: &mut Device, name: &str, offset: u64) -> Result<()> {
    dev.add_register(RegisterNode::new(name, offset).bits(4, 12).read_only())?;
    dev.add_derived(
        DerivedVariable::linear(format!("{}Volts", name), name, Linear::ratio(3.0, 4096.0))
            .units("V"),
    )
}

/// Register map of the XADC block
pub fn device() -> Result<Device> {
    let mut dev = Device::new(NAME).description("AXI-Lite XADC for Xilinx 7 Series");

    dev.add_register(
        RegisterNode::new("Temperature", 0x200)
            .bits(4, 12)
            .read_only()
            .description("Die temperature code"),
    )?;
    dev.add_derived(
        DerivedVariable::linear(
            "TemperatureCelsius",
            "Temperature",
            Linear::ratio(503.975, 4096.0).with_offset(-273.15),
        )
        .units("degC"),
    )?;
    add_supply(&mut dev, "VccInt", 0x204)?;
    add_supply(&mut dev, "VccAux", 0x208)?;
    add_supply(&mut dev, "VccBram", 0x218)?;
    Ok(dev)
}
