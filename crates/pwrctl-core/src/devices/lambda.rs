//! Lambda bulk power supply behind the I2C bridge

use crate::derived::{DerivedVariable, Linear};
use crate::error::Result;
use crate::register::{RegisterNode, RemoteCommand};
use crate::tree::Device;

/// Identification strings: name, offset, length
const STRINGS: [(&str, u64, u32); 6] = [
    ("SerialNumber", 0x00, 20),
    ("FirmwareVersion", 0x14, 4),
    ("ProductVersion", 0x18, 4),
    ("PartNumber", 0x2C, 12),
    ("ManufDate", 0x38, 8),
    ("ManufLoc", 0x40, 3),
];

/// Register map of one supply
///
/// `v_scale` and `i_scale` convert the output voltage and current codes to
/// volts and amps.
pub fn device(name: &str, v_scale: f64, i_scale: f64) -> Result<Device> {
    let mut dev = Device::new(name).description("Lambda Power Supply I2C");

    dev.add_command(RemoteCommand::trigger("ADCReadStart", 0x100))?;
    dev.set_pre_read("ADCReadStart")?;

    for (field, offset, len) in STRINGS {
        dev.add_register(RegisterNode::new(field, offset).string(len).read_only())?;
    }

    dev.add_register(RegisterNode::new("OutputV", 0x1C).read_only())?;
    dev.add_derived(
        DerivedVariable::linear("OutputVolts", "OutputV", Linear::scale(v_scale)).units("volts"),
    )?;
    dev.add_register(RegisterNode::new("OutputI", 0x20).read_only())?;
    dev.add_derived(
        DerivedVariable::linear("OutputCurrent", "OutputI", Linear::scale(i_scale)).units("Amps"),
    )?;
    dev.add_register(RegisterNode::new("PlateTemp", 0x24).read_only())?;
    dev.add_derived(
        DerivedVariable::linear(
            "SupplyTemp",
            "PlateTemp",
            Linear::scale(1.0 / 2.048)
                .with_raw_offset(610.0)
                .with_offset(25.0),
        )
        .units("temp(c)"),
    )?;
    dev.add_register(RegisterNode::new("Status", 0x28).read_only())?;

    Ok(dev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportOp;
    use crate::register::Value;
    use crate::test_support::MemTransport;
    use crate::tree::DeviceTree;

    const BASE: u64 = 0x11_0000;

    #[test]
    fn test_read_all_single_span() {
        let mut root = Device::new("Root");
        root.add_device(BASE, device("Lambda", 0.01, 0.002).unwrap())
            .unwrap();
        let tree = DeviceTree::new(root);

        let mut t = MemTransport::new();
        t.poke(BASE, b"SN-000123");
        t.poke(BASE + 0x2C, b"GEN60-12");
        t.poke_u32(BASE + 0x1C, 4800);
        t.poke_u32(BASE + 0x20, 1500);
        t.poke_u32(BASE + 0x24, 610);

        let snap = tree.read_all(&mut t).unwrap();

        // Trigger, then 0x00..0x43 as one range
        assert_eq!(t.log()[0], (TransportOp::Write, BASE + 0x100, 4));
        assert_eq!(t.log()[1], (TransportOp::Read, BASE, 0x43));
        assert_eq!(t.log().len(), 2);

        assert_eq!(snap.get("Lambda.SerialNumber"), Some(&Value::Str("SN-000123".into())));
        assert_eq!(snap.get("Lambda.PartNumber"), Some(&Value::Str("GEN60-12".into())));
        assert_eq!(snap.get("Lambda.ManufLoc"), Some(&Value::Str(String::new())));
        assert_eq!(snap.get("Lambda.SupplyTemp"), Some(&Value::Float(25.0)));

        let Some(Value::Float(volts)) = snap.get("Lambda.OutputVolts") else {
            panic!("missing output voltage");
        };
        assert!((volts - 48.0).abs() < 1e-9);
    }
}
