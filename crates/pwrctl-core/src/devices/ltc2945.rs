//! LTC2945 wide-range power monitor behind the I2C bridge
//!
//! Two bridge firmwares expose the chip with different register maps. The
//! word layout gives every chip register its own 32-bit word and samples on
//! demand through `ADCReadStart`. The byte layout mirrors the chip's byte
//! addresses for the status registers and places the ADC results at word
//! indices. Which one a board carries is configuration, see
//! [`Ltc2945Layout`].

use crate::config::Ltc2945Layout;
use crate::derived::{DerivedVariable, Linear};
use crate::error::Result;
use crate::register::{CommandAction, EnumMap, RegisterNode, RemoteCommand};
use crate::tree::Device;

const ALERTS: [&str; 8] = [
    "MaxPowerAlert",
    "MinPowerAlert",
    "MaxSenseAlert",
    "MinSenseAlert",
    "MaxVinAlert",
    "MinVinAlert",
    "MaxADinAlert",
    "MinADinAlert",
];

const STATUSES: [&str; 8] = [
    "PowerOvervaluePresent",
    "PowerUndervaluePresent",
    "SenseOvervaluePresent",
    "SenseUndervaluePresent",
    "VinOvervaluePresent",
    "VinUndervaluePresent",
    "ADinOvervaluePresent",
    "ADinUndervaluePresent",
];

const FAULTS: [&str; 8] = [
    "PowerOvervalueFault",
    "PowerUndervalueFault",
    "SenseOvervalueFault",
    "SenseUndervalueFault",
    "VinOvervalueFault",
    "VinUndervalueFault",
    "ADinOvervalueFault",
    "ADinUndervalueFault",
];

/// Watts per power code
pub fn power_gain(shunt: f64) -> f64 {
    10.48 / 16_777_216.0 / shunt
}

/// Amps per sense code
pub fn current_gain(shunt: f64) -> f64 {
    0.1024 / 4096.0 / shunt
}

/// Volts per Vin/ADin code
pub fn voltage_gain() -> f64 {
    102.4 / 4096.0
}

/// Register offsets and field placement of the byte-wide status registers
struct Layout {
    control: u64,
    alert: u64,
    status: u64,
    fault: u64,
    width: Option<u32>,
}

impl Layout {
    fn of(layout: Ltc2945Layout) -> Self {
        match layout {
            Ltc2945Layout::Word => Layout {
                control: 0x0,
                alert: 0x4,
                status: 0x8,
                fault: 0xC,
                width: None,
            },
            Ltc2945Layout::Byte => Layout {
                control: 0x0,
                alert: 0x1,
                status: 0x2,
                fault: 0x3,
                width: Some(1),
            },
        }
    }

    fn field(&self, name: &str, offset: u64, bit: u32, size: u32) -> RegisterNode {
        let reg = RegisterNode::new(name, offset).bits(bit, size);
        match self.width {
            Some(w) => reg.width(w),
            None => reg,
        }
    }
}

fn add_control(dev: &mut Device, l: &Layout) -> Result<()> {
    let at = l.control;
    dev.add_register(
        l.field("MultiplierSelect", at, 0, 1)
            .enum_map(EnumMap::new([(1, "SENSE+/VDD"), (0, "ADIN")])?)
            .description("Selects ADIN or SENSE+/VDD data for multiplication with SENSE"),
    )?;
    dev.add_register(
        l.field("ShutdownEnable", at, 1, 1)
            .enum_map(EnumMap::new([(0, "Normal Operation"), (1, "Shutdown")])?)
            .description("Enables Low-Iq / Shutdown Mode"),
    )?;
    dev.add_register(
        l.field("VinMonitor", at, 2, 1)
            .enum_map(EnumMap::new([(1, "SENSE+"), (0, "VDD")])?)
            .description("Enables VDD or SENSE+ voltage monitoring"),
    )?;
    dev.add_register(
        l.field("AdcBusy", at, 3, 1)
            .boolean()
            .read_only()
            .description("ADC conversion in progress"),
    )?;
    dev.add_register(
        l.field("TestMode", at, 4, 1)
            .enum_map(EnumMap::enabled())
            .description("Halts ADC operations and enables writes to internal registers"),
    )?;
    dev.add_register(
        l.field("AdcChannelLabel", at, 5, 2)
            .enum_map(EnumMap::new([(0, "DeltaSense"), (1, "Vin"), (2, "ADIN")])?)
            .description("ADC channel for snapshot mode"),
    )?;
    dev.add_register(
        l.field("AdcSnapshotMode", at, 7, 1)
            .enum_map(EnumMap::enabled())
            .description("Measure only the AdcChannelLabel channel, then halt"),
    )?;
    Ok(())
}

fn add_flags(dev: &mut Device, l: &Layout) -> Result<()> {
    for (i, name) in ALERTS.iter().enumerate() {
        dev.add_register(l.field(name, l.alert, i as u32, 1).enum_map(EnumMap::enabled()))?;
    }
    for (i, name) in STATUSES.iter().enumerate() {
        dev.add_register(l.field(name, l.status, i as u32, 1).boolean().read_only())?;
    }
    for (i, name) in FAULTS.iter().enumerate() {
        dev.add_register(l.field(name, l.fault, i as u32, 1).boolean().read_only())?;
    }
    Ok(())
}

/// `<name>Raw` and `<name>` pairs for the current, max and min readings
fn add_group(
    dev: &mut Device,
    name: &str,
    offsets: [u64; 3],
    bits: (u32, u32),
    gain: f64,
    units: &str,
) -> Result<()> {
    for (prefix, offset) in ["", "Max", "Min"].iter().zip(offsets) {
        let value = format!("{}{}", prefix, name);
        let raw = format!("{}Raw", value);
        dev.add_register(RegisterNode::new(&raw, offset).bits(bits.0, bits.1).read_only())?;
        dev.add_derived(DerivedVariable::linear(value, &raw, Linear::scale(gain)).units(units))?;
    }
    Ok(())
}

/// Register map of one LTC2945 with a `shunt` ohm sense resistor
pub fn device(name: &str, shunt: f64, layout: Ltc2945Layout) -> Result<Device> {
    let mut dev = Device::new(name).description("LTC2945 Voltage and Current Monitor");
    let l = Layout::of(layout);

    add_control(&mut dev, &l)?;
    add_flags(&mut dev, &l)?;

    match layout {
        Ltc2945Layout::Word => {
            dev.add_command(RemoteCommand::trigger("ADCReadStart", 0x100))?;
            dev.set_pre_read("ADCReadStart")?;
            dev.add_command(RemoteCommand::new(
                RegisterNode::new("FaultClear", 0x10)
                    .bits(0, 8)
                    .description("Clear faults"),
                CommandAction::Touch,
            ))?;

            let full = (0, 32);
            add_group(&mut dev, "Power", [0x14, 0x18, 0x1C], full, power_gain(shunt), "Watts")?;
            add_group(&mut dev, "Current", [0x28, 0x2C, 0x30], full, current_gain(shunt), "Amps")?;
            add_group(&mut dev, "Vin", [0x3C, 0x40, 0x44], full, voltage_gain(), "Volts")?;
            add_group(&mut dev, "ADin", [0x50, 0x54, 0x58], full, voltage_gain(), "Volts")?;
        }
        Ltc2945Layout::Byte => {
            let word = |i: u64| i * 4;
            add_group(
                &mut dev,
                "Power",
                [word(0x5), word(0x8), word(0xB)],
                (8, 12),
                power_gain(shunt),
                "Watts",
            )?;
            add_group(
                &mut dev,
                "Sense",
                [word(0x14), word(0x16), word(0x18)],
                (0, 8),
                current_gain(shunt),
                "Amps",
            )?;
            add_group(
                &mut dev,
                "Vin",
                [word(0x1E), word(0x20), word(0x22)],
                (0, 8),
                voltage_gain(),
                "Volts",
            )?;
            add_group(
                &mut dev,
                "ADin",
                [word(0x28), word(0x2A), word(0x2C)],
                (0, 8),
                voltage_gain(),
                "Volts",
            )?;
        }
    }

    Ok(dev)
}
