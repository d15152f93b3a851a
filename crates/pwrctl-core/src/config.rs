//! Board configuration
//!
//! Describes where each device block sits and the conversion constants of
//! the external monitors. The defaults reproduce the stock board:
//!
//! ```toml
//! [board]
//! root_name = "LsstPwrCtrlRoot"
//! dev_stride = 0x40000
//! version_slot = 7
//! xadc_slot = 8
//! prom_slot = 9
//!
//! [[ltc2945]]
//! name = "Ltc2945_0"
//! offset = 0x00100000
//! shunt = 0.01
//! layout = "word"
//!
//! [[lambda]]
//! name = "Lambda_0"
//! offset = "0x00110000"
//! v_scale = 0.01
//! i_scale = 0.001
//!
//! [update]
//! unlock_token = 0xDEADBEEF
//! chunk_size = 256
//! settle_secs = 10
//!
//! [link]
//! ping_interval_secs = 5
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::devices::prom::PROGRAM_BUFFER_SIZE;
use crate::error::{Error, Result};

/// Whole configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoardConfig {
    /// Core block placement
    pub board: BoardSection,
    /// LTC2945 monitors
    pub ltc2945: Vec<Ltc2945Config>,
    /// Lambda supplies
    pub lambda: Vec<LambdaConfig>,
    /// Firmware update parameters
    pub update: UpdateSection,
    /// Link parameters
    pub link: LinkSection,
}

/// `[board]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoardSection {
    /// Name of the root device
    pub root_name: String,
    /// Offset of the Core container
    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub core_offset: u64,
    /// Distance between consecutive device slots
    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub dev_stride: u64,
    /// Slot of the AxiVersion block
    pub version_slot: u64,
    /// Slot of the Xadc block
    pub xadc_slot: u64,
    /// Slot of the AxiMicronN25Q block
    pub prom_slot: u64,
}

impl Default for BoardSection {
    fn default() -> Self {
        Self {
            root_name: "LsstPwrCtrlRoot".into(),
            core_offset: 0,
            dev_stride: 0x40000,
            version_slot: 7,
            xadc_slot: 8,
            prom_slot: 9,
        }
    }
}

/// Register layout variant of an LTC2945 bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ltc2945Layout {
    /// One 32-bit word per chip register, ADC trigger at 0x100
    #[default]
    Word,
    /// Byte-wide status registers, ADC groups at word indices, no trigger
    Byte,
}

/// `[[ltc2945]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ltc2945Config {
    /// Device name
    pub name: String,
    /// Offset from the root
    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub offset: u64,
    /// Sense resistor in ohms
    pub shunt: f64,
    /// Register layout variant
    #[serde(default)]
    pub layout: Ltc2945Layout,
}

/// `[[lambda]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LambdaConfig {
    /// Device name
    pub name: String,
    /// Offset from the root
    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub offset: u64,
    /// Volts per output-voltage code
    pub v_scale: f64,
    /// Amps per output-current code
    pub i_scale: f64,
}

/// `[update]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpdateSection {
    /// Value written to PasswordLock to unlock the PROM
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub unlock_token: u32,
    /// Bytes per program chunk
    pub chunk_size: u32,
    /// Wait after the reload command, in seconds
    pub settle_secs: f64,
    /// Identity read attempts after the settle wait
    pub reconnect_attempts: u32,
    /// Wait between identity read attempts, in seconds
    pub reconnect_interval_secs: f64,
    /// Full programming attempts (each restarts at offset 0)
    pub program_attempts: u32,
    /// Post the link token to ScratchPad before unlocking
    pub post_link_token: bool,
    /// Link token value
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub link_token: u32,
}

impl Default for UpdateSection {
    fn default() -> Self {
        Self {
            unlock_token: 0xDEAD_BEEF,
            chunk_size: 256,
            settle_secs: 10.0,
            reconnect_attempts: 5,
            reconnect_interval_secs: 1.0,
            program_attempts: 1,
            post_link_token: true,
            link_token: 1,
        }
    }
}

/// `[link]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkSection {
    /// Interval between reachability probes, in seconds
    pub ping_interval_secs: f64,
    /// Probe attempts before giving up; 0 retries forever
    pub ping_attempts: u32,
    /// Cap on a single transport transaction
    pub max_transaction_len: Option<usize>,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            ping_interval_secs: 5.0,
            ping_attempts: 0,
            max_transaction_len: None,
        }
    }
}

/// Deserialize a u64 that can be hex (0x...) or decimal
fn deserialize_hex_u64<'de, D>(deserializer: D) -> core::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u64),
        Str(String),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

/// Deserialize a u32 that can be hex (0x...) or decimal
fn deserialize_hex_u32<'de, D>(deserializer: D) -> core::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = deserialize_hex_u64(deserializer)?;
    u32::try_from(value)
        .map_err(|_| serde::de::Error::custom(format!("0x{:X} does not fit in 32 bits", value)))
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> core::result::Result<u64, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(&hex.replace('_', ""), 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

fn check_constant(what: &str, name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value == 0.0 {
        return Err(Error::Config(format!(
            "{} of '{}' must be finite and non-zero, got {}",
            what, name, value
        )));
    }
    Ok(())
}

fn check_seconds(what: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::Config(format!(
            "{} must be a non-negative number of seconds, got {}",
            what, value
        )));
    }
    Ok(())
}

impl BoardConfig {
    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: BoardConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the constants that the register maps divide by or depend on
    pub fn validate(&self) -> Result<()> {
        if self.board.dev_stride == 0 {
            return Err(Error::Config("dev_stride must be non-zero".into()));
        }
        let slots = [
            self.board.version_slot,
            self.board.xadc_slot,
            self.board.prom_slot,
        ];
        if slots[0] == slots[1] || slots[0] == slots[2] || slots[1] == slots[2] {
            return Err(Error::Config("device slots must be distinct".into()));
        }

        for m in &self.ltc2945 {
            check_constant("shunt", &m.name, m.shunt)?;
        }
        for l in &self.lambda {
            check_constant("v_scale", &l.name, l.v_scale)?;
            check_constant("i_scale", &l.name, l.i_scale)?;
        }

        let u = &self.update;
        if u.chunk_size == 0 || u.chunk_size > PROGRAM_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "chunk_size must be between 1 and {} bytes, got {}",
                PROGRAM_BUFFER_SIZE, u.chunk_size
            )));
        }
        if u.reconnect_attempts == 0 {
            return Err(Error::Config("reconnect_attempts must be at least 1".into()));
        }
        if u.program_attempts == 0 {
            return Err(Error::Config("program_attempts must be at least 1".into()));
        }
        check_seconds("settle_secs", u.settle_secs)?;
        check_seconds("reconnect_interval_secs", u.reconnect_interval_secs)?;
        check_seconds("ping_interval_secs", self.link.ping_interval_secs)?;

        if self.link.max_transaction_len == Some(0) {
            return Err(Error::Config("max_transaction_len must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_board() {
        let cfg = BoardConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.board.root_name, "LsstPwrCtrlRoot");
        assert_eq!(cfg.board.dev_stride, 0x40000);
        assert_eq!(cfg.board.prom_slot, 9);
        assert_eq!(cfg.update.unlock_token, 0xDEAD_BEEF);
        assert_eq!(cfg.update.chunk_size, 256);
        assert_eq!(cfg.link.ping_interval_secs, 5.0);
        assert!(cfg.ltc2945.is_empty());
    }

    #[test]
    fn test_hex_and_decimal_numbers() {
        let cfg = BoardConfig::from_toml_str(
            r#"
            [board]
            dev_stride = "0x1000"

            [[ltc2945]]
            name = "Ltc"
            offset = 1048576
            shunt = 0.005
            layout = "byte"

            [[lambda]]
            name = "Lambda"
            offset = "0x0011_0000"
            v_scale = 0.01
            i_scale = 0.002

            [update]
            unlock_token = "0xCAFEF00D"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.board.dev_stride, 0x1000);
        assert_eq!(cfg.ltc2945[0].offset, 0x10_0000);
        assert_eq!(cfg.ltc2945[0].layout, Ltc2945Layout::Byte);
        assert_eq!(cfg.lambda[0].offset, 0x11_0000);
        assert_eq!(cfg.update.unlock_token, 0xCAFE_F00D);
    }

    #[test]
    fn test_zero_shunt_rejected() {
        let err = BoardConfig::from_toml_str(
            r#"
            [[ltc2945]]
            name = "Ltc"
            offset = 0
            shunt = 0.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("shunt")));
    }

    #[test]
    fn test_chunk_size_bounded_by_program_buffer() {
        assert!(BoardConfig::from_toml_str("[update]\nchunk_size = 0").is_err());
        assert!(BoardConfig::from_toml_str("[update]\nchunk_size = 512").is_err());
        assert!(BoardConfig::from_toml_str("[update]\nchunk_size = 64").is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(BoardConfig::from_toml_str("[board]\nbogus = 1").is_err());
    }

    #[test]
    fn test_sample_config() {
        let cfg = BoardConfig::from_toml_str(include_str!("../../../demos/pwrctl.toml")).unwrap();
        assert_eq!(cfg.ltc2945.len(), 2);
        assert_eq!(cfg.ltc2945[1].layout, Ltc2945Layout::Byte);
        assert_eq!(cfg.lambda[0].offset, 0x40_0000);
        assert_eq!(cfg.link.ping_attempts, 0);
        let tree = crate::board::build_tree(&cfg).unwrap();
        assert!(tree.find("LambdaSupply.SupplyTemp").is_ok());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x40000"), Ok(0x40000));
        assert_eq!(parse_number(" 42 "), Ok(42));
        assert!(parse_number("0xZZ").is_err());
    }
}
