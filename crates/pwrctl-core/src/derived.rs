//! Derived variables
//!
//! A derived variable converts the raw codes of one or more sibling registers
//! into a physical value (volts, amps, watts, degrees). The conversion is a
//! pure [`Transform`]; the device tree fetches the sources and hands their raw
//! codes over, so a bulk read can reuse the values it already fetched.

use core::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::register::AccessMode;

/// Default number of decimals shown for physical values
pub const DEFAULT_PRECISION: usize = 3;

/// Pure mapping from raw source codes to a physical value
pub trait Transform: Send + Sync {
    /// Compute the physical value from the raw codes, in source order
    fn forward(&self, raw: &[u64]) -> f64;

    /// Raw codes producing `value`, or `None` if it has no representation
    fn inverse(&self, _value: f64) -> Option<Vec<u64>> {
        None
    }

    /// Whether [`Transform::inverse`] is implemented
    fn invertible(&self) -> bool {
        false
    }
}

/// `value = (raw - raw_offset) * gain + offset` over a single source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Linear {
    /// Scale applied to the offset-corrected raw code
    pub gain: f64,
    /// Raw code subtracted before scaling
    pub raw_offset: f64,
    /// Physical offset added after scaling
    pub offset: f64,
}

impl Linear {
    /// Plain scale factor
    pub fn scale(gain: f64) -> Self {
        Self {
            gain,
            raw_offset: 0.0,
            offset: 0.0,
        }
    }

    /// `raw * numerator / denominator`
    pub fn ratio(numerator: f64, denominator: f64) -> Self {
        Self::scale(numerator / denominator)
    }

    /// Add a physical offset after scaling
    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    /// Subtract a raw offset before scaling
    pub fn with_raw_offset(mut self, raw_offset: f64) -> Self {
        self.raw_offset = raw_offset;
        self
    }
}

impl Transform for Linear {
    fn forward(&self, raw: &[u64]) -> f64 {
        let code = raw.first().copied().unwrap_or(0) as f64;
        (code - self.raw_offset) * self.gain + self.offset
    }

    fn inverse(&self, value: f64) -> Option<Vec<u64>> {
        if self.gain == 0.0 {
            return None;
        }
        let raw = ((value - self.offset) / self.gain + self.raw_offset).round();
        if !raw.is_finite() || raw < 0.0 || raw > u64::MAX as f64 {
            return None;
        }
        Some(vec![raw as u64])
    }

    fn invertible(&self) -> bool {
        self.gain != 0.0
    }
}

/// Read-only transform backed by a closure
pub struct FnTransform<F>(pub F);

impl<F> Transform for FnTransform<F>
where
    F: Fn(&[u64]) -> f64 + Send + Sync,
{
    fn forward(&self, raw: &[u64]) -> f64 {
        (self.0)(raw)
    }
}

/// A computed node over sibling registers
#[derive(Clone)]
pub struct DerivedVariable {
    name: String,
    description: String,
    sources: Vec<String>,
    pub(crate) slots: Vec<usize>,
    transform: Arc<dyn Transform>,
    units: String,
    precision: usize,
    mode: AccessMode,
}

impl fmt::Debug for DerivedVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedVariable")
            .field("name", &self.name)
            .field("sources", &self.sources)
            .field("units", &self.units)
            .field("mode", &self.mode)
            .finish()
    }
}

impl DerivedVariable {
    /// Read-only variable computed from the named sibling registers
    pub fn new<S: AsRef<str>>(
        name: impl Into<String>,
        sources: &[S],
        transform: impl Transform + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            sources: sources.iter().map(|s| s.as_ref().to_string()).collect(),
            slots: Vec::new(),
            transform: Arc::new(transform),
            units: String::new(),
            precision: DEFAULT_PRECISION,
            mode: AccessMode::ReadOnly,
        }
    }

    /// Shorthand for a [`Linear`] view of a single register
    pub fn linear(name: impl Into<String>, source: &str, transform: Linear) -> Self {
        Self::new(name, &[source], transform)
    }

    /// Physical units
    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    /// Display precision in decimals
    pub fn precision(mut self, decimals: usize) -> Self {
        self.precision = decimals;
        self
    }

    /// Allow `set`, writing through the inverse transform
    pub fn read_write(mut self) -> Self {
        self.mode = AccessMode::ReadWrite;
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

    /// Names of the source registers, in transform order
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Physical units
    pub fn unit(&self) -> &str {
        &self.units
    }

    /// Display precision
    pub fn display_precision(&self) -> usize {
        self.precision
    }

    /// Access mode
    pub fn access(&self) -> AccessMode {
        self.mode
    }

    /// Whether the transform can be inverted
    pub fn invertible(&self) -> bool {
        self.transform.invertible()
    }

    /// Apply the transform to raw source codes
    pub fn compute(&self, raw: &[u64]) -> f64 {
        self.transform.forward(raw)
    }

    /// Raw source codes for a physical value
    pub fn invert(&self, value: f64) -> Result<Vec<u64>> {
        if self.mode != AccessMode::ReadWrite {
            return Err(Error::Unsupported {
                name: self.name.clone(),
                reason: "derived variable is read-only",
            });
        }
        if !value.is_finite() {
            return Err(Error::PhysicalOutOfRange {
                name: self.name.clone(),
                value,
            });
        }
        match self.transform.inverse(value) {
            Some(raw) if raw.len() == self.sources.len() => Ok(raw),
            _ => Err(Error::PhysicalOutOfRange {
                name: self.name.clone(),
                value,
            }),
        }
    }

    /// Format a physical value with the configured precision and units
    pub fn format(&self, value: f64) -> String {
        if self.units.is_empty() {
            format!("{:.*}", self.precision, value)
        } else {
            format!("{:.*} {}", self.precision, value, self.units)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_forward() {
        // LTC2945 voltage: raw * 102.4 / 4096
        let vin = Linear::ratio(102.4, 4096.0);
        assert!((vin.forward(&[2048]) - 51.2).abs() < 1e-9);

        // Lambda plate temperature: (raw - 610) / 2.048 + 25
        let temp = Linear::scale(1.0 / 2.048)
            .with_raw_offset(610.0)
            .with_offset(25.0);
        assert!((temp.forward(&[610]) - 25.0).abs() < 1e-9);
        assert!((temp.forward(&[815]) - 125.097_656_25).abs() < 1e-6);
    }

    #[test]
    fn test_linear_inverse_rounds() {
        let t = Linear::ratio(3.0, 4096.0);
        let raw = t.inverse(1.0).unwrap();
        assert_eq!(raw, vec![1365]);
        assert!(t.inverse(-1.0).is_none());
        assert!(t.inverse(f64::NAN).is_none());
    }

    #[test]
    fn test_read_only_rejects_set() {
        let v = DerivedVariable::linear("OutputVolts", "OutputV", Linear::scale(0.01));
        assert!(matches!(
            v.invert(1.0),
            Err(Error::Unsupported { .. })
        ));
    }

    #[test]
    fn test_read_write_inverts() {
        let v = DerivedVariable::linear("Threshold", "Raw", Linear::scale(0.5)).read_write();
        assert_eq!(v.invert(10.0).unwrap(), vec![20]);
        assert!(matches!(
            v.invert(-3.0),
            Err(Error::PhysicalOutOfRange { .. })
        ));
    }

    #[test]
    fn test_fn_transform_multi_source() {
        let v = DerivedVariable::new(
            "Sum",
            &["A", "B"],
            FnTransform(|raw: &[u64]| (raw[0] + raw[1]) as f64),
        );
        assert_eq!(v.compute(&[2, 3]), 5.0);
        assert!(!v.invertible());
    }

    #[test]
    fn test_format_precision() {
        let v = DerivedVariable::linear("Power", "PowerRaw", Linear::scale(1.0)).units("W");
        assert_eq!(v.format(1.23456), "1.235 W");
        let v = v.precision(1);
        assert_eq!(v.format(1.26), "1.3 W");
    }
}
