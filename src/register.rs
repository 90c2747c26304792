//! Register definitions and value conversion.
//!
//! A [`Register`] is a fixed-address, fixed-width slot in the device's
//! holding-register space. Each register knows how its raw 16-bit words map
//! to a physical [`Value`]:
//!
//! | Kind | Width | Encoding |
//! |------|:-----:|----------|
//! | [`ValueKind::Scaled`] | 1 | integer counts times a decimal factor |
//! | [`ValueKind::Float32`] | 2 | IEEE-754, high word first |
//! | [`ValueKind::Code`] | 1 | enumeration code (gas, display field) |
//! | [`ValueKind::Ascii`] | n | two characters per word, high byte first |
//!
//! # Example
//!
//! ```
//! use mfc::{Access, Register, Role, Value, ValueKind};
//!
//! let setpoint = Register::new(
//!     Role::Setpoint,
//!     1,
//!     1,
//!     Access::ReadWrite,
//!     ValueKind::Scaled { factor: 0.001, signed: false },
//! );
//! let words = setpoint.encode(&Value::Number(5.0)).unwrap();
//! assert_eq!(words, vec![5000]);
//! ```

use std::fmt;

use crate::error::{MfcError, Result};

/// Semantic role of a register within a model's catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// Measured flow.
    Flow,
    /// Commanded flow.
    Setpoint,
    /// Selected gas code.
    Gas,
    /// Gas temperature.
    Temperature,
    /// Front-panel display selection.
    Display,
    /// Analog setpoint enable flag (0 = digital setpoints).
    AnalogOverride,
    /// Device name string.
    DeviceName,
}

impl Role {
    /// Returns the register's name as used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            Role::Flow => "flow",
            Role::Setpoint => "setpoint",
            Role::Gas => "gas",
            Role::Temperature => "temperature",
            Role::Display => "display",
            Role::AnalogOverride => "analog_override",
            Role::DeviceName => "device_name",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Access mode of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Telemetry; writes are rejected locally.
    ReadOnly,
    /// Control register.
    ReadWrite,
}

/// How raw words map to a physical value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    /// One word of integer counts; `physical = raw * factor`.
    Scaled {
        /// Physical units per count.
        factor: f64,
        /// Whether the raw word is two's complement.
        signed: bool,
    },
    /// Two words holding an IEEE-754 single, high word first.
    Float32,
    /// One word holding an enumeration code.
    Code,
    /// NUL padded ASCII, two characters per word.
    Ascii,
}

/// A decoded register value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Physical quantity.
    Number(f64),
    /// Enumeration code.
    Code(u16),
    /// Text.
    Text(String),
}

/// One entry of a model's register catalog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Register {
    /// What the register means.
    pub role: Role,
    /// Starting holding-register address.
    pub address: u16,
    /// Number of 16-bit words.
    pub width: u16,
    /// Access mode.
    pub access: Access,
    /// Value encoding.
    pub kind: ValueKind,
}

impl Register {
    /// Creates a register definition.
    pub const fn new(role: Role, address: u16, width: u16, access: Access, kind: ValueKind) -> Self {
        Self {
            role,
            address,
            width,
            access,
            kind,
        }
    }

    /// Returns whether the register accepts writes.
    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    /// Address one past the last word of this register.
    pub fn end(&self) -> u32 {
        u32::from(self.address) + u32::from(self.width)
    }

    /// Returns whether `address` falls inside this register.
    pub fn contains(&self, address: u16) -> bool {
        address >= self.address && u32::from(address) < self.end()
    }

    /// Smallest difference the register can represent.
    pub fn resolution(&self) -> f64 {
        match self.kind {
            ValueKind::Scaled { factor, .. } => factor,
            ValueKind::Float32 => 1e-3,
            ValueKind::Code | ValueKind::Ascii => 1.0,
        }
    }

    /// Encodes a value into the register's raw words.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::Encoding` if the value kind does not match the
    /// register, or the value cannot be represented.
    pub fn encode(&self, value: &Value) -> Result<Vec<u16>> {
        let words = match (self.kind, value) {
            (ValueKind::Scaled { factor, signed }, Value::Number(v)) => {
                if !v.is_finite() {
                    return Err(MfcError::encoding(format!("{} must be finite", self.role)));
                }
                let raw = (v / factor).round();
                let (min, max) = if signed {
                    (f64::from(i16::MIN), f64::from(i16::MAX))
                } else {
                    (0.0, f64::from(u16::MAX))
                };
                if raw < min || raw > max {
                    return Err(MfcError::encoding(format!(
                        "{} value {} exceeds register range",
                        self.role, v
                    )));
                }
                let word = if signed { raw as i16 as u16 } else { raw as u16 };
                vec![word]
            }
            (ValueKind::Float32, Value::Number(v)) => {
                let bits = (*v as f32).to_bits();
                vec![(bits >> 16) as u16, (bits & 0xFFFF) as u16]
            }
            (ValueKind::Code, Value::Code(code)) => vec![*code],
            (ValueKind::Ascii, Value::Text(text)) => {
                if !text.is_ascii() {
                    return Err(MfcError::encoding(format!("{} must be ASCII", self.role)));
                }
                let capacity = usize::from(self.width) * 2;
                if text.len() > capacity {
                    return Err(MfcError::encoding(format!(
                        "{} holds at most {} characters",
                        self.role, capacity
                    )));
                }
                let mut bytes = text.as_bytes().to_vec();
                bytes.resize(capacity, 0);
                bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect()
            }
            (kind, value) => {
                return Err(MfcError::encoding(format!(
                    "{} expects {:?}, got {:?}",
                    self.role, kind, value
                )))
            }
        };

        if words.len() != usize::from(self.width) {
            return Err(MfcError::encoding(format!(
                "{} is {} words wide, payload has {}",
                self.role,
                self.width,
                words.len()
            )));
        }
        Ok(words)
    }

    /// Decodes the register's raw words into a value.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::Decoding` if `words` does not match the declared width.
    pub fn decode(&self, words: &[u16]) -> Result<Value> {
        if words.len() != usize::from(self.width) {
            return Err(MfcError::decoding(format!(
                "{} is {} words wide, got {}",
                self.role,
                self.width,
                words.len()
            )));
        }

        let value = match self.kind {
            ValueKind::Scaled { factor, signed } => {
                let raw = if signed {
                    f64::from(words[0] as i16)
                } else {
                    f64::from(words[0])
                };
                Value::Number(raw * factor)
            }
            ValueKind::Float32 => {
                let bits = (u32::from(words[0]) << 16) | u32::from(words[1]);
                Value::Number(f64::from(f32::from_bits(bits)))
            }
            ValueKind::Code => Value::Code(words[0]),
            ValueKind::Ascii => {
                let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
                while matches!(bytes.last(), Some(0) | Some(b' ')) {
                    bytes.pop();
                }
                Value::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
        };
        Ok(value)
    }
}

impl Value {
    /// Returns the numeric value, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the code, if any.
    pub fn as_code(&self) -> Option<u16> {
        match self {
            Value::Code(c) => Some(*c),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaled(factor: f64, signed: bool) -> Register {
        Register::new(
            Role::Flow,
            0,
            1,
            Access::ReadOnly,
            ValueKind::Scaled { factor, signed },
        )
    }

    #[test]
    fn test_scaled_decode() {
        let reg = scaled(10.0 / 10_000.0, false);
        let value = reg.decode(&[4990]).unwrap().as_number().unwrap();
        assert!((value - 4.99).abs() < 1e-9);
    }

    #[test]
    fn test_scaled_roundtrip_within_resolution() {
        let reg = scaled(0.001, false);
        for v in [0.0, 0.5, 4.99, 12.345, 65.535] {
            let words = reg.encode(&Value::Number(v)).unwrap();
            let back = reg.decode(&words).unwrap().as_number().unwrap();
            assert!((back - v).abs() <= reg.resolution() / 2.0, "{v} -> {back}");
        }
    }

    #[test]
    fn test_scaled_signed_temperature() {
        let reg = scaled(0.1, true);
        assert_eq!(reg.encode(&Value::Number(-12.5)).unwrap(), vec![(-125i16) as u16]);
        let value = reg.decode(&[0xFF83]).unwrap().as_number().unwrap();
        assert!((value + 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_scaled_out_of_range() {
        let reg = scaled(0.001, false);
        assert!(reg.encode(&Value::Number(-1.0)).is_err());
        assert!(reg.encode(&Value::Number(70.0)).is_err());
        assert!(reg.encode(&Value::Number(f64::NAN)).is_err());
    }

    #[test]
    fn test_float32_word_order() {
        let reg = Register::new(Role::Setpoint, 2, 2, Access::ReadWrite, ValueKind::Float32);
        // 3.14159_f32 = 0x40490FD0
        assert_eq!(
            reg.encode(&Value::Number(3.14159)).unwrap(),
            vec![0x4049, 0x0FD0]
        );
        let back = reg.decode(&[0x4049, 0x0FD0]).unwrap().as_number().unwrap();
        assert!((back - 3.14159).abs() < 1e-5);
    }

    #[test]
    fn test_ascii_roundtrip() {
        let reg = Register::new(Role::DeviceName, 16, 4, Access::ReadOnly, ValueKind::Ascii);
        let words = reg.encode(&Value::Text("piMFC".to_string())).unwrap();
        assert_eq!(words, vec![0x7069, 0x4D46, 0x4300, 0x0000]);
        assert_eq!(reg.decode(&words).unwrap(), Value::Text("piMFC".to_string()));
    }

    #[test]
    fn test_ascii_too_long() {
        let reg = Register::new(Role::DeviceName, 16, 1, Access::ReadOnly, ValueKind::Ascii);
        assert!(reg.encode(&Value::Text("abc".to_string())).is_err());
    }

    #[test]
    fn test_kind_mismatch() {
        let reg = Register::new(Role::Gas, 2, 1, Access::ReadWrite, ValueKind::Code);
        assert!(reg.encode(&Value::Number(9.0)).is_err());
        assert_eq!(reg.encode(&Value::Code(9)).unwrap(), vec![9]);
    }

    #[test]
    fn test_decode_width_mismatch() {
        let reg = Register::new(Role::Flow, 0, 2, Access::ReadOnly, ValueKind::Float32);
        let err = reg.decode(&[0x4049]).unwrap_err();
        assert!(matches!(err, MfcError::Decoding { .. }));
    }

    #[test]
    fn test_contains() {
        let reg = Register::new(Role::Flow, 4, 2, Access::ReadOnly, ValueKind::Float32);
        assert!(!reg.contains(3));
        assert!(reg.contains(4));
        assert!(reg.contains(5));
        assert!(!reg.contains(6));
    }
}
