//! Gas and display-field lookup tables.
//!
//! Gas names are mapped to the numeric codes the controller stores in its
//! gas register. Lookups are case-insensitive and happen before any I/O, so
//! an unknown name never reaches the device.
//!
//! ```
//! use mfc::gas::{gas_code, gas_name};
//!
//! assert_eq!(gas_code("N2"), Some(9));
//! assert_eq!(gas_code("co2"), Some(4));
//! assert_eq!(gas_name(9), Some("N2"));
//! assert_eq!(gas_code("unobtainium"), None);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MfcError;

/// Gas names and their device codes.
pub const GAS_CODES: &[(&str, u16)] = &[
    ("Air", 0),
    ("Ar", 1),
    ("CH4", 2),
    ("CO", 3),
    ("CO2", 4),
    ("C2H6", 5),
    ("H2", 6),
    ("He", 7),
    ("O2", 8),
    ("N2", 9),
    ("N2O", 10),
    ("Ne", 11),
    ("C3H8", 12),
    ("SF6", 13),
    ("NH3", 14),
    ("Kr", 15),
    ("Xe", 16),
];

/// Returns the device code for a gas name.
pub fn gas_code(name: &str) -> Option<u16> {
    let name = name.trim();
    GAS_CODES
        .iter()
        .find(|(gas, _)| gas.eq_ignore_ascii_case(name))
        .map(|&(_, code)| code)
}

/// Returns the canonical gas name for a device code.
pub fn gas_name(code: u16) -> Option<&'static str> {
    GAS_CODES
        .iter()
        .find(|&&(_, c)| c == code)
        .map(|&(gas, _)| gas)
}

/// Renders a gas code for display; codes outside the table become their number.
pub fn describe_gas(code: u16) -> String {
    gas_name(code).map_or_else(|| code.to_string(), str::to_string)
}

/// Field shown on the controller's front-panel display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayField {
    /// Network address.
    Ip,
    /// Measured flow.
    Flow,
    /// Gas temperature.
    Temperature,
}

impl DisplayField {
    /// Code written to the display register.
    pub fn code(self) -> u16 {
        match self {
            DisplayField::Ip => 0,
            DisplayField::Flow => 1,
            DisplayField::Temperature => 2,
        }
    }
}

impl FromStr for DisplayField {
    type Err = MfcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ip" => Ok(DisplayField::Ip),
            "flow" => Ok(DisplayField::Flow),
            "temperature" => Ok(DisplayField::Temperature),
            other => Err(MfcError::invalid_value(
                "display",
                format!("'{other}' is not one of ip, flow, temperature"),
            )),
        }
    }
}

impl fmt::Display for DisplayField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisplayField::Ip => "ip",
            DisplayField::Flow => "flow",
            DisplayField::Temperature => "temperature",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_codes_are_unique() {
        for (i, (name, code)) in GAS_CODES.iter().enumerate() {
            for (other, other_code) in &GAS_CODES[i + 1..] {
                assert_ne!(code, other_code, "{name} and {other} share a code");
                assert!(!name.eq_ignore_ascii_case(other));
            }
        }
    }

    #[test]
    fn test_gas_lookup_case_insensitive() {
        assert_eq!(gas_code("n2"), Some(9));
        assert_eq!(gas_code(" He "), Some(7));
        assert_eq!(gas_code("air"), Some(0));
    }

    #[test]
    fn test_describe_unknown_code() {
        assert_eq!(describe_gas(4), "CO2");
        assert_eq!(describe_gas(999), "999");
    }

    #[test]
    fn test_display_field_parse() {
        assert_eq!("Flow".parse::<DisplayField>().unwrap(), DisplayField::Flow);
        assert_eq!("ip".parse::<DisplayField>().unwrap().code(), 0);
        assert_eq!(
            "temperature".parse::<DisplayField>().unwrap().code(),
            2
        );
        assert!("pressure".parse::<DisplayField>().is_err());
    }
}
