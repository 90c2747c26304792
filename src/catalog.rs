//! Supported controller models and their fixed register catalogs.
//!
//! Each [`Model`] variant carries its full-scale flow and produces a
//! [`Catalog`]: the registers the device exposes, their encodings, and the
//! capability flags the driver consults instead of probing the device.
//!
//! | Model | Flow/setpoint encoding | Temperature | Gas | Display | Transport |
//! |-------|------------------------|:-----------:|:---:|:-------:|-----------|
//! | [`Model::Scaled`] | u16 counts, 10000 = full scale | ✓ | ✓ | ✗ | Modbus-TCP |
//! | [`Model::Float`] | f32 | ✓ | ✓ | ✓ | Modbus-TCP |
//! | [`Model::Ethercat`] | f32 (SDO) | ✗ | ✗ | ✗ | EtherCAT master |
//!
//! # Example
//!
//! ```
//! use mfc::{Model, Role};
//!
//! let catalog = Model::Scaled { max_flow: 10.0 }.catalog();
//! assert!(catalog.supports(Role::Gas));
//! assert!(!catalog.supports(Role::Display));
//!
//! // flow, setpoint, gas and temperature are read in one exchange
//! assert_eq!(catalog.read_blocks().len(), 1);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MfcError, Result};
use crate::register::{Access, Register, Role, ValueKind};

/// Counts corresponding to full-scale flow on integer-register models.
pub const FULL_SCALE_COUNTS: f64 = 10_000.0;

/// Roles read by a telemetry poll.
const POLLED_ROLES: [Role; 4] = [Role::Flow, Role::Setpoint, Role::Gas, Role::Temperature];

/// SDO index of the measured flow on EtherCAT controllers.
pub const ETHERCAT_FLOW_INDEX: u16 = 0x6000;

/// SDO index of the setpoint on EtherCAT controllers.
pub const ETHERCAT_SETPOINT_INDEX: u16 = 0x7003;

/// A supported controller model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Model {
    /// Modbus-TCP controller with integer registers scaled to full scale.
    Scaled {
        /// Full-scale flow in device units.
        max_flow: f64,
    },
    /// Modbus-TCP controller with floating-point registers.
    Float {
        /// Full-scale flow in device units.
        max_flow: f64,
        /// Analog-input controller that must be switched to digital setpoints.
        analog: bool,
    },
    /// Legacy EtherCAT controller driven through the EtherCAT master.
    Ethercat {
        /// Full-scale flow in device units.
        max_flow: f64,
    },
}

impl Model {
    /// Full-scale flow.
    pub fn max_flow(self) -> f64 {
        match self {
            Model::Scaled { max_flow }
            | Model::Float { max_flow, .. }
            | Model::Ethercat { max_flow } => max_flow,
        }
    }

    /// Short model name.
    pub fn name(self) -> &'static str {
        match self {
            Model::Scaled { .. } => "scaled",
            Model::Float { .. } => "float",
            Model::Ethercat { .. } => "ethercat",
        }
    }

    /// Builds the model's register catalog.
    pub fn catalog(self) -> Catalog {
        match self {
            Model::Scaled { max_flow } => {
                let flow = ValueKind::Scaled {
                    factor: max_flow / FULL_SCALE_COUNTS,
                    signed: false,
                };
                Catalog {
                    model: self,
                    registers: vec![
                        Register::new(Role::Flow, 0, 1, Access::ReadOnly, flow),
                        Register::new(Role::Setpoint, 1, 1, Access::ReadWrite, flow),
                        Register::new(Role::Gas, 2, 1, Access::ReadWrite, ValueKind::Code),
                        Register::new(
                            Role::Temperature,
                            3,
                            1,
                            Access::ReadOnly,
                            ValueKind::Scaled {
                                factor: 0.1,
                                signed: true,
                            },
                        ),
                    ],
                    verify_setpoint: false,
                    analog_override: false,
                }
            }
            Model::Float { analog, .. } => Catalog {
                model: self,
                registers: vec![
                    Register::new(Role::Flow, 0, 2, Access::ReadOnly, ValueKind::Float32),
                    Register::new(Role::Setpoint, 2, 2, Access::ReadWrite, ValueKind::Float32),
                    Register::new(Role::Temperature, 4, 2, Access::ReadOnly, ValueKind::Float32),
                    Register::new(Role::Gas, 6, 1, Access::ReadWrite, ValueKind::Code),
                    Register::new(Role::Display, 7, 1, Access::ReadWrite, ValueKind::Code),
                    Register::new(Role::AnalogOverride, 8, 1, Access::ReadWrite, ValueKind::Code),
                    Register::new(Role::DeviceName, 16, 8, Access::ReadOnly, ValueKind::Ascii),
                ],
                verify_setpoint: false,
                analog_override: analog,
            },
            Model::Ethercat { .. } => Catalog {
                model: self,
                registers: vec![
                    Register::new(
                        Role::Flow,
                        ETHERCAT_FLOW_INDEX,
                        2,
                        Access::ReadOnly,
                        ValueKind::Float32,
                    ),
                    Register::new(
                        Role::Setpoint,
                        ETHERCAT_SETPOINT_INDEX,
                        2,
                        Access::ReadWrite,
                        ValueKind::Float32,
                    ),
                ],
                verify_setpoint: true,
                analog_override: false,
            },
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (max flow {})", self.name(), self.max_flow())
    }
}

/// A contiguous run of registers read in one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// First register address.
    pub start: u16,
    /// Number of words.
    pub count: u16,
}

/// Fixed register catalog of one model.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    model: Model,
    registers: Vec<Register>,
    verify_setpoint: bool,
    analog_override: bool,
}

impl Catalog {
    /// The model this catalog describes.
    pub fn model(&self) -> Model {
        self.model
    }

    /// Full-scale flow.
    pub fn max_flow(&self) -> f64 {
        self.model.max_flow()
    }

    /// All registers, in address order.
    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    /// Looks up the register for a role.
    pub fn register(&self, role: Role) -> Option<&Register> {
        self.registers.iter().find(|r| r.role == role)
    }

    /// Returns whether the model exposes a register for `role`.
    pub fn supports(&self, role: Role) -> bool {
        self.register(role).is_some()
    }

    /// Looks up the register for a role, or reports the operation as unsupported.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::UnsupportedOperation` if the model lacks the register.
    pub fn require(&self, role: Role, operation: &str) -> Result<&Register> {
        self.register(role)
            .ok_or_else(|| MfcError::unsupported(operation, self.model.name()))
    }

    /// Register starting exactly at `address`.
    pub fn at(&self, address: u16) -> Option<&Register> {
        self.registers.iter().find(|r| r.address == address)
    }

    /// Whether setpoint writes are read back and retried.
    pub fn verify_setpoint(&self) -> bool {
        self.verify_setpoint
    }

    /// Whether the controller defaults to analog setpoints.
    pub fn analog_override(&self) -> bool {
        self.analog_override
    }

    /// Groups the telemetry registers into contiguous read blocks.
    pub fn read_blocks(&self) -> Vec<Block> {
        let mut polled: Vec<&Register> = self
            .registers
            .iter()
            .filter(|r| POLLED_ROLES.contains(&r.role))
            .collect();
        polled.sort_by_key(|r| r.address);

        let mut blocks: Vec<Block> = Vec::new();
        for reg in polled {
            match blocks.last_mut() {
                Some(block) if u32::from(block.start) + u32::from(block.count) == u32::from(reg.address) => {
                    block.count += reg.width;
                }
                _ => blocks.push(Block {
                    start: reg.address,
                    count: reg.width,
                }),
            }
        }
        blocks
    }

    /// Checks that a read of `count` words from `start` covers whole registers.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::Encoding` if an address is not in the catalog or the
    /// block would split a multi-word register.
    pub fn validate_read(&self, start: u16, count: u16) -> Result<Vec<&Register>> {
        if count == 0 {
            return Err(MfcError::encoding("read count must be greater than 0"));
        }
        let end = u32::from(start) + u32::from(count);
        let mut covered = Vec::new();
        let mut address = u32::from(start);
        while address < end {
            let word = u16::try_from(address).ok();
            let Some(reg) = word.and_then(|a| self.at(a)) else {
                let inner = word.and_then(|a| self.registers.iter().find(|r| r.contains(a)));
                if let Some(inner) = inner {
                    return Err(MfcError::encoding(format!(
                        "read at 0x{address:04X} starts inside register {}",
                        inner.role
                    )));
                }
                return Err(MfcError::encoding(format!(
                    "no register at address 0x{address:04X} for {}",
                    self.model.name()
                )));
            };
            if reg.end() > end {
                return Err(MfcError::encoding(format!(
                    "read of {count} words at 0x{start:04X} splits register {}",
                    reg.role
                )));
            }
            covered.push(reg);
            address = reg.end();
        }
        Ok(covered)
    }

    /// Checks a write payload against the register at `address`.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::Encoding` if the register is unknown, read-only, or
    /// the payload width disagrees with the register width.
    pub fn validate_write(&self, address: u16, words: &[u16]) -> Result<&Register> {
        let reg = self.at(address).ok_or_else(|| {
            MfcError::encoding(format!(
                "no register at address 0x{address:04X} for {}",
                self.model.name()
            ))
        })?;
        if !reg.is_writable() {
            return Err(MfcError::encoding(format!("{} is read-only", reg.role)));
        }
        if words.len() != usize::from(reg.width) {
            return Err(MfcError::encoding(format!(
                "{} is {} words wide, payload has {}",
                reg.role,
                reg.width,
                words.len()
            )));
        }
        Ok(reg)
    }
}
