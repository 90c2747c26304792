//! Register requests and their Modbus PDU encoding.
//!
//! The driver needs only three Modbus functions:
//!
//! | Function | Code | Used for |
//! |----------|:----:|----------|
//! | Read Holding Registers | 0x03 | telemetry blocks |
//! | Write Single Register | 0x06 | one-word writes (gas, display, scaled setpoint) |
//! | Write Multiple Registers | 0x10 | multi-word writes (float setpoint) |
//!
//! # Example
//!
//! ```
//! use mfc::Request;
//!
//! let read = Request::read(0, 4).unwrap();
//! assert_eq!(read.to_pdu(), vec![0x03, 0x00, 0x00, 0x00, 0x04]);
//!
//! let write = Request::write(2, vec![9]).unwrap();
//! assert_eq!(write.to_pdu(), vec![0x06, 0x00, 0x02, 0x00, 0x09]);
//! ```

use crate::error::{MfcError, Result};

/// Read Holding Registers function code.
pub const FC_READ_HOLDING: u8 = 0x03;
/// Write Single Register function code.
pub const FC_WRITE_SINGLE: u8 = 0x06;
/// Write Multiple Registers function code.
pub const FC_WRITE_MULTIPLE: u8 = 0x10;
/// Bit set in the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Maximum number of registers in one read.
pub const MAX_READ_COUNT: u16 = 125;
/// Maximum number of registers in one write.
pub const MAX_WRITE_COUNT: u16 = 123;

/// A single register operation.
///
/// Requests are immutable once built; the constructors enforce the Modbus
/// quantity limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Read `count` words starting at `start`.
    Read {
        /// First register address.
        start: u16,
        /// Number of words.
        count: u16,
    },
    /// Write `words` starting at `start`.
    Write {
        /// First register address.
        start: u16,
        /// Payload words.
        words: Vec<u16>,
    },
}

impl Request {
    /// Creates a read request.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::Encoding` if count is 0 or exceeds [`MAX_READ_COUNT`].
    pub fn read(start: u16, count: u16) -> Result<Self> {
        if count == 0 || count > MAX_READ_COUNT {
            return Err(MfcError::encoding(format!(
                "read count must be 1-{MAX_READ_COUNT}, got {count}"
            )));
        }
        Ok(Self::Read { start, count })
    }

    /// Creates a write request.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::Encoding` if the payload is empty or exceeds
    /// [`MAX_WRITE_COUNT`] words.
    pub fn write(start: u16, words: Vec<u16>) -> Result<Self> {
        if words.is_empty() || words.len() > usize::from(MAX_WRITE_COUNT) {
            return Err(MfcError::encoding(format!(
                "write payload must be 1-{MAX_WRITE_COUNT} words, got {}",
                words.len()
            )));
        }
        Ok(Self::Write { start, words })
    }

    /// First register address.
    pub fn start(&self) -> u16 {
        match self {
            Self::Read { start, .. } | Self::Write { start, .. } => *start,
        }
    }

    /// Number of registers touched.
    pub fn count(&self) -> u16 {
        match self {
            Self::Read { count, .. } => *count,
            Self::Write { words, .. } => words.len() as u16,
        }
    }

    /// Modbus function code for this request.
    pub fn function(&self) -> u8 {
        match self {
            Self::Read { .. } => FC_READ_HOLDING,
            Self::Write { words, .. } if words.len() == 1 => FC_WRITE_SINGLE,
            Self::Write { .. } => FC_WRITE_MULTIPLE,
        }
    }

    /// Serializes the request PDU (function code and arguments).
    pub fn to_pdu(&self) -> Vec<u8> {
        let mut pdu = Vec::with_capacity(6 + 2 * usize::from(self.count()));
        pdu.push(self.function());
        pdu.extend_from_slice(&self.start().to_be_bytes());
        match self {
            Self::Read { count, .. } => pdu.extend_from_slice(&count.to_be_bytes()),
            Self::Write { words, .. } if words.len() == 1 => {
                pdu.extend_from_slice(&words[0].to_be_bytes());
            }
            Self::Write { words, .. } => {
                pdu.extend_from_slice(&(words.len() as u16).to_be_bytes());
                pdu.push((words.len() * 2) as u8);
                for word in words {
                    pdu.extend_from_slice(&word.to_be_bytes());
                }
            }
        }
        pdu
    }

    /// Parses a request PDU.
    ///
    /// Used by transports that bridge Modbus requests onto another bus, and
    /// by the device simulator.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::Decoding` on truncated PDUs or unsupported functions.
    pub fn from_pdu(pdu: &[u8]) -> Result<Self> {
        if pdu.len() < 5 {
            return Err(MfcError::decoding(format!(
                "request PDU too short: {} bytes",
                pdu.len()
            )));
        }
        let start = u16::from_be_bytes([pdu[1], pdu[2]]);
        let arg = u16::from_be_bytes([pdu[3], pdu[4]]);

        match pdu[0] {
            FC_READ_HOLDING => Self::read(start, arg).map_err(|e| MfcError::decoding(e.to_string())),
            FC_WRITE_SINGLE => Ok(Self::Write {
                start,
                words: vec![arg],
            }),
            FC_WRITE_MULTIPLE => {
                let byte_count = *pdu
                    .get(5)
                    .ok_or_else(|| MfcError::decoding("missing byte count"))?
                    as usize;
                let data = &pdu[6..];
                if byte_count != usize::from(arg) * 2 || data.len() != byte_count {
                    return Err(MfcError::decoding(format!(
                        "byte count {byte_count} does not match {arg} registers"
                    )));
                }
                let words = data
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                Self::write(start, words).map_err(|e| MfcError::decoding(e.to_string()))
            }
            other => Err(MfcError::decoding(format!(
                "unsupported function code 0x{other:02X}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_limits() {
        assert!(Request::read(0, 0).is_err());
        assert!(Request::read(0, MAX_READ_COUNT).is_ok());
        assert!(Request::read(0, MAX_READ_COUNT + 1).is_err());
    }

    #[test]
    fn test_write_limits() {
        assert!(Request::write(0, vec![]).is_err());
        assert!(Request::write(0, vec![0; usize::from(MAX_WRITE_COUNT) + 1]).is_err());
    }

    #[test]
    fn test_function_selection() {
        assert_eq!(Request::read(0, 1).unwrap().function(), FC_READ_HOLDING);
        assert_eq!(Request::write(1, vec![5]).unwrap().function(), FC_WRITE_SINGLE);
        assert_eq!(
            Request::write(2, vec![0x40A0, 0x0000]).unwrap().function(),
            FC_WRITE_MULTIPLE
        );
    }

    #[test]
    fn test_write_multiple_pdu() {
        let req = Request::write(0x0002, vec![0x40A0, 0x0000]).unwrap();
        assert_eq!(
            req.to_pdu(),
            vec![0x10, 0x00, 0x02, 0x00, 0x02, 0x04, 0x40, 0xA0, 0x00, 0x00]
        );
    }

    #[test]
    fn test_pdu_parse() {
        for req in [
            Request::read(0x6000, 2).unwrap(),
            Request::write(7, vec![1]).unwrap(),
            Request::write(0x7003, vec![0x3F80, 0x0000]).unwrap(),
        ] {
            assert_eq!(Request::from_pdu(&req.to_pdu()).unwrap(), req);
        }
    }

    #[test]
    fn test_pdu_parse_errors() {
        assert!(Request::from_pdu(&[0x03, 0x00]).is_err());
        assert!(Request::from_pdu(&[0x2B, 0x00, 0x00, 0x00, 0x01]).is_err());
        // byte count disagrees with register count
        assert!(Request::from_pdu(&[0x10, 0x00, 0x00, 0x00, 0x02, 0x02, 0x00, 0x01]).is_err());
    }
}
