//! Modbus-TCP application header (MBAP).
//!
//! Every request and response on the wire starts with a 7-byte MBAP header:
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0-1 | TID | Transaction identifier, echoed by the device |
//! | 2-3 | PID | Protocol identifier (always 0x0000) |
//! | 4-5 | LEN | Number of following bytes (unit id + PDU) |
//! | 6 | UID | Unit identifier of the addressed device |
//!
//! # Example
//!
//! ```
//! use mfc::MbapHeader;
//!
//! // A read request PDU is 5 bytes; the length field also counts the unit id.
//! let header = MbapHeader::new(0x0001, 1, 5);
//! let bytes = header.to_bytes();
//! assert_eq!(bytes, [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01]);
//! ```

use crate::error::{MfcError, Result};

/// MBAP header size in bytes.
pub const MBAP_HEADER_SIZE: usize = 7;

/// Largest value allowed in the length field (unit id + 253 byte PDU).
pub const MAX_MBAP_LENGTH: usize = 254;

/// Modbus protocol identifier.
const PROTOCOL_ID: u16 = 0x0000;

/// Modbus-TCP application header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier used to pair a response with its request.
    pub transaction: u16,
    /// Protocol identifier.
    pub protocol: u16,
    /// Byte count of unit id plus PDU.
    pub length: u16,
    /// Unit (slave) identifier.
    pub unit: u8,
}

impl MbapHeader {
    /// Creates a header for a PDU of `pdu_len` bytes.
    pub fn new(transaction: u16, unit: u8, pdu_len: usize) -> Self {
        Self {
            transaction,
            protocol: PROTOCOL_ID,
            length: (pdu_len + 1) as u16,
            unit,
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(self) -> [u8; MBAP_HEADER_SIZE] {
        let [t0, t1] = self.transaction.to_be_bytes();
        let [p0, p1] = self.protocol.to_be_bytes();
        let [l0, l1] = self.length.to_be_bytes();
        [t0, t1, p0, p1, l0, l1, self.unit]
    }

    /// Parses a header from bytes.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::Decoding` if the slice is too short, the protocol
    /// identifier is not Modbus, or the length field is out of range.
    ///
    /// # Example
    ///
    /// ```
    /// use mfc::MbapHeader;
    ///
    /// let header = MbapHeader::from_bytes(&[0x00, 0x2A, 0x00, 0x00, 0x00, 0x05, 0x01]).unwrap();
    /// assert_eq!(header.transaction, 0x2A);
    /// assert_eq!(header.pdu_len(), 4);
    /// ```
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MBAP_HEADER_SIZE {
            return Err(MfcError::decoding(format!(
                "header too short: expected {} bytes, got {}",
                MBAP_HEADER_SIZE,
                data.len()
            )));
        }

        let header = Self {
            transaction: u16::from_be_bytes([data[0], data[1]]),
            protocol: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            unit: data[6],
        };

        if header.protocol != PROTOCOL_ID {
            return Err(MfcError::decoding(format!(
                "unexpected protocol id 0x{:04X}",
                header.protocol
            )));
        }
        if header.length < 2 || header.length as usize > MAX_MBAP_LENGTH {
            return Err(MfcError::decoding(format!(
                "invalid length field {}",
                header.length
            )));
        }

        Ok(header)
    }

    /// Number of PDU bytes following the header.
    pub fn pdu_len(self) -> usize {
        self.length as usize - 1
    }

    /// Total frame size announced by this header.
    pub fn frame_len(self) -> usize {
        MBAP_HEADER_SIZE + self.pdu_len()
    }
}
