//! Modbus-TCP response parsing and validation.
//!
//! A response frame consists of:
//!
//! | Component | Size | Description |
//! |-----------|------|-------------|
//! | MBAP header | 7 bytes | transaction id echoed from the request |
//! | Function | 1 byte | request function, or `function \| 0x80` on exception |
//! | Data | Variable | byte count + words for reads, echo for writes, exception code |
//!
//! # Example
//!
//! ```
//! use mfc::Response;
//!
//! let bytes = [
//!     0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, // MBAP
//!     0x03, 0x04, // function, byte count
//!     0x13, 0x7E, 0x13, 0x88, // 4990, 5000
//! ];
//!
//! let response = Response::from_bytes(&bytes).unwrap();
//! assert!(response.check_error().is_ok());
//! assert_eq!(response.to_words().unwrap(), vec![4990, 5000]);
//! ```

use crate::error::{MfcError, Result};
use crate::header::{MbapHeader, MBAP_HEADER_SIZE};
use crate::request::EXCEPTION_FLAG;

/// Minimum response size: header (7) + function (1) + one data byte.
pub const MIN_RESPONSE_SIZE: usize = MBAP_HEADER_SIZE + 2;

/// Modbus exception code for an illegal data value.
pub const EXCEPTION_ILLEGAL_VALUE: u8 = 0x03;

/// Modbus exception code for a server device failure.
pub const EXCEPTION_DEVICE_FAILURE: u8 = 0x04;

/// Parsed Modbus-TCP response.
#[derive(Debug, Clone)]
pub struct Response {
    /// Response header.
    pub header: MbapHeader,
    /// Function code as received.
    pub function: u8,
    /// Bytes following the function code.
    pub data: Vec<u8>,
}

impl Response {
    /// Parses a response from one complete frame.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::Decoding` if the frame is shorter than its header
    /// announces or shorter than [`MIN_RESPONSE_SIZE`].
    pub fn from_bytes(frame: &[u8]) -> Result<Self> {
        if frame.len() < MIN_RESPONSE_SIZE {
            return Err(MfcError::decoding(format!(
                "response too short: expected at least {} bytes, got {}",
                MIN_RESPONSE_SIZE,
                frame.len()
            )));
        }

        let header = MbapHeader::from_bytes(frame)?;
        if frame.len() != header.frame_len() {
            return Err(MfcError::decoding(format!(
                "truncated frame: header announces {} bytes, got {}",
                header.frame_len(),
                frame.len()
            )));
        }

        Ok(Self {
            header,
            function: frame[MBAP_HEADER_SIZE],
            data: frame[MBAP_HEADER_SIZE + 1..].to_vec(),
        })
    }

    /// Returns whether the device answered with an exception.
    pub fn is_exception(&self) -> bool {
        self.function & EXCEPTION_FLAG != 0
    }

    /// Converts an exception response into a device error.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::Device` carrying the device's exception code.
    ///
    /// # Example
    ///
    /// ```
    /// use mfc::{MfcError, Response};
    ///
    /// let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x86, 0x03];
    /// let response = Response::from_bytes(&bytes).unwrap();
    /// assert!(matches!(
    ///     response.check_error(),
    ///     Err(MfcError::Device { function: 0x06, code: 0x03 })
    /// ));
    /// ```
    pub fn check_error(&self) -> Result<()> {
        if self.is_exception() {
            Err(MfcError::device(self.function & !EXCEPTION_FLAG, self.data[0]))
        } else {
            Ok(())
        }
    }

    /// Validates the transaction id matches the request.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::TransactionMismatch` if the ids differ.
    pub fn check_transaction(&self, expected: u16) -> Result<()> {
        if self.header.transaction == expected {
            Ok(())
        } else {
            Err(MfcError::transaction_mismatch(
                expected,
                self.header.transaction,
            ))
        }
    }

    /// Checks that the reply came from the addressed unit.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::Decoding` if the unit ids differ.
    pub fn check_unit(&self, expected: u8) -> Result<()> {
        if self.header.unit == expected {
            Ok(())
        } else {
            Err(MfcError::decoding(format!(
                "reply from unit {} to a request for unit {}",
                self.header.unit, expected
            )))
        }
    }

    /// Extracts the register words of a read response.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::Decoding` if the byte count disagrees with the data
    /// length or is odd.
    pub fn to_words(&self) -> Result<Vec<u16>> {
        let byte_count = usize::from(self.data[0]);
        let payload = &self.data[1..];
        if byte_count != payload.len() || byte_count % 2 != 0 {
            return Err(MfcError::decoding(format!(
                "byte count {} does not match {} data bytes",
                byte_count,
                payload.len()
            )));
        }

        Ok(payload
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect())
    }

    /// Returns the (address, value-or-count) pair echoed by a write response.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::Decoding` if the echo is not four bytes.
    pub fn to_echo(&self) -> Result<(u16, u16)> {
        if self.data.len() != 4 {
            return Err(MfcError::decoding(format!(
                "write echo must be 4 bytes, got {}",
                self.data.len()
            )));
        }
        Ok((
            u16::from_be_bytes([self.data[0], self.data[1]]),
            u16::from_be_bytes([self.data[2], self.data[3]]),
        ))
    }
}
