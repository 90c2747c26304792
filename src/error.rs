//! Error types for the flow controller driver.

use std::io;
use thiserror::Error;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, MfcError>;

/// Errors that can occur while talking to a mass flow controller.
#[derive(Debug, Error)]
pub enum MfcError {
    /// Transport unreachable, refused, or failed to open.
    #[error("Connection to {endpoint} failed: {reason}")]
    Connection {
        /// Address or bus position of the device.
        endpoint: String,
        /// Description of the failure.
        reason: String,
    },

    /// No reply within the exchange deadline.
    #[error("Communication timeout")]
    Timeout,

    /// Request does not match the register catalog.
    #[error("Encoding error: {reason}")]
    Encoding {
        /// Description of the encoding error.
        reason: String,
    },

    /// Response is malformed or does not match the request.
    #[error("Decoding error: {reason}")]
    Decoding {
        /// Description of the decoding error.
        reason: String,
    },

    /// Fault reported by the device itself (Modbus exception code).
    #[error("Device error: function 0x{function:02X}, exception code 0x{code:02X}")]
    Device {
        /// Function code of the rejected request.
        function: u8,
        /// Exception code reported by the device.
        code: u8,
    },

    /// Local precondition failure, caught before any I/O.
    #[error("Invalid value for '{parameter}': {reason}")]
    InvalidValue {
        /// Name of the offending parameter.
        parameter: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The device model does not expose the requested operation.
    #[error("Unsupported operation '{operation}' for {model}")]
    UnsupportedOperation {
        /// Name of the operation.
        operation: String,
        /// Model that lacks the capability.
        model: String,
    },

    /// Transaction id mismatch between request and response.
    #[error("Transaction mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    TransactionMismatch {
        /// Transaction id of the request.
        expected: u16,
        /// Transaction id found in the response.
        received: u16,
    },

    /// The device kept reporting a different setpoint after the retries.
    #[error("Setpoint not applied: requested {requested}, device reports {reported}")]
    SetpointNotApplied {
        /// Setpoint written.
        requested: f64,
        /// Setpoint read back.
        reported: f64,
    },

    /// The caller's deadline fired before the exchange finished.
    #[error("Exchange cancelled by caller deadline")]
    Cancelled,

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl MfcError {
    /// Creates a new `Connection` error.
    ///
    /// # Example
    ///
    /// ```
    /// use mfc::MfcError;
    ///
    /// let err = MfcError::connection("192.168.1.10:502", "connection refused");
    /// assert!(err.is_retryable());
    /// ```
    pub fn connection(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `Encoding` error.
    pub fn encoding(reason: impl Into<String>) -> Self {
        Self::Encoding {
            reason: reason.into(),
        }
    }

    /// Creates a new `Decoding` error.
    ///
    /// # Example
    ///
    /// ```
    /// use mfc::MfcError;
    ///
    /// let err = MfcError::decoding("frame too short");
    /// assert_eq!(err.to_string(), "Decoding error: frame too short");
    /// ```
    pub fn decoding(reason: impl Into<String>) -> Self {
        Self::Decoding {
            reason: reason.into(),
        }
    }

    /// Creates a new `Device` error.
    pub fn device(function: u8, code: u8) -> Self {
        Self::Device { function, code }
    }

    /// Creates a new `InvalidValue` error.
    ///
    /// # Example
    ///
    /// ```
    /// use mfc::MfcError;
    ///
    /// let err = MfcError::invalid_value("setpoint", "must be between 0 and 10");
    /// assert!(!err.is_retryable());
    /// ```
    pub fn invalid_value(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `UnsupportedOperation` error.
    pub fn unsupported(operation: impl Into<String>, model: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
            model: model.into(),
        }
    }

    /// Creates a new `TransactionMismatch` error.
    pub fn transaction_mismatch(expected: u16, received: u16) -> Self {
        Self::TransactionMismatch { expected, received }
    }

    /// Returns whether the failure came from the transport rather than from
    /// the request or the device, so that a caller-side retry makes sense.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout | Self::Io(_) | Self::Cancelled
        )
    }

    /// Returns whether this failure leaves the socket in an unknown state.
    ///
    /// A connection that saw one of these errors must reconnect before the
    /// next exchange.
    pub fn degrades_connection(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Io(_) | Self::TransactionMismatch { .. } | Self::Decoding { .. }
        )
    }
}
