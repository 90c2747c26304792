//! Frame codec: stateless translation between register requests and
//! Modbus-TCP frames.
//!
//! [`encode`] validates a request against the model's register catalog
//! before producing bytes, so a request that names an unknown register or a
//! payload of the wrong width never reaches the wire. [`decode`] validates a
//! reply against the request it answers and yields the register words.
//!
//! The reverse direction ([`decode_request`], [`encode_reply`]) serves
//! bridges and the device simulator, which sit on the device side.
//!
//! ```
//! use mfc::{codec, Model, Request};
//!
//! let catalog = Model::Scaled { max_flow: 10.0 }.catalog();
//! let request = Request::read(0, 4).unwrap();
//! let frame = codec::encode(&catalog, &request, 1, 1).unwrap();
//!
//! let reply = codec::encode_reply(1, 1, &request, Ok(vec![4990, 5000, 9, 215]));
//! let words = codec::decode(&reply, &request, 1, 1).unwrap();
//! assert_eq!(words, vec![4990, 5000, 9, 215]);
//! # assert_eq!(frame.len(), 12);
//! ```

use crate::catalog::Catalog;
use crate::error::{MfcError, Result};
use crate::header::{MbapHeader, MBAP_HEADER_SIZE};
use crate::request::{Request, EXCEPTION_FLAG, FC_WRITE_SINGLE};
use crate::response::Response;

/// Encodes a request into a complete Modbus-TCP frame.
///
/// # Errors
///
/// Returns `MfcError::Encoding` if the request references a register that is
/// not in `catalog`, splits a multi-word register, writes a read-only
/// register, or carries a payload whose width disagrees with the register.
pub fn encode(catalog: &Catalog, request: &Request, transaction: u16, unit: u8) -> Result<Vec<u8>> {
    match request {
        Request::Read { start, count } => {
            catalog.validate_read(*start, *count)?;
        }
        Request::Write { start, words } => {
            catalog.validate_write(*start, words)?;
        }
    }
    Ok(frame(transaction, unit, &request.to_pdu()))
}

/// Decodes the reply to `request` and returns the register words.
///
/// Writes return an empty vector once the echo has been checked.
///
/// # Errors
///
/// - `MfcError::Decoding` on truncated frames, a function code that does not
///   answer the request, or a payload whose width disagrees with the request
/// - `MfcError::Decoding` if the reply comes from another unit than `unit`
/// - `MfcError::TransactionMismatch` if the reply belongs to another request
/// - `MfcError::Device` if the device answered with an exception
pub fn decode(frame: &[u8], request: &Request, transaction: u16, unit: u8) -> Result<Vec<u16>> {
    let response = Response::from_bytes(frame)?;
    response.check_transaction(transaction)?;
    response.check_unit(unit)?;
    if response.function & !EXCEPTION_FLAG != request.function() {
        return Err(MfcError::decoding(format!(
            "function 0x{:02X} does not answer request function 0x{:02X}",
            response.function,
            request.function()
        )));
    }
    response.check_error()?;

    match request {
        Request::Read { count, .. } => {
            let words = response.to_words()?;
            if words.len() != usize::from(*count) {
                return Err(MfcError::decoding(format!(
                    "expected {} registers, got {}",
                    count,
                    words.len()
                )));
            }
            Ok(words)
        }
        Request::Write { start, words } => {
            let expected = if request.function() == FC_WRITE_SINGLE {
                (*start, words[0])
            } else {
                (*start, words.len() as u16)
            };
            let echo = response.to_echo()?;
            if echo != expected {
                return Err(MfcError::decoding(format!(
                    "write echo {echo:?} does not match request {expected:?}"
                )));
            }
            Ok(Vec::new())
        }
    }
}

/// Parses a request frame as seen by the device.
///
/// # Errors
///
/// Returns `MfcError::Decoding` if the frame is truncated or uses an
/// unsupported function.
pub fn decode_request(frame: &[u8]) -> Result<(MbapHeader, Request)> {
    let header = MbapHeader::from_bytes(frame)?;
    if frame.len() != header.frame_len() {
        return Err(MfcError::decoding(format!(
            "truncated request: header announces {} bytes, got {}",
            header.frame_len(),
            frame.len()
        )));
    }
    let request = Request::from_pdu(&frame[MBAP_HEADER_SIZE..])?;
    Ok((header, request))
}

/// Builds the device's reply to `request`.
///
/// `outcome` is the words read (ignored for writes) or an exception code.
pub fn encode_reply(
    transaction: u16,
    unit: u8,
    request: &Request,
    outcome: std::result::Result<Vec<u16>, u8>,
) -> Vec<u8> {
    let function = request.function();
    let pdu = match (outcome, request) {
        (Err(code), _) => vec![function | EXCEPTION_FLAG, code],
        (Ok(words), Request::Read { .. }) => {
            let mut pdu = Vec::with_capacity(2 + words.len() * 2);
            pdu.push(function);
            pdu.push((words.len() * 2) as u8);
            for word in words {
                pdu.extend_from_slice(&word.to_be_bytes());
            }
            pdu
        }
        (Ok(_), Request::Write { start, words }) => {
            let second = if function == FC_WRITE_SINGLE {
                words[0]
            } else {
                words.len() as u16
            };
            let mut pdu = vec![function];
            pdu.extend_from_slice(&start.to_be_bytes());
            pdu.extend_from_slice(&second.to_be_bytes());
            pdu
        }
    };
    frame(transaction, unit, &pdu)
}

fn frame(transaction: u16, unit: u8, pdu: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MBAP_HEADER_SIZE + pdu.len());
    bytes.extend_from_slice(&MbapHeader::new(transaction, unit, pdu.len()).to_bytes());
    bytes.extend_from_slice(pdu);
    bytes
}
