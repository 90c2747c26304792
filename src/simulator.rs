//! In-memory flow controller for tests, demos and the CLI `--simulate` flag.
//!
//! A [`Simulator`] holds a register map laid out by a model's catalog and
//! answers Modbus frames the way the device would: reads return stored
//! words, writes update them, and addresses outside the catalog produce an
//! illegal-address exception. Test hooks add reply latency, stalled replies,
//! rejected writes and refused connections, and every frame crossing the
//! simulated wire is recorded in order.
//!
//! ```
//! use mfc::{Model, Role, Simulator, Value};
//!
//! let sim = Simulator::new(Model::Scaled { max_flow: 10.0 });
//! sim.set_value(Role::Flow, Value::Number(4.99)).unwrap();
//! assert_eq!(sim.word(0), 4990);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::catalog::{Catalog, Model};
use crate::codec;
use crate::error::{MfcError, Result};
use crate::register::{Role, Value};
use crate::request::Request;
use crate::transport::Transport;

/// Exception code for an address outside the register map.
const EXCEPTION_ILLEGAL_ADDRESS: u8 = 0x02;

/// Name reported by simulated devices that expose a name register.
pub const SIMULATED_DEVICE_NAME: &str = "Simulated MFC";

/// One event on the simulated wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// Link opened.
    Connect,
    /// Request frame written by the driver.
    Request(Vec<u8>),
    /// Reply frame delivered to the driver.
    Reply(Vec<u8>),
    /// Link closed.
    Close,
}

#[derive(Debug, Default)]
struct DeviceState {
    registers: BTreeMap<u16, u16>,
    log: Vec<WireEvent>,
    latency: Duration,
    stalled_replies: usize,
    rejected: HashMap<u16, u8>,
    ignored: HashSet<u16>,
    stalled_reads: HashSet<u16>,
    refuse_connections: bool,
    connects: usize,
}

/// Shared handle to a simulated device.
///
/// Clones refer to the same device, so a test can keep one handle while the
/// driver owns a [`SimulatedTransport`].
#[derive(Clone)]
pub struct Simulator {
    catalog: Catalog,
    state: Arc<Mutex<DeviceState>>,
}

impl Simulator {
    /// Creates a device with all registers zeroed.
    pub fn new(model: Model) -> Self {
        let sim = Self {
            catalog: model.catalog(),
            state: Arc::new(Mutex::new(DeviceState::default())),
        };
        if sim.catalog.supports(Role::DeviceName) {
            // Infallible: the name fits the catalog's name register.
            sim.set_value(Role::DeviceName, Value::Text(SIMULATED_DEVICE_NAME.to_string()))
                .ok();
        }
        sim
    }

    /// Model being simulated.
    pub fn model(&self) -> Model {
        self.catalog.model()
    }

    /// Creates a transport connected to this device.
    pub fn transport(&self) -> SimulatedTransport {
        SimulatedTransport {
            sim: self.clone(),
            open: false,
            pending: None,
        }
    }

    /// Stores a physical value in the register for `role`.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::UnsupportedOperation` if the model has no such
    /// register, or `MfcError::Encoding` if the value does not fit.
    pub fn set_value(&self, role: Role, value: Value) -> Result<()> {
        let reg = self.catalog.require(role, "simulate")?;
        let words = reg.encode(&value)?;
        let mut state = self.state.lock();
        for (offset, word) in words.into_iter().enumerate() {
            state.registers.insert(reg.address + offset as u16, word);
        }
        Ok(())
    }

    /// Reads back the physical value in the register for `role`.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::UnsupportedOperation` if the model has no such register.
    pub fn value(&self, role: Role) -> Result<Value> {
        let reg = self.catalog.require(role, "simulate")?;
        let state = self.state.lock();
        let words: Vec<u16> = (0..reg.width)
            .map(|offset| {
                state
                    .registers
                    .get(&(reg.address + offset))
                    .copied()
                    .unwrap_or(0)
            })
            .collect();
        reg.decode(&words)
    }

    /// Raw word at `address`.
    pub fn word(&self, address: u16) -> u16 {
        self.state
            .lock()
            .registers
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    /// Delays every reply by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Makes the next `count` replies never arrive.
    pub fn stall_replies(&self, count: usize) {
        self.state.lock().stalled_replies = count;
    }

    /// Rejects writes to the register for `role` with exception `code`.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::UnsupportedOperation` if the model has no such register.
    pub fn reject_writes(&self, role: Role, code: u8) -> Result<()> {
        let reg = self.catalog.require(role, "simulate")?;
        self.state.lock().rejected.insert(reg.address, code);
        Ok(())
    }

    /// Acknowledges writes to the register for `role` without storing them.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::UnsupportedOperation` if the model has no such register.
    pub fn ignore_writes(&self, role: Role) -> Result<()> {
        let reg = self.catalog.require(role, "simulate")?;
        self.state.lock().ignored.insert(reg.address);
        Ok(())
    }

    /// Never answers reads starting at the register for `role`.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::UnsupportedOperation` if the model has no such register.
    pub fn stall_reads(&self, role: Role) -> Result<()> {
        let reg = self.catalog.require(role, "simulate")?;
        self.state.lock().stalled_reads.insert(reg.address);
        Ok(())
    }

    /// Refuses (or accepts again) new connections.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }

    /// Everything that crossed the wire so far.
    pub fn wire_log(&self) -> Vec<WireEvent> {
        self.state.lock().log.clone()
    }

    /// Number of request frames received.
    pub fn request_count(&self) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|e| matches!(e, WireEvent::Request(_)))
            .count()
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    fn process(&self, frame: &[u8]) -> Result<Pending> {
        let (header, request) = codec::decode_request(frame)?;
        let mut state = self.state.lock();
        state.log.push(WireEvent::Request(frame.to_vec()));

        let outcome = match &request {
            Request::Read { start, count } => match self.catalog.validate_read(*start, *count) {
                Ok(_) => Ok((0..*count)
                    .map(|offset| {
                        state
                            .registers
                            .get(&(start + offset))
                            .copied()
                            .unwrap_or(0)
                    })
                    .collect()),
                Err(_) => Err(EXCEPTION_ILLEGAL_ADDRESS),
            },
            Request::Write { start, words } => {
                if let Some(&code) = state.rejected.get(start) {
                    Err(code)
                } else if self.catalog.validate_write(*start, words).is_err() {
                    Err(EXCEPTION_ILLEGAL_ADDRESS)
                } else if state.ignored.contains(start) {
                    Ok(Vec::new())
                } else {
                    for (offset, word) in words.iter().enumerate() {
                        state.registers.insert(start + offset as u16, *word);
                    }
                    Ok(Vec::new())
                }
            }
        };

        let stalled_read =
            matches!(&request, Request::Read { start, .. } if state.stalled_reads.contains(start));
        if stalled_read || state.stalled_replies > 0 {
            if !stalled_read {
                state.stalled_replies -= 1;
            }
            debug!("simulator: stalling reply to transaction {}", header.transaction);
            return Ok(Pending::Stall);
        }
        Ok(Pending::Reply {
            frame: codec::encode_reply(header.transaction, header.unit, &request, outcome),
            latency: state.latency,
        })
    }
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("model", &self.catalog.model())
            .finish()
    }
}

enum Pending {
    Reply { frame: Vec<u8>, latency: Duration },
    Stall,
}

/// [`Transport`] that talks to a [`Simulator`].
pub struct SimulatedTransport {
    sim: Simulator,
    open: bool,
    pending: Option<Pending>,
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        let mut state = self.sim.state.lock();
        if state.refuse_connections {
            return Err(MfcError::connection(self.endpoint(), "connection refused"));
        }
        state.connects += 1;
        state.log.push(WireEvent::Connect);
        self.open = true;
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        if !self.open {
            return Err(MfcError::connection(self.endpoint(), "not connected"));
        }
        self.pending = Some(self.sim.process(frame)?);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        match self.pending.take() {
            Some(Pending::Reply { frame, latency }) => {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                self.sim.state.lock().log.push(WireEvent::Reply(frame.clone()));
                Ok(frame)
            }
            Some(Pending::Stall) => {
                std::future::pending::<()>().await;
                Err(MfcError::Timeout)
            }
            None => Err(MfcError::decoding("no request outstanding")),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.pending = None;
            self.sim.state.lock().log.push(WireEvent::Close);
        }
        Ok(())
    }

    fn endpoint(&self) -> String {
        format!("simulated {}", self.sim.model().name())
    }
}

impl fmt::Debug for SimulatedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedTransport")
            .field("model", &self.sim.model())
            .field("open", &self.open)
            .finish()
    }
}
