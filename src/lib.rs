//! # MKS Mass Flow Controller Driver
//!
//! An async Rust driver for MKS mass flow controllers (MFCs) reachable over
//! Modbus-TCP, plus legacy EtherCAT units driven through the EtherCAT master.
//!
//! The driver reads telemetry (flow, setpoint, gas, temperature) and sends
//! commands (setpoint, gas, display) while guaranteeing that concurrent
//! callers never interleave exchanges on the same device.
//!
//! ## Features
//!
//! - **Model catalogs** - each supported model is a tagged variant carrying
//!   its fixed register map and scale factors
//! - **Serialized exchanges** - one request in flight per device, admitted in
//!   arrival order
//! - **Self-healing links** - a timed-out exchange marks the link degraded and
//!   the next exchange reconnects first
//! - **Local validation** - out-of-range setpoints, unknown gases and missing
//!   capabilities fail before any I/O
//! - **No panics** - all errors returned as `Result<T, MfcError>`
//!
//! ## Quick Start
//!
//! ```no_run
//! use mfc::{ControllerConfig, FlowController, Model};
//!
//! #[tokio::main]
//! async fn main() -> mfc::Result<()> {
//!     let config = ControllerConfig::tcp(
//!         "192.168.1.150".parse().unwrap(),
//!         Model::Scaled { max_flow: 10.0 },
//!     );
//!     let mfc = FlowController::connect(config).await?;
//!
//!     // Select nitrogen and ask for half of full scale
//!     mfc.set_gas("N2").await?;
//!     mfc.set(5.0).await?;
//!
//!     let reading = mfc.get().await?;
//!     println!("flow = {:?} of {}", reading.actual, reading.max);
//!
//!     mfc.disconnect().await
//! }
//! ```
//!
//! ## Models
//!
//! | Model | Transport | Flow encoding | Display | Setpoint check |
//! |-------|-----------|---------------|:-------:|:--------------:|
//! | [`Model::Scaled`] | Modbus-TCP | counts of 1/10000 full scale | ✗ | ✗ |
//! | [`Model::Float`] | Modbus-TCP | IEEE-754 `f32`, high word first | ✓ | ✗ |
//! | [`Model::Ethercat`] | EtherCAT SDO | IEEE-754 `f32` | ✗ | ✓ |
//!
//! ## Polling Many Devices
//!
//! Each [`FlowController`] owns its own [`Connection`], so devices are polled
//! concurrently by running their futures together:
//!
//! ```no_run
//! # use mfc::{ControllerConfig, FlowController, Model};
//! # async fn poll() -> mfc::Result<()> {
//! let model = Model::Float { max_flow: 10.0, analog: false };
//! let a = FlowController::connect(ControllerConfig::tcp("10.0.0.11".parse().unwrap(), model)).await?;
//! let b = FlowController::connect(ControllerConfig::tcp("10.0.0.12".parse().unwrap(), model)).await?;
//! let (ra, rb) = tokio::join!(a.get(), b.get());
//! println!("{:?} {:?}", ra?, rb?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```no_run
//! # use mfc::{ControllerConfig, FlowController, MfcError, Model};
//! # async fn handle(mfc: FlowController) {
//! match mfc.set(12.0).await {
//!     Ok(()) => {}
//!     Err(MfcError::InvalidValue { reason, .. }) => eprintln!("rejected locally: {reason}"),
//!     Err(MfcError::Device { code, .. }) => eprintln!("device refused: 0x{code:02X}"),
//!     Err(MfcError::Timeout) => eprintln!("no answer, will reconnect"),
//!     Err(e) => eprintln!("{e}"),
//! }
//! # }
//! ```
//!
//! ## Testing Without Hardware
//!
//! [`Simulator`] is an in-memory device that speaks the same frames:
//!
//! ```
//! use mfc::{ControllerConfig, FlowController, Model, Role, Simulator, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> mfc::Result<()> {
//! let sim = Simulator::new(Model::Scaled { max_flow: 10.0 });
//! sim.set_value(Role::Flow, Value::Number(4.99))?;
//!
//! let mfc = FlowController::new(ControllerConfig::simulated(sim))?;
//! assert!((mfc.get().await?.actual.unwrap() - 4.99).abs() < 1e-9);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod catalog;
pub mod codec;
mod connection;
mod controller;
mod correlator;
mod error;
mod ethercat;
pub mod gas;
mod header;
mod register;
mod request;
mod response;
mod simulator;
mod transport;

// Public re-exports
pub use catalog::{
    Block, Catalog, Model, ETHERCAT_FLOW_INDEX, ETHERCAT_SETPOINT_INDEX, FULL_SCALE_COUNTS,
};
pub use connection::{Connection, LinkState};
pub use controller::{
    ControllerConfig, FlowController, PhysicalReading, Target, DEFAULT_TIMEOUT, DEFAULT_UNIT_ID,
    SETPOINT_RETRIES,
};
pub use error::{MfcError, Result};
pub use ethercat::{EthercatTransport, DEFAULT_TOOL, DEVICE_SIGNATURE};
pub use gas::DisplayField;
pub use header::{MbapHeader, MAX_MBAP_LENGTH, MBAP_HEADER_SIZE};
pub use register::{Access, Register, Role, Value, ValueKind};
pub use request::{
    Request, EXCEPTION_FLAG, FC_READ_HOLDING, FC_WRITE_MULTIPLE, FC_WRITE_SINGLE, MAX_READ_COUNT,
    MAX_WRITE_COUNT,
};
pub use response::{Response, EXCEPTION_DEVICE_FAILURE, EXCEPTION_ILLEGAL_VALUE, MIN_RESPONSE_SIZE};
pub use simulator::{SimulatedTransport, Simulator, WireEvent, SIMULATED_DEVICE_NAME};
pub use transport::{TcpTransport, Transport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MODBUS_PORT};
