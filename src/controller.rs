//! Flow controller facade: the API automation scripts and the CLI use.
//!
//! [`FlowController`] translates domain operations into register reads and
//! writes through its model's [`Catalog`], and converts raw words to and from
//! physical units. Validation failures (out-of-range setpoints, unknown gas
//! names, missing capabilities) are reported before any I/O.
//!
//! # Example
//!
//! ```no_run
//! use mfc::{ControllerConfig, FlowController, Model};
//!
//! # async fn example() -> mfc::Result<()> {
//! let config = ControllerConfig::tcp(
//!     "192.168.1.150".parse().unwrap(),
//!     Model::Float { max_flow: 10.0, analog: false },
//! );
//!
//! let reading = FlowController::session(config, |mfc| async move {
//!     mfc.set_gas("N2").await?;
//!     mfc.set(5.0).await?;
//!     mfc.get().await
//! })
//! .await?;
//! println!("{:?}", reading.actual);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::catalog::{Catalog, Model};
use crate::connection::{Connection, LinkState};
use crate::error::{MfcError, Result};
use crate::ethercat::EthercatTransport;
use crate::gas::{describe_gas, gas_code, DisplayField};
use crate::register::{Role, Value};
use crate::request::Request;
use crate::simulator::Simulator;
use crate::transport::{TcpTransport, Transport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MODBUS_PORT};

/// Default Modbus unit identifier.
pub const DEFAULT_UNIT_ID: u8 = 1;

/// Default per-exchange timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Number of rewrites when a verified setpoint does not stick.
pub const SETPOINT_RETRIES: usize = 3;

/// Tolerance used when comparing a reported setpoint with the cached
/// analog-override setpoint.
const ANALOG_TOLERANCE: f64 = 1e-3;

/// Where the controller lives.
#[derive(Debug, Clone)]
pub enum Target {
    /// Modbus-TCP device.
    Tcp(SocketAddr),
    /// EtherCAT slave at a bus position.
    Ethercat {
        /// Bus position.
        position: u16,
    },
    /// In-memory device.
    Simulated(Simulator),
}

/// Configuration for a [`FlowController`].
///
/// # Example
///
/// ```
/// use mfc::{ControllerConfig, Model};
/// use std::time::Duration;
///
/// let config = ControllerConfig::tcp(
///     "192.168.1.150".parse().unwrap(),
///     Model::Scaled { max_flow: 10.0 },
/// )
/// .with_port(5020)
/// .with_unit_id(2)
/// .with_timeout(Duration::from_millis(500));
///
/// assert_eq!(config.unit_id, 2);
/// ```
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Device location.
    pub target: Target,
    /// Device model.
    pub model: Model,
    /// Modbus unit identifier.
    pub unit_id: u8,
    /// Per-exchange timeout.
    pub timeout: Duration,
    /// Timeout for opening the link.
    pub connect_timeout: Duration,
    /// Runtime exchanges are spawned on. Defaults to the current runtime.
    pub runtime: Option<Handle>,
}

impl ControllerConfig {
    fn with_target(target: Target, model: Model) -> Self {
        Self {
            target,
            model,
            unit_id: DEFAULT_UNIT_ID,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            runtime: None,
        }
    }

    /// Modbus-TCP controller at `ip` on the default port.
    pub fn tcp(ip: IpAddr, model: Model) -> Self {
        Self::with_target(Target::Tcp(SocketAddr::new(ip, DEFAULT_MODBUS_PORT)), model)
    }

    /// Legacy EtherCAT controller at bus `position`.
    pub fn ethercat(position: u16, max_flow: f64) -> Self {
        Self::with_target(Target::Ethercat { position }, Model::Ethercat { max_flow })
    }

    /// In-memory controller.
    pub fn simulated(simulator: Simulator) -> Self {
        let model = simulator.model();
        Self::with_target(Target::Simulated(simulator), model)
    }

    /// Sets the TCP port. Ignored for other targets.
    pub fn with_port(mut self, port: u16) -> Self {
        if let Target::Tcp(addr) = &mut self.target {
            addr.set_port(port);
        }
        self
    }

    /// Sets the Modbus unit identifier.
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    /// Sets the per-exchange timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Runs exchanges on `runtime` instead of the current one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    fn transport(&self) -> Box<dyn Transport> {
        match &self.target {
            Target::Tcp(addr) => Box::new(TcpTransport::new(*addr, self.connect_timeout)),
            Target::Ethercat { position } => {
                Box::new(EthercatTransport::new(*position, self.connect_timeout))
            }
            Target::Simulated(sim) => Box::new(sim.transport()),
        }
    }
}

/// Decoded state of a controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhysicalReading {
    /// Measured flow.
    pub actual: Option<f64>,
    /// Active setpoint.
    pub setpoint: Option<f64>,
    /// Selected gas.
    pub gas: Option<String>,
    /// Device temperature, on models that report it.
    pub temperature: Option<f64>,
    /// Full-scale flow of the model.
    pub max: f64,
    /// False when some telemetry could not be read.
    pub connected: bool,
}

impl PhysicalReading {
    /// Reading with no data, as reported for an unreachable device.
    pub fn disconnected(max: f64) -> Self {
        Self {
            actual: None,
            setpoint: None,
            gas: None,
            temperature: None,
            max,
            connected: false,
        }
    }
}

/// Driver for one mass flow controller.
#[derive(Debug)]
pub struct FlowController {
    connection: Connection,
    catalog: Catalog,
    analog_setpoint: Mutex<Option<f64>>,
}

impl FlowController {
    /// Builds a controller without touching the network. The link opens on
    /// the first operation.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::InvalidValue` if no runtime was configured and the
    /// caller is not inside one.
    pub fn new(config: ControllerConfig) -> Result<Self> {
        let transport = config.transport();
        Self::with_transport(config, transport)
    }

    /// Builds a controller over a caller-supplied transport.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::InvalidValue` if no runtime was configured and the
    /// caller is not inside one.
    pub fn with_transport(config: ControllerConfig, transport: Box<dyn Transport>) -> Result<Self> {
        let runtime = match config.runtime {
            Some(handle) => handle,
            None => Handle::try_current()
                .map_err(|e| MfcError::invalid_value("runtime", e.to_string()))?,
        };
        let catalog = config.model.catalog();
        Ok(Self {
            connection: Connection::new(
                transport,
                catalog.clone(),
                config.unit_id,
                config.timeout,
                runtime,
            ),
            catalog,
            analog_setpoint: Mutex::new(None),
        })
    }

    /// Builds a controller and opens its link.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::Connection` if the device cannot be reached.
    pub async fn connect(config: ControllerConfig) -> Result<Self> {
        let controller = Self::new(config)?;
        controller.connection.connect().await?;
        info!("connected to {}", controller.connection.endpoint());
        Ok(controller)
    }

    /// Connects, runs `f`, then disconnects whether `f` succeeded or not.
    ///
    /// # Errors
    ///
    /// Returns the connect error, or whatever `f` returned.
    pub async fn session<T, F, Fut>(config: ControllerConfig, f: F) -> Result<T>
    where
        F: FnOnce(Arc<FlowController>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let controller = Arc::new(Self::connect(config).await?);
        let result = f(Arc::clone(&controller)).await;
        if let Err(e) = controller.disconnect().await {
            warn!("disconnect from {} failed: {}", controller.connection.endpoint(), e);
        }
        result
    }

    /// Reads flow, setpoint, gas and temperature.
    ///
    /// If the first register block fails the error is returned. If a later
    /// block fails, the reading carries whatever was read and
    /// `connected: false`.
    ///
    /// On analog controllers a setpoint that no longer matches the last one
    /// written (the device rebooted) is written again. The reading still
    /// reports what the device had.
    ///
    /// # Errors
    ///
    /// Returns the error of the first exchange.
    pub async fn get(&self) -> Result<PhysicalReading> {
        let mut words: BTreeMap<u16, u16> = BTreeMap::new();
        let mut connected = true;

        for (i, block) in self.catalog.read_blocks().into_iter().enumerate() {
            let request = Request::read(block.start, block.count)?;
            match self.connection.exchange(&request).await {
                Ok(values) => {
                    for (offset, word) in values.into_iter().enumerate() {
                        words.insert(block.start + offset as u16, word);
                    }
                }
                Err(e) if i > 0 && e.is_retryable() => {
                    warn!("partial reading from {}: {}", self.connection.endpoint(), e);
                    connected = false;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let mut reading = PhysicalReading::disconnected(self.max_flow());
        reading.connected = connected;
        for reg in self.catalog.registers() {
            let raw: Option<Vec<u16>> = (0..reg.width)
                .map(|offset| words.get(&(reg.address + offset)).copied())
                .collect();
            let Some(raw) = raw else { continue };
            let value = reg.decode(&raw)?;
            match (reg.role, value) {
                (Role::Flow, Value::Number(v)) => reading.actual = Some(v),
                (Role::Setpoint, Value::Number(v)) => reading.setpoint = Some(v),
                (Role::Temperature, Value::Number(v)) => reading.temperature = Some(v),
                (Role::Gas, Value::Code(code)) => reading.gas = Some(describe_gas(code)),
                _ => {}
            }
        }

        if connected && self.catalog.analog_override() {
            let cached = *self.analog_setpoint.lock();
            if let (Some(wanted), Some(reported)) = (cached, reading.setpoint) {
                if (wanted - reported).abs() > ANALOG_TOLERANCE {
                    warn!(
                        "setpoint on {} is {} instead of {}, re-applying",
                        self.connection.endpoint(),
                        reported,
                        wanted
                    );
                    self.set(wanted).await?;
                }
            }
        }
        Ok(reading)
    }

    /// Sets the flow setpoint.
    ///
    /// # Errors
    ///
    /// - `MfcError::InvalidValue` if `setpoint` is outside `[0, max_flow]` (no I/O)
    /// - `MfcError::SetpointNotApplied` if a verifying model kept reporting
    ///   another value after [`SETPOINT_RETRIES`] rewrites
    pub async fn set(&self, setpoint: f64) -> Result<()> {
        let max = self.max_flow();
        if !setpoint.is_finite() || !(0.0..=max).contains(&setpoint) {
            return Err(MfcError::invalid_value(
                "setpoint",
                format!("{setpoint} is outside 0..={max}"),
            ));
        }
        let register = *self.catalog.require(Role::Setpoint, "set")?;

        if self.catalog.analog_override() {
            self.write(Role::AnalogOverride, Value::Code(0), "set").await?;
            if self.catalog.supports(Role::Display) {
                self.write(Role::Display, Value::Code(DisplayField::Flow.code()), "set")
                    .await?;
            }
        }
        self.write(Role::Setpoint, Value::Number(setpoint), "set").await?;
        if self.catalog.analog_override() {
            *self.analog_setpoint.lock() = Some(setpoint);
        }

        if !self.catalog.verify_setpoint() {
            return Ok(());
        }
        let tolerance = register.resolution();
        let mut attempt = 0;
        loop {
            let reported = self
                .read(Role::Setpoint, "set")
                .await?
                .as_number()
                .unwrap_or(f64::NAN);
            if (reported - setpoint).abs() < tolerance {
                return Ok(());
            }
            if attempt == SETPOINT_RETRIES {
                return Err(MfcError::SetpointNotApplied {
                    requested: setpoint,
                    reported,
                });
            }
            attempt += 1;
            info!(
                "setpoint on {} reads {} instead of {}, retry {}",
                self.connection.endpoint(),
                reported,
                setpoint,
                attempt
            );
            self.write(Role::Setpoint, Value::Number(setpoint), "set").await?;
        }
    }

    /// Opens the valve fully (`set(max_flow)`).
    pub async fn open(&self) -> Result<()> {
        self.set(self.max_flow()).await
    }

    /// Closes the valve (`set(0)`).
    pub async fn close(&self) -> Result<()> {
        self.set(0.0).await
    }

    /// Selects the gas by name (case-insensitive), e.g. `"N2"`.
    ///
    /// # Errors
    ///
    /// - `MfcError::UnsupportedOperation` if the model has no gas register
    /// - `MfcError::InvalidValue` for unknown names (no I/O)
    /// - `MfcError::Device` if the device rejects the gas
    pub async fn set_gas(&self, gas: &str) -> Result<()> {
        self.catalog.require(Role::Gas, "set_gas")?;
        let code = gas_code(gas)
            .ok_or_else(|| MfcError::invalid_value("gas", format!("unknown gas '{gas}'")))?;
        self.write(Role::Gas, Value::Code(code), "set_gas").await
    }

    /// Selects what the front display shows: `ip`, `flow` or `temperature`.
    ///
    /// # Errors
    ///
    /// - `MfcError::UnsupportedOperation` if the model has no display (no I/O)
    /// - `MfcError::InvalidValue` for unknown fields (no I/O)
    pub async fn set_display(&self, field: &str) -> Result<()> {
        self.catalog.require(Role::Display, "set_display")?;
        let field: DisplayField = field.parse()?;
        self.write(Role::Display, Value::Code(field.code()), "set_display")
            .await
    }

    /// Reads the device's name.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::UnsupportedOperation` on models without a name register.
    pub async fn device_name(&self) -> Result<String> {
        match self.read(Role::DeviceName, "device_name").await? {
            Value::Text(name) => Ok(name),
            other => Err(MfcError::decoding(format!("device name decoded as {other:?}"))),
        }
    }

    /// Closes the link. Safe to call repeatedly.
    pub async fn disconnect(&self) -> Result<()> {
        self.connection.close().await?;
        info!("disconnected from {}", self.connection.endpoint());
        Ok(())
    }

    /// Full-scale flow.
    pub fn max_flow(&self) -> f64 {
        self.catalog.max_flow()
    }

    /// Device model.
    pub fn model(&self) -> Model {
        self.catalog.model()
    }

    /// Link health.
    pub fn state(&self) -> LinkState {
        self.connection.state()
    }

    /// Underlying connection, for raw register access.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    async fn read(&self, role: Role, operation: &str) -> Result<Value> {
        let reg = *self.catalog.require(role, operation)?;
        let words = self
            .connection
            .exchange(&Request::read(reg.address, reg.width)?)
            .await?;
        reg.decode(&words)
    }

    async fn write(&self, role: Role, value: Value, operation: &str) -> Result<()> {
        let reg = *self.catalog.require(role, operation)?;
        let words = reg.encode(&value)?;
        self.connection
            .exchange(&Request::write(reg.address, words)?)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{EXCEPTION_DEVICE_FAILURE, EXCEPTION_ILLEGAL_VALUE};
    use crate::simulator::WireEvent;

    const SCALED: Model = Model::Scaled { max_flow: 10.0 };
    const FLOAT: Model = Model::Float {
        max_flow: 10.0,
        analog: false,
    };
    const ANALOG: Model = Model::Float {
        max_flow: 10.0,
        analog: true,
    };
    const ETHERCAT: Model = Model::Ethercat { max_flow: 5.0 };

    fn controller(sim: &Simulator) -> FlowController {
        FlowController::new(ControllerConfig::simulated(sim.clone())).unwrap()
    }

    fn writes(sim: &Simulator) -> usize {
        sim.wire_log()
            .iter()
            .filter(|e| matches!(e, WireEvent::Request(frame) if frame[7] != 0x03))
            .count()
    }

    #[test]
    fn test_config_defaults() {
        let config = ControllerConfig::tcp("10.0.0.5".parse().unwrap(), SCALED);
        assert_eq!(config.unit_id, DEFAULT_UNIT_ID);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        match config.with_port(1502).target {
            Target::Tcp(addr) => assert_eq!(addr.to_string(), "10.0.0.5:1502"),
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn test_config_ethercat() {
        let config = ControllerConfig::ethercat(3, 5.0).with_port(1502);
        assert_eq!(config.model, ETHERCAT);
        assert!(matches!(config.target, Target::Ethercat { position: 3 }));

        let transport = config
            .with_connect_timeout(Duration::from_millis(250))
            .transport();
        assert!(format!("{transport:?}").contains("connect_timeout: 250ms"));
    }

    #[test]
    fn test_new_outside_runtime() {
        let sim = Simulator::new(SCALED);
        let err = FlowController::new(ControllerConfig::simulated(sim)).unwrap_err();
        assert!(matches!(err, MfcError::InvalidValue { .. }));
    }

    #[test]
    fn test_new_with_explicit_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let sim = Simulator::new(SCALED);
        sim.set_value(Role::Flow, Value::Number(1.0)).unwrap();
        let config = ControllerConfig::simulated(sim).with_runtime(runtime.handle().clone());
        let mfc = FlowController::new(config).unwrap();
        let reading = runtime.block_on(mfc.get()).unwrap();
        assert_eq!(reading.actual, Some(1.0));
    }

    #[tokio::test]
    async fn test_nominal_read() {
        let sim = Simulator::new(SCALED);
        sim.set_value(Role::Flow, Value::Number(4.99)).unwrap();
        sim.set_value(Role::Setpoint, Value::Number(5.0)).unwrap();
        sim.set_value(Role::Gas, Value::Code(9)).unwrap();
        sim.set_value(Role::Temperature, Value::Number(21.5)).unwrap();
        assert_eq!((sim.word(0), sim.word(1)), (4990, 5000));

        let reading = controller(&sim).get().await.unwrap();
        assert!((reading.actual.unwrap() - 4.99).abs() < 1e-9);
        assert!((reading.setpoint.unwrap() - 5.0).abs() < 1e-9);
        assert_eq!(reading.gas.as_deref(), Some("N2"));
        assert!((reading.temperature.unwrap() - 21.5).abs() < 1e-9);
        assert_eq!(reading.max, 10.0);
        assert!(reading.connected);
        // One contiguous block.
        assert_eq!(sim.request_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_gas_code_reads_as_number() {
        let sim = Simulator::new(SCALED);
        sim.set_value(Role::Gas, Value::Code(42)).unwrap();
        let reading = controller(&sim).get().await.unwrap();
        assert_eq!(reading.gas.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_set_gas_then_read_back() {
        let sim = Simulator::new(FLOAT);
        let mfc = controller(&sim);
        mfc.set_gas("N2").await.unwrap();
        assert_eq!(sim.value(Role::Gas).unwrap(), Value::Code(9));
        assert_eq!(mfc.get().await.unwrap().gas.as_deref(), Some("N2"));

        mfc.set_gas("ar").await.unwrap();
        assert_eq!(sim.value(Role::Gas).unwrap(), Value::Code(1));
    }

    #[tokio::test]
    async fn test_unknown_gas_fails_locally() {
        let sim = Simulator::new(FLOAT);
        let err = controller(&sim).set_gas("Unobtainium").await.unwrap_err();
        assert!(matches!(err, MfcError::InvalidValue { .. }));
        assert!(sim.wire_log().is_empty());
    }

    #[tokio::test]
    async fn test_set_gas_unsupported_on_ethercat() {
        let sim = Simulator::new(ETHERCAT);
        let err = controller(&sim).set_gas("N2").await.unwrap_err();
        assert!(matches!(err, MfcError::UnsupportedOperation { .. }));
        assert!(sim.wire_log().is_empty());
    }

    #[tokio::test]
    async fn test_device_rejects_gas() {
        let sim = Simulator::new(FLOAT);
        sim.reject_writes(Role::Gas, EXCEPTION_ILLEGAL_VALUE).unwrap();
        let mfc = controller(&sim);
        let err = mfc.set_gas("SF6").await.unwrap_err();
        assert!(matches!(
            err,
            MfcError::Device {
                code: EXCEPTION_ILLEGAL_VALUE,
                ..
            }
        ));
        assert_eq!(mfc.state(), LinkState::Connected);
    }

    #[tokio::test]
    async fn test_unsupported_display() {
        let sim = Simulator::new(SCALED);
        let err = controller(&sim).set_display("flow").await.unwrap_err();
        assert!(matches!(err, MfcError::UnsupportedOperation { .. }));
        assert_eq!(writes(&sim), 0);
        assert!(sim.wire_log().is_empty());
    }

    #[tokio::test]
    async fn test_set_display() {
        let sim = Simulator::new(FLOAT);
        let mfc = controller(&sim);
        mfc.set_display("Temperature").await.unwrap();
        assert_eq!(sim.value(Role::Display).unwrap(), Value::Code(2));

        let err = mfc.set_display("pressure").await.unwrap_err();
        assert!(matches!(err, MfcError::InvalidValue { .. }));
        assert_eq!(writes(&sim), 1);
    }

    #[tokio::test]
    async fn test_setpoint_validation_short_circuits() {
        let sim = Simulator::new(SCALED);
        let mfc = controller(&sim);
        for bad in [-1.0, 11.0, f64::NAN, f64::INFINITY] {
            let err = mfc.set(bad).await.unwrap_err();
            assert!(matches!(err, MfcError::InvalidValue { .. }), "{bad}");
        }
        assert!(sim.wire_log().is_empty());
    }

    #[tokio::test]
    async fn test_open_close() {
        let sim = Simulator::new(FLOAT);
        let mfc = controller(&sim);
        mfc.open().await.unwrap();
        assert_eq!(sim.value(Role::Setpoint).unwrap(), Value::Number(10.0));
        mfc.close().await.unwrap();
        assert_eq!(sim.value(Role::Setpoint).unwrap(), Value::Number(0.0));
    }

    #[tokio::test]
    async fn test_degraded_reconnect() {
        let sim = Simulator::new(SCALED);
        sim.set_value(Role::Flow, Value::Number(2.0)).unwrap();
        let config = ControllerConfig::simulated(sim.clone()).with_timeout(Duration::from_millis(50));
        let mfc = FlowController::connect(config).await.unwrap();

        sim.stall_replies(1);
        assert!(matches!(mfc.get().await, Err(MfcError::Timeout)));
        assert_eq!(mfc.state(), LinkState::Degraded);

        let reading = mfc.get().await.unwrap();
        assert_eq!(reading.actual, Some(2.0));
        assert_eq!(mfc.state(), LinkState::Connected);
        assert_eq!(sim.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_partial_reading() {
        let sim = Simulator::new(ETHERCAT);
        sim.set_value(Role::Flow, Value::Number(1.5)).unwrap();
        sim.stall_reads(Role::Setpoint).unwrap();
        let config = ControllerConfig::simulated(sim.clone()).with_timeout(Duration::from_millis(50));
        let mfc = FlowController::new(config).unwrap();

        let reading = mfc.get().await.unwrap();
        assert_eq!(reading.actual, Some(1.5));
        assert_eq!(reading.setpoint, None);
        assert!(!reading.connected);
        assert_eq!(mfc.state(), LinkState::Degraded);
    }

    #[tokio::test]
    async fn test_ethercat_verifies_setpoint() {
        let sim = Simulator::new(ETHERCAT);
        let mfc = controller(&sim);
        mfc.set(2.5).await.unwrap();
        assert_eq!(sim.value(Role::Setpoint).unwrap(), Value::Number(2.5));
        // Write, then one verifying read.
        assert_eq!(sim.request_count(), 2);
    }

    #[tokio::test]
    async fn test_ethercat_setpoint_not_applied() {
        let sim = Simulator::new(ETHERCAT);
        sim.ignore_writes(Role::Setpoint).unwrap();
        let mfc = controller(&sim);
        match mfc.set(2.5).await {
            Err(MfcError::SetpointNotApplied {
                requested,
                reported,
            }) => {
                assert_eq!(requested, 2.5);
                assert_eq!(reported, 0.0);
            }
            other => panic!("expected SetpointNotApplied, got {other:?}"),
        }
        // First write, then read and rewrite per retry, then the final read.
        assert_eq!(sim.request_count(), 2 + 2 * SETPOINT_RETRIES);
    }

    #[tokio::test]
    async fn test_ethercat_write_rejected() {
        let sim = Simulator::new(ETHERCAT);
        sim.reject_writes(Role::Setpoint, EXCEPTION_DEVICE_FAILURE)
            .unwrap();
        let mfc = controller(&sim);
        assert!(matches!(
            mfc.set(2.5).await,
            Err(MfcError::Device {
                code: EXCEPTION_DEVICE_FAILURE,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_analog_override() {
        let sim = Simulator::new(ANALOG);
        sim.set_value(Role::AnalogOverride, Value::Code(1)).unwrap();
        let mfc = controller(&sim);

        mfc.set(4.0).await.unwrap();
        assert_eq!(sim.value(Role::AnalogOverride).unwrap(), Value::Code(0));
        assert_eq!(sim.value(Role::Display).unwrap(), Value::Code(1));
        assert_eq!(sim.value(Role::Setpoint).unwrap(), Value::Number(4.0));

        // Device reboots and forgets the setpoint.
        sim.set_value(Role::Setpoint, Value::Number(0.0)).unwrap();
        let reading = mfc.get().await.unwrap();
        assert_eq!(reading.setpoint, Some(0.0));
        assert_eq!(sim.value(Role::Setpoint).unwrap(), Value::Number(4.0));

        // In sync: no further writes.
        let before = writes(&sim);
        mfc.get().await.unwrap();
        assert_eq!(writes(&sim), before);
    }

    #[tokio::test]
    async fn test_analog_rejected_setpoint_is_not_reapplied() {
        let sim = Simulator::new(ANALOG);
        sim.reject_writes(Role::Setpoint, EXCEPTION_ILLEGAL_VALUE)
            .unwrap();
        let mfc = controller(&sim);

        assert!(matches!(
            mfc.set(4.0).await,
            Err(MfcError::Device {
                code: EXCEPTION_ILLEGAL_VALUE,
                ..
            })
        ));

        let before = writes(&sim);
        for _ in 0..3 {
            let reading = mfc.get().await.unwrap();
            assert_eq!(reading.setpoint, Some(0.0));
            assert!(reading.connected);
        }
        assert_eq!(writes(&sim), before);
    }

    #[tokio::test]
    async fn test_device_name() {
        let sim = Simulator::new(FLOAT);
        assert_eq!(
            controller(&sim).device_name().await.unwrap(),
            crate::simulator::SIMULATED_DEVICE_NAME
        );

        let sim = Simulator::new(SCALED);
        assert!(matches!(
            controller(&sim).device_name().await,
            Err(MfcError::UnsupportedOperation { .. })
        ));
    }

    #[tokio::test]
    async fn test_session_disconnects_on_error() {
        let sim = Simulator::new(FLOAT);
        let result: Result<()> = FlowController::session(ControllerConfig::simulated(sim.clone()), |mfc| async move {
            mfc.set(20.0).await
        })
        .await;
        assert!(matches!(result, Err(MfcError::InvalidValue { .. })));
        assert_eq!(sim.wire_log(), vec![WireEvent::Connect, WireEvent::Close]);
    }

    #[tokio::test]
    async fn test_session_connect_failure() {
        let sim = Simulator::new(FLOAT);
        sim.refuse_connections(true);
        let result = FlowController::session(ControllerConfig::simulated(sim), |mfc| async move {
            mfc.get().await
        })
        .await;
        assert!(matches!(result, Err(MfcError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_operations_fail_after_disconnect() {
        let sim = Simulator::new(FLOAT);
        let mfc = FlowController::connect(ControllerConfig::simulated(sim)).await.unwrap();
        mfc.disconnect().await.unwrap();
        mfc.disconnect().await.unwrap();
        assert!(matches!(mfc.get().await, Err(MfcError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_reading_json() {
        let sim = Simulator::new(SCALED);
        sim.set_value(Role::Gas, Value::Code(1)).unwrap();
        let reading = controller(&sim).get().await.unwrap();
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["gas"], "Ar");
        assert_eq!(json["connected"], true);
        assert_eq!(json["max"], 10.0);

        let offline = serde_json::to_value(PhysicalReading::disconnected(10.0)).unwrap();
        assert_eq!(offline["actual"], serde_json::Value::Null);
        assert_eq!(offline["connected"], false);
    }
}
