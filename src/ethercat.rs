//! Bridge transport for legacy EtherCAT controllers.
//!
//! These controllers are not reachable over Modbus. Their flow and setpoint
//! live in the CoE object dictionary and are accessed with SDO uploads and
//! downloads through the IgH EtherCAT master's `ethercat` command line tool.
//!
//! [`EthercatTransport`] accepts the same Modbus frames as every other
//! transport, so the connection and controller layers stay unchanged. Each
//! request is translated into a tool invocation and the result is framed back
//! as a Modbus reply:
//!
//! | Request | Tool invocation |
//! |---------|-----------------|
//! | read 2 words at `index` | `ethercat upload -p <pos> 0x<index> 0x01` |
//! | write 2 words at `index` | `ethercat download -p <pos> 0x<index> 0x01 <value>` |
//!
//! A tool failure becomes a device-failure exception.

use std::fmt;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{MfcError, Result};
use crate::request::Request;
use crate::response::{EXCEPTION_DEVICE_FAILURE, EXCEPTION_ILLEGAL_VALUE};
use crate::transport::Transport;

/// Name of the EtherCAT master tool.
pub const DEFAULT_TOOL: &str = "ethercat";

/// Text the slave listing must contain for a flow controller.
pub const DEVICE_SIGNATURE: &str = "EtherCAT MFC";

/// CoE subindex holding the value on these devices.
const SUBINDEX: u8 = 0x01;

/// Transport that drives one EtherCAT slave through the master tool.
pub struct EthercatTransport {
    position: u16,
    connect_timeout: Duration,
    program: String,
    prefix: Vec<String>,
    open: bool,
    pending: Option<Vec<u8>>,
}

impl EthercatTransport {
    /// Creates a transport for the slave at bus `position`. The slave listing
    /// run by `connect` must finish within `connect_timeout`.
    pub fn new(position: u16, connect_timeout: Duration) -> Self {
        Self {
            position,
            connect_timeout,
            program: DEFAULT_TOOL.to_string(),
            prefix: Vec::new(),
            open: false,
            pending: None,
        }
    }

    /// Runs `program` with `prefix` ahead of the tool arguments instead of
    /// the default `ethercat` binary.
    ///
    /// ```
    /// use mfc::{EthercatTransport, DEFAULT_CONNECT_TIMEOUT};
    ///
    /// let transport = EthercatTransport::new(0, DEFAULT_CONNECT_TIMEOUT)
    ///     .with_command("sudo", vec!["ethercat".to_string()]);
    /// assert_eq!(transport.position(), 0);
    /// ```
    pub fn with_command(mut self, program: impl Into<String>, prefix: Vec<String>) -> Self {
        self.program = program.into();
        self.prefix = prefix;
        self
    }

    /// Bus position of the slave.
    pub fn position(&self) -> u16 {
        self.position
    }

    async fn run(&self, args: Vec<String>) -> Result<Output> {
        debug!("{} {}", self.program, args.join(" "));
        Command::new(&self.program)
            .args(&self.prefix)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                MfcError::connection(self.endpoint(), format!("cannot run {}: {e}", self.program))
            })
    }

    async fn upload(&self, index: u16) -> std::result::Result<Vec<u16>, u8> {
        let output = match self.run(upload_args(self.position, index)).await {
            Ok(output) => output,
            Err(e) => {
                warn!("{}", e);
                return Err(EXCEPTION_DEVICE_FAILURE);
            }
        };
        if !output.status.success() {
            warn!(
                "upload 0x{index:04x} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(EXCEPTION_DEVICE_FAILURE);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_upload(&stdout) {
            Some(value) => {
                let bits = value.to_bits();
                Ok(vec![(bits >> 16) as u16, bits as u16])
            }
            None => {
                warn!("unparseable upload output for 0x{index:04x}: {:?}", stdout.trim());
                Err(EXCEPTION_DEVICE_FAILURE)
            }
        }
    }

    async fn download(&self, index: u16, words: &[u16]) -> std::result::Result<Vec<u16>, u8> {
        let value = f32::from_bits((u32::from(words[0]) << 16) | u32::from(words[1]));
        let output = match self.run(download_args(self.position, index, value)).await {
            Ok(output) => output,
            Err(e) => {
                warn!("{}", e);
                return Err(EXCEPTION_DEVICE_FAILURE);
            }
        };
        if output.status.success() {
            Ok(Vec::new())
        } else {
            warn!(
                "download 0x{index:04x} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            Err(EXCEPTION_DEVICE_FAILURE)
        }
    }
}

#[async_trait]
impl Transport for EthercatTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        let slaves = self.run(vec!["slaves".into(), "-p".into(), self.position.to_string()]);
        let output = match timeout(self.connect_timeout, slaves).await {
            Ok(output) => output?,
            Err(_) => {
                warn!("EtherCAT slave listing timeout: position {}", self.position);
                return Err(MfcError::connection(
                    self.endpoint(),
                    format!("no answer within {:?}", self.connect_timeout),
                ));
            }
        };
        let listing = String::from_utf8_lossy(&output.stdout);
        let name = listing
            .lines()
            .find(|line| !line.trim().is_empty())
            .map(slave_name)
            .ok_or_else(|| {
                MfcError::connection(
                    self.endpoint(),
                    format!("no device found at position {}", self.position),
                )
            })?;
        if !name.contains(DEVICE_SIGNATURE) {
            return Err(MfcError::connection(
                self.endpoint(),
                format!("current device is '{name}', not a flow controller"),
            ));
        }

        info!("EtherCAT slave {} ready: {}", self.position, name);
        self.open = true;
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        if !self.open {
            return Err(MfcError::connection(self.endpoint(), "not connected"));
        }
        let (header, request) = codec::decode_request(frame)?;
        let outcome = match &request {
            Request::Read { start, count: 2 } => self.upload(*start).await,
            Request::Write { start, words } if words.len() == 2 => {
                self.download(*start, words).await
            }
            _ => Err(EXCEPTION_ILLEGAL_VALUE),
        };
        self.pending = Some(codec::encode_reply(
            header.transaction,
            header.unit,
            &request,
            outcome,
        ));
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        self.pending
            .take()
            .ok_or_else(|| MfcError::decoding("no request outstanding"))
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        self.pending = None;
        Ok(())
    }

    fn endpoint(&self) -> String {
        format!("ethercat position {}", self.position)
    }
}

impl fmt::Debug for EthercatTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthercatTransport")
            .field("position", &self.position)
            .field("connect_timeout", &self.connect_timeout)
            .field("program", &self.program)
            .field("open", &self.open)
            .finish()
    }
}

fn upload_args(position: u16, index: u16) -> Vec<String> {
    vec![
        "upload".into(),
        "-p".into(),
        position.to_string(),
        format!("0x{index:04x}"),
        format!("0x{SUBINDEX:02x}"),
    ]
}

fn download_args(position: u16, index: u16, value: f32) -> Vec<String> {
    let mut args = upload_args(position, index);
    args[0] = "download".into();
    args.push(value.to_string());
    args
}

/// Device name from one line of `ethercat slaves`:
/// `position  alias:ring  state  flag  name...`.
fn slave_name(line: &str) -> String {
    let mut rest = line.trim();
    for _ in 0..4 {
        rest = rest
            .split_once(char::is_whitespace)
            .map(|(_, tail)| tail.trim_start())
            .unwrap_or("");
    }
    rest.to_string()
}

/// Value printed by `ethercat upload`. The tool prints either the bare value
/// or a hex dump followed by the decimal value.
fn parse_upload(output: &str) -> Option<f32> {
    output
        .split_whitespace()
        .last()
        .and_then(|token| token.parse::<f32>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Model, ETHERCAT_FLOW_INDEX, ETHERCAT_SETPOINT_INDEX};
    use crate::register::{Role, Value};

    // Stands in for the master tool: `sh -c SCRIPT ethercat <args>`.
    const FAKE_TOOL: &str = r#"
case "$1" in
  slaves) echo "0  0:0  PREOP  +  MKS EtherCAT MFC 10 slm" ;;
  upload) echo "2.5" ;;
  download) [ "$6" = "3" ] && exit 0; echo "SDO download failed" >&2; exit 1 ;;
esac
"#;

    fn fake(script: &str) -> EthercatTransport {
        EthercatTransport::new(0, Duration::from_secs(5)).with_command(
            "sh",
            vec!["-c".into(), script.into(), "ethercat".into()],
        )
    }

    #[test]
    fn test_slave_name() {
        assert_eq!(
            slave_name("0  0:0  PREOP  +  MKS EtherCAT MFC"),
            "MKS EtherCAT MFC"
        );
        assert_eq!(slave_name("1  0:1  OP  +  EK1100 EtherCAT-Koppler"), "EK1100 EtherCAT-Koppler");
        assert_eq!(slave_name("0"), "");
    }

    #[test]
    fn test_parse_upload() {
        assert_eq!(parse_upload("2.5\n"), Some(2.5));
        assert_eq!(parse_upload("0x40a00000 5\n"), Some(5.0));
        assert_eq!(parse_upload(""), None);
        assert_eq!(parse_upload("error"), None);
    }

    #[test]
    fn test_tool_arguments() {
        assert_eq!(
            upload_args(2, ETHERCAT_FLOW_INDEX),
            vec!["upload", "-p", "2", "0x6000", "0x01"]
        );
        assert_eq!(
            download_args(0, ETHERCAT_SETPOINT_INDEX, 1.5),
            vec!["download", "-p", "0", "0x7003", "0x01", "1.5"]
        );
    }

    #[tokio::test]
    async fn test_send_requires_connect() {
        let mut transport = fake(FAKE_TOOL);
        assert!(matches!(
            transport.send(&[0; 12]).await,
            Err(MfcError::Connection { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bridge_round_trip() {
        let catalog = Model::Ethercat { max_flow: 10.0 }.catalog();
        let mut transport = fake(FAKE_TOOL);
        transport.connect().await.unwrap();

        let read = Request::read(ETHERCAT_FLOW_INDEX, 2).unwrap();
        transport
            .send(&codec::encode(&catalog, &read, 1, 1).unwrap())
            .await
            .unwrap();
        let words = codec::decode(&transport.receive().await.unwrap(), &read, 1, 1).unwrap();
        let flow = catalog.register(Role::Flow).unwrap().decode(&words).unwrap();
        assert_eq!(flow, Value::Number(2.5));

        let setpoint = catalog.register(Role::Setpoint).unwrap();
        let ok = Request::write(
            ETHERCAT_SETPOINT_INDEX,
            setpoint.encode(&Value::Number(3.0)).unwrap(),
        )
        .unwrap();
        transport
            .send(&codec::encode(&catalog, &ok, 2, 1).unwrap())
            .await
            .unwrap();
        assert!(codec::decode(&transport.receive().await.unwrap(), &ok, 2, 1).is_ok());

        let rejected = Request::write(
            ETHERCAT_SETPOINT_INDEX,
            setpoint.encode(&Value::Number(4.0)).unwrap(),
        )
        .unwrap();
        transport
            .send(&codec::encode(&catalog, &rejected, 3, 1).unwrap())
            .await
            .unwrap();
        assert!(matches!(
            codec::decode(&transport.receive().await.unwrap(), &rejected, 3, 1),
            Err(MfcError::Device { code: EXCEPTION_DEVICE_FAILURE, .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_wrong_device() {
        let mut transport = fake(r#"echo "0  0:0  OP  +  EK1100 EtherCAT-Koppler""#);
        let err = transport.connect().await.unwrap_err();
        assert!(err.to_string().contains("EK1100"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_empty_bus() {
        let mut transport = fake("true");
        let err = transport.connect().await.unwrap_err();
        assert!(err.to_string().contains("no device found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_times_out_on_hung_tool() {
        let mut transport = EthercatTransport::new(0, Duration::from_millis(100)).with_command(
            "sh",
            vec!["-c".into(), "sleep 5".into(), "ethercat".into()],
        );
        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(Duration::from_secs(2), transport.connect())
            .await
            .expect("connect must give up on its own");
        assert!(matches!(outcome, Err(MfcError::Connection { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));

        let read = Request::read(ETHERCAT_FLOW_INDEX, 2).unwrap();
        let catalog = Model::Ethercat { max_flow: 10.0 }.catalog();
        assert!(matches!(
            transport
                .send(&codec::encode(&catalog, &read, 1, 1).unwrap())
                .await,
            Err(MfcError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let mut transport =
            EthercatTransport::new(0, Duration::from_secs(1))
                .with_command("/nonexistent/ethercat-tool", Vec::new());
        assert!(matches!(
            transport.connect().await,
            Err(MfcError::Connection { .. })
        ));
    }
}
