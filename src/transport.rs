//! Transport layer: moves whole frames between the driver and one device.
//!
//! The [`Transport`] trait is deliberately protocol-light: it knows how to
//! open and close the link and how to find frame boundaries, nothing about
//! registers. The [`Connection`](crate::Connection) layers exchange ordering,
//! deadlines and reconnection on top.
//!
//! Implementations:
//!
//! - [`TcpTransport`] - Modbus-TCP over a tokio `TcpStream`
//! - [`EthercatTransport`](crate::EthercatTransport) - bridge to the EtherCAT master tool
//! - [`SimulatedTransport`](crate::SimulatedTransport) - in-memory device for tests and demos
//!
//! # Constants
//!
//! - [`DEFAULT_MODBUS_PORT`] - Default Modbus-TCP port (502)
//! - [`DEFAULT_CONNECT_TIMEOUT`] - Default connect timeout (3 seconds)

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{MfcError, Result};
use crate::header::{MbapHeader, MBAP_HEADER_SIZE};

/// Default Modbus-TCP port.
pub const DEFAULT_MODBUS_PORT: u16 = 502;

/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// A frame-oriented link to a single device.
///
/// Implementations own their socket exclusively. Callers never invoke two
/// methods concurrently; the connection's exchange gate guarantees it.
#[async_trait]
pub trait Transport: Send + fmt::Debug {
    /// Opens the link.
    async fn connect(&mut self) -> Result<()>;

    /// Writes one complete request frame.
    async fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Reads one complete response frame.
    async fn receive(&mut self) -> Result<Vec<u8>>;

    /// Releases the link. Safe to call when already closed.
    async fn close(&mut self) -> Result<()>;

    /// Human-readable endpoint, used in errors and logs.
    fn endpoint(&self) -> String;
}

/// Modbus-TCP transport over a tokio socket.
pub struct TcpTransport {
    addr: SocketAddr,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Creates an unconnected transport for `addr`.
    ///
    /// # Example
    ///
    /// ```
    /// use mfc::TcpTransport;
    /// use std::time::Duration;
    ///
    /// let transport = TcpTransport::new(
    ///     "192.168.1.10:502".parse().unwrap(),
    ///     Duration::from_secs(3),
    /// );
    /// assert!(!transport.is_open());
    /// ```
    pub fn new(addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
            stream: None,
        }
    }

    /// Returns whether a socket is currently held.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Returns the remote device address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        let endpoint = self.addr.to_string();
        self.stream
            .as_mut()
            .ok_or_else(|| MfcError::connection(endpoint, "not connected"))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        debug!("TCP connecting: {}", self.addr);
        let stream = match timeout(self.connect_timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(MfcError::connection(self.addr.to_string(), e.to_string())),
            Err(_) => {
                warn!("TCP connect timeout: {}", self.addr);
                return Err(MfcError::connection(
                    self.addr.to_string(),
                    format!("no answer within {:?}", self.connect_timeout),
                ));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY: {}", e);
        }

        info!("TCP connected: {}", self.addr);
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let stream = self.stream()?;
        stream.write_all(frame).await?;
        debug!("TCP TX: {}B", frame.len());
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        let stream = self.stream()?;

        let mut header = [0u8; MBAP_HEADER_SIZE];
        stream.read_exact(&mut header).await?;
        // Rejects lengths outside 2..=MAX_MBAP_LENGTH before allocating.
        let parsed = MbapHeader::from_bytes(&header)?;

        let mut frame = vec![0u8; parsed.frame_len()];
        frame[..MBAP_HEADER_SIZE].copy_from_slice(&header);
        stream.read_exact(&mut frame[MBAP_HEADER_SIZE..]).await?;
        debug!("TCP RX: {}B", frame.len());
        Ok(frame)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
            info!("TCP closed: {}", self.addr);
        }
        Ok(())
    }

    fn endpoint(&self) -> String {
        self.addr.to_string()
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("remote_addr", &self.addr)
            .field(
                "local_addr",
                &self.stream.as_ref().and_then(|s| s.local_addr().ok()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_MODBUS_PORT, 502);
        assert_eq!(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs(3));
    }

    #[test]
    fn test_transport_debug() {
        let addr: SocketAddr = "127.0.0.1:1502".parse().unwrap();
        let transport = TcpTransport::new(addr, Duration::from_millis(100));
        let debug_str = format!("{:?}", transport);
        assert!(debug_str.contains("TcpTransport"));
        assert!(debug_str.contains("127.0.0.1:1502"));
    }

    #[tokio::test]
    async fn test_send_without_connect() {
        let mut transport =
            TcpTransport::new("127.0.0.1:1502".parse().unwrap(), Duration::from_millis(100));
        let err = transport.send(&[0x00]).await.unwrap_err();
        assert!(matches!(err, MfcError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to find a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut transport = TcpTransport::new(addr, Duration::from_millis(500));
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, MfcError::Connection { .. }));
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_frame_boundaries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let device = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 12];
            socket.read_exact(&mut request).await.unwrap();
            // Reply in two pieces, followed by the start of another frame.
            socket.write_all(&[0x00, 0x01, 0x00, 0x00]).await.unwrap();
            socket
                .write_all(&[0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x09, 0x00, 0x02])
                .await
                .unwrap();
            request
        });

        let mut transport = TcpTransport::new(addr, Duration::from_secs(1));
        transport.connect().await.unwrap();
        transport
            .send(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x02, 0x00, 0x01])
            .await
            .unwrap();
        let frame = transport.receive().await.unwrap();
        assert_eq!(
            frame,
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x09]
        );

        let request = device.await.unwrap();
        assert_eq!(request[7], 0x03);
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_open());
    }
}
