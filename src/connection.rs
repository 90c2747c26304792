//! One logical link to one device.
//!
//! A [`Connection`] owns a [`Transport`] and serializes every exchange on it
//! through a fair gate, so each request's reply is read before the next
//! request is written. It also tracks link health:
//!
//! - a timed-out or garbled exchange leaves the socket in an unknown state,
//!   so the link is marked [`LinkState::Degraded`] and reopened before the
//!   next exchange;
//! - device exceptions and validation failures leave the link usable.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use mfc::{Connection, Model, Request, Simulator};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sim = Simulator::new(Model::Scaled { max_flow: 10.0 });
//! let connection = Connection::new(
//!     Box::new(sim.transport()),
//!     Model::Scaled { max_flow: 10.0 }.catalog(),
//!     1,
//!     Duration::from_secs(1),
//!     tokio::runtime::Handle::current(),
//! );
//! let words = connection.exchange(&Request::read(0, 4).unwrap()).await.unwrap();
//! assert_eq!(words.len(), 4);
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::codec;
use crate::correlator::Correlator;
use crate::error::{MfcError, Result};
use crate::request::Request;
use crate::transport::Transport;

/// Health of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Not opened yet. The next exchange connects first.
    Disconnected,
    /// Open and in sync with the device.
    Connected,
    /// Open but out of sync. The next exchange reconnects first.
    Degraded,
    /// Closed by the caller. Exchanges fail until `connect` is called again.
    Closed,
}

struct Link {
    transport: Box<dyn Transport>,
    state: Arc<Mutex<LinkState>>,
}

impl Link {
    fn state(&self) -> LinkState {
        *self.state.lock()
    }

    fn set_state(&self, state: LinkState) {
        *self.state.lock() = state;
    }

    async fn open(&mut self) -> Result<()> {
        match self.state() {
            LinkState::Connected => return Ok(()),
            LinkState::Degraded => {
                info!("reconnecting {}", self.transport.endpoint());
                if let Err(e) = self.transport.close().await {
                    debug!("close before reconnect: {}", e);
                }
                self.set_state(LinkState::Disconnected);
            }
            LinkState::Disconnected | LinkState::Closed => {}
        }
        self.transport.connect().await?;
        self.set_state(LinkState::Connected);
        Ok(())
    }

    async fn exchange(
        &mut self,
        frame: Vec<u8>,
        request: &Request,
        transaction: u16,
        unit: u8,
        deadline: Duration,
    ) -> Result<Vec<u16>> {
        if self.state() == LinkState::Closed {
            return Err(MfcError::connection(
                self.transport.endpoint(),
                "connection closed",
            ));
        }
        self.open().await?;

        let transport = &mut self.transport;
        let reply = timeout(deadline, async {
            transport.send(&frame).await?;
            transport.receive().await
        })
        .await
        .unwrap_or(Err(MfcError::Timeout));

        let result = reply.and_then(|frame| codec::decode(&frame, request, transaction, unit));
        if let Err(e) = &result {
            if e.degrades_connection() || matches!(e, MfcError::Connection { .. }) {
                warn!(
                    "{} degraded after transaction {}: {}",
                    self.transport.endpoint(),
                    transaction,
                    e
                );
                self.set_state(LinkState::Degraded);
            }
        }
        result
    }
}

/// Serialized request/response link to one device.
pub struct Connection {
    correlator: Correlator<Link>,
    state: Arc<Mutex<LinkState>>,
    catalog: Catalog,
    endpoint: String,
    unit: u8,
    timeout: Duration,
}

impl Connection {
    /// Wraps `transport`. No I/O happens until the first exchange or
    /// [`connect`](Self::connect).
    ///
    /// Exchanges run as tasks on `runtime`, so they finish even when the
    /// calling future is dropped.
    pub fn new(
        transport: Box<dyn Transport>,
        catalog: Catalog,
        unit: u8,
        timeout: Duration,
        runtime: Handle,
    ) -> Self {
        let state = Arc::new(Mutex::new(LinkState::Disconnected));
        let endpoint = transport.endpoint();
        Self {
            correlator: Correlator::new(
                Link {
                    transport,
                    state: Arc::clone(&state),
                },
                runtime,
            ),
            state,
            catalog,
            endpoint,
            unit,
            timeout,
        }
    }

    /// Opens the link. Does nothing when already connected, and reopens a
    /// degraded or closed link.
    pub async fn connect(&self) -> Result<()> {
        self.correlator
            .run(|guard| async move {
                let mut link = guard;
                if link.state() == LinkState::Closed {
                    link.set_state(LinkState::Disconnected);
                }
                link.open().await
            })
            .await
    }

    /// Sends `request` and returns the words of the matching reply.
    ///
    /// The request is validated against the catalog before it is queued.
    ///
    /// # Errors
    ///
    /// - `MfcError::Encoding` if the request does not fit the catalog (no I/O)
    /// - `MfcError::Timeout` if the device did not answer within the timeout
    /// - `MfcError::Device` if the device answered with an exception
    /// - `MfcError::Connection` if the link cannot be opened or was closed
    pub async fn exchange(&self, request: &Request) -> Result<Vec<u16>> {
        let transaction = self.correlator.next_transaction();
        let frame = codec::encode(&self.catalog, request, transaction, self.unit)?;
        let request = request.clone();
        let deadline = self.timeout;
        let unit = self.unit;

        debug!(
            "{} tx {}: function 0x{:02X} at {} x{}",
            self.endpoint,
            transaction,
            request.function(),
            request.start(),
            request.count()
        );
        self.correlator
            .run(move |guard| async move {
                let mut link = guard;
                link.exchange(frame, &request, transaction, unit, deadline).await
            })
            .await
    }

    /// Like [`exchange`](Self::exchange) but gives up at `deadline`.
    ///
    /// Giving up only abandons the wait. An exchange already on the wire
    /// completes in the background under the connection timeout, and the
    /// link stays usable.
    ///
    /// # Errors
    ///
    /// Returns `MfcError::Cancelled` if `deadline` passes first.
    pub async fn exchange_with_deadline(&self, request: &Request, deadline: Instant) -> Result<Vec<u16>> {
        timeout_at(deadline, self.exchange(request))
            .await
            .unwrap_or(Err(MfcError::Cancelled))
    }

    /// Closes the link. Safe to call repeatedly.
    pub async fn close(&self) -> Result<()> {
        self.correlator
            .run(|guard| async move {
                let mut link = guard;
                if link.state() == LinkState::Closed {
                    return Ok(());
                }
                link.set_state(LinkState::Closed);
                link.transport.close().await
            })
            .await
    }

    /// Current link health.
    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    /// Device endpoint, as reported by the transport.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Per-exchange timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register catalog requests are validated against.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("unit", &self.unit)
            .field("timeout", &self.timeout)
            .field("state", &self.state())
            .finish()
    }
}
