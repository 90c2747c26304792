//! Request/response correlation for one device link.
//!
//! Modbus-TCP devices answer one request at a time, so every exchange on a
//! link runs under a single fair gate: waiters are admitted in arrival order
//! and each holds the link from the moment its request is written until its
//! reply has been read.
//!
//! The work that holds the gate is spawned onto an explicit runtime handle
//! rather than polled by the caller. A caller that gives up (its future is
//! dropped, or its deadline fires) therefore never abandons a half-finished
//! exchange on the wire: the spawned task runs to completion under the
//! connection's own timeout and then releases the gate.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{MfcError, Result};

pub(crate) struct Correlator<T> {
    slot: Arc<Mutex<T>>,
    runtime: Handle,
    transactions: AtomicU16,
}

impl<T: Send + 'static> Correlator<T> {
    pub(crate) fn new(inner: T, runtime: Handle) -> Self {
        Self {
            slot: Arc::new(Mutex::new(inner)),
            runtime,
            transactions: AtomicU16::new(1),
        }
    }

    /// Next transaction id. Wraps at `u16::MAX`.
    pub(crate) fn next_transaction(&self) -> u16 {
        self.transactions.fetch_add(1, Ordering::Relaxed)
    }

    /// Waits for the gate, then runs `work` with exclusive access.
    ///
    /// Dropping the returned future while waiting gives up the place in the
    /// queue. Dropping it after admission leaves `work` running.
    pub(crate) async fn run<R, F, Fut>(&self, work: F) -> Result<R>
    where
        F: FnOnce(OwnedMutexGuard<T>) -> Fut,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Send + 'static,
    {
        let guard = Arc::clone(&self.slot).lock_owned().await;
        self.runtime
            .spawn(work(guard))
            .await
            .map_err(|e| MfcError::Io(io::Error::other(e)))?
    }
}
