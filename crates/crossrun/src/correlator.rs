//! # Result Correlator
//!
//! Bridges an asynchronous remote delivery back to a caller that wants to block on it.
//!
//! Each pending `call_id` owns a single-slot handoff. The deliverer posts the result and wakes
//! exactly one waiter; a waiter whose bound elapses first observes `TimedOut` and any late
//! delivery is discarded. Entries are removed on resolution, timeout, or drop, so the map only
//! ever holds calls somebody is still waiting on.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crossrpc::CallResult;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The bound elapsed before a result arrived.
    TimedOut(String),
    /// Somebody is already waiting on this call id.
    DuplicateWait(String),
    /// The correlator was shut down while waiting.
    Abandoned(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut(id) => write!(f, "Timed out waiting for {}", id),
            Self::DuplicateWait(id) => write!(f, "Already waiting for {}", id),
            Self::Abandoned(id) => write!(f, "Wait for {} abandoned", id),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

struct Slot {
    token: u64,
    tx: oneshot::Sender<CallResult>,
}

#[derive(Clone, Default)]
pub struct Correlator {
    pending: Arc<DashMap<String, Slot>>,
    tokens: Arc<AtomicU64>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `call_id`. Must happen before the outbound call is issued.
    pub fn register(&self, call_id: &str) -> Result<PendingCall> {
        let token = self.tokens.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        match self.pending.entry(call_id.to_string()) {
            Entry::Occupied(_) => return Err(Error::DuplicateWait(call_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Slot { token, tx });
            }
        }

        trace!(%call_id, "pending call registered");
        Ok(PendingCall {
            call_id: call_id.to_string(),
            token,
            rx: Some(rx),
            pending: self.pending.clone(),
        })
    }

    /// Hands `result` to the waiter for `call_id`. Returns `false` if nobody is waiting,
    /// in which case the result is discarded.
    pub fn deliver(&self, call_id: &str, result: CallResult) -> bool {
        let Some((_, slot)) = self.pending.remove(call_id) else {
            debug!(%call_id, "late or unsolicited result discarded");
            return false;
        };
        slot.tx.send(result).is_ok()
    }

    /// Registers and waits in one step.
    pub async fn wait_for(&self, call_id: &str, timeout: Duration) -> Result<CallResult> {
        self.register(call_id)?.wait(timeout).await
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drops every pending slot; their waiters observe `Abandoned`.
    pub fn clear(&self) {
        self.pending.clear();
    }
}

/// A registered wait. Dropping it without waiting releases the slot.
pub struct PendingCall {
    call_id: String,
    token: u64,
    rx: Option<oneshot::Receiver<CallResult>>,
    pending: Arc<DashMap<String, Slot>>,
}

impl PendingCall {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub async fn wait(mut self, timeout: Duration) -> Result<CallResult> {
        let Some(rx) = self.rx.take() else {
            return Err(Error::Abandoned(self.call_id.clone()));
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(Error::Abandoned(self.call_id.clone())),
            Err(_) => {
                debug!(call_id = %self.call_id, ?timeout, "wait timed out");
                Err(Error::TimedOut(self.call_id.clone()))
            }
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        // Only remove our own slot; the id may have been re-registered since.
        self.pending.remove_if(&self.call_id, |_, slot| slot.token == self.token);
    }
}
