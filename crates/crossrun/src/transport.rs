//! # Transport Abstraction
//!
//! The single-shot, best-effort call primitive between two processes on one device.
//!
//! ## Philosophy
//!
//! - **Single Shot**: One call, one reply. No retry, streaming, or cancellation lives here;
//!   those are built on top by the `Caller`.
//! - **Opaque Extras**: The transport moves an `Extras` bag. It never parses the serialized
//!   request or result inside it.
//! - **No Responder Is Distinct**: A destination that is not up yet is reported as
//!   `Error::NoResponder`, separate from a destination that answered with anything at all.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::endpoint::Endpoint;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The destination process is not started or its entrypoint is not initialized yet.
    NoResponder(String),
    /// The peer died or the handle was already used.
    ConnectionLost(String),
    /// Generic internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResponder(msg) => write!(f, "No responder: {}", msg),
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// The receiving end of a remote-callback handle.
pub trait RemoteCallback: Send + Sync + 'static {
    /// Delivers the reply extras out-of-band. May be called from any thread.
    fn deliver(&self, extras: Extras) -> Result<()>;
}

/// A cloneable, type-erased remote-callback handle carried inside `Extras`.
#[derive(Clone)]
pub struct CallbackHandle(Arc<dyn RemoteCallback>);

impl CallbackHandle {
    pub fn new(callback: impl RemoteCallback) -> Self {
        Self(Arc::new(callback))
    }

    /// Creates a handle that accepts exactly one delivery.
    pub fn oneshot() -> (Self, oneshot::Receiver<Extras>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(OneshotCallback(Mutex::new(Some(tx)))), rx)
    }

    pub fn deliver(&self, extras: Extras) -> Result<()> {
        self.0.deliver(extras)
    }
}

impl fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallbackHandle(..)")
    }
}

struct OneshotCallback(Mutex<Option<oneshot::Sender<Extras>>>);

impl RemoteCallback for OneshotCallback {
    fn deliver(&self, extras: Extras) -> Result<()> {
        let tx = self
            .0
            .lock()
            .map_err(|_| Error::Io("callback lock poisoned".into()))?
            .take()
            .ok_or_else(|| Error::ConnectionLost("callback already used".into()))?;
        tx.send(extras)
            .map_err(|_| Error::ConnectionLost("caller is no longer listening".into()))
    }
}

/// The opaque structure exchanged through the transport.
///
/// Field names mirror the schema keys in `crossrpc`.
#[derive(Clone, Debug, Default)]
pub struct Extras {
    pub request: Option<String>,
    pub callback: Option<CallbackHandle>,
    pub result: Option<String>,
    pub component_list: Option<Vec<String>>,
}

impl Extras {
    pub fn with_request(raw: String) -> Self {
        Self {
            request: Some(raw),
            ..Self::default()
        }
    }

    pub fn with_result(raw: String) -> Self {
        Self {
            result: Some(raw),
            ..Self::default()
        }
    }

    pub fn with_component_list(names: Vec<String>) -> Self {
        Self {
            component_list: Some(names),
            ..Self::default()
        }
    }

    /// The schema keys present in this bag, for diagnostics.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.request.is_some() {
            keys.push(crossrpc::KEY_REQUEST);
        }
        if self.callback.is_some() {
            keys.push(crossrpc::KEY_CALLBACK);
        }
        if self.result.is_some() {
            keys.push(crossrpc::KEY_RESULT);
        }
        if self.component_list.is_some() {
            keys.push(crossrpc::KEY_COMPONENT_LIST);
        }
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }
}

/// A mechanism to make one synchronous call into another process's entrypoint.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Calls `endpoint` once.
    ///
    /// # invariants
    /// - `method` and `arg` are diagnostic labels only.
    /// - Must return `Err(Error::NoResponder)` if nothing answered.
    /// - Any `Ok`, including empty extras, means the destination is alive.
    async fn call(&self, endpoint: &Endpoint, method: &str, arg: &str, extras: Extras) -> Result<Extras>;
}
