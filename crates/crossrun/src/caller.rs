//! # Call Transport
//!
//! Encodes a `Request` into the transport's opaque slot, performs the single-shot call, and
//! absorbs the startup race between "we decided to call process P" and "P's entrypoint is up"
//! with a bounded retry.
//!
//! Only `NoResponder` is retried. A received reply, even an error one, proves the
//! destination is alive, so it is returned as is.

use std::sync::Arc;

use crossrpc::CallResult;
use crossrpc::Request;
use crossrpc::Status;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::config::RouterConfig;
use crate::endpoint::Endpoint;
use crate::endpoint::ProcessId;
use crate::transport;
use crate::transport::CallbackHandle;
use crate::transport::Extras;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Nothing answered after every attempt.
    Unreachable { process: ProcessId, attempts: u32 },
    /// The transport failed in a way that retrying does not help.
    Transport(transport::Error),
    /// The request could not be encoded.
    Encode(crossrpc::Error),
    /// The destination answered without the payload the request asks for.
    EmptyReply(ProcessId),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable { process, attempts } => {
                write!(f, "Process {} unreachable after {} attempts", process, attempts)
            }
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Encode(e) => write!(f, "Encode error: {}", e),
            Self::EmptyReply(process) => write!(f, "Process {} sent an empty reply", process),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<crossrpc::Error> for Error {
    fn from(e: crossrpc::Error) -> Self {
        Self::Encode(e)
    }
}

impl Error {
    /// Converts the failure into the error result a caller sees.
    pub fn into_result(self) -> CallResult {
        let status = match &self {
            Self::Unreachable { .. } | Self::Transport(_) => Status::Unreachable,
            Self::Encode(_) => Status::IllegalArgument,
            Self::EmptyReply(_) => Status::MalformedEnvelope,
        };
        CallResult::error(status, self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Decodes the inline result carried by a synchronous reply.
///
/// A reply without a result slot means the destination could not make sense of the request.
pub fn result_from_extras(extras: &Extras) -> CallResult {
    match extras.result.as_deref().map(crossrpc::decode_result) {
        Some(Ok(result)) => result,
        Some(Err(e)) => CallResult::error(Status::MalformedEnvelope, format!("undecodable result: {}", e)),
        None => CallResult::error(Status::MalformedEnvelope, "destination returned no result"),
    }
}

/// The outbound half of the transport: encoding, diagnostics, and bounded retry.
#[derive(Clone)]
pub struct Caller {
    transport: Arc<dyn Transport>,
    config: Arc<RouterConfig>,
}

impl Caller {
    pub fn new(transport: Arc<dyn Transport>, config: Arc<RouterConfig>) -> Self {
        Self { transport, config }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.config.retry
    }

    /// Sends `request` and returns the reply extras carried on the inline return path.
    pub async fn send(&self, dest: &ProcessId, request: &Request) -> Result<Extras> {
        let extras = Extras::with_request(crossrpc::encode_request(request)?);
        self.call_with_retry(dest, request, extras).await
    }

    /// Sends `request` with a one-shot callback attached. `on_result` runs once the destination
    /// delivers, or with an `Unreachable` result if the destination drops the callback unused.
    pub async fn send_async<F>(&self, dest: &ProcessId, request: &Request, on_result: F) -> Result<()>
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        let (handle, rx) = CallbackHandle::oneshot();
        let mut extras = Extras::with_request(crossrpc::encode_request(request)?);
        extras.callback = Some(handle);

        self.call_with_retry(dest, request, extras).await?;

        let call_id = request.call_id.clone();
        let process = dest.clone();
        tokio::spawn(async move {
            match rx.await {
                Ok(reply) => on_result(result_from_extras(&reply)),
                Err(_) => {
                    warn!(%process, %call_id, "remote callback dropped without delivery");
                    on_result(CallResult::error(
                        Status::Unreachable,
                        format!("{} dropped the callback for {} without delivering", process, call_id),
                    ));
                }
            }
        });
        Ok(())
    }

    async fn call_with_retry(&self, dest: &ProcessId, request: &Request, extras: Extras) -> Result<Extras> {
        let endpoint = Endpoint::for_process(dest, &self.config);
        let policy = &self.config.retry;
        let method = request.label();
        let arg = serde_json::to_string(&request.params).unwrap_or_else(|_| "{}".into());

        for attempt in 1..=policy.max_attempts {
            trace!(%endpoint, %method, attempt, call_id = %request.call_id, "transport call");
            match self.transport.call(&endpoint, &method, &arg, extras.clone()).await {
                Ok(reply) => {
                    debug!(%endpoint, attempt, call_id = %request.call_id, keys = ?reply.keys(), "transport reply");
                    return Ok(reply);
                }
                Err(transport::Error::NoResponder(reason)) => {
                    debug!(%endpoint, attempt, %reason, "no responder");
                    if attempt < policy.max_attempts {
                        tokio::time::sleep(policy.delay()).await;
                    }
                }
                Err(e) => {
                    warn!(%endpoint, attempt, error = %e, "transport failed");
                    return Err(e.into());
                }
            }
        }

        warn!(%endpoint, attempts = policy.max_attempts, call_id = %request.call_id, "destination unreachable");
        Err(Error::Unreachable {
            process: dest.clone(),
            attempts: policy.max_attempts,
        })
    }
}
