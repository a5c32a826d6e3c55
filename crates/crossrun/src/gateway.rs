//! # Gateway
//!
//! The receiving side of the transport. Every inbound envelope goes through
//! `RECEIVED -> (COMMAND | ACTION) -> DISPATCHED -> COMPLETED`:
//!
//! 1. decode and validate the request (failures answer with empty extras, never a panic);
//! 2. classify it as a control command or an application action;
//! 3. run it on the primary executor if `main_thread_sync_call` is set, otherwise on a worker;
//! 4. hand the reply to the remote callback if one came with the envelope, or return it on the
//!    transport's inline path if not.
//!
//! Calls are independent; no ordering is kept between them.

use std::sync::Arc;

use crossrpc::CallResult;
use crossrpc::Command;
use crossrpc::Request;
use crossrpc::Status;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::executor::ExecContext;
use crate::executor::Executors;
use crate::transport::CallbackHandle;
use crate::transport::Extras;

/// The local collaborators a gateway dispatches into.
#[async_trait::async_trait]
pub trait LocalDispatcher: Send + Sync + 'static {
    /// Runs a component action hosted by this process.
    async fn run_action(&self, request: &Request) -> CallResult;

    /// Names of the components this process hosts.
    fn component_names(&self) -> Vec<String>;

    /// The caller gave up on `call_id`. Must be a no-op for unknown ids.
    fn cancel(&self, call_id: &str);

    /// The caller stopped waiting for `call_id`. Must be a no-op for unknown ids.
    fn timeout(&self, call_id: &str);
}

/// An inbound request after classification.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    Command { command: Command, call_id: String },
    Action(Request),
}

impl Envelope {
    /// Decodes, validates, and classifies the raw request slot.
    pub fn classify(raw: &str) -> crossrpc::Result<(Self, ExecContext)> {
        let request = crossrpc::decode_request(raw)?;
        request.validate()?;

        let context = if request.main_thread_sync_call {
            ExecContext::Primary
        } else {
            ExecContext::Worker
        };

        let envelope = match request.as_command() {
            Some(command) => Envelope::Command {
                command: command?,
                call_id: request.call_id,
            },
            None => Envelope::Action(request),
        };
        Ok((envelope, context))
    }

    pub fn call_id(&self) -> &str {
        match self {
            Self::Command { call_id, .. } => call_id,
            Self::Action(request) => &request.call_id,
        }
    }
}

pub struct Gateway {
    dispatcher: Arc<dyn LocalDispatcher>,
    executors: Executors,
}

impl Gateway {
    /// Creates a gateway and its executors. Must be called within a tokio runtime.
    pub fn new(dispatcher: Arc<dyn LocalDispatcher>, worker_limit: usize) -> Self {
        Self {
            dispatcher,
            executors: Executors::new(worker_limit),
        }
    }

    /// Handles one inbound transport call.
    pub async fn handle(&self, method: &str, arg: &str, mut extras: Extras) -> Extras {
        debug!(%method, %arg, keys = ?extras.keys(), "gateway received call");

        let Some(raw) = extras.request.take() else {
            warn!(%method, "malformed envelope: no request");
            return Extras::default();
        };
        let (envelope, context) = match Envelope::classify(&raw) {
            Ok(classified) => classified,
            Err(e) => {
                warn!(%method, error = %e, "malformed envelope");
                return Extras::default();
            }
        };

        let call_id = envelope.call_id().to_string();
        let dispatcher = self.dispatcher.clone();

        match extras.callback.take() {
            Some(callback) => {
                let job = Box::pin(async move {
                    let reply = dispatch(dispatcher.as_ref(), envelope).await;
                    deliver(&callback, &call_id, reply);
                });
                if let Err(e) = self.executors.submit(context, job) {
                    error!(error = %e, "could not schedule inbound call");
                }
                Extras::default()
            }
            None => {
                let (tx, rx) = oneshot::channel();
                let job = Box::pin(async move {
                    let _ = tx.send(dispatch(dispatcher.as_ref(), envelope).await);
                });
                if let Err(e) = self.executors.submit(context, job) {
                    error!(%call_id, error = %e, "could not schedule inbound call");
                    return Extras::default();
                }
                rx.await.unwrap_or_default()
            }
        }
    }
}

async fn dispatch(dispatcher: &dyn LocalDispatcher, envelope: Envelope) -> Extras {
    match envelope {
        Envelope::Command { command, call_id } => {
            debug!(%command, %call_id, "dispatching command");
            match command {
                Command::ListComponents => Extras::with_component_list(dispatcher.component_names()),
                Command::Cancel => {
                    dispatcher.cancel(&call_id);
                    Extras::default()
                }
                Command::Timeout => {
                    dispatcher.timeout(&call_id);
                    Extras::default()
                }
            }
        }
        Envelope::Action(request) => {
            debug!(call_id = %request.call_id, component = %request.component_name, action = %request.action_name, "dispatching action");
            let result = dispatcher.run_action(&request).await;
            let encoded = crossrpc::encode_result(&result).or_else(|e| {
                error!(call_id = %request.call_id, error = %e, "result not encodable");
                crossrpc::encode_result(&CallResult::error(Status::Unknown, e.to_string()))
            });
            match encoded {
                Ok(raw) => Extras::with_result(raw),
                Err(_) => Extras::default(),
            }
        }
    }
}

fn deliver(callback: &CallbackHandle, call_id: &str, reply: Extras) {
    match callback.deliver(reply) {
        Ok(()) => debug!(%call_id, "result delivered through remote callback"),
        Err(e) => warn!(%call_id, error = %e, "remote callback delivery failed"),
    }
}
