//! # Router
//!
//! The public call surface of one process, owned by the process bootstrap.
//!
//! A `Router` ties the outbound pieces together: the `Caller` with its retry, the `Correlator`
//! for blocking waits, the `CommandChannel`, and the `RemoteRegistry` kept fresh by
//! `Discovery`. It is constructed explicitly through `RouterBuilder` and torn down with
//! `shutdown`; there is no global instance.

use std::sync::Arc;
use std::sync::Mutex;

use crossrpc::CallResult;
use crossrpc::Params;
use crossrpc::Request;
use crossrpc::Status;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::call_id::CallIdGenerator;
use crate::caller;
use crate::caller::Caller;
use crate::command::CommandChannel;
use crate::config;
use crate::config::RouterConfig;
use crate::correlator;
use crate::correlator::Correlator;
use crate::discovery::Discovery;
use crate::discovery::HostEnvironment;
use crate::discovery::LifecycleEvent;
use crate::endpoint::ProcessId;
use crate::registry::RemoteRegistry;
use crate::transport::Transport;

#[derive(Debug)]
pub enum Error {
    MissingTransport,
    Config(config::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTransport => write!(f, "Router requires a transport"),
            Self::Config(e) => write!(f, "Config error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<config::Error> for Error {
    fn from(e: config::Error) -> Self {
        Self::Config(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fluent construction of a `Router`.
pub struct RouterBuilder {
    process: ProcessId,
    config: RouterConfig,
    transport: Option<Arc<dyn Transport>>,
    host: Option<Arc<dyn HostEnvironment>>,
}

impl RouterBuilder {
    pub fn new(process: impl Into<ProcessId>) -> Self {
        Self {
            process: process.into(),
            config: RouterConfig::default(),
            transport: None,
            host: None,
        }
    }

    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Without a host environment the router still calls, but never discovers.
    pub fn host(mut self, host: Arc<dyn HostEnvironment>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn build(self) -> Result<Router> {
        self.config.validate()?;
        let transport = self.transport.ok_or(Error::MissingTransport)?;
        let config = Arc::new(self.config);

        let ids = Arc::new(CallIdGenerator::new(&self.process));
        let caller = Caller::new(transport, config.clone());
        let commands = CommandChannel::new(caller.clone(), ids.clone());
        let registry = RemoteRegistry::new();
        let discovery = self.host.map(|host| {
            Discovery::new(
                self.process.clone(),
                config.discovery_marker.clone(),
                host,
                commands.clone(),
                registry.clone(),
            )
        });

        Ok(Router {
            inner: Arc::new(RouterInner {
                process: self.process,
                config,
                ids,
                caller,
                commands,
                correlator: Correlator::new(),
                registry,
                discovery,
                subscription: Mutex::new(None),
            }),
        })
    }
}

struct RouterInner {
    process: ProcessId,
    config: Arc<RouterConfig>,
    ids: Arc<CallIdGenerator>,
    caller: Caller,
    commands: CommandChannel,
    correlator: Correlator,
    registry: RemoteRegistry,
    discovery: Option<Discovery>,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    pub fn builder(process: impl Into<ProcessId>) -> RouterBuilder {
        RouterBuilder::new(process)
    }

    pub fn process(&self) -> &ProcessId {
        &self.inner.process
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &RemoteRegistry {
        &self.inner.registry
    }

    pub fn correlator(&self) -> &Correlator {
        &self.inner.correlator
    }

    pub fn next_call_id(&self) -> String {
        self.inner.ids.next_id()
    }

    /// Blocking call. Never hangs past the configured bound and never fails outright: every
    /// failure comes back as an error `CallResult`.
    ///
    /// When `main_thread_sync_call` is set the request goes out with a remote callback and the
    /// reply is awaited through the correlator; otherwise the inline return path is used.
    pub async fn call(&self, dest: &ProcessId, request: Request) -> CallResult {
        if let Err(e) = request.validate() {
            return CallResult::error(Status::IllegalArgument, e.to_string());
        }
        if request.main_thread_sync_call {
            self.call_correlated(dest, request).await
        } else {
            self.call_inline(dest, request).await
        }
    }

    async fn call_correlated(&self, dest: &ProcessId, request: Request) -> CallResult {
        let pending = match self.inner.correlator.register(&request.call_id) {
            Ok(pending) => pending,
            Err(e) => return CallResult::error(Status::IllegalArgument, e.to_string()),
        };

        let correlator = self.inner.correlator.clone();
        let call_id = request.call_id.clone();
        let sent = self
            .inner
            .caller
            .send_async(dest, &request, move |result| {
                correlator.deliver(&call_id, result);
            })
            .await;
        if let Err(e) = sent {
            return e.into_result();
        }

        match pending.wait(self.inner.config.sync_timeout()).await {
            Ok(result) => result,
            Err(correlator::Error::TimedOut(call_id)) => {
                self.notify_timeout(dest, &call_id);
                CallResult::error(Status::Timeout, format!("no result for {} within {:?}", call_id, self.inner.config.sync_timeout()))
            }
            Err(e) => CallResult::error(Status::Canceled, e.to_string()),
        }
    }

    async fn call_inline(&self, dest: &ProcessId, request: Request) -> CallResult {
        let bound = self.inner.config.sync_timeout();
        match tokio::time::timeout(bound, self.inner.caller.send(dest, &request)).await {
            Ok(Ok(reply)) => caller::result_from_extras(&reply),
            Ok(Err(e)) => e.into_result(),
            Err(_) => {
                self.notify_timeout(dest, &request.call_id);
                CallResult::error(Status::Timeout, format!("no result for {} within {:?}", request.call_id, bound))
            }
        }
    }

    /// Tells `dest` we stopped waiting, without blocking the caller any further.
    fn notify_timeout(&self, dest: &ProcessId, call_id: &str) {
        warn!(process = %dest, %call_id, "call timed out");
        let commands = self.inner.commands.clone();
        let dest = dest.clone();
        let call_id = call_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = commands.timeout(&dest, &call_id).await {
                debug!(process = %dest, %call_id, error = %e, "timeout notice not delivered");
            }
        });
    }

    /// Non-blocking call. `callback` runs exactly once: with the result, with an error result if
    /// the request could not be sent or the destination dropped it, or with a `Timeout` result
    /// once the configured bound passes without a reply.
    pub fn call_async<F>(&self, dest: &ProcessId, request: Request, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        let router = self.clone();
        let dest = dest.clone();
        tokio::spawn(async move {
            if let Err(e) = request.validate() {
                callback(CallResult::error(Status::IllegalArgument, e.to_string()));
                return;
            }
            let (tx, rx) = oneshot::channel();
            let sent = router
                .inner
                .caller
                .send_async(&dest, &request, move |result| {
                    let _ = tx.send(result);
                })
                .await;
            if let Err(e) = sent {
                callback(e.into_result());
                return;
            }

            let bound = router.inner.config.sync_timeout();
            let result = match tokio::time::timeout(bound, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => CallResult::error(Status::Unreachable, format!("no result for {}", request.call_id)),
                Err(_) => {
                    router.notify_timeout(&dest, &request.call_id);
                    CallResult::error(Status::Timeout, format!("no result for {} within {:?}", request.call_id, bound))
                }
            };
            callback(result);
        })
    }

    /// Resolves `component` through the registry and calls it with a fresh call id.
    pub async fn invoke(&self, component: &str, action: &str, params: Params, main_thread_sync: bool) -> CallResult {
        let Some(dest) = self.resolve(component) else {
            return CallResult::error(Status::NoComponentFound, format!("no remote process hosts {}", component));
        };
        let request = Request::new(component, action, self.next_call_id())
            .params(params)
            .main_thread_sync(main_thread_sync);
        self.call(&dest, request).await
    }

    pub async fn cancel(&self, dest: &ProcessId, call_id: &str) -> caller::Result<()> {
        self.inner.commands.cancel(dest, call_id).await
    }

    pub async fn timeout(&self, dest: &ProcessId, call_id: &str) -> caller::Result<()> {
        self.inner.commands.timeout(dest, call_id).await
    }

    pub async fn list_components(&self, dest: &ProcessId) -> caller::Result<Vec<String>> {
        self.inner.commands.list_components(dest).await
    }

    pub fn resolve(&self, component: &str) -> Option<ProcessId> {
        self.inner.registry.resolve(component)
    }

    /// Full rescan of sibling processes. Returns how many entries were stored.
    pub async fn refresh(&self) -> usize {
        match &self.inner.discovery {
            Some(discovery) => discovery.refresh().await,
            None => 0,
        }
    }

    pub fn discovery(&self) -> Option<&Discovery> {
        self.inner.discovery.as_ref()
    }

    /// Turns on remote calls: subscribes to lifecycle events, then runs a full refresh.
    pub async fn enable_remote(&self, events: mpsc::UnboundedReceiver<LifecycleEvent>) -> usize {
        let Some(discovery) = &self.inner.discovery else {
            warn!(process = %self.inner.process, "enable_remote without a host environment");
            return 0;
        };
        let handle = discovery.subscribe(events);
        if let Ok(mut slot) = self.inner.subscription.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
        let stored = self.refresh().await;
        info!(process = %self.inner.process, stored, "remote calls enabled");
        stored
    }

    /// Stops the lifecycle subscription and drops all registry entries and pending waits.
    pub fn shutdown(&self) {
        if let Ok(mut slot) = self.inner.subscription.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        self.inner.registry.clear();
        self.inner.correlator.clear();
        info!(process = %self.inner.process, "router shut down");
    }
}
