//! # Local Device
//!
//! An in-memory device hosting many processes' gateways, used by tests and the demo.
//!
//! It plays both outer roles at once: the `Transport` that reaches a process's entrypoint, and
//! the `HostEnvironment` that knows which processes are installed and emits lifecycle events.
//!
//! A process that is installed but not running is started by the first call that reaches it;
//! that call still sees "no responder" because the entrypoint is initialising. The caller's
//! retry absorbs this, just as it would on a real device.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::RouterConfig;
use crate::discovery::HostEnvironment;
use crate::discovery::LifecycleEvent;
use crate::endpoint::Endpoint;
use crate::endpoint::ProcessId;
use crate::gateway::Gateway;
use crate::transport;
use crate::transport::Extras;
use crate::transport::Transport;

struct Installed {
    gateway: Arc<Gateway>,
    markers: HashSet<String>,
    running: bool,
}

#[derive(Clone, Default)]
pub struct LocalDevice {
    processes: Arc<DashMap<ProcessId, Installed>>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<LifecycleEvent>>>>,
}

impl LocalDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a process advertising the default discovery marker. It starts stopped.
    pub fn install(&self, process: impl Into<ProcessId>, gateway: Arc<Gateway>) {
        let marker = RouterConfig::default().discovery_marker;
        self.install_with_markers(process, gateway, [marker]);
    }

    pub fn install_with_markers<I, S>(&self, process: impl Into<ProcessId>, gateway: Arc<Gateway>, markers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let process = process.into();
        let markers = markers.into_iter().map(Into::into).collect();
        self.processes.insert(process.clone(), Installed { gateway, markers, running: false });
        self.emit(LifecycleEvent::Added(process));
    }

    /// Replaces an installed process's entrypoint, as an upgrade would.
    pub fn upgrade(&self, process: &ProcessId, gateway: Arc<Gateway>) -> bool {
        let Some(mut installed) = self.processes.get_mut(process) else { return false };
        installed.gateway = gateway;
        installed.running = false;
        drop(installed);
        self.emit(LifecycleEvent::Replaced(process.clone()));
        true
    }

    pub fn uninstall(&self, process: &ProcessId) -> bool {
        let removed = self.processes.remove(process).is_some();
        if removed {
            self.emit(LifecycleEvent::Removed(process.clone()));
        }
        removed
    }

    /// Stops a process without telling anyone, as a crash or low-memory kill would.
    pub fn kill(&self, process: &ProcessId) {
        if let Some(mut installed) = self.processes.get_mut(process) {
            installed.running = false;
        }
    }

    pub fn restart(&self, process: &ProcessId) -> bool {
        let Some(mut installed) = self.processes.get_mut(process) else { return false };
        installed.running = true;
        drop(installed);
        self.emit(LifecycleEvent::Restarted(process.clone()));
        true
    }

    pub fn is_running(&self, process: &ProcessId) -> bool {
        self.processes.get(process).is_some_and(|p| p.running)
    }

    /// A new lifecycle event channel. Every subscriber sees every event.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LifecycleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    fn emit(&self, event: LifecycleEvent) {
        debug!(%event, "device lifecycle event");
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Looks up the gateway for `process`, starting it if needed.
    fn entrypoint(&self, process: &ProcessId) -> transport::Result<Arc<Gateway>> {
        let Some(mut installed) = self.processes.get_mut(process) else {
            return Err(transport::Error::NoResponder(format!("{} is not installed", process)));
        };
        if !installed.running {
            installed.running = true;
            return Err(transport::Error::NoResponder(format!("{} is starting", process)));
        }
        Ok(installed.gateway.clone())
    }
}

#[async_trait::async_trait]
impl Transport for LocalDevice {
    async fn call(&self, endpoint: &Endpoint, method: &str, arg: &str, extras: Extras) -> transport::Result<Extras> {
        // The map guard must not be held across the gateway call.
        let gateway = self.entrypoint(endpoint.process())?;
        Ok(gateway.handle(method, arg, extras).await)
    }
}

#[async_trait::async_trait]
impl HostEnvironment for LocalDevice {
    async fn scan(&self, marker: &str) -> Vec<ProcessId> {
        let mut found: Vec<_> = self
            .processes
            .iter()
            .filter(|entry| entry.value().markers.contains(marker))
            .map(|entry| entry.key().clone())
            .collect();
        found.sort();
        found
    }

    async fn wake(&self, process: &ProcessId) -> bool {
        match self.processes.get_mut(process) {
            Some(mut installed) => {
                installed.running = true;
                true
            }
            None => false,
        }
    }
}
