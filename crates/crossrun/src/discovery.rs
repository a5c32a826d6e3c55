//! # Discovery
//!
//! Keeps the `RemoteRegistry` in step with the sibling processes installed on the device.
//!
//! A full `refresh` asks the host for every process advertising the discovery marker, wakes
//! each one, asks it for its component list, and replaces its registry entry. Lifecycle events
//! afterwards touch exactly the affected process: removal deletes its entry, anything else
//! re-probes it. Events for one process are applied in arrival order: a probe started before a
//! later event for the same process discards its answer.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::caller;
use crate::command::CommandChannel;
use crate::endpoint::ProcessId;
use crate::registry::RemoteRegistry;

/// What the host environment reports about a sibling process.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Added(ProcessId),
    Changed(ProcessId),
    Removed(ProcessId),
    Replaced(ProcessId),
    Restarted(ProcessId),
}

impl LifecycleEvent {
    pub fn process(&self) -> &ProcessId {
        match self {
            Self::Added(p) | Self::Changed(p) | Self::Removed(p) | Self::Replaced(p) | Self::Restarted(p) => p,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Added(_) => "added",
            Self::Changed(_) => "changed",
            Self::Removed(_) => "removed",
            Self::Replaced(_) => "replaced",
            Self::Restarted(_) => "restarted",
        };
        write!(f, "{} {}", self.process(), kind)
    }
}

/// The host environment's view of installed processes.
#[async_trait::async_trait]
pub trait HostEnvironment: Send + Sync + 'static {
    /// Installed processes advertising `marker`.
    async fn scan(&self, marker: &str) -> Vec<ProcessId>;

    /// Liveness probe that also makes sure the process's entrypoint gets started.
    /// Returns `false` if the process cannot be woken.
    async fn wake(&self, process: &ProcessId) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The host refused to wake the process.
    NotAwake(ProcessId),
    /// A later lifecycle event for the process made this probe's answer stale.
    Superseded(ProcessId),
    Call(caller::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAwake(p) => write!(f, "Process {} could not be woken", p),
            Self::Superseded(p) => write!(f, "Probe of {} superseded by a later event", p),
            Self::Call(e) => write!(f, "Probe failed: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<caller::Error> for Error {
    fn from(e: caller::Error) -> Self {
        Self::Call(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone)]
pub struct Discovery {
    own: ProcessId,
    marker: String,
    host: Arc<dyn HostEnvironment>,
    commands: CommandChannel,
    registry: RemoteRegistry,
    /// Bumped by every event for a process. A probe only writes if its generation is current.
    generations: Arc<DashMap<ProcessId, u64>>,
}

impl Discovery {
    pub fn new(
        own: ProcessId,
        marker: impl Into<String>,
        host: Arc<dyn HostEnvironment>,
        commands: CommandChannel,
        registry: RemoteRegistry,
    ) -> Self {
        Self {
            own,
            marker: marker.into(),
            host,
            commands,
            registry,
            generations: Arc::new(DashMap::new()),
        }
    }

    /// Probes every candidate concurrently. Returns how many entries were stored.
    pub async fn refresh(&self) -> usize {
        let candidates: Vec<_> = self
            .host
            .scan(&self.marker)
            .await
            .into_iter()
            .filter(|p| *p != self.own)
            .collect();
        info!(own = %self.own, count = candidates.len(), "discovery scan");

        let mut probes = JoinSet::new();
        for process in candidates {
            let this = self.clone();
            probes.spawn(async move { this.probe(&process).await });
        }

        let mut stored = 0;
        while let Some(joined) = probes.join_next().await {
            if matches!(joined, Ok(Ok(_))) {
                stored += 1;
            }
        }
        stored
    }

    /// Wakes `process`, lists its components, and replaces its entry.
    ///
    /// On failure any stale entry for the process is removed. Either write is skipped if a
    /// lifecycle event for the process arrived while the probe was running.
    pub async fn probe(&self, process: &ProcessId) -> Result<Arc<[String]>> {
        let generation = self.generations.get(process).map_or(0, |g| *g);
        self.probe_at(process, generation).await
    }

    async fn probe_at(&self, process: &ProcessId, generation: u64) -> Result<Arc<[String]>> {
        if *process == self.own {
            return Err(Error::NotAwake(process.clone()));
        }

        let listed = if self.host.wake(process).await {
            self.commands.list_components(process).await.map_err(Error::from)
        } else {
            Err(Error::NotAwake(process.clone()))
        };

        // Held until the registry write is done, so no event can slip in between.
        let current = self.generations.entry(process.clone()).or_insert(0);
        if *current != generation {
            debug!(%process, generation, current = *current, "probe superseded");
            return Err(Error::Superseded(process.clone()));
        }

        match listed {
            Ok(names) => {
                let stored = self.registry.replace(process.clone(), names);
                info!(%process, components = ?stored, "remote components registered");
                Ok(stored)
            }
            Err(e) => {
                warn!(%process, error = %e, "probe failed");
                self.registry.remove(process);
                Err(e)
            }
        }
    }

    /// Orders `event` after every earlier event for the same process. A removal takes effect
    /// here; anything else returns the process and generation to probe at.
    fn apply(&self, event: &LifecycleEvent) -> Option<(ProcessId, u64)> {
        let process = event.process();
        let mut generation = self.generations.entry(process.clone()).or_insert(0);
        *generation += 1;
        match event {
            LifecycleEvent::Removed(_) => {
                if self.registry.remove(process).is_some() {
                    info!(%process, "remote process removed");
                }
                None
            }
            _ => Some((process.clone(), *generation)),
        }
    }

    /// Applies one lifecycle event.
    pub async fn handle_event(&self, event: LifecycleEvent) {
        debug!(%event, "lifecycle event");
        if let Some((process, generation)) = self.apply(&event) {
            let _ = self.probe_at(&process, generation).await;
        }
    }

    /// Consumes lifecycle events until the channel closes.
    ///
    /// Events are ordered as they arrive; probes run concurrently but one that a later event
    /// overtook never writes. Probes belong to the returned task, so aborting it stops them.
    pub fn subscribe(&self, mut events: mpsc::UnboundedReceiver<LifecycleEvent>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut probes = JoinSet::new();
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        if *event.process() == this.own {
                            continue;
                        }
                        debug!(%event, "lifecycle event");
                        if let Some((process, generation)) = this.apply(&event) {
                            let prober = this.clone();
                            probes.spawn(async move {
                                let _ = prober.probe_at(&process, generation).await;
                            });
                        }
                    }
                    Some(_) = probes.join_next(), if !probes.is_empty() => {}
                }
            }
            while probes.join_next().await.is_some() {}
            debug!(own = %this.own, "lifecycle subscription closed");
        })
    }
}
