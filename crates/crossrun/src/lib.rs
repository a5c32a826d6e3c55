pub mod call_id;
pub mod caller;
pub mod command;
pub mod config;
pub mod correlator;
pub mod discovery;
pub mod endpoint;
pub mod executor;
pub mod gateway;
pub mod local;
pub mod registry;
pub mod router;
pub mod transport;

pub use config::RouterConfig;
pub use endpoint::ProcessId;
pub use gateway::Gateway;
pub use gateway::LocalDispatcher;
pub use local::LocalDevice;
pub use router::Router;

#[cfg(test)]
mod tests;
