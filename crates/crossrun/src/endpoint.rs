//! Process identifiers and the addressable endpoint each process exposes.

use std::fmt;

use crate::config::RouterConfig;

/// Strong type for process (package) identifiers.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProcessId(String);

impl ProcessId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProcessId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The well-known entrypoint of a process: `scheme://<process>.<suffix>`.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Endpoint {
    process: ProcessId,
    uri: String,
}

impl Endpoint {
    pub fn new(process: ProcessId, scheme: &str, suffix: &str) -> Self {
        let uri = format!("{}://{}.{}", scheme, process, suffix);
        Self { process, uri }
    }

    pub fn for_process(process: &ProcessId, config: &RouterConfig) -> Self {
        Self::new(process.clone(), &config.scheme, &config.endpoint_suffix)
    }

    /// Recovers the process from a URI built with the same scheme and suffix.
    pub fn parse(uri: &str, scheme: &str, suffix: &str) -> Option<Self> {
        let rest = uri.strip_prefix(scheme)?.strip_prefix("://")?;
        let process = rest.strip_suffix(suffix)?.strip_suffix('.')?;
        if process.is_empty() {
            return None;
        }
        Some(Self::new(ProcessId::new(process), scheme, suffix))
    }

    pub fn process(&self) -> &ProcessId {
        &self.process
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}
