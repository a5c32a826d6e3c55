//! # Requests
//!
//! A `Request` names either a component action or a control command.
//!
//! ## Invariants
//! - `call_id` is stable for the whole lifecycle of a logical invocation, including any
//!   `cancel`/`timeout` commands that follow it.
//! - `component_name` is empty if and only if `is_command` is set.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::error::Result;

/// Opaque call parameters. Order is irrelevant.
pub type Params = HashMap<String, Value>;

/// The closed set of control commands a gateway understands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// Ask the destination which component names it hosts.
    ListComponents,
    /// The caller gave up on `call_id`.
    Cancel,
    /// The caller stopped waiting for `call_id`.
    Timeout,
}

impl Command {
    pub const ALL: [Command; 3] = [Command::ListComponents, Command::Cancel, Command::Timeout];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListComponents => "list-components",
            Self::Cancel => "cancel",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Command::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::UnknownCommand(s.to_string()))
    }
}

/// An invocation of a component action, or a control command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub component_name: String,
    #[serde(default)]
    pub action_name: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub main_thread_sync_call: bool,
    #[serde(default)]
    pub is_command: bool,
}

impl Request {
    /// Creates an application request for `component`'s `action`.
    pub fn new(
        component: impl Into<String>,
        action: impl Into<String>,
        call_id: impl Into<String>,
    ) -> Self {
        Self {
            component_name: component.into(),
            action_name: action.into(),
            params: Params::new(),
            call_id: call_id.into(),
            main_thread_sync_call: false,
            is_command: false,
        }
    }

    /// Creates a control request. The component name is left empty.
    pub fn command(command: Command, call_id: impl Into<String>) -> Self {
        Self {
            component_name: String::new(),
            action_name: command.as_str().to_string(),
            params: Params::new(),
            call_id: call_id.into(),
            main_thread_sync_call: false,
            is_command: true,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn main_thread_sync(mut self, enabled: bool) -> Self {
        self.main_thread_sync_call = enabled;
        self
    }

    /// Returns the parsed command, or `None` for application requests.
    pub fn as_command(&self) -> Option<Result<Command>> {
        self.is_command.then(|| self.action_name.parse())
    }

    /// Checks which fields are present for the request kind. Nothing deeper is validated here.
    pub fn validate(&self) -> Result<()> {
        if self.call_id.is_empty() {
            return Err(Error::MissingField("call_id"));
        }
        if self.action_name.is_empty() {
            return Err(Error::MissingField("action_name"));
        }
        match self.as_command() {
            Some(_) if !self.component_name.is_empty() => Err(Error::UnexpectedField("component_name")),
            Some(command) => command.map(|_| ()),
            None if self.component_name.is_empty() => Err(Error::MissingField("component_name")),
            None => Ok(()),
        }
    }

    /// Short label used for transport diagnostics, e.g. `[Login # authenticate]`.
    pub fn label(&self) -> String {
        if self.is_command {
            format!("[cmd # {}]", self.action_name)
        } else {
            format!("[{} # {}]", self.component_name, self.action_name)
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Request{{call_id={}, {}, params={}, main_thread_sync_call={}}}",
            self.call_id,
            self.label(),
            self.params.len(),
            self.main_thread_sync_call,
        )
    }
}
