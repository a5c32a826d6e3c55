//! # Call Results
//!
//! A `CallResult` is a string-keyed map. By convention it carries a status `code`,
//! an optional `data` payload, and an optional `error_message`.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

pub const KEY_CODE: &str = "code";
pub const KEY_DATA: &str = "data";
pub const KEY_ERROR_MESSAGE: &str = "error_message";

/// Well-known status codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    /// The component ran and reported a domain failure.
    Business,
    Unknown,
    IllegalArgument,
    NoComponentFound,
    /// The destination could not be reached after retrying.
    Unreachable,
    MalformedEnvelope,
    Canceled,
    Timeout,
}

impl Status {
    pub fn code(&self) -> i64 {
        match self {
            Self::Success => 0,
            Self::Business => 1,
            Self::Unknown => -1,
            Self::IllegalArgument => -2,
            Self::NoComponentFound => -3,
            Self::Unreachable => -4,
            Self::MalformedEnvelope => -5,
            Self::Canceled => -8,
            Self::Timeout => -9,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::Business,
            -2 => Self::IllegalArgument,
            -3 => Self::NoComponentFound,
            -4 => Self::Unreachable,
            -5 => Self::MalformedEnvelope,
            -8 => Self::Canceled,
            -9 => Self::Timeout,
            _ => Self::Unknown,
        }
    }
}

/// The outcome of a component action.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallResult(Map<String, Value>);

impl CallResult {
    pub fn success() -> Self {
        Self::with_status(Status::Success)
    }

    pub fn success_with(data: impl Into<Value>) -> Self {
        let mut result = Self::success();
        result.0.insert(KEY_DATA.into(), data.into());
        result
    }

    pub fn error(status: Status, message: impl Into<String>) -> Self {
        let mut result = Self::with_status(status);
        result.0.insert(KEY_ERROR_MESSAGE.into(), Value::String(message.into()));
        result
    }

    /// Wraps a raw map as received from a remote process.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    fn with_status(status: Status) -> Self {
        let mut map = Map::new();
        map.insert(KEY_CODE.into(), Value::from(status.code()));
        Self(map)
    }

    /// The raw code. A result without one counts as `Unknown`.
    pub fn code(&self) -> i64 {
        self.0
            .get(KEY_CODE)
            .and_then(Value::as_i64)
            .unwrap_or(Status::Unknown.code())
    }

    pub fn status(&self) -> Status {
        Status::from_code(self.code())
    }

    pub fn is_success(&self) -> bool {
        self.status() == Status::Success
    }

    pub fn data(&self) -> Option<&Value> {
        self.0.get(KEY_DATA)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.0.get(KEY_ERROR_MESSAGE).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}
