//! # crossrpc
//!
//! The wire envelope for calling a named component action hosted in another process.
//!
//! ## Philosophy
//!
//! - **Pure Data**: Nothing here performs I/O. A `Request` goes out, a `CallResult` comes back.
//! - **Closed Command Set**: Control traffic is limited to `list-components`, `cancel`, and `timeout`.
//! - **Opaque Values**: Parameters and payloads are `serde_json::Value`s; the envelope never
//!   interprets them.

pub mod codec;
pub mod error;
pub mod request;
pub mod result;

pub use codec::decode_request;
pub use codec::decode_result;
pub use codec::encode_request;
pub use codec::encode_result;
pub use error::Error;
pub use error::Result;
pub use request::Command;
pub use request::Params;
pub use request::Request;
pub use result::CallResult;
pub use result::Status;

/// Extras key carrying the serialized `Request`.
pub const KEY_REQUEST: &str = "request";
/// Extras key carrying the optional one-shot remote callback handle.
pub const KEY_CALLBACK: &str = "callback";
/// Extras key carrying the serialized `CallResult`.
pub const KEY_RESULT: &str = "result";
/// Extras key carrying the ordered component names answered by `list-components`.
pub const KEY_COMPONENT_LIST: &str = "component_list";
