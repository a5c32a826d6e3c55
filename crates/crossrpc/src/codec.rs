//! # Codec
//!
//! Serializes envelopes into the transport's single opaque string slot.

use crate::error::Result;
use crate::request::Request;
use crate::result::CallResult;

pub fn encode_request(request: &Request) -> Result<String> {
    Ok(serde_json::to_string(request)?)
}

/// Decodes a request. Required-field checks are left to `Request::validate`.
pub fn decode_request(raw: &str) -> Result<Request> {
    Ok(serde_json::from_str(raw)?)
}

pub fn encode_result(result: &CallResult) -> Result<String> {
    Ok(serde_json::to_string(result)?)
}

pub fn decode_result(raw: &str) -> Result<CallResult> {
    Ok(serde_json::from_str(raw)?)
}
