//! Request and response envelopes

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A call of `Service.Method` with JSON parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Caller-chosen id echoed in the response
    pub id: u64,
    /// Fully qualified method name, `Service.Method`
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Value,
}

/// Outcome of one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Id of the request this answers
    pub id: u64,
    /// Result value when the call succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message when the call failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    /// Successful response
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Failed response
    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}
