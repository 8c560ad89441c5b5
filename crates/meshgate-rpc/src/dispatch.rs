//! Explicit dispatch tables
//!
//! A service describes its remotely callable surface by building a
//! [`DispatchTable`] that maps method names to typed handler closures.
//! Parameters and results travel as JSON and are converted at the table
//! boundary, so handlers work with plain Rust types.

use crate::error::RpcError;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Future returned by a type-erased handler
pub type HandlerFuture = BoxFuture<'static, Result<Value, RpcError>>;

/// Type-erased method handler
pub type MethodHandler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Named set of method handlers exported by one service
pub struct DispatchTable {
    service: String,
    methods: BTreeMap<String, MethodHandler>,
}

impl DispatchTable {
    /// Start an empty table for `service`
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            methods: BTreeMap::new(),
        }
    }

    /// Export `name`, decoding params as `P` and encoding the result `R`.
    ///
    /// Handler errors are sent to the caller as their display string.
    pub fn method<P, R, E, F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let qualified = format!("{}.{}", self.service, name);
        let handler = Arc::new(handler);
        let erased: MethodHandler = Arc::new(move |params: Value| -> HandlerFuture {
            let handler = handler.clone();
            let qualified = qualified.clone();
            Box::pin(async move {
                let params: P = serde_json::from_value(params).map_err(|e| {
                    RpcError::InvalidParams {
                        method: qualified,
                        reason: e.to_string(),
                    }
                })?;
                let result = handler(params)
                    .await
                    .map_err(|e| RpcError::Remote(e.to_string()))?;
                Ok(serde_json::to_value(result)?)
            })
        });
        self.methods.insert(name.to_string(), erased);
        self
    }

    pub(crate) fn into_parts(self) -> (String, BTreeMap<String, MethodHandler>) {
        (self.service, self.methods)
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("service", &self.service)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// An object whose operations can be served remotely
pub trait RpcService: Send + Sync + 'static {
    /// Build the dispatch table for this instance
    fn dispatch_table(self: Arc<Self>) -> DispatchTable;
}
