use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;

use txweave_core::{BranchCall, RawResponse, TransportError};

use super::Transport;

type Handler =
    Arc<dyn Fn(BranchCall) -> BoxFuture<'static, Result<RawResponse, TransportError>> + Send + Sync>;

/// Routes branch calls to async closures registered per endpoint.
///
/// Lets participants live in the same process as the coordinator, which is
/// how embedded deployments and the test-suite wire things up.
#[derive(Clone, Default)]
pub struct InProcessTransport {
    routes: Arc<RwLock<HashMap<String, Handler>>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `endpoint`.
    pub fn route<F, Fut>(&self, endpoint: impl Into<String>, handler: F)
    where
        F: Fn(BranchCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RawResponse, TransportError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |call| Box::pin(handler(call)));
        if let Ok(mut routes) = self.routes.write() {
            routes.insert(endpoint.into(), handler);
        }
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.routes
            .read()
            .map(|routes| routes.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for InProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessTransport")
            .field("endpoints", &self.endpoints())
            .finish()
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn invoke(&self, call: &BranchCall) -> Result<RawResponse, TransportError> {
        let handler = self
            .routes
            .read()
            .map_err(|_| TransportError::Other("route table poisoned".into()))?
            .get(&call.endpoint)
            .cloned()
            .ok_or_else(|| TransportError::UnknownEndpoint(call.endpoint.clone()))?;
        handler(call.clone()).await
    }
}
