use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use txweave_core::{BranchCall, RawResponse, TransportError};

use super::Transport;

/// POSTs the branch payload as JSON to the branch endpoint.
///
/// `trans_type`, `gid`, `branch_id` and `op` travel as query parameters so
/// that participants can build their barrier straight from the request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self {
            client,
            request_timeout,
        })
    }

    /// Use a preconfigured client; `request_timeout` is only reported in errors.
    pub fn with_client(client: reqwest::Client, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.request_timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_builder() {
            TransportError::UnknownEndpoint(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn invoke(&self, call: &BranchCall) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .post(&call.endpoint)
            .query(&call.query_params())
            .json(&call.payload)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.map_error(e))?;
        debug!(endpoint = %call.endpoint, status, "participant replied");
        Ok(RawResponse::new(status, body))
    }
}
