//! Public entry point: invoke a named job and await its result.
//!
//! [`InvocationClient`] owns a [`ConnectionManager`] and an
//! [`InvocationRegistry`]. A single inbound handler, installed once at
//! construction, decodes every response frame and routes it to the
//! pending invocation with the matching correlation id. Responses may
//! arrive in any order.

use std::sync::Arc;

use jobwire_core::codec::{decode_response, decode_text_response, encode_request};
use jobwire_core::{CorrelationId, JobName, JobOutcome, JobOutput, JobRequest};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::config::ClientConfig;
use crate::connection::{
    ConnectionHandle, ConnectionManager, ConnectionState, Endpoint, InboundFrame,
};
use crate::error::InvokeError;
use crate::registry::{InvocationRegistry, InvocationResult};

/// Invokes jobs on a remote worker over one persistent connection.
///
/// Cheap to share behind an `Arc`; concurrent `invoke` calls do not
/// block each other.
pub struct InvocationClient {
    connection: Arc<ConnectionManager>,
    registry: Arc<InvocationRegistry>,
    config: ClientConfig,
}

impl InvocationClient {
    /// Create a client with its own connection manager for `config.url`.
    ///
    /// Nothing is opened until [`connect`](Self::connect) or, with
    /// `connect_on_first_use`, the first [`invoke`](Self::invoke).
    pub fn new(config: ClientConfig) -> Self {
        let connection = ConnectionManager::new(Endpoint::from(&config));
        Self::with_connection(connection, config)
    }

    /// Create a client on an existing connection manager.
    ///
    /// The manager should not be shared with another client: each
    /// client installs its own inbound handler and would log the other's
    /// responses as unknown.
    pub fn with_connection(connection: Arc<ConnectionManager>, config: ClientConfig) -> Self {
        let registry = Arc::new(InvocationRegistry::new());

        let inbound = Arc::clone(&registry);
        connection.on_message(move |frame| route_frame(&inbound, frame));

        let closed = Arc::clone(&registry);
        connection.on_close(move |reason| {
            closed.cancel_all(InvokeError::ConnectionClosed(reason.to_string()));
        });

        let failed = Arc::clone(&registry);
        connection.on_error(move |error| {
            failed.cancel_all(error.clone());
        });

        Self {
            connection,
            registry,
            config,
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Number of invocations awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    /// Open the connection (no-op if already open).
    pub async fn connect(&self) -> Result<ConnectionHandle, InvokeError> {
        self.connection.connect().await
    }

    /// Close the connection, rejecting every pending invocation.
    pub fn close(&self) {
        self.connection.close();
    }

    /// Run `job_name` on the worker with `params` and await its result.
    ///
    /// `params` must serialize to a JSON object. Produces exactly one
    /// outcome: the job's `result`, or an [`InvokeError`] describing why
    /// there is none.
    pub async fn invoke<P>(&self, job_name: &str, params: P) -> Result<JobOutput, InvokeError>
    where
        P: Serialize,
    {
        let job_name = JobName::new(job_name)?;
        let correlation_id = self.connection.next_correlation_id();
        let request = JobRequest::new(correlation_id, job_name, params)?;
        let frame = encode_request(&request)?;

        self.ensure_open().await?;

        let rx = self
            .registry
            .register(correlation_id, request.job_name.clone())?;
        // Removes the entry if this future is dropped or bails out early.
        let _guard = PendingGuard {
            registry: &self.registry,
            correlation_id,
        };

        self.connection.send(frame)?;
        tracing::debug!(
            correlation_id = %correlation_id,
            job_name = %request.job_name,
            "Job request sent",
        );

        self.await_outcome(correlation_id, rx).await
    }

    /// [`invoke`](Self::invoke), deserializing the result into `T`.
    pub async fn invoke_as<T, P>(&self, job_name: &str, params: P) -> Result<T, InvokeError>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let value = self.invoke(job_name, params).await?;
        serde_json::from_value(value)
            .map_err(|e| InvokeError::Decoding(format!("Unexpected result shape: {e}")))
    }

    // ---- private helpers ----

    /// Open the connection on first use; otherwise require it to be open.
    async fn ensure_open(&self) -> Result<(), InvokeError> {
        match self.connection.state() {
            ConnectionState::Open => Ok(()),
            ConnectionState::Closed | ConnectionState::Connecting
                if self.config.connect_on_first_use && !self.connection.has_opened() =>
            {
                self.connection.connect().await.map(|_| ())
            }
            _ => Err(InvokeError::NotConnected),
        }
    }

    async fn await_outcome(
        &self,
        correlation_id: CorrelationId,
        rx: oneshot::Receiver<InvocationResult>,
    ) -> Result<JobOutput, InvokeError> {
        let received = match self.config.invoke_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        timeout_ms = limit.as_millis() as u64,
                        "Invocation timed out",
                    );
                    return Err(InvokeError::Timeout(limit));
                }
            },
            None => rx.await,
        };

        // The registry never drops a sender without completing it, so a
        // receive error means the registry itself went away.
        received.unwrap_or_else(|_| {
            Err(InvokeError::ConnectionClosed(
                "invocation abandoned".to_string(),
            ))
        })
    }
}

/// Drops the registry entry of an invocation whose caller stops waiting.
struct PendingGuard<'a> {
    registry: &'a InvocationRegistry,
    correlation_id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.correlation_id);
    }
}

/// Decode one inbound frame and complete the matching invocation.
fn route_frame(registry: &InvocationRegistry, frame: &InboundFrame) {
    let decoded = match frame {
        InboundFrame::Binary(bytes) => decode_response(bytes),
        InboundFrame::Text(text) => decode_text_response(text),
    };

    match decoded {
        Ok(response) => {
            let correlation_id = response.correlation_id;
            match response.outcome {
                JobOutcome::Success(result) => {
                    registry.resolve(correlation_id, result);
                }
                JobOutcome::Error(message) => {
                    registry.reject(correlation_id, InvokeError::Job(message));
                }
            }
        }
        Err(e) => match e.correlation_id() {
            Some(correlation_id) => {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    error = %e,
                    "Malformed response frame",
                );
                registry.reject(correlation_id, e.into());
            }
            None => {
                tracing::warn!(error = %e, "Discarding malformed frame without correlation id");
            }
        },
    }
}
