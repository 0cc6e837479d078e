//! Protocol provider contract and the normalized request log.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::listener::ServiceListener;
use crate::service::{ServiceKind, ServiceRecord};

/// Errors surfaced by providers during listener materialization.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("failed to bind port {port}: {message}")]
    Bind { port: u16, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Schema/IDL ingestion or validation failure, reported to the caller.
    #[error("{0}")]
    Schema(String),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error("service {0} does not expose a client")]
    ClientUnavailable(String),
    #[error("client transport error: {0}")]
    Client(String),
}

/// One entry of the request log, emitted after every handled request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    #[serde(rename = "type")]
    pub kind: ServiceKind,
    pub service_id: String,
    /// Human-readable call description, e.g. `GET /users/:id` or `add(a: i32, b: i32)`.
    pub request: String,
    pub request_value: Value,
    /// Status string, e.g. `200 OK` or `MISSING_RESULT`.
    pub response: String,
    pub response_value: Value,
    pub time: DateTime<Utc>,
}

impl RequestRecord {
    pub fn new(
        kind: ServiceKind,
        service_id: impl Into<String>,
        request: impl Into<String>,
        request_value: Value,
        response: impl Into<String>,
        response_value: Value,
    ) -> Self {
        Self {
            kind,
            service_id: service_id.into(),
            request: request.into(),
            request_value,
            response: response.into(),
            response_value,
            time: Utc::now(),
        }
    }
}

/// Typed channel providers emit request records into.
///
/// Replaces the stringly `emit("request", ...)` pattern: each provider gets a
/// clone at construction time and the registry re-emits records upward.
#[derive(Debug, Clone)]
pub struct RequestSink {
    tx: broadcast::Sender<RequestRecord>,
}

impl RequestSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn emit(&self, record: RequestRecord) {
        // Nobody listening is fine; records are fire-and-forget.
        let _ = self.tx.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RequestRecord> {
        self.tx.subscribe()
    }
}

impl Default for RequestSink {
    fn default() -> Self {
        Self::new()
    }
}

/// An outbound client call routed through `ServiceRegistry::request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAction {
    pub request: ClientRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ClientResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRequest {
    /// Service whose client should carry the call.
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub func: String,
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Millisecond timestamp stamped when the call is sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    pub time: i64,
}

/// A protocol provider: owns schema state and materializes listeners.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Build a listener for an already-ingested service. Does not bind.
    fn create(&self, service: &ServiceRecord) -> Result<ServiceListener, ProviderError>;

    /// Ingest a new service draft (read + validate + persist schema state)
    /// and build its listener. Failures must leave no partial state behind.
    async fn add(&self, service: &ServiceRecord) -> Result<ServiceListener, ProviderError>;

    /// Purge protocol-specific state for a deleted service, including its
    /// saved responses.
    async fn remove(&self, id: &str);

    /// Dispatch a client action for protocols that expose clients.
    async fn client(&self, action: ClientAction) -> Result<ClientAction, ProviderError> {
        Err(ProviderError::ClientUnavailable(action.request.id))
    }

    /// Whether this provider holds a client for the given service.
    fn has_client(&self, _id: &str) -> bool {
        false
    }
}
