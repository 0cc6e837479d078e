//! Service records persisted in `services.json`.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::git::GitInfo;

/// Protocol family a service speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Rest,
    Graphql,
    Thrift,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::Rest => write!(f, "rest"),
            ServiceKind::Graphql => write!(f, "graphql"),
            ServiceKind::Thrift => write!(f, "thrift"),
        }
    }
}

/// A virtualized service as stored on disk and reported over the API.
///
/// Identity is the opaque `id`; `enabled` reflects the *persisted* flag, and
/// [`crate::registry::ServiceRegistry::find`] overlays live listener state on
/// top of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: String,
    pub alias: String,
    pub port: u16,
    pub enabled: bool,
    #[serde(flatten)]
    pub detail: ServiceDetail,
}

impl ServiceRecord {
    pub fn kind(&self) -> ServiceKind {
        self.detail.kind()
    }
}

/// Protocol-specific service fields, tagged by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServiceDetail {
    Rest,
    Graphql(GraphqlDetail),
    Thrift(ThriftDetail),
}

impl ServiceDetail {
    pub fn kind(&self) -> ServiceKind {
        match self {
            ServiceDetail::Rest => ServiceKind::Rest,
            ServiceDetail::Graphql(_) => ServiceKind::Graphql,
            ServiceDetail::Thrift(_) => ServiceKind::Thrift,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlDetail {
    /// Schema source files (or directories) the service was created from.
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThriftDetail {
    /// Root IDL file.
    pub path: String,
    /// Ordered include search roots.
    #[serde(default)]
    pub includes: Vec<String>,
    /// Name of the service definition to expose.
    pub service: String,
    /// HTTP-framed RPC server instead of a raw TCP socket.
    pub use_http: bool,
    /// URL path for the HTTP binding, defaults to `/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub transport: ThriftTransport,
    pub protocol: ThriftProtocol,
    /// Forward decoded calls to a remote instead of serving canned data.
    #[serde(default)]
    pub proxy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitInfo>,
}

/// Thrift transport framing, on both the server and client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThriftTransport {
    Buffered,
    Framed,
}

/// Thrift wire protocol, on both the server and client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThriftProtocol {
    Binary,
    Json,
    Compact,
}

/// Opaque random service id (5 bytes, hex-encoded).
pub fn random_id() -> String {
    let bytes: [u8; 5] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
