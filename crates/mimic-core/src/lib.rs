//! Core building blocks for the Mimic service virtualization engine.
//!
//! This crate owns everything protocol providers share:
//! - `ServiceRegistry`: lifecycle orchestration for virtual services
//! - `ServiceListener`: port binding and the per-connection accept loop
//! - `ResponseStore`: saved example responses, keyed by service id
//! - `ConfigStore`: flat-file persistence under the config root
//! - `ExportFile`: `.mimic` snapshot export/import
//!
//! Protocol providers (`mimic-rest`, `mimic-graphql`, `mimic-thrift`)
//! implement [`ServiceProvider`] and are wired into the registry at startup.

pub mod config;
pub mod export;
pub mod git;
pub mod listener;
pub mod provider;
pub mod registry;
pub mod response_store;
pub mod service;

pub use config::{ConfigError, ConfigStore};
pub use export::{ExportError, ExportFile, SCHEMA_VERSION};
pub use git::{detect_git, GitInfo};
pub use listener::{HttpHandler, ListenerHandler, ServiceListener, TcpHandler};
pub use provider::{
    ClientAction, ClientRequest, ClientResponse, ProviderError, RequestRecord, RequestSink,
    ServiceProvider,
};
pub use registry::{RegistryError, RegistryEvent, ServiceRegistry, ServicePatch, SwitchChange};
pub use response_store::{ResponseMap, ResponseStore, StoreEvent};
pub use service::{
    random_id, GraphqlDetail, ServiceDetail, ServiceKind, ServiceRecord, ThriftDetail,
    ThriftProtocol, ThriftTransport,
};

/// Crate version, reported in the `Server` header and export files.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Value for the `Server`/`User-Agent` headers on virtualized endpoints.
pub fn server_header() -> String {
    format!("mimic: {}", version())
}
