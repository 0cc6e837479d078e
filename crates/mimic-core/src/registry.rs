//! Service lifecycle orchestration.
//!
//! Per-service state machine: `unregistered → registered(disabled) ↔
//! registered(enabled) → deleted`. The registry owns every service record,
//! the listener bound to it, and the provider registered for its protocol.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::{ConfigError, ConfigStore};
use crate::listener::ServiceListener;
use crate::provider::{ClientAction, ProviderError, RequestRecord, RequestSink, ServiceProvider};
use crate::service::{random_id, ServiceDetail, ServiceKind, ServiceRecord};

/// Events re-emitted upward to the embedding layer (CLI, GUI, telemetry).
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Request(RequestRecord),
    Listening { id: String },
    ListenerError { id: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown service {0}")]
    UnknownService(String),
    #[error("no provider registered for {0} services")]
    NoProvider(ServiceKind),
    #[error("{0} provider does not expose clients")]
    ClientUnavailable(ServiceKind),
    #[error("failed to bind port {port}: {message}")]
    Bind { port: u16, message: String },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Partial update applied by [`ServiceRegistry::update`].
#[derive(Debug, Clone, Default)]
pub struct ServicePatch {
    pub alias: Option<String>,
    pub port: Option<u16>,
    pub enabled: Option<bool>,
    pub detail: Option<ServiceDetail>,
}

/// One observable enable/disable step performed by [`ServiceRegistry::switch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchChange {
    pub id: String,
    pub enabled: bool,
}

/// Owns all service records, provider registration and listener lifecycle.
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, ServiceRecord>>,
    listeners: RwLock<HashMap<String, Arc<ServiceListener>>>,
    providers: RwLock<HashMap<ServiceKind, Arc<dyn ServiceProvider>>>,
    config: ConfigStore,
    events: broadcast::Sender<RegistryEvent>,
}

impl ServiceRegistry {
    /// Build a registry over persisted services. Request records flowing into
    /// `sink` are re-emitted as [`RegistryEvent::Request`].
    pub fn new(
        services: HashMap<String, ServiceRecord>,
        config: ConfigStore,
        sink: &RequestSink,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let forward = events.clone();
        let mut requests = sink.subscribe();
        tokio::spawn(async move {
            loop {
                match requests.recv().await {
                    Ok(record) => {
                        let _ = forward.send(RegistryEvent::Request(record));
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self {
            services: RwLock::new(services),
            listeners: RwLock::new(HashMap::new()),
            providers: RwLock::new(HashMap::new()),
            config,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Attach a provider for a protocol and materialize listeners for every
    /// existing service of that type, auto-starting the ones persisted as
    /// enabled. Creation or bind failures are reported per service and never
    /// abort registration of the rest.
    pub async fn register(&self, kind: ServiceKind, provider: Arc<dyn ServiceProvider>) {
        self.providers.write().insert(kind, Arc::clone(&provider));
        let matching: Vec<ServiceRecord> = {
            let services = self.services.read();
            services.values().filter(|s| s.kind() == kind).cloned().collect()
        };
        for service in matching {
            let listener = match provider.create(&service) {
                Ok(listener) => Arc::new(listener),
                Err(err) => {
                    error!("failed to create {} listener for {}: {err}", kind, service.id);
                    self.emit_listener_error(&service.id, err.to_string());
                    continue;
                }
            };
            self.watch(&service.id, &listener);
            self.listeners
                .write()
                .insert(service.id.clone(), Arc::clone(&listener));
            if service.enabled {
                match listener.bind().await {
                    Ok(()) => {
                        let _ = self.events.send(RegistryEvent::Listening {
                            id: service.id.clone(),
                        });
                    }
                    Err(err) => {
                        error!("failed to start {}: {err}", service.id);
                        self.emit_listener_error(&service.id, err.to_string());
                    }
                }
            }
        }
        info!("registered {kind} provider");
    }

    /// Create a service from a draft record: assigns a fresh id, starts
    /// disabled, and asks the provider to ingest and materialize a listener.
    /// Provider failure aborts without mutating registry state.
    pub async fn add(&self, mut service: ServiceRecord) -> Result<ServiceRecord, RegistryError> {
        service.id = random_id();
        service.enabled = false;
        let provider = self.provider(service.kind())?;
        let listener = Arc::new(provider.add(&service).await?);
        self.watch(&service.id, &listener);
        self.services
            .write()
            .insert(service.id.clone(), service.clone());
        self.listeners.write().insert(service.id.clone(), listener);
        self.persist().await?;
        Ok(service)
    }

    /// Shallow-merge a patch into the stored record. The listener is left
    /// untouched; port changes take effect on the next enable.
    pub async fn update(&self, id: &str, patch: ServicePatch) -> Result<ServiceRecord, RegistryError> {
        let updated = {
            let mut services = self.services.write();
            let record = services
                .get_mut(id)
                .ok_or_else(|| RegistryError::UnknownService(id.to_string()))?;
            if let Some(alias) = patch.alias {
                record.alias = alias;
            }
            if let Some(port) = patch.port {
                record.port = port;
            }
            if let Some(enabled) = patch.enabled {
                record.enabled = enabled;
            }
            if let Some(detail) = patch.detail {
                record.detail = detail;
            }
            record.clone()
        };
        self.persist().await?;
        Ok(updated)
    }

    /// Delete a service: the provider purges protocol state first, then the
    /// listener is closed and the record dropped.
    pub async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let record = self
            .services
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownService(id.to_string()))?;
        let provider = self.provider(record.kind())?;
        provider.remove(id).await;
        let listener = self.listeners.write().remove(id);
        if let Some(listener) = listener {
            listener.close().await;
        }
        self.services.write().remove(id);
        self.persist().await?;
        Ok(())
    }

    /// Bind the service's listener and persist the enabled flag. Persisting
    /// happens only after the socket is listening.
    pub async fn enable(&self, id: &str) -> Result<(), RegistryError> {
        let listener = self.listener(id)?;
        listener.bind().await.map_err(|err| {
            self.emit_listener_error(id, err.to_string());
            RegistryError::Bind {
                port: listener.port(),
                message: err.to_string(),
            }
        })?;
        self.set_enabled(id, true)?;
        self.persist().await?;
        let _ = self.events.send(RegistryEvent::Listening { id: id.to_string() });
        Ok(())
    }

    /// Close the service's listener, waiting for the accept loop to drain,
    /// then persist the disabled flag.
    pub async fn disable(&self, id: &str) -> Result<(), RegistryError> {
        let listener = self.listener(id)?;
        listener.close().await;
        self.set_enabled(id, false)?;
        self.persist().await?;
        Ok(())
    }

    /// Enable or disable with port-conflict resolution: enabling a service
    /// whose port is held by another *currently enabled* service first
    /// disables the holder. The returned changes preserve that order.
    pub async fn switch(&self, id: &str, enabled: bool) -> Result<Vec<SwitchChange>, RegistryError> {
        let mut changes = Vec::new();
        if enabled {
            let target = self
                .find(id)
                .ok_or_else(|| RegistryError::UnknownService(id.to_string()))?;
            let conflict = self
                .all()
                .into_values()
                .find(|s| s.enabled && s.port == target.port && s.id != id);
            if let Some(conflict) = conflict {
                self.disable(&conflict.id).await?;
                changes.push(SwitchChange {
                    id: conflict.id,
                    enabled: false,
                });
            }
            self.enable(id).await?;
        } else {
            self.disable(id).await?;
        }
        changes.push(SwitchChange {
            id: id.to_string(),
            enabled,
        });
        Ok(changes)
    }

    /// Stored record with the live listener state overlaid on `enabled`, so
    /// consumers see ground truth rather than the stale persisted flag.
    pub fn find(&self, id: &str) -> Option<ServiceRecord> {
        let record = self.services.read().get(id).cloned()?;
        let enabled = self
            .listeners
            .read()
            .get(id)
            .map(|l| l.is_listening())
            .unwrap_or(false);
        Some(ServiceRecord { enabled, ..record })
    }

    pub fn all(&self) -> HashMap<String, ServiceRecord> {
        let ids: Vec<String> = self.services.read().keys().cloned().collect();
        ids.into_iter()
            .filter_map(|id| self.find(&id).map(|record| (id, record)))
            .collect()
    }

    /// Subset projection for export.
    pub fn export(&self, ids: &[String]) -> HashMap<String, ServiceRecord> {
        ids.iter()
            .filter_map(|id| self.find(id).map(|record| (id.clone(), record)))
            .collect()
    }

    /// Client-dispatch passthrough: route an outbound call through the
    /// provider client registered for the target service.
    pub async fn request(&self, action: ClientAction) -> Result<ClientAction, RegistryError> {
        let id = action.request.id.clone();
        let kind = self
            .services
            .read()
            .get(&id)
            .map(|s| s.kind())
            .ok_or(RegistryError::UnknownService(id.clone()))?;
        let provider = self.provider(kind)?;
        if !provider.has_client(&id) {
            return Err(RegistryError::ClientUnavailable(kind));
        }
        Ok(provider.client(action).await?)
    }

    fn provider(&self, kind: ServiceKind) -> Result<Arc<dyn ServiceProvider>, RegistryError> {
        self.providers
            .read()
            .get(&kind)
            .cloned()
            .ok_or(RegistryError::NoProvider(kind))
    }

    fn listener(&self, id: &str) -> Result<Arc<ServiceListener>, RegistryError> {
        self.listeners
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownService(id.to_string()))
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), RegistryError> {
        let mut services = self.services.write();
        let record = services
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownService(id.to_string()))?;
        record.enabled = enabled;
        Ok(())
    }

    /// Forward listener runtime errors upward as per-service events.
    fn watch(&self, id: &str, listener: &Arc<ServiceListener>) {
        let id = id.to_string();
        let mut errors = listener.subscribe_errors();
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                match errors.recv().await {
                    Ok(message) => {
                        let _ = events.send(RegistryEvent::ListenerError {
                            id: id.clone(),
                            message,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn emit_listener_error(&self, id: &str, message: String) {
        let _ = self.events.send(RegistryEvent::ListenerError {
            id: id.to_string(),
            message,
        });
    }

    async fn persist(&self) -> Result<(), ConfigError> {
        let snapshot = self.services.read().clone();
        self.config.write_json("services.json", &snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{HttpHandler, ListenerHandler};
    use async_trait::async_trait;
    use bytes::Bytes;
    use http_body_util::Full;
    use hyper::body::Incoming;
    use hyper::{Request, Response};
    use serial_test::serial;

    struct Null;

    #[async_trait]
    impl HttpHandler for Null {
        async fn handle(&self, _req: Request<Incoming>) -> Response<Full<Bytes>> {
            Response::new(Full::new(Bytes::new()))
        }
    }

    struct TestProvider;

    #[async_trait]
    impl ServiceProvider for TestProvider {
        fn create(&self, service: &ServiceRecord) -> Result<ServiceListener, ProviderError> {
            Ok(ServiceListener::new(
                service.port,
                ListenerHandler::Http(Arc::new(Null)),
            ))
        }

        async fn add(&self, service: &ServiceRecord) -> Result<ServiceListener, ProviderError> {
            self.create(service)
        }

        async fn remove(&self, _id: &str) {}
    }

    fn draft(alias: &str, port: u16) -> ServiceRecord {
        ServiceRecord {
            id: String::new(),
            alias: alias.into(),
            port,
            enabled: false,
            detail: ServiceDetail::Rest,
        }
    }

    async fn registry() -> (tempfile::TempDir, ServiceRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::new(dir.path());
        let sink = RequestSink::new();
        let registry = ServiceRegistry::new(HashMap::new(), config, &sink);
        registry
            .register(ServiceKind::Rest, Arc::new(TestProvider))
            .await;
        (dir, registry)
    }

    #[tokio::test]
    async fn test_add_assigns_id_and_starts_disabled() {
        let (_dir, registry) = registry().await;
        let mut record = draft("users", 49420);
        record.enabled = true;
        let added = registry.add(record).await.unwrap();
        assert_eq!(added.id.len(), 10);
        assert!(!added.enabled);
        assert!(!registry.find(&added.id).unwrap().enabled);
    }

    #[tokio::test]
    async fn test_add_without_provider_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RequestSink::new();
        let registry = ServiceRegistry::new(HashMap::new(), ConfigStore::new(dir.path()), &sink);
        let err = registry.add(draft("users", 49421)).await.unwrap_err();
        assert!(matches!(err, RegistryError::NoProvider(ServiceKind::Rest)));
        assert!(registry.all().is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_enable_disable_overlay() {
        let (_dir, registry) = registry().await;
        let added = registry.add(draft("users", 49422)).await.unwrap();
        registry.enable(&added.id).await.unwrap();
        assert!(registry.find(&added.id).unwrap().enabled);
        registry.disable(&added.id).await.unwrap();
        assert!(!registry.find(&added.id).unwrap().enabled);
    }

    #[tokio::test]
    #[serial]
    async fn test_switch_resolves_port_conflict() {
        let (_dir, registry) = registry().await;
        let a = registry.add(draft("a", 49423)).await.unwrap();
        let b = registry.add(draft("b", 49423)).await.unwrap();
        registry.enable(&a.id).await.unwrap();

        let changes = registry.switch(&b.id, true).await.unwrap();
        assert_eq!(
            changes,
            vec![
                SwitchChange {
                    id: a.id.clone(),
                    enabled: false
                },
                SwitchChange {
                    id: b.id.clone(),
                    enabled: true
                },
            ]
        );
        assert!(!registry.find(&a.id).unwrap().enabled);
        assert!(registry.find(&b.id).unwrap().enabled);
        registry.disable(&b.id).await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn test_delete_closes_listener() {
        let (_dir, registry) = registry().await;
        let added = registry.add(draft("users", 49424)).await.unwrap();
        registry.enable(&added.id).await.unwrap();
        registry.delete(&added.id).await.unwrap();
        assert!(registry.find(&added.id).is_none());
        // Port is free again.
        let again = registry.add(draft("users2", 49424)).await.unwrap();
        registry.enable(&again.id).await.unwrap();
        registry.disable(&again.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_request_without_client_errors() {
        let (_dir, registry) = registry().await;
        let added = registry.add(draft("users", 49425)).await.unwrap();
        let action = ClientAction {
            request: crate::provider::ClientRequest {
                id: added.id.clone(),
                host: "localhost".into(),
                port: 49425,
                path: None,
                func: "ping".into(),
                args: serde_json::Value::Null,
                headers: None,
                time: None,
            },
            response: None,
        };
        let err = registry.request(action).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::ClientUnavailable(ServiceKind::Rest)
        ));
    }
}
