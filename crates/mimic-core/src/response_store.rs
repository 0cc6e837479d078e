//! Saved example responses, keyed by service id.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::{ConfigError, ConfigStore};

/// Responses for one service: response key → payload.
pub type ResponseMap = HashMap<String, Value>;

/// Change notifications consumed by protocol providers.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Updated(String),
    Deleted(String),
}

#[derive(Default)]
struct Entry {
    version: u64,
    responses: ResponseMap,
}

/// Keyed, mutable map from service id to its saved example responses.
///
/// Mutations bump a per-service version; providers cache derived routing
/// structures together with the version they were built from and rebuild
/// lazily on the next request rather than in place, so an in-flight handler
/// never observes a half-rebuilt structure.
pub struct ResponseStore {
    entries: RwLock<HashMap<String, Entry>>,
    events: broadcast::Sender<StoreEvent>,
    config: ConfigStore,
}

impl ResponseStore {
    pub fn new(responses: HashMap<String, ResponseMap>, config: ConfigStore) -> Self {
        let entries = responses
            .into_iter()
            .map(|(id, responses)| {
                (
                    id,
                    Entry {
                        version: 0,
                        responses,
                    },
                )
            })
            .collect();
        let (events, _) = broadcast::channel(64);
        Self {
            entries: RwLock::new(entries),
            events,
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Responses for a service; unknown ids read as empty.
    pub fn find(&self, id: &str) -> ResponseMap {
        self.entries
            .read()
            .get(id)
            .map(|entry| entry.responses.clone())
            .unwrap_or_default()
    }

    /// Monotonic per-service version, bumped on every mutation.
    pub fn version(&self, id: &str) -> u64 {
        self.entries.read().get(id).map(|e| e.version).unwrap_or(0)
    }

    /// Subset snapshot for export.
    pub fn export(&self, ids: &[String]) -> HashMap<String, ResponseMap> {
        let entries = self.entries.read();
        ids.iter()
            .filter_map(|id| {
                entries
                    .get(id)
                    .map(|entry| (id.clone(), entry.responses.clone()))
            })
            .collect()
    }

    /// Shallow-merge `response` over the service's existing responses,
    /// persist, and notify providers.
    pub async fn add(&self, id: &str, response: ResponseMap) -> Result<(), ConfigError> {
        let snapshot = {
            let mut entries = self.entries.write();
            let entry = entries.entry(id.to_string()).or_default();
            entry.responses.extend(response);
            entry.version += 1;
            entry.responses.clone()
        };
        let _ = self.events.send(StoreEvent::Updated(id.to_string()));
        self.config
            .write_json(&format!("responses/{id}.json"), &snapshot)
            .await
    }

    /// Drop a service's responses and delete the backing file. A missing
    /// file counts as success.
    pub async fn delete(&self, id: &str) -> Result<(), ConfigError> {
        self.entries.write().remove(id);
        let _ = self.events.send(StoreEvent::Deleted(id.to_string()));
        debug!("deleted responses for {id}");
        self.config.delete(&format!("responses/{id}.json")).await
    }
}
