//! `.mimic` snapshot export/import.
//!
//! A snapshot captures everything needed to recreate a chosen subset of
//! services on another machine: records, saved responses, GraphQL schema
//! text and Thrift type graphs. Import replaces all persisted state
//! wholesale and expects a process restart.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ConfigError, ConfigStore};
use crate::response_store::ResponseMap;
use crate::service::ServiceRecord;

/// Snapshot layout version; bumped on incompatible changes.
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("couldn't read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed export file: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("file uses schema version {found}, but {SCHEMA_VERSION} is supported")]
    SchemaVersion { found: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFile {
    pub date: String,
    pub mimic_version: String,
    pub schema_version: u32,
    pub services: HashMap<String, ServiceRecord>,
    pub responses: HashMap<String, ResponseMap>,
    /// Service id → joined schema text.
    pub graphql: HashMap<String, String>,
    /// Service id → normalized Thrift type graph.
    pub thrift: HashMap<String, Value>,
}

impl ExportFile {
    /// Assemble a snapshot, stamping the current date and crate version.
    pub fn new(
        services: HashMap<String, ServiceRecord>,
        responses: HashMap<String, ResponseMap>,
        graphql: HashMap<String, String>,
        thrift: HashMap<String, Value>,
    ) -> Self {
        Self {
            date: Utc::now().to_rfc3339(),
            mimic_version: crate::version().to_string(),
            schema_version: SCHEMA_VERSION,
            services,
            responses,
            graphql,
            thrift,
        }
    }

    /// Load and validate a snapshot from disk.
    pub fn load(path: &Path) -> Result<Self, ExportError> {
        let data = std::fs::read_to_string(path).map_err(|source| ExportError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let file: ExportFile = serde_json::from_str(&data)?;
        if file.schema_version != SCHEMA_VERSION {
            return Err(ExportError::SchemaVersion {
                found: file.schema_version,
            });
        }
        Ok(file)
    }

    /// Whether the snapshot was produced by a different Mimic version.
    pub fn version_mismatch(&self) -> bool {
        self.mimic_version != crate::version()
    }

    /// Replace all persisted state with this snapshot's contents.
    pub async fn import(&self, config: &ConfigStore) -> Result<(), ConfigError> {
        for folder in ["responses", "graphql", "thrift"] {
            config.empty_folder(folder).await?;
        }
        config.write_json("services.json", &self.services).await?;
        for (id, responses) in &self.responses {
            config
                .write_json(&format!("responses/{id}.json"), responses)
                .await?;
        }
        for (id, schema) in &self.graphql {
            config
                .write(
                    &format!("graphql/{id}.graphql"),
                    &Value::String(schema.clone()),
                )
                .await?;
        }
        for (id, graph) in &self.thrift {
            config.write(&format!("thrift/{id}.json"), graph).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceDetail;
    use serde_json::json;

    fn snapshot() -> ExportFile {
        let record = ServiceRecord {
            id: "aabbccddee".into(),
            alias: "users".into(),
            port: 8080,
            enabled: true,
            detail: ServiceDetail::Rest,
        };
        ExportFile::new(
            HashMap::from([(record.id.clone(), record)]),
            HashMap::from([(
                "aabbccddee".into(),
                HashMap::from([("r1".into(), json!({"data": 1}))]),
            )]),
            HashMap::new(),
            HashMap::new(),
        )
    }

    #[test]
    fn test_load_rejects_wrong_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.mimic");
        let mut file = snapshot();
        file.schema_version = 1;
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();
        match ExportFile::load(&path) {
            Err(ExportError::SchemaVersion { found }) => assert_eq!(found, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.mimic");
        let file = snapshot();
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();
        let loaded = ExportFile::load(&path).unwrap();
        assert_eq!(loaded.services.len(), 1);
        assert!(!loaded.version_mismatch());
    }

    #[tokio::test]
    async fn test_import_replaces_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::new(dir.path());
        // Pre-existing state that must be wiped.
        config
            .write_json("responses/stale.json", &json!({"old": true}))
            .await
            .unwrap();

        snapshot().import(&config).await.unwrap();

        let responses = config.read_folder("responses").await.unwrap();
        assert_eq!(responses.len(), 1);
        assert!(responses.contains_key("aabbccddee"));
        let services: HashMap<String, ServiceRecord> = config
            .read_json("services.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(services["aabbccddee"].alias, "users");
    }
}
