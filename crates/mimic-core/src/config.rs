//! Flat-file persistence under the config root.
//!
//! Paths ending in `.json` are JSON-encoded; everything else is raw text.
//! All operations are asynchronous and create parent directories on demand.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("non-text value for {0}")]
    NotText(String),
}

/// Persistence root for services, responses and schemas.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$HOME/.mimic`, falling back to the working directory.
    pub fn default_root() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mimic")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Read a config file; `.json` paths are parsed, others wrapped as strings.
    /// A missing file reads as `None`.
    pub async fn read(&self, rel: &str) -> Result<Option<Value>, ConfigError> {
        let path = self.full(rel);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if rel.ends_with(".json") {
            let value = serde_json::from_str(&data).map_err(|source| ConfigError::Json {
                path: rel.to_string(),
                source,
            })?;
            Ok(Some(value))
        } else {
            Ok(Some(Value::String(data)))
        }
    }

    /// Read and deserialize a `.json` config file.
    pub async fn read_json<T: DeserializeOwned>(&self, rel: &str) -> Result<Option<T>, ConfigError> {
        match self.read(rel).await? {
            Some(value) => {
                let parsed = serde_json::from_value(value).map_err(|source| ConfigError::Json {
                    path: rel.to_string(),
                    source,
                })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Read every file in a folder, keyed by basename without extension.
    /// A missing folder reads as empty.
    pub async fn read_folder(&self, folder: &str) -> Result<HashMap<String, Value>, ConfigError> {
        let path = self.full(folder);
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(err) => return Err(err.into()),
        };
        let mut result = HashMap::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel = format!("{folder}/{name}");
            if let Some(value) = self.read(&rel).await? {
                let stem = name
                    .rsplit_once('.')
                    .map(|(stem, _)| stem.to_string())
                    .unwrap_or(name);
                result.insert(stem, value);
            }
        }
        Ok(result)
    }

    /// Write a config file, creating parent directories if necessary.
    pub async fn write(&self, rel: &str, value: &Value) -> Result<(), ConfigError> {
        let data = if rel.ends_with(".json") {
            serde_json::to_string_pretty(value).map_err(|source| ConfigError::Json {
                path: rel.to_string(),
                source,
            })?
        } else {
            match value {
                Value::String(text) => text.clone(),
                _ => return Err(ConfigError::NotText(rel.to_string())),
            }
        };
        let path = self.full(rel);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        debug!("wrote config {rel}");
        Ok(())
    }

    /// Serialize and write a `.json` config file.
    pub async fn write_json<T: Serialize>(&self, rel: &str, value: &T) -> Result<(), ConfigError> {
        let value = serde_json::to_value(value).map_err(|source| ConfigError::Json {
            path: rel.to_string(),
            source,
        })?;
        self.write(rel, &value).await
    }

    /// Write a map of values as `<folder>/<key>.<ext>` files.
    pub async fn write_folder(
        &self,
        folder: &str,
        data: &HashMap<String, Value>,
        ext: &str,
    ) -> Result<(), ConfigError> {
        for (key, value) in data {
            self.write(&format!("{folder}/{key}.{ext}"), value).await?;
        }
        Ok(())
    }

    /// Delete a config file; a missing file counts as success.
    pub async fn delete(&self, rel: &str) -> Result<(), ConfigError> {
        match tokio::fs::remove_file(self.full(rel)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete every file in a folder; a missing folder counts as success.
    pub async fn empty_folder(&self, folder: &str) -> Result<(), ConfigError> {
        let path = self.full(folder);
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            tokio::fs::remove_file(entry.path()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_json_roundtrip() {
        let (_dir, store) = store();
        let value = json!({"a": 1, "b": ["x"]});
        store.write("nested/data.json", &value).await.unwrap();
        assert_eq!(store.read("nested/data.json").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn test_raw_text_passthrough() {
        let (_dir, store) = store();
        let value = Value::String("type Query { id: ID }".into());
        store.write("graphql/s1.graphql", &value).await.unwrap();
        assert_eq!(
            store.read("graphql/s1.graphql").await.unwrap(),
            Some(value)
        );
    }

    #[tokio::test]
    async fn test_missing_file_reads_none() {
        let (_dir, store) = store();
        assert_eq!(store.read("absent.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing() {
        let (_dir, store) = store();
        store.delete("never-written.json").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_folder_keys_by_basename() {
        let (_dir, store) = store();
        store
            .write("responses/s1.json", &json!({"k": "v"}))
            .await
            .unwrap();
        store
            .write("responses/s2.json", &json!({"j": "w"}))
            .await
            .unwrap();
        let folder = store.read_folder("responses").await.unwrap();
        assert_eq!(folder.len(), 2);
        assert_eq!(folder["s1"], json!({"k": "v"}));
    }
}
