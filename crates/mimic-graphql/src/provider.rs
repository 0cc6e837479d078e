//! GraphQL service provider.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tracing::debug;

use mimic_core::{
    detect_git, server_header, ConfigStore, GitInfo, HttpHandler, ListenerHandler, ProviderError,
    RequestRecord, RequestSink, ResponseStore, ServiceDetail, ServiceKind, ServiceListener,
    ServiceProvider, ServiceRecord,
};

use crate::executor::execute;
use crate::response::generate_object;
use crate::schema::{build_types, GraphqlTypes};

/// Serves GraphQL queries against synthesized root values overlaid with
/// saved per-field responses.
pub struct GraphqlProvider {
    /// Service id → SDL text.
    schemas: RwLock<HashMap<String, String>>,
    /// Service id → schema table, built on `create`.
    types: RwLock<HashMap<String, Arc<GraphqlTypes>>>,
    store: Arc<ResponseStore>,
    sink: RequestSink,
    config: ConfigStore,
}

impl GraphqlProvider {
    pub fn new(
        schemas: HashMap<String, String>,
        store: Arc<ResponseStore>,
        sink: RequestSink,
        config: ConfigStore,
    ) -> Self {
        Self {
            schemas: RwLock::new(schemas),
            types: RwLock::new(HashMap::new()),
            store,
            sink,
            config,
        }
    }

    /// Schema table for a service, available once its listener was created.
    pub fn find(&self, id: &str) -> Option<Arc<GraphqlTypes>> {
        self.types.read().get(id).cloned()
    }

    /// SDL subset for export.
    pub fn export(&self, ids: &[String]) -> HashMap<String, String> {
        let schemas = self.schemas.read();
        ids.iter()
            .filter_map(|id| schemas.get(id).map(|sdl| (id.clone(), sdl.clone())))
            .collect()
    }

    /// Read and validate schema files before a service draft is submitted.
    /// Returns the expanded file list and git metadata of the first file.
    pub async fn validate(
        &self,
        files: &[String],
    ) -> Result<(Vec<String>, Option<GitInfo>), ProviderError> {
        let contents = read_graphql_files(files).await?;
        let sdl = join_schema(&contents);
        build_types(&sdl).map_err(|err| ProviderError::Schema(err.to_string()))?;
        let git = contents
            .first()
            .and_then(|(path, _)| detect_git(Path::new(path)));
        let expanded = contents.into_iter().map(|(path, _)| path).collect();
        Ok((expanded, git))
    }
}

#[async_trait]
impl ServiceProvider for GraphqlProvider {
    fn create(&self, service: &ServiceRecord) -> Result<ServiceListener, ProviderError> {
        let sdl = self
            .schemas
            .read()
            .get(&service.id)
            .cloned()
            .ok_or_else(|| {
                ProviderError::Schema(format!("no schema stored for service {}", service.id))
            })?;
        let types =
            Arc::new(build_types(&sdl).map_err(|err| ProviderError::Schema(err.to_string()))?);
        self.types
            .write()
            .insert(service.id.clone(), Arc::clone(&types));

        // Base root: every root object synthesized with all fields, so any
        // query resolves even without saved responses.
        let mut base = Map::new();
        for root_name in types.root.values() {
            if let Some(object) = types.objects.get(root_name) {
                let value = generate_object(&types, object, true)
                    .map_err(|err| ProviderError::Schema(err.to_string()))?;
                if let Value::Object(fields) = value {
                    base.extend(fields);
                }
            }
        }
        base.remove("__type");

        let handler = GraphqlHandler {
            id: service.id.clone(),
            types,
            base: Value::Object(base),
            store: Arc::clone(&self.store),
            sink: self.sink.clone(),
        };
        Ok(ServiceListener::new(
            service.port,
            ListenerHandler::Http(Arc::new(handler)),
        ))
    }

    async fn add(&self, service: &ServiceRecord) -> Result<ServiceListener, ProviderError> {
        let ServiceDetail::Graphql(detail) = &service.detail else {
            return Err(ProviderError::Schema(format!(
                "service {} is not a graphql service",
                service.id
            )));
        };
        let contents = read_graphql_files(&detail.files).await?;
        let sdl = join_schema(&contents);
        build_types(&sdl).map_err(|err| ProviderError::Schema(err.to_string()))?;
        self.config
            .write(
                &format!("graphql/{}.graphql", service.id),
                &Value::String(sdl.clone()),
            )
            .await?;
        self.schemas.write().insert(service.id.clone(), sdl);
        self.create(service)
    }

    async fn remove(&self, id: &str) {
        if let Err(err) = self.store.delete(id).await {
            debug!("failed to drop responses for {id}: {err}");
        }
        self.schemas.write().remove(id);
        self.types.write().remove(id);
        if let Err(err) = self.config.delete(&format!("graphql/{id}.graphql")).await {
            debug!("failed to delete schema file for {id}: {err}");
        }
    }
}

/// Read `.graphql`/`.gql` files, descending into directories recursively.
async fn read_graphql_files(files: &[String]) -> Result<Vec<(String, String)>, ProviderError> {
    let mut contents = Vec::new();
    for file in files {
        collect_schema_files(PathBuf::from(file), &mut contents).await?;
    }
    if contents.is_empty() {
        return Err(ProviderError::Schema(
            "no .graphql/.gql files found".to_string(),
        ));
    }
    Ok(contents)
}

/// Boxed because directory traversal recurses.
fn collect_schema_files<'a>(
    path: PathBuf,
    contents: &'a mut Vec<(String, String)>,
) -> Pin<Box<dyn Future<Output = Result<(), ProviderError>> + Send + 'a>> {
    Box::pin(async move {
        let metadata = tokio::fs::metadata(&path).await?;
        if metadata.is_dir() {
            let mut names = Vec::new();
            let mut entries = tokio::fs::read_dir(&path).await?;
            while let Some(entry) = entries.next_entry().await? {
                names.push(entry.path());
            }
            // Directory order is OS-dependent; sort for a deterministic schema.
            names.sort();
            for nested in names {
                let is_dir = tokio::fs::metadata(&nested).await?.is_dir();
                if is_dir || has_schema_ext(&nested) {
                    collect_schema_files(nested, contents).await?;
                }
            }
        } else {
            let text = tokio::fs::read_to_string(&path).await?;
            contents.push((path.to_string_lossy().into_owned(), text));
        }
        Ok(())
    })
}

fn has_schema_ext(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("graphql") | Some("gql")
    )
}

fn join_schema(contents: &[(String, String)]) -> String {
    contents
        .iter()
        .map(|(_, text)| text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

struct GraphqlHandler {
    id: String,
    types: Arc<GraphqlTypes>,
    /// Root values synthesized from the schema at listener creation.
    base: Value,
    store: Arc<ResponseStore>,
    sink: RequestSink,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryPayload {
    query: String,
    #[serde(default)]
    variables: Value,
    #[serde(default)]
    operation_name: Option<String>,
}

impl GraphqlHandler {
    fn respond(&self, payload: &QueryPayload) -> Value {
        // Saved responses overlay the synthesized base, field by field.
        let mut root = self.base.clone();
        if let Value::Object(base) = &mut root {
            for override_value in self.store.find(&self.id).into_values() {
                if let Value::Object(fields) = override_value {
                    base.extend(fields);
                }
            }
        }
        let result = match execute(
            &self.types,
            &root,
            &payload.query,
            payload.operation_name.as_deref(),
        ) {
            Ok(result) => result,
            Err(err) => json!({ "errors": [{ "message": err.to_string() }] }),
        };
        self.sink.emit(RequestRecord::new(
            ServiceKind::Graphql,
            &self.id,
            payload
                .operation_name
                .clone()
                .unwrap_or_else(|| "graphql".to_string()),
            json!({
                "query": payload.query,
                "variables": payload.variables,
                "operationName": payload.operation_name,
            }),
            "200 OK",
            result.clone(),
        ));
        result
    }
}

#[async_trait]
impl HttpHandler for GraphqlHandler {
    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        match *req.method() {
            Method::OPTIONS => cors_response(StatusCode::OK, Bytes::new()),
            Method::POST => {
                let bytes = match req.into_body().collect().await {
                    Ok(collected) => collected.to_bytes(),
                    Err(_) => return cors_response(StatusCode::BAD_REQUEST, Bytes::new()),
                };
                match serde_json::from_slice::<QueryPayload>(&bytes) {
                    Ok(payload) => {
                        let result = self.respond(&payload);
                        json_response(&result)
                    }
                    Err(_) => cors_response(StatusCode::BAD_REQUEST, Bytes::new()),
                }
            }
            Method::GET => match parse_get_query(req.uri().query().unwrap_or("")) {
                Some(payload) => {
                    let result = self.respond(&payload);
                    json_response(&result)
                }
                None => cors_response(StatusCode::BAD_REQUEST, Bytes::new()),
            },
            _ => cors_response(StatusCode::BAD_REQUEST, Bytes::new()),
        }
    }
}

/// `query`, `variables` (JSON-encoded) and `operationName` query parameters.
fn parse_get_query(raw: &str) -> Option<QueryPayload> {
    let mut query = None;
    let mut variables = Value::Null;
    let mut operation_name = None;
    for pair in raw.split('&') {
        let (key, value) = pair.split_once('=')?;
        let value = urlencoding::decode(value).ok()?.into_owned();
        match key {
            "query" => query = Some(value),
            "variables" => variables = serde_json::from_str(&value).unwrap_or(Value::Null),
            "operationName" => operation_name = Some(value),
            _ => {}
        }
    }
    Some(QueryPayload {
        query: query?,
        variables,
        operation_name,
    })
}

fn json_response(data: &Value) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(data).unwrap_or_default();
    cors_response(StatusCode::OK, Bytes::from(body))
}

fn cors_response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Server", server_header())
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "POST, GET, OPTIONS")
        .header("Access-Control-Allow-Credentials", "true")
        .body(Full::new(body))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
