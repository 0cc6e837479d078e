//! REST service provider.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::debug;

use mimic_core::{
    server_header, HttpHandler, ListenerHandler, ProviderError, RequestRecord, RequestSink,
    ResponseStore, ServiceKind, ServiceListener, ServiceProvider, ServiceRecord,
};

use crate::router::{RestRoute, RouterTree};

/// Serves saved REST responses through a path-trie router.
pub struct RestProvider {
    store: Arc<ResponseStore>,
    sink: RequestSink,
}

impl RestProvider {
    pub fn new(store: Arc<ResponseStore>, sink: RequestSink) -> Self {
        Self { store, sink }
    }
}

#[async_trait]
impl ServiceProvider for RestProvider {
    fn create(&self, service: &ServiceRecord) -> Result<ServiceListener, ProviderError> {
        let handler = RestHandler {
            id: service.id.clone(),
            store: Arc::clone(&self.store),
            sink: self.sink.clone(),
            cache: RwLock::new(None),
        };
        Ok(ServiceListener::new(
            service.port,
            ListenerHandler::Http(Arc::new(handler)),
        ))
    }

    async fn add(&self, service: &ServiceRecord) -> Result<ServiceListener, ProviderError> {
        // REST services carry no schema; routes come from saved responses.
        self.create(service)
    }

    async fn remove(&self, id: &str) {
        if let Err(err) = self.store.delete(id).await {
            debug!("failed to drop responses for {id}: {err}");
        }
    }
}

struct RestHandler {
    id: String,
    store: Arc<ResponseStore>,
    sink: RequestSink,
    /// Router built from the store, together with the store version it was
    /// built from. Rebuilt lazily when the version moves so in-flight
    /// requests never see a half-rebuilt trie.
    cache: RwLock<Option<(u64, Arc<RouterTree>)>>,
}

impl RestHandler {
    fn router(&self) -> Arc<RouterTree> {
        let version = self.store.version(&self.id);
        if let Some((cached, router)) = &*self.cache.read() {
            if *cached == version {
                return Arc::clone(router);
            }
        }
        let routes: Vec<RestRoute> = self
            .store
            .find(&self.id)
            .into_values()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();
        let router = Arc::new(RouterTree::new(routes));
        *self.cache.write() = Some((version, Arc::clone(&router)));
        router
    }

    fn respond(&self, method: &str, path: &str, query: Option<&str>, body: Value) -> (StatusCode, Value) {
        let query_value = query.map_or(Value::Null, |q| Value::String(q.to_string()));
        let mut request_value = json!({ "query": query_value, "body": body });
        match self.router().find(method, path) {
            Some(hit) => {
                request_value["route"] = serde_json::to_value(&hit.params).unwrap_or_default();
                self.sink.emit(RequestRecord::new(
                    ServiceKind::Rest,
                    &self.id,
                    format!("{method} {}", hit.route),
                    request_value,
                    "200 OK",
                    hit.data.clone(),
                ));
                (StatusCode::OK, hit.data)
            }
            None => {
                let data = json!({ "error": "not_found" });
                self.sink.emit(RequestRecord::new(
                    ServiceKind::Rest,
                    &self.id,
                    format!("{method} {path}"),
                    request_value,
                    "404 Not Found",
                    data.clone(),
                ));
                (StatusCode::NOT_FOUND, data)
            }
        }
    }
}

#[async_trait]
impl HttpHandler for RestHandler {
    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let body = read_body(&method, req).await;
        let (status, data) = self.respond(method.as_str(), uri.path(), uri.query(), body);
        json_response(status, &data)
    }
}

/// Collect and parse the body for methods that carry one; JSON when it
/// parses, the raw string otherwise.
async fn read_body(method: &Method, req: Request<Incoming>) -> Value {
    match *method {
        Method::POST | Method::PUT | Method::PATCH => match req.into_body().collect().await {
            Ok(collected) => {
                let text = String::from_utf8_lossy(&collected.to_bytes()).into_owned();
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            }
            Err(_) => Value::String(String::new()),
        },
        _ => Value::String(String::new()),
    }
}

fn json_response(status: StatusCode, data: &Value) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(data).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("Server", server_header())
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_core::ConfigStore;
    use serde_json::json;
    use std::collections::HashMap;

    async fn handler_with_routes(routes: Value) -> (tempfile::TempDir, RestHandler) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ResponseStore::new(
            HashMap::new(),
            ConfigStore::new(dir.path()),
        ));
        let mut map = HashMap::new();
        for (i, route) in routes.as_array().unwrap().iter().enumerate() {
            map.insert(format!("uid{i}"), route.clone());
        }
        store.add("s1", map).await.unwrap();
        let handler = RestHandler {
            id: "s1".into(),
            store,
            sink: RequestSink::new(),
            cache: RwLock::new(None),
        };
        (dir, handler)
    }

    #[tokio::test]
    async fn test_match_serves_stored_data() {
        let (_dir, handler) = handler_with_routes(json!([
            {"method": "GET", "path": "/users/:id", "data": {"name": "ada"}}
        ]))
        .await;
        let (status, data) = handler.respond("GET", "/users/7", None, Value::String(String::new()));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data, json!({"name": "ada"}));
    }

    #[tokio::test]
    async fn test_miss_serves_not_found() {
        let (_dir, handler) = handler_with_routes(json!([
            {"method": "GET", "path": "/users", "data": []}
        ]))
        .await;
        let (status, data) = handler.respond("DELETE", "/users", None, Value::Null);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(data, json!({"error": "not_found"}));
    }

    #[tokio::test]
    async fn test_router_rebuilds_after_store_update() {
        let (_dir, handler) = handler_with_routes(json!([
            {"method": "GET", "path": "/a", "data": 1}
        ]))
        .await;
        let (status, _) = handler.respond("GET", "/b", None, Value::Null);
        assert_eq!(status, StatusCode::NOT_FOUND);

        handler
            .store
            .add(
                "s1",
                HashMap::from([(
                    "uid9".to_string(),
                    json!({"method": "GET", "path": "/b", "data": 2}),
                )]),
            )
            .await
            .unwrap();
        let (status, data) = handler.respond("GET", "/b", None, Value::Null);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data, json!(2));
    }

    #[tokio::test]
    async fn test_request_records_emitted() {
        let (_dir, handler) = handler_with_routes(json!([
            {"method": "GET", "path": "/a/:id", "data": "X"}
        ]))
        .await;
        let mut rx = handler.sink.subscribe();
        handler.respond("GET", "/a/c", Some("v=1"), Value::Null);
        let record = rx.recv().await.unwrap();
        assert_eq!(record.kind, ServiceKind::Rest);
        assert_eq!(record.request, "GET /a/:id");
        assert_eq!(record.response, "200 OK");
        assert_eq!(record.request_value["route"], json!({"id": "c"}));
        assert_eq!(record.request_value["query"], json!("v=1"));
    }
}
