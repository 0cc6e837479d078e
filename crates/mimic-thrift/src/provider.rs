//! Thrift service provider.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::debug;

use mimic_core::{
    detect_git, ClientAction, ClientResponse, ConfigStore, GitInfo, ListenerHandler,
    ProviderError, RequestRecord, RequestSink, ResponseStore, ServiceDetail, ServiceKind,
    ServiceListener, ServiceProvider, ServiceRecord, ThriftDetail,
};

use crate::client::ThriftClient;
use crate::codec::ApplicationException;
use crate::file::{FunctionDef, ThriftJson, TypeId};
use crate::parser::ThriftParser;
use crate::response::format_thrift;
use crate::server::{
    CallOutcome, FunctionHandler, ThriftDispatcher, ThriftHttpHandler, ThriftTcpHandler,
};

/// Serves canned (or proxied) responses for parsed Thrift services over the
/// full transport/protocol matrix.
pub struct ThriftProvider {
    defs: RwLock<HashMap<String, Arc<ThriftJson>>>,
    clients: RwLock<HashMap<String, Arc<ThriftClient>>>,
    /// Last-seen HTTP request headers per service, replayed on proxy calls.
    headers: RwLock<HashMap<String, Arc<RwLock<HashMap<String, String>>>>>,
    store: Arc<ResponseStore>,
    sink: RequestSink,
    config: ConfigStore,
}

impl ThriftProvider {
    pub fn new(
        defs: HashMap<String, ThriftJson>,
        store: Arc<ResponseStore>,
        sink: RequestSink,
        config: ConfigStore,
    ) -> Self {
        let defs = defs
            .into_iter()
            .map(|(id, def)| (id, Arc::new(def)))
            .collect();
        Self {
            defs: RwLock::new(defs),
            clients: RwLock::new(HashMap::new()),
            headers: RwLock::new(HashMap::new()),
            store,
            sink,
            config,
        }
    }

    /// Type graph for a service.
    pub fn find(&self, id: &str) -> Option<Arc<ThriftJson>> {
        self.defs.read().get(id).cloned()
    }

    /// Type graph subset for export.
    pub fn export(&self, ids: &[String]) -> HashMap<String, Value> {
        let defs = self.defs.read();
        ids.iter()
            .filter_map(|id| {
                defs.get(id)
                    .and_then(|def| serde_json::to_value(def.as_ref()).ok())
                    .map(|def| (id.clone(), def))
            })
            .collect()
    }

    /// Parse and validate an IDL file ahead of service creation. The git
    /// root, when detected, joins the include search roots.
    pub async fn process(
        &self,
        path: &str,
        includes: &[String],
    ) -> Result<(ThriftJson, Vec<String>, Option<GitInfo>), ProviderError> {
        let git = detect_git(Path::new(path));
        let mut includes = includes.to_vec();
        if let Some(git) = &git {
            includes.push(git.root.clone());
        }
        let parsed = ThriftParser::new(includes.clone())
            .parse(path)
            .await
            .map_err(|err| ProviderError::Schema(err.to_string()))?;
        Ok((parsed, includes, git))
    }

    fn thrift_detail<'a>(service: &'a ServiceRecord) -> Result<&'a ThriftDetail, ProviderError> {
        match &service.detail {
            ServiceDetail::Thrift(detail) => Ok(detail),
            _ => Err(ProviderError::Schema(format!(
                "service {} is not a thrift service",
                service.id
            ))),
        }
    }
}

#[async_trait]
impl ServiceProvider for ThriftProvider {
    fn create(&self, service: &ServiceRecord) -> Result<ServiceListener, ProviderError> {
        let detail = Self::thrift_detail(service)?;
        let def = self
            .find(&service.id)
            .ok_or_else(|| {
                ProviderError::Schema(format!("no thrift definition for service {}", service.id))
            })?;

        let headers = Arc::new(RwLock::new(HashMap::new()));
        self.headers
            .write()
            .insert(service.id.clone(), Arc::clone(&headers));

        let client = Arc::new(ThriftClient::new(
            Arc::clone(&def),
            &detail.service,
            detail.protocol,
            detail.transport,
            detail.use_http,
        ));
        self.clients.write().insert(service.id.clone(), Arc::clone(&client));

        let handler = Arc::new(ThriftRequestHandler {
            id: service.id.clone(),
            proxy: detail.proxy.then(|| ProxyTarget {
                host: detail.remote_host.clone().unwrap_or_default(),
                port: detail.remote_port.unwrap_or(9090),
                path: detail.url.clone(),
                client: Arc::clone(&client),
                headers: Arc::clone(&headers),
            }),
            store: Arc::clone(&self.store),
            sink: self.sink.clone(),
        });

        let dispatcher = Arc::new(
            ThriftDispatcher::new(
                Arc::clone(&def),
                &detail.service,
                detail.protocol,
                handler,
            )
            .map_err(|err| ProviderError::Schema(err.to_string()))?,
        );

        let listener_handler = if detail.use_http {
            ListenerHandler::Http(Arc::new(ThriftHttpHandler::new(
                dispatcher,
                detail.transport,
                detail.url.clone(),
                headers,
            )))
        } else {
            ListenerHandler::Tcp(Arc::new(ThriftTcpHandler::new(
                dispatcher,
                detail.transport,
            )))
        };
        Ok(ServiceListener::new(service.port, listener_handler))
    }

    async fn add(&self, service: &ServiceRecord) -> Result<ServiceListener, ProviderError> {
        let detail = Self::thrift_detail(service)?;
        let (parsed, _, _) = self.process(&detail.path, &detail.includes).await?;
        if parsed.find_service(&detail.service).is_none() {
            return Err(ProviderError::Schema(format!(
                "service \"{}\" is not defined in {}",
                detail.service, detail.path
            )));
        }
        self.config
            .write_json(&format!("thrift/{}.json", service.id), &parsed)
            .await?;
        self.defs
            .write()
            .insert(service.id.clone(), Arc::new(parsed));
        self.create(service)
    }

    async fn remove(&self, id: &str) {
        if let Err(err) = self.store.delete(id).await {
            debug!("failed to drop responses for {id}: {err}");
        }
        self.defs.write().remove(id);
        self.clients.write().remove(id);
        self.headers.write().remove(id);
        if let Err(err) = self.config.delete(&format!("thrift/{id}.json")).await {
            debug!("failed to delete thrift graph for {id}: {err}");
        }
    }

    async fn client(&self, mut action: ClientAction) -> Result<ClientAction, ProviderError> {
        let client = self
            .clients
            .read()
            .get(&action.request.id)
            .cloned()
            .ok_or_else(|| ProviderError::ClientUnavailable(action.request.id.clone()))?;
        action.request.time = Some(chrono::Utc::now().timestamp_millis());
        let outcome = client
            .call(
                &action.request.host,
                action.request.port,
                action.request.path.as_deref(),
                action.request.headers.as_ref(),
                &action.request.func,
                &action.request.args,
            )
            .await?;
        action.response = Some(ClientResponse {
            error: outcome.error,
            success: outcome.success,
            headers: outcome.headers,
            time: chrono::Utc::now().timestamp_millis(),
        });
        Ok(action)
    }

    fn has_client(&self, id: &str) -> bool {
        self.clients.read().contains_key(id)
    }
}

struct ProxyTarget {
    host: String,
    port: u16,
    path: Option<String>,
    client: Arc<ThriftClient>,
    headers: Arc<RwLock<HashMap<String, String>>>,
}

/// Serves stored responses, synthesizes `MISSING_RESULT`, or forwards to a
/// remote in proxy mode; emits a request record either way.
struct ThriftRequestHandler {
    id: String,
    proxy: Option<ProxyTarget>,
    store: Arc<ResponseStore>,
    sink: RequestSink,
}

#[async_trait]
impl FunctionHandler for ThriftRequestHandler {
    async fn call(&self, func: &FunctionDef, args: Value) -> CallOutcome {
        if let Some(proxy) = &self.proxy {
            return self.forward(proxy, func, args).await;
        }
        let stored = self.store.find(&self.id).get(func.name.as_str()).cloned();
        let outcome = match stored {
            Some(saved) => {
                let data = saved.get("data").cloned().unwrap_or(Value::Null);
                match saved.get("exception").and_then(Value::as_str) {
                    Some(exception) => CallOutcome::DeclaredException {
                        name: exception.to_string(),
                        value: data,
                    },
                    None => CallOutcome::Success(data),
                }
            }
            None => self.missing_result(func),
        };
        self.emit(func, &args, &outcome);
        outcome
    }
}

impl ThriftRequestHandler {
    /// No stored response: `null` for void functions, a `MISSING_RESULT`
    /// application exception otherwise.
    fn missing_result(&self, func: &FunctionDef) -> CallOutcome {
        if func.return_type_id == TypeId::Void {
            CallOutcome::Success(Value::Null)
        } else {
            CallOutcome::ApplicationException(ApplicationException::missing_result(&func.name))
        }
    }

    async fn forward(&self, proxy: &ProxyTarget, func: &FunctionDef, args: Value) -> CallOutcome {
        let headers = proxy.headers.read().clone();
        let result = proxy
            .client
            .call(
                &proxy.host,
                proxy.port,
                proxy.path.as_deref(),
                Some(&headers),
                &func.name,
                &args,
            )
            .await;
        let outcome = match result {
            Ok(outcome) => match outcome.error {
                Some(error) => {
                    let name = error
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("UNKNOWN")
                        .to_string();
                    // Declared exceptions pass through; anything else is
                    // reported as an application-level failure.
                    match crate::server::declared_exception(func, &name) {
                        Some(_) => CallOutcome::DeclaredException { name, value: error },
                        None => CallOutcome::ApplicationException(ApplicationException {
                            message: error.to_string(),
                            kind: crate::codec::EXCEPTION_UNKNOWN,
                        }),
                    }
                }
                None => CallOutcome::Success(outcome.success.unwrap_or(Value::Null)),
            },
            Err(err) => CallOutcome::ApplicationException(ApplicationException {
                message: err.to_string(),
                kind: crate::codec::EXCEPTION_UNKNOWN,
            }),
        };
        self.emit(func, &args, &outcome);
        outcome
    }

    fn emit(&self, func: &FunctionDef, args: &Value, outcome: &CallOutcome) {
        let formatted_args: Vec<String> = func
            .arguments
            .iter()
            .map(|arg| format!("{}: {}", arg.name, format_thrift(&arg.ty)))
            .collect();
        let (response, response_value) = match outcome {
            CallOutcome::Success(data) => {
                (format_thrift(&func.return_field_type()), data.clone())
            }
            CallOutcome::DeclaredException { name, value } => (name.clone(), value.clone()),
            CallOutcome::ApplicationException(exception) => (
                exception.kind_name().to_string(),
                json!({ "message": exception.message }),
            ),
        };
        self.sink.emit(RequestRecord::new(
            ServiceKind::Thrift,
            &self.id,
            format!("{}({})", func.name, formatted_args.join(", ")),
            args.clone(),
            response,
            response_value,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FieldType;
    use std::collections::HashMap;

    fn func(name: &str, return_type_id: TypeId) -> FunctionDef {
        FunctionDef {
            name: name.into(),
            return_type_id,
            return_type: None,
            return_extra: None,
            oneway: false,
            doc: None,
            arguments: vec![crate::file::Field {
                key: 1,
                name: "key".into(),
                ty: FieldType::scalar(TypeId::String),
                required: crate::file::Requiredness::ReqOut,
                default: None,
            }],
            exceptions: vec![],
        }
    }

    async fn handler(stored: Option<Value>) -> (tempfile::TempDir, ThriftRequestHandler) {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::new(dir.path());
        let store = Arc::new(ResponseStore::new(HashMap::new(), config));
        if let Some(stored) = stored {
            store
                .add("s1", HashMap::from([("fetch".to_string(), stored)]))
                .await
                .unwrap();
        }
        (
            dir,
            ThriftRequestHandler {
                id: "s1".into(),
                proxy: None,
                store,
                sink: RequestSink::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_missing_result_for_non_void() {
        let (_dir, handler) = handler(None).await;
        let outcome = handler.call(&func("fetch", TypeId::String), json!({})).await;
        match outcome {
            CallOutcome::ApplicationException(exception) => {
                assert_eq!(exception.kind, crate::codec::EXCEPTION_MISSING_RESULT);
                assert!(exception.message.contains("fetch"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_void_without_response_is_null() {
        let (_dir, handler) = handler(None).await;
        let outcome = handler.call(&func("fetch", TypeId::Void), json!({})).await;
        assert!(matches!(outcome, CallOutcome::Success(Value::Null)));
    }

    #[tokio::test]
    async fn test_stored_data_served() {
        let (_dir, handler) = handler(Some(json!({"data": "hello"}))).await;
        let outcome = handler.call(&func("fetch", TypeId::String), json!({})).await;
        match outcome {
            CallOutcome::Success(value) => assert_eq!(value, json!("hello")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stored_exception_served() {
        let (_dir, handler) = handler(Some(json!({
            "data": {"reason": "gone"},
            "exception": "NotFound"
        })))
        .await;
        let outcome = handler.call(&func("fetch", TypeId::String), json!({})).await;
        match outcome {
            CallOutcome::DeclaredException { name, value } => {
                assert_eq!(name, "NotFound");
                assert_eq!(value, json!({"reason": "gone"}));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_record_format() {
        let (_dir, handler) = handler(Some(json!({"data": "hello"}))).await;
        let mut rx = handler.sink.subscribe();
        handler
            .call(&func("fetch", TypeId::String), json!({"key": "k1"}))
            .await;
        let record = rx.recv().await.unwrap();
        assert_eq!(record.kind, ServiceKind::Thrift);
        assert_eq!(record.request, "fetch(key: string)");
        assert_eq!(record.response, "string");
        assert_eq!(record.response_value, json!("hello"));
    }
}
