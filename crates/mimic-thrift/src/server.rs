//! Thrift RPC server: message dispatch plus the TCP and HTTP bindings.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use mimic_core::{server_header, HttpHandler, TcpHandler, ThriftProtocol, ThriftTransport};

use crate::codec::{read_struct, write_struct, write_value, wire_type, ApplicationException};
use crate::file::{Field, FunctionDef, Requiredness, ThriftJson};
use crate::protocol::{reader_for, writer_for, CodecError, MessageType};

/// Outcome of one handled call, produced by the provider's handler.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// Normal reply; `Value::Null` for void functions.
    Success(Value),
    /// One of the function's declared exceptions, keyed by its class name.
    DeclaredException { name: String, value: Value },
    /// Protocol-level failure encoded as a `TApplicationException` reply.
    ApplicationException(ApplicationException),
}

/// Per-function callback wired in by the provider.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    async fn call(&self, func: &FunctionDef, args: Value) -> CallOutcome;
}

/// Decodes calls against the type graph and encodes replies.
pub struct ThriftDispatcher {
    def: Arc<ThriftJson>,
    functions: HashMap<String, FunctionDef>,
    protocol: ThriftProtocol,
    handler: Arc<dyn FunctionHandler>,
}

impl ThriftDispatcher {
    /// Fails when the named service is not defined in the type graph.
    pub fn new(
        def: Arc<ThriftJson>,
        service: &str,
        protocol: ThriftProtocol,
        handler: Arc<dyn FunctionHandler>,
    ) -> Result<Self, CodecError> {
        if def.find_service(service).is_none() {
            return Err(CodecError::Unsupported(format!(
                "service \"{service}\" is not defined"
            )));
        }
        let functions = def
            .service_functions(service)
            .into_iter()
            .cloned()
            .map(|func| (func.name.clone(), func))
            .collect();
        Ok(Self {
            def,
            functions,
            protocol,
            handler,
        })
    }

    /// Process one message; returns the reply bytes (None for oneway) and
    /// the number of input bytes consumed.
    pub async fn process(&self, frame: &[u8]) -> Result<(Option<Vec<u8>>, usize), CodecError> {
        let mut reader = reader_for(self.protocol, frame)?;
        let header = reader.read_message_begin()?;
        let Some(func) = self.functions.get(&header.name).cloned() else {
            // Drain the argument struct to keep the framing intact.
            reader.skip(crate::protocol::TType::Struct)?;
            reader.read_message_end()?;
            let consumed = reader.position();
            let reply = self.exception_reply(
                &header.name,
                header.seq_id,
                &ApplicationException::unknown_method(&header.name),
            );
            return Ok((Some(reply), consumed));
        };
        let args = read_struct(reader.as_mut(), &self.def, &func.arguments)?;
        reader.read_message_end()?;
        let consumed = reader.position();

        let outcome = self.handler.call(&func, args).await;
        if func.oneway {
            return Ok((None, consumed));
        }
        let reply = self.encode_reply(&func, header.seq_id, outcome)?;
        Ok((Some(reply), consumed))
    }

    fn encode_reply(
        &self,
        func: &FunctionDef,
        seq_id: i32,
        outcome: CallOutcome,
    ) -> Result<Vec<u8>, CodecError> {
        match outcome {
            CallOutcome::Success(data) => {
                let mut writer = writer_for(self.protocol);
                writer.write_message_begin(&func.name, MessageType::Reply, seq_id);
                writer.write_struct_begin("result");
                if !data.is_null() && func.return_type_id != crate::file::TypeId::Void {
                    let ty = func.return_field_type();
                    writer.write_field_begin("success", wire_type(&ty), 0);
                    write_value(writer.as_mut(), &self.def, &ty, &data)?;
                    writer.write_field_end();
                }
                writer.write_field_stop();
                writer.write_struct_end();
                writer.write_message_end();
                Ok(writer.finish())
            }
            CallOutcome::DeclaredException { name, value } => {
                let Some(field) = declared_exception(func, &name) else {
                    // Stored exception no longer declared; degrade to an
                    // application-level failure.
                    return Ok(self.exception_reply(
                        &func.name,
                        seq_id,
                        &ApplicationException {
                            message: format!("undeclared exception \"{name}\""),
                            kind: crate::codec::EXCEPTION_UNKNOWN,
                        },
                    ));
                };
                let mut writer = writer_for(self.protocol);
                writer.write_message_begin(&func.name, MessageType::Reply, seq_id);
                writer.write_struct_begin("result");
                writer.write_field_begin(&field.name, wire_type(&field.ty), field.key);
                write_value(writer.as_mut(), &self.def, &field.ty, &value)?;
                writer.write_field_end();
                writer.write_field_stop();
                writer.write_struct_end();
                writer.write_message_end();
                Ok(writer.finish())
            }
            CallOutcome::ApplicationException(exception) => {
                Ok(self.exception_reply(&func.name, seq_id, &exception))
            }
        }
    }

    fn exception_reply(
        &self,
        name: &str,
        seq_id: i32,
        exception: &ApplicationException,
    ) -> Vec<u8> {
        let mut writer = writer_for(self.protocol);
        writer.write_message_begin(name, MessageType::Exception, seq_id);
        exception.write(writer.as_mut());
        writer.write_message_end();
        writer.finish()
    }
}

/// The function's declared exception field whose class matches `name`.
pub fn declared_exception<'a>(func: &'a FunctionDef, name: &str) -> Option<&'a Field> {
    func.exceptions
        .iter()
        .find(|field| field.ty.node.as_ref().and_then(|node| node.class()) == Some(name))
}

/// Encode a CALL message for the given function and JSON args.
pub fn encode_call(
    def: &ThriftJson,
    func: &FunctionDef,
    protocol: ThriftProtocol,
    seq_id: i32,
    args: &Value,
) -> Result<Vec<u8>, CodecError> {
    let mut writer = writer_for(protocol);
    writer.write_message_begin(&func.name, MessageType::Call, seq_id);
    write_struct(
        writer.as_mut(),
        def,
        &format!("{}_args", func.name),
        &func.arguments,
        args,
    )?;
    writer.write_message_end();
    Ok(writer.finish())
}

/// Decode a REPLY/EXCEPTION message into `(error, success)`.
pub fn decode_reply(
    def: &ThriftJson,
    func: &FunctionDef,
    protocol: ThriftProtocol,
    frame: &[u8],
) -> Result<(Option<Value>, Option<Value>), CodecError> {
    let mut reader = reader_for(protocol, frame)?;
    let header = reader.read_message_begin()?;
    if header.message_type == MessageType::Exception {
        let exception = ApplicationException::read(reader.as_mut())?;
        reader.read_message_end()?;
        return Ok((
            Some(serde_json::json!({
                "name": exception.kind_name(),
                "message": exception.message,
            })),
            None,
        ));
    }
    // The result struct: success at field 0, declared exceptions after it.
    let mut fields = vec![Field {
        key: 0,
        name: "success".to_string(),
        ty: func.return_field_type(),
        required: Requiredness::ReqOut,
        default: None,
    }];
    fields.extend(func.exceptions.iter().cloned());
    let result = read_struct(reader.as_mut(), def, &fields)?;
    reader.read_message_end()?;
    let object = result.as_object().cloned().unwrap_or_default();
    for field in &fields[1..] {
        if let Some(value) = object.get(&field.name) {
            if !value.is_null() {
                return Ok((Some(value.clone()), None));
            }
        }
    }
    Ok((None, object.get("success").cloned()))
}

/// Add or strip transport framing.
pub fn frame_message(transport: ThriftTransport, message: Vec<u8>) -> Vec<u8> {
    match transport {
        ThriftTransport::Buffered => message,
        ThriftTransport::Framed => {
            let mut framed = Vec::with_capacity(message.len() + 4);
            framed.extend_from_slice(&(message.len() as u32).to_be_bytes());
            framed.extend(message);
            framed
        }
    }
}

/// Raw TCP binding: reads messages per the configured transport and writes
/// back framed replies on the same connection.
pub struct ThriftTcpHandler {
    dispatcher: Arc<ThriftDispatcher>,
    transport: ThriftTransport,
}

impl ThriftTcpHandler {
    pub fn new(dispatcher: Arc<ThriftDispatcher>, transport: ThriftTransport) -> Self {
        Self {
            dispatcher,
            transport,
        }
    }
}

#[async_trait]
impl TcpHandler for ThriftTcpHandler {
    async fn serve(&self, mut stream: TcpStream, peer: SocketAddr) {
        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            // Try to process everything already buffered.
            loop {
                let message = match self.transport {
                    ThriftTransport::Framed => {
                        if buf.len() < 4 {
                            break;
                        }
                        let len =
                            u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                        if buf.len() < 4 + len {
                            break;
                        }
                        let frame = buf[4..4 + len].to_vec();
                        buf.drain(..4 + len);
                        frame
                    }
                    ThriftTransport::Buffered => {
                        if buf.is_empty() {
                            break;
                        }
                        buf.clone()
                    }
                };
                match self.dispatcher.process(&message).await {
                    Ok((reply, consumed)) => {
                        if self.transport == ThriftTransport::Buffered {
                            buf.drain(..consumed.min(buf.len()));
                        }
                        if let Some(reply) = reply {
                            let framed = frame_message(self.transport, reply);
                            // Write-after-close is tolerated, never fatal.
                            if let Err(err) = stream.write_all(&framed).await {
                                debug!("write to {peer} failed: {err}");
                                return;
                            }
                        }
                    }
                    Err(CodecError::Incomplete) => break,
                    Err(err) => {
                        warn!("dropping connection from {peer}: {err}");
                        return;
                    }
                }
            }
            match stream.read(&mut chunk).await {
                Ok(0) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(err) => {
                    debug!("read from {peer} failed: {err}");
                    return;
                }
            }
        }
    }
}

/// HTTP binding: each POST body carries one transport-framed message.
pub struct ThriftHttpHandler {
    dispatcher: Arc<ThriftDispatcher>,
    transport: ThriftTransport,
    /// URL path this service is mounted at.
    url: String,
    /// Last-seen request headers, forwarded by proxy-mode clients.
    headers: Arc<RwLock<HashMap<String, String>>>,
}

impl ThriftHttpHandler {
    pub fn new(
        dispatcher: Arc<ThriftDispatcher>,
        transport: ThriftTransport,
        url: Option<String>,
        headers: Arc<RwLock<HashMap<String, String>>>,
    ) -> Self {
        Self {
            dispatcher,
            transport,
            url: url.unwrap_or_else(|| "/".to_string()),
            headers,
        }
    }
}

#[async_trait]
impl HttpHandler for ThriftHttpHandler {
    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        if req.method() != Method::POST || req.uri().path() != self.url {
            return plain_response(StatusCode::NOT_FOUND, Bytes::new());
        }
        {
            let mut headers = self.headers.write();
            headers.clear();
            for (name, value) in req.headers() {
                headers.insert(
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                );
            }
        }
        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => return plain_response(StatusCode::BAD_REQUEST, Bytes::new()),
        };
        let message = match self.transport {
            ThriftTransport::Framed if body.len() >= 4 => body.slice(4..),
            ThriftTransport::Framed => return plain_response(StatusCode::BAD_REQUEST, Bytes::new()),
            ThriftTransport::Buffered => body,
        };
        match self.dispatcher.process(&message).await {
            Ok((Some(reply), _)) => {
                let framed = frame_message(self.transport, reply);
                plain_response(StatusCode::OK, Bytes::from(framed))
            }
            Ok((None, _)) => plain_response(StatusCode::OK, Bytes::new()),
            Err(err) => {
                debug!("bad thrift request: {err}");
                plain_response(StatusCode::BAD_REQUEST, Bytes::new())
            }
        }
    }
}

fn plain_response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Server", server_header())
        .header("Content-Type", "application/x-thrift")
        .body(Full::new(body))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ThriftParser;
    use serde_json::json;

    async fn fixture() -> Arc<ThriftJson> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calc.thrift");
        std::fs::write(
            &path,
            r#"
            exception Overflow { 1: string reason }
            service Base { void ping() }
            service Calc extends Base {
              i32 add(1: i32 a, 2: i32 b) throws (1: Overflow err)
              oneway void fire(1: string event)
              string whoami()
            }
        "#,
        )
        .unwrap();
        Arc::new(
            ThriftParser::new(vec![])
                .parse(path.to_str().unwrap())
                .await
                .unwrap(),
        )
    }

    struct Scripted(Value);

    #[async_trait]
    impl FunctionHandler for Scripted {
        async fn call(&self, func: &FunctionDef, args: Value) -> CallOutcome {
            match func.name.as_str() {
                "add" => {
                    let a = args["a"].as_i64().unwrap_or_default();
                    let b = args["b"].as_i64().unwrap_or_default();
                    CallOutcome::Success(json!(a + b))
                }
                "whoami" => CallOutcome::Success(self.0.clone()),
                "overflowing" => CallOutcome::DeclaredException {
                    name: "Overflow".into(),
                    value: json!({"reason": "too big"}),
                },
                "ping" => CallOutcome::Success(Value::Null),
                _ => CallOutcome::ApplicationException(ApplicationException::missing_result(
                    &func.name,
                )),
            }
        }
    }

    async fn dispatcher(protocol: ThriftProtocol) -> ThriftDispatcher {
        let def = fixture().await;
        ThriftDispatcher::new(def, "Calc", protocol, Arc::new(Scripted(json!("calc-1")))).unwrap()
    }

    #[tokio::test]
    async fn test_call_reply_roundtrip_all_protocols() {
        for protocol in [
            ThriftProtocol::Binary,
            ThriftProtocol::Compact,
            ThriftProtocol::Json,
        ] {
            let dispatcher = dispatcher(protocol).await;
            let def = fixture().await;
            let func = def.find_service("Calc").unwrap().functions[0].clone();
            assert_eq!(func.name, "add");
            let call = encode_call(&def, &func, protocol, 1, &json!({"a": 20, "b": 22})).unwrap();
            let (reply, consumed) = dispatcher.process(&call).await.unwrap();
            assert_eq!(consumed, call.len());
            let (error, success) = decode_reply(&def, &func, protocol, &reply.unwrap()).unwrap();
            assert_eq!(error, None);
            assert_eq!(success, Some(json!(42)));
        }
    }

    #[tokio::test]
    async fn test_inherited_function_dispatches() {
        let dispatcher = dispatcher(ThriftProtocol::Binary).await;
        let def = fixture().await;
        let ping = def.find_service("Base").unwrap().functions[0].clone();
        let call = encode_call(&def, &ping, ThriftProtocol::Binary, 2, &json!({})).unwrap();
        let (reply, _) = dispatcher.process(&call).await.unwrap();
        let (error, success) =
            decode_reply(&def, &ping, ThriftProtocol::Binary, &reply.unwrap()).unwrap();
        assert_eq!(error, None);
        assert_eq!(success, None);
    }

    #[tokio::test]
    async fn test_oneway_produces_no_reply() {
        let dispatcher = dispatcher(ThriftProtocol::Binary).await;
        let def = fixture().await;
        let fire = def
            .service_functions("Calc")
            .into_iter()
            .find(|f| f.name == "fire")
            .unwrap()
            .clone();
        let call = encode_call(&def, &fire, ThriftProtocol::Binary, 3, &json!({"event": "x"}))
            .unwrap();
        let (reply, _) = dispatcher.process(&call).await.unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method_reply() {
        let dispatcher = dispatcher(ThriftProtocol::Binary).await;
        let def = fixture().await;
        // Craft a call for a function the service does not define.
        let bogus = FunctionDef {
            name: "bogus".into(),
            return_type_id: crate::file::TypeId::Void,
            return_type: None,
            return_extra: None,
            oneway: false,
            doc: None,
            arguments: vec![],
            exceptions: vec![],
        };
        let call = encode_call(&def, &bogus, ThriftProtocol::Binary, 4, &json!({})).unwrap();
        let (reply, _) = dispatcher.process(&call).await.unwrap();
        let (error, success) =
            decode_reply(&def, &bogus, ThriftProtocol::Binary, &reply.unwrap()).unwrap();
        assert_eq!(error.unwrap()["name"], "UNKNOWN_METHOD");
        assert_eq!(success, None);
    }

    #[tokio::test]
    async fn test_declared_exception_reply() {
        let def = fixture().await;
        struct Thrower;
        #[async_trait]
        impl FunctionHandler for Thrower {
            async fn call(&self, _func: &FunctionDef, _args: Value) -> CallOutcome {
                CallOutcome::DeclaredException {
                    name: "Overflow".into(),
                    value: json!({"reason": "too big"}),
                }
            }
        }
        let dispatcher =
            ThriftDispatcher::new(def.clone(), "Calc", ThriftProtocol::Binary, Arc::new(Thrower))
                .unwrap();
        let add = def
            .service_functions("Calc")
            .into_iter()
            .find(|f| f.name == "add")
            .unwrap()
            .clone();
        let call = encode_call(&def, &add, ThriftProtocol::Binary, 5, &json!({"a": 1, "b": 2}))
            .unwrap();
        let (reply, _) = dispatcher.process(&call).await.unwrap();
        let (error, success) =
            decode_reply(&def, &add, ThriftProtocol::Binary, &reply.unwrap()).unwrap();
        assert_eq!(error, Some(json!({"reason": "too big"})));
        assert_eq!(success, None);
    }

    #[tokio::test]
    async fn test_unknown_service_rejected() {
        let def = fixture().await;
        let result = ThriftDispatcher::new(
            def,
            "Nope",
            ThriftProtocol::Binary,
            Arc::new(Scripted(Value::Null)),
        );
        assert!(result.is_err());
    }
}
