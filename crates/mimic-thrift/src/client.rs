//! Thrift client used for proxy mode and the registry's client dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use mimic_core::{server_header, ProviderError, ThriftProtocol, ThriftTransport};

use crate::file::{FunctionDef, ThriftJson};
use crate::protocol::CodecError;
use crate::server::{decode_reply, encode_call, frame_message};

/// Result of one client call: at most one of error/success is set.
#[derive(Debug, Clone)]
pub struct ClientOutcome {
    pub error: Option<Value>,
    pub success: Option<Value>,
    pub headers: Option<HashMap<String, String>>,
}

/// Client for one service definition, matched to the service's transport and
/// protocol configuration.
pub struct ThriftClient {
    def: Arc<ThriftJson>,
    functions: HashMap<String, FunctionDef>,
    protocol: ThriftProtocol,
    transport: ThriftTransport,
    use_http: bool,
    seq_id: AtomicI32,
}

impl ThriftClient {
    pub fn new(
        def: Arc<ThriftJson>,
        service: &str,
        protocol: ThriftProtocol,
        transport: ThriftTransport,
        use_http: bool,
    ) -> Self {
        let functions = def
            .service_functions(service)
            .into_iter()
            .cloned()
            .map(|func| (func.name.clone(), func))
            .collect();
        Self {
            def,
            functions,
            protocol,
            transport,
            use_http,
            seq_id: AtomicI32::new(0),
        }
    }

    /// Send one call and decode the reply into `(error, success)`.
    pub async fn call(
        &self,
        host: &str,
        port: u16,
        path: Option<&str>,
        headers: Option<&HashMap<String, String>>,
        func_name: &str,
        args: &Value,
    ) -> Result<ClientOutcome, ProviderError> {
        let func = self
            .functions
            .get(func_name)
            .ok_or_else(|| ProviderError::Client(format!("unknown function \"{func_name}\"")))?
            .clone();
        let seq_id = self.seq_id.fetch_add(1, Ordering::SeqCst) + 1;
        let message = encode_call(&self.def, &func, self.protocol, seq_id, args)
            .map_err(|err| ProviderError::Client(err.to_string()))?;
        let payload = frame_message(self.transport, message);

        if self.use_http {
            self.call_http(host, port, path, headers, &func, payload)
                .await
        } else {
            self.call_tcp(host, port, &func, payload).await
        }
    }

    async fn call_http(
        &self,
        host: &str,
        port: u16,
        path: Option<&str>,
        headers: Option<&HashMap<String, String>>,
        func: &FunctionDef,
        payload: Vec<u8>,
    ) -> Result<ClientOutcome, ProviderError> {
        let url = format!("http://{host}:{port}{}", path.unwrap_or("/"));
        let client = reqwest::Client::new();
        let mut request = client
            .post(&url)
            .header("User-Agent", server_header())
            .header("Content-Type", "application/x-thrift")
            .body(payload);
        if let Some(headers) = headers {
            for (name, value) in headers {
                // Hop-by-hop fields are owned by the transport.
                if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length")
                {
                    continue;
                }
                request = request.header(name, value);
            }
        }
        let response = request
            .send()
            .await
            .map_err(|err| ProviderError::Client(err.to_string()))?;
        let response_headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|err| ProviderError::Client(err.to_string()))?;
        let message = match self.transport {
            ThriftTransport::Framed if body.len() >= 4 => body.slice(4..),
            ThriftTransport::Framed => {
                return Err(ProviderError::Client("short framed reply".to_string()))
            }
            ThriftTransport::Buffered => body,
        };
        let (error, success) = decode_reply(&self.def, func, self.protocol, &message)
            .map_err(|err| ProviderError::Client(err.to_string()))?;
        Ok(ClientOutcome {
            error,
            success,
            headers: Some(response_headers),
        })
    }

    async fn call_tcp(
        &self,
        host: &str,
        port: u16,
        func: &FunctionDef,
        payload: Vec<u8>,
    ) -> Result<ClientOutcome, ProviderError> {
        let mut stream = TcpStream::connect((host, port))
            .await
            .map_err(|err| ProviderError::Client(err.to_string()))?;
        stream
            .write_all(&payload)
            .await
            .map_err(|err| ProviderError::Client(err.to_string()))?;

        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let message: Option<Vec<u8>> = match self.transport {
                ThriftTransport::Framed => {
                    if buf.len() >= 4 {
                        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                        (buf.len() >= 4 + len).then(|| buf[4..4 + len].to_vec())
                    } else {
                        None
                    }
                }
                ThriftTransport::Buffered => {
                    if buf.is_empty() {
                        None
                    } else {
                        match decode_reply(&self.def, func, self.protocol, &buf) {
                            Ok(result) => {
                                return Ok(ClientOutcome {
                                    error: result.0,
                                    success: result.1,
                                    headers: None,
                                })
                            }
                            Err(CodecError::Incomplete) => None,
                            Err(err) => return Err(ProviderError::Client(err.to_string())),
                        }
                    }
                }
            };
            if let Some(message) = message {
                let (error, success) = decode_reply(&self.def, func, self.protocol, &message)
                    .map_err(|err| ProviderError::Client(err.to_string()))?;
                return Ok(ClientOutcome {
                    error,
                    success,
                    headers: None,
                });
            }
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|err| ProviderError::Client(err.to_string()))?;
            if n == 0 {
                return Err(ProviderError::Client(
                    "connection closed before reply".to_string(),
                ));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }
}
