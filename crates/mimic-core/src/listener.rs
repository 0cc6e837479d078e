//! Network listener lifecycle shared by all protocol providers.
//!
//! A [`ServiceListener`] is created unbound by a provider and bound/unbound by
//! the registry as the service is enabled or disabled. Each bound listener
//! runs one accept loop; connections are served on their own tasks so a slow
//! handler never blocks the loop.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Per-request HTTP handler backing an HTTP-flavored listener.
#[async_trait]
pub trait HttpHandler: Send + Sync {
    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>>;
}

/// Per-connection handler backing a raw TCP listener.
#[async_trait]
pub trait TcpHandler: Send + Sync {
    async fn serve(&self, stream: TcpStream, peer: SocketAddr);
}

/// What a listener does with each accepted connection.
#[derive(Clone)]
pub enum ListenerHandler {
    Http(Arc<dyn HttpHandler>),
    Tcp(Arc<dyn TcpHandler>),
}

struct Active {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// A bindable network listener owned by one service.
pub struct ServiceListener {
    port: u16,
    handler: ListenerHandler,
    active: Mutex<Option<Active>>,
    listening: Arc<AtomicBool>,
    error_tx: broadcast::Sender<String>,
}

impl ServiceListener {
    pub fn new(port: u16, handler: ListenerHandler) -> Self {
        let (error_tx, _) = broadcast::channel(16);
        Self {
            port,
            handler,
            active: Mutex::new(None),
            listening: Arc::new(AtomicBool::new(false)),
            error_tx,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Ground truth for the `enabled` flag reported to API consumers.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Runtime errors (accept failures) for this listener.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.error_tx.subscribe()
    }

    /// Bind the socket and start accepting. Resolves only once the socket is
    /// actually listening, so callers can persist state without a readback
    /// race. Binding an already-listening listener is a no-op.
    pub async fn bind(&self) -> io::Result<()> {
        if self.is_listening() {
            return Ok(());
        }
        let listener = TcpListener::bind(("0.0.0.0", self.port)).await?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(accept_loop(
            listener,
            self.handler.clone(),
            Arc::clone(&self.listening),
            self.error_tx.clone(),
            shutdown_rx,
        ));
        self.listening.store(true, Ordering::SeqCst);
        *self.active.lock() = Some(Active { shutdown_tx, task });
        info!("listening on port {}", self.port);
        Ok(())
    }

    /// Stop accepting and wait for the accept loop to drain. Closing an
    /// unbound listener is a no-op.
    pub async fn close(&self) {
        let active = self.active.lock().take();
        if let Some(Active { shutdown_tx, task }) = active {
            let _ = shutdown_tx.send(());
            if task.await.is_err() {
                error!("accept loop for port {} panicked", self.port);
            }
            info!("closed port {}", self.port);
        }
        self.listening.store(false, Ordering::SeqCst);
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: ListenerHandler,
    listening: Arc<AtomicBool>,
    error_tx: broadcast::Sender<String>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let port = listener.local_addr().map(|a| a.port()).unwrap_or_default();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => spawn_connection(&handler, stream, addr, port),
                    Err(err) => {
                        error!("accept error on port {port}: {err}");
                        let _ = error_tx.send(err.to_string());
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("listener on port {port} shutting down");
                break;
            }
        }
    }
    listening.store(false, Ordering::SeqCst);
}

fn spawn_connection(handler: &ListenerHandler, stream: TcpStream, addr: SocketAddr, port: u16) {
    match handler {
        ListenerHandler::Http(handler) => {
            let handler = Arc::clone(handler);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let handler = Arc::clone(&handler);
                    async move { Ok::<_, Infallible>(handler.handle(req).await) }
                });
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    // Disconnects mid-response are expected; never fatal.
                    debug!("connection error on port {port}: {err}");
                }
            });
        }
        ListenerHandler::Tcp(handler) => {
            let handler = Arc::clone(handler);
            tokio::spawn(async move {
                handler.serve(stream, addr).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct Echo;

    #[async_trait]
    impl HttpHandler for Echo {
        async fn handle(&self, _req: Request<Incoming>) -> Response<Full<Bytes>> {
            Response::new(Full::new(Bytes::from_static(b"ok")))
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_bind_close_cycle() {
        let listener = ServiceListener::new(49391, ListenerHandler::Http(Arc::new(Echo)));
        assert!(!listener.is_listening());
        listener.bind().await.unwrap();
        assert!(listener.is_listening());
        // Second bind is idempotent.
        listener.bind().await.unwrap();
        listener.close().await;
        assert!(!listener.is_listening());
        // Port is free again.
        listener.bind().await.unwrap();
        listener.close().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_bind_conflict_reports_error() {
        let first = ServiceListener::new(49392, ListenerHandler::Http(Arc::new(Echo)));
        first.bind().await.unwrap();
        let second = ServiceListener::new(49392, ListenerHandler::Http(Arc::new(Echo)));
        assert!(second.bind().await.is_err());
        assert!(!second.is_listening());
        first.close().await;
    }
}
