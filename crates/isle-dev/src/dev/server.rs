//! Development HTTP server.
//!
//! Every request first passes the static asset gate; everything else is
//! dispatched to the application through the request adapter. Build events
//! are pushed to browsers over Server-Sent Events.

use crate::dev::adapter::RequestAdapter;
use crate::dev::state::SharedState;
use crate::dev::static_gate::StaticAssetGate;
use crate::error::{DevError, Result};
use axum::{
    extract::{Request, State},
    response::{
        sse::{Event, KeepAlive},
        Response, Sse,
    },
    routing::get,
    Router,
};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};

/// Path of the build event stream.
pub const EVENTS_PATH: &str = "/__isle/events";

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Everything a request handler needs.
struct ServerContext {
    gate: StaticAssetGate,
    adapter: RequestAdapter,
    state: SharedState,
}

/// Development server.
pub struct DevServer {
    context: Arc<ServerContext>,
}

impl DevServer {
    pub fn new(gate: StaticAssetGate, adapter: RequestAdapter, state: SharedState) -> Self {
        Self {
            context: Arc::new(ServerContext {
                gate,
                adapter,
                state,
            }),
        }
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        Router::new()
            .route(EVENTS_PATH, get(handle_events))
            .fallback(handle_request)
            .with_state(Arc::clone(&self.context))
    }

    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`DevError::Bind`] if the address cannot be bound. This is the
    /// one startup failure that aborts the dev server.
    pub async fn bind(self, addr: SocketAddr) -> Result<BoundServer> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| DevError::Bind { addr, source })?;
        Ok(BoundServer {
            listener,
            router: self.router(),
            state: Arc::clone(&self.context.state),
        })
    }
}

/// A server with its socket bound, ready to accept connections.
pub struct BoundServer {
    listener: TcpListener,
    router: Router,
    state: SharedState,
}

impl BoundServer {
    /// Address actually bound, useful with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the process exits.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `signal` resolves, then let in-flight requests finish.
    ///
    /// Event-stream clients are disconnected when the signal fires so their
    /// open responses do not hold the shutdown back.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = self.state;
        let shutdown = async move {
            signal.await;
            state.disconnect_all();
        };

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| DevError::Server(e.to_string()))
    }
}

/// Static assets, then the application.
async fn handle_request(State(context): State<Arc<ServerContext>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    if let Some(response) = context.gate.try_serve(&parts).await {
        return response;
    }
    context.adapter.dispatch(Request::from_parts(parts, body)).await
}

/// Relay build events to a browser.
async fn handle_events(
    State(context): State<Arc<ServerContext>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let (id, rx) = context.state.register_client();
    tracing::debug!("Event client {} connected", id);

    let stream = ReceiverStream::new(rx).map(|data| Ok(Event::default().data(data)));

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::app::{handler_fn, AppResponse, Application};
    use crate::dev::loader::SsrModuleLoader;
    use crate::dev::service::{DevService, ModuleCompiler};
    use crate::dev::state::DevServerState;
    use crate::dev::DevEvent;
    use crate::error::LoadError;
    use async_trait::async_trait;
    use axum::body::Body;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    struct HelloCompiler;

    #[async_trait]
    impl ModuleCompiler for HelloCompiler {
        async fn compile(&self, _id: &str) -> std::result::Result<Arc<dyn Application>, LoadError> {
            Ok(Arc::new(handler_fn(|_| async {
                Ok(AppResponse::new(Body::from("hello from the app")))
            })))
        }
    }

    fn server(temp: &TempDir, state: SharedState) -> DevServer {
        let service = Arc::new(DevService::new(Arc::new(HelloCompiler)));
        let loader = SsrModuleLoader::new(service, "app/app.ts");
        DevServer::new(
            StaticAssetGate::new("/static", temp.path().to_path_buf(), "no-cache"),
            RequestAdapter::new(loader),
            state,
        )
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let temp = TempDir::new().unwrap();
        let taken = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = taken.local_addr().unwrap();

        let result = server(&temp, Arc::new(DevServerState::new())).bind(addr).await;
        assert!(matches!(result, Err(DevError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_events_are_streamed_and_shutdown_completes() {
        let temp = TempDir::new().unwrap();
        let state = Arc::new(DevServerState::new());
        let bound = server(&temp, state.clone())
            .bind((Ipv4Addr::LOCALHOST, 0).into())
            .await
            .unwrap();
        let addr = bound.local_addr().unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let serving = tokio::spawn(bound.serve_with_shutdown(async move {
            let _ = stop_rx.await;
        }));

        let mut events = reqwest::get(format!("http://{}{}", addr, EVENTS_PATH))
            .await
            .unwrap();
        assert_eq!(events.headers()["content-type"], "text/event-stream");

        while state.client_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        state.broadcast(&DevEvent::BuildStarted).await;

        let chunk = events.chunk().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&chunk).contains(r#"data: {"type":"BuildStarted"}"#));

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
