//! Server entry compiled and run as a child process.
//!
//! The entry is compiled with the configured build command, then started
//! with the run command on a free loopback port passed as `$PORT`. The
//! returned [`SidecarApplication`] forwards each request to that process over
//! HTTP, streaming bodies in both directions. The process lives as long as
//! the last handle to its application, so requests already in flight finish
//! against the version they started on.

use crate::config::DevConfig;
use crate::dev::adapter::strip_hop_by_hop;
use crate::dev::app::{AppRequest, AppResponse, Application};
use crate::dev::command::{self, Cmd};
use crate::dev::service::ModuleCompiler;
use crate::error::{HandlerError, LoadError};
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use futures::StreamExt;
use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Buffered request-body chunks between the host and the upstream client.
const BODY_CHANNEL_CAPACITY: usize = 16;

/// Compiles the server entry and starts it as a child process.
pub struct SidecarCompiler {
    build: Vec<String>,
    run: Vec<String>,
    out_file: PathBuf,
    cwd: PathBuf,
    startup_timeout: Duration,
    client: reqwest::Client,
}

impl SidecarCompiler {
    pub fn new(
        build: Vec<String>,
        run: Vec<String>,
        out_file: PathBuf,
        cwd: PathBuf,
        startup_timeout: Duration,
    ) -> Result<Self, LoadError> {
        // Redirects belong to the browser, so they are passed through as-is
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(LoadError::HttpClient)?;
        Ok(Self {
            build,
            run,
            out_file,
            cwd,
            startup_timeout,
            client,
        })
    }

    pub fn from_config(config: &DevConfig) -> Result<Self, LoadError> {
        Self::new(
            config.ssr.build.clone(),
            config.ssr.run.clone(),
            config.resolve(&config.ssr.out_file),
            config.root.clone(),
            Duration::from_millis(config.ssr.startup_timeout_ms),
        )
    }

    async fn build(&self, id: &str, vars: &[(&str, String)]) -> Result<(), LoadError> {
        let Some(cmd) = Cmd::from_template(&self.build, vars, &self.cwd) else {
            return Ok(());
        };
        if let Some(parent) = self.out_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let output = cmd.output().await.map_err(|source| LoadError::Spawn {
            program: cmd.program().to_string(),
            source,
        })?;
        if !output.status.success() {
            return Err(LoadError::Compile {
                id: id.to_string(),
                message: command::diagnostics(&output),
            });
        }
        Ok(())
    }

    async fn wait_until_ready(
        &self,
        id: &str,
        child: &mut Child,
        addr: SocketAddr,
    ) -> Result<(), LoadError> {
        let start = Instant::now();
        loop {
            if TcpStream::connect(addr).await.is_ok() {
                return Ok(());
            }
            if let Some(status) = child.try_wait()? {
                return Err(LoadError::Exited {
                    id: id.to_string(),
                    status,
                });
            }
            if start.elapsed() >= self.startup_timeout {
                return Err(LoadError::StartupTimeout {
                    id: id.to_string(),
                    timeout_ms: self.startup_timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ModuleCompiler for SidecarCompiler {
    async fn compile(&self, id: &str) -> Result<Arc<dyn Application>, LoadError> {
        let vars = [
            ("entry", id.to_string()),
            ("out_file", self.out_file.to_string_lossy().to_string()),
        ];
        self.build(id, &vars).await?;

        let port = free_port().await?;
        let cmd = Cmd::from_template(&self.run, &vars, &self.cwd)
            .ok_or_else(|| LoadError::EmptyCommand(id.to_string()))?
            .env("PORT", port.to_string());
        let mut child = cmd.spawn().map_err(|source| LoadError::Spawn {
            program: cmd.program().to_string(),
            source,
        })?;

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        // On error the child is dropped and killed
        self.wait_until_ready(id, &mut child, addr).await?;
        tracing::debug!("Server entry {} listening on {}", id, addr);

        Ok(Arc::new(SidecarApplication::new(
            format!("http://{}", addr),
            self.client.clone(),
            child,
        )))
    }
}

/// Ask the OS for a currently unused loopback port.
async fn free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    Ok(listener.local_addr()?.port())
}

/// Application running in a child process, reached over loopback HTTP.
pub struct SidecarApplication {
    base_url: String,
    client: reqwest::Client,
    child: Mutex<Child>,
}

impl SidecarApplication {
    fn new(base_url: String, client: reqwest::Client, child: Child) -> Self {
        Self {
            base_url,
            client,
            child: Mutex::new(child),
        }
    }
}

#[async_trait]
impl Application for SidecarApplication {
    async fn handle(&self, request: AppRequest) -> Result<AppResponse, HandlerError> {
        let (parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.base_url, path);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body_chunks(body)))
            .send()
            .await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = AppResponse::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    fn is_alive(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(None))
    }
}

/// Pump a request body into a channel of byte chunks.
fn body_chunks(body: Body) -> ReceiverStream<Result<Bytes, std::io::Error>> {
    let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(std::io::Error::other);
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });
    ReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler(build: &[&str], run: &[&str], timeout_ms: u64) -> SidecarCompiler {
        let temp = std::env::temp_dir();
        SidecarCompiler::new(
            build.iter().map(|s| s.to_string()).collect(),
            run.iter().map(|s| s.to_string()).collect(),
            temp.join("isle-sidecar-test/server.mjs"),
            temp,
            Duration::from_millis(timeout_ms),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_free_port_is_nonzero() {
        assert_ne!(free_port().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_body_chunks_preserves_bytes() {
        let stream = body_chunks(Body::from("abc"));
        let chunks: Vec<_> = stream.collect().await;
        let bytes: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(bytes, b"abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_compile_failure_is_load_error() {
        let compiler = compiler(&["sh", "-c", "echo 'Expected \";\"' >&2; exit 1"], &["true"], 500);
        let err = compiler.compile("app/app.ts").await.err().unwrap();
        match err {
            LoadError::Compile { id, message } => {
                assert_eq!(id, "app/app.ts");
                assert!(message.contains("Expected"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_exiting_early_is_reported() {
        let compiler = compiler(&[], &["sh", "-c", "exit 7"], 5_000);
        let err = compiler.compile("app/app.ts").await.err().unwrap();
        assert!(matches!(err, LoadError::Exited { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_never_listening_times_out() {
        let compiler = compiler(&[], &["sleep", "5"], 200);
        let err = compiler.compile("app/app.ts").await.err().unwrap();
        assert!(matches!(err, LoadError::StartupTimeout { timeout_ms: 200, .. }));
    }

    #[tokio::test]
    async fn test_missing_runtime_is_spawn_error() {
        let compiler = compiler(&[], &["isle-no-such-runtime-binary"], 200);
        let err = compiler.compile("app/app.ts").await.err().unwrap();
        assert!(matches!(err, LoadError::Spawn { .. }));
    }

    /// Serve `router` on a loopback port and return its base URL.
    async fn upstream(router: axum::Router) -> String {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[cfg(unix)]
    fn sleeper() -> Child {
        tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[cfg(unix)]
    async fn forwarding_to(router: axum::Router) -> SidecarApplication {
        let base_url = upstream(router).await;
        let client = compiler(&[], &["true"], 100).client;
        SidecarApplication::new(base_url, client, sleeper())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_forwards_method_headers_and_body() {
        use axum::http::{HeaderMap, Method, StatusCode};

        let router = axum::Router::new().fallback(
            |method: Method, headers: HeaderMap, body: Bytes| async move {
                let echoed = format!(
                    "{} {} x-private={}",
                    method,
                    String::from_utf8_lossy(&body),
                    headers.contains_key("x-private"),
                );
                (
                    StatusCode::CREATED,
                    [
                        ("x-island", "counter"),
                        ("connection", "x-upstream-hop"),
                        ("x-upstream-hop", "1"),
                    ],
                    echoed,
                )
            },
        );
        let app = forwarding_to(router).await;

        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/count?step=2")
            .header("connection", "x-private")
            .header("x-private", "secret")
            .body(Body::from("count=1"))
            .unwrap();
        let response = app.handle(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-island"], "counter");
        assert!(!response.headers().contains_key("x-upstream-hop"));
        assert!(!response.headers().contains_key("connection"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"POST count=1 x-private=false");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_redirect_is_passed_through() {
        use axum::http::StatusCode;

        let router = axum::Router::new()
            .route(
                "/login",
                axum::routing::post(|| async {
                    (StatusCode::SEE_OTHER, [("location", "/dashboard")])
                }),
            )
            .route("/dashboard", axum::routing::get(|| async { "dashboard" }));
        let app = forwarding_to(router).await;

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/login")
            .body(Body::empty())
            .unwrap();
        let response = app.handle(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], "/dashboard");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exited_process_is_not_alive() {
        let app = forwarding_to(axum::Router::new()).await;
        assert!(app.is_alive());

        app.child.lock().start_kill().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while app.is_alive() {
            assert!(Instant::now() < deadline, "process still reported alive");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
