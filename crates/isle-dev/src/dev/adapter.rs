//! Translation between the host listener and the application contract.
//!
//! The host hands over a request that carries routing state in its
//! extensions (including a possibly rewritten URI). The adapter rebuilds a
//! clean [`AppRequest`] from the client-visible URI, method, version, headers
//! and the still-unread body stream, dispatches it to the current
//! application, and returns the application's response with its body stream
//! untouched. Nothing is buffered in either direction.
//!
//! Every failure becomes a 500 response: the load error, an `Err` from the
//! handler, or a panic inside it.

use crate::dev::app::{AppRequest, AppResponse};
use crate::dev::loader::SsrModuleLoader;
use crate::error::HandlerError;
use axum::body::Body;
use axum::extract::{OriginalUri, Request};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// Connection-scoped headers that must not be forwarded between hops.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Dispatches host requests to the current application.
#[derive(Clone)]
pub struct RequestAdapter {
    loader: SsrModuleLoader,
}

impl RequestAdapter {
    pub fn new(loader: SsrModuleLoader) -> Self {
        Self { loader }
    }

    /// Handle one request end to end. Never fails: errors become responses.
    pub async fn dispatch(&self, request: Request) -> Response {
        let request = adapt_request(request);
        let method = request.method().clone();
        let uri = request.uri().clone();

        let app = match self.loader.load().await {
            Ok(app) => app,
            Err(e) => {
                tracing::error!(
                    "{} {}: loading {} failed: {}",
                    method,
                    uri,
                    self.loader.entry(),
                    e
                );
                return error_response(&e.to_string());
            }
        };

        let outcome = AssertUnwindSafe(app.handle(request)).catch_unwind().await;
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
        };

        match result {
            Ok(response) => {
                tracing::debug!("{} {} -> {}", method, uri, response.status());
                adapt_response(response)
            }
            Err(e) => {
                tracing::error!("{} {}: {}", method, uri, e);
                error_response(&e.to_string())
            }
        }
    }
}

/// Build the application's request from the host request.
fn adapt_request(request: Request) -> AppRequest {
    let (mut parts, body) = request.into_parts();
    let uri = match parts.extensions.remove::<OriginalUri>() {
        Some(OriginalUri(original)) => original,
        None => parts.uri,
    };

    let mut adapted = AppRequest::new(body);
    *adapted.method_mut() = parts.method;
    *adapted.uri_mut() = uri;
    *adapted.version_mut() = parts.version;
    *adapted.headers_mut() = parts.headers;
    adapted
}

/// Hand the application's response back to the host.
fn adapt_response(response: AppResponse) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, body)
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn error_response(message: &str) -> Response {
    let mut response = Response::new(Body::from(format!("Internal Server Error\n\n{}\n", message)));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
