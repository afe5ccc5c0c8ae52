//! Static asset gate.
//!
//! Requests under the reserved prefix are answered from the client output
//! directory and never reach the application. A miss under the prefix is a
//! 404, not a fall-through.
//!
//! Lookups take the read side of the builder's [`PublishLock`], so a request
//! racing a rebuild sees either the previous or the new output, never a
//! missing directory.

use crate::config::DevConfig;
use crate::dev::builder::PublishLock;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, request::Parts, HeaderValue, StatusCode, Uri};
use axum::response::Response;
use std::path::PathBuf;
use tower_http::services::ServeDir;

/// Serves the reserved static prefix from the build output directory.
#[derive(Debug, Clone)]
pub struct StaticAssetGate {
    prefix: String,
    out_dir: PathBuf,
    cache_control: Option<HeaderValue>,
    publish_lock: PublishLock,
}

impl StaticAssetGate {
    /// Create a gate for `prefix` (e.g. `/static`) backed by `out_dir`.
    pub fn new(prefix: &str, out_dir: PathBuf, cache_control: &str) -> Self {
        let cache_control = match HeaderValue::from_str(cache_control) {
            Ok(value) if !cache_control.is_empty() => Some(value),
            Ok(_) => None,
            Err(_) => {
                tracing::warn!("Ignoring invalid Cache-Control value: {:?}", cache_control);
                None
            }
        };
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            out_dir,
            cache_control,
            publish_lock: PublishLock::default(),
        }
    }

    /// Coordinate lookups with the builder that publishes into `out_dir`.
    pub fn with_publish_lock(mut self, lock: PublishLock) -> Self {
        self.publish_lock = lock;
        self
    }

    pub fn from_config(config: &DevConfig) -> Self {
        Self::new(
            &config.static_files.prefix,
            config.out_dir(),
            &config.static_files.cache_control,
        )
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether `path` falls under the reserved prefix.
    ///
    /// Matching respects segment boundaries: with prefix `/static`,
    /// `/static/app.js` matches and `/staticky` does not.
    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(&self.prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Serve the request described by `request` if it targets the reserved
    /// prefix. Only the head is needed; the body is never read.
    ///
    /// Returns `None` for every other path, signalling that the request
    /// belongs to the application.
    pub async fn try_serve(&self, request: &Parts) -> Option<Response> {
        let path = request.uri.path();
        if !self.matches(path) {
            return None;
        }

        let uri = match self.strip(&request.uri) {
            Some(uri) => uri,
            None => return Some(status_response(StatusCode::BAD_REQUEST)),
        };

        let mut inner = Request::new(Body::empty());
        *inner.method_mut() = request.method.clone();
        *inner.uri_mut() = uri;
        *inner.headers_mut() = request.headers.clone();

        let served = {
            let _published = self.publish_lock.read().await;
            ServeDir::new(&self.out_dir).try_call(inner).await
        };
        let response = match served {
            Ok(response) => response.map(Body::new),
            Err(e) => {
                tracing::error!("Failed to serve {}: {}", path, e);
                return Some(status_response(StatusCode::INTERNAL_SERVER_ERROR));
            }
        };

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("Static asset not found: {}", path);
        }

        let mut response = response;
        if let Some(value) = &self.cache_control {
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, value.clone());
        }
        Some(response)
    }

    /// Remove the prefix, keeping the query string.
    fn strip(&self, uri: &Uri) -> Option<Uri> {
        let rest = &uri.path()[self.prefix.len()..];
        let rest = if rest.is_empty() { "/" } else { rest };
        let path_and_query = match uri.query() {
            Some(query) => format!("{}?{}", rest, query),
            None => rest.to_string(),
        };
        path_and_query.parse().ok()
    }
}

fn status_response(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn gate(dir: &TempDir) -> StaticAssetGate {
        StaticAssetGate::new("/static", dir.path().to_path_buf(), "no-cache")
    }

    fn get(uri: &str) -> Parts {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn test_matches_respects_segment_boundary() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);

        assert!(gate.matches("/static"));
        assert!(gate.matches("/static/"));
        assert!(gate.matches("/static/chunks/a.js"));
        assert!(!gate.matches("/staticky"));
        assert!(!gate.matches("/"));
        assert!(!gate.matches("/about/static/app.js"));
    }

    #[test]
    fn test_trailing_slash_in_prefix_is_ignored() {
        let gate = StaticAssetGate::new("/assets/", PathBuf::from("/tmp"), "no-cache");
        assert_eq!(gate.prefix(), "/assets");
        assert!(gate.matches("/assets/app.js"));
    }

    #[tokio::test]
    async fn test_existing_file_is_served() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("app.js"), "export default 1").unwrap();

        let response = gate(&temp).try_serve(&get("/static/app.js")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .contains("javascript"));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"export default 1");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let response = gate(&temp).try_serve(&get("/static/app.js")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_query_string_is_ignored_for_lookup() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("client.js"), "x").unwrap();
        let response = gate(&temp)
            .try_serve(&get("/static/client.js?v=0123456789abcdef"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_other_paths_fall_through() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("app.js"), "x").unwrap();
        assert!(gate(&temp).try_serve(&get("/app.js")).await.is_none());
        assert!(gate(&temp).try_serve(&get("/staticky")).await.is_none());
    }

    #[tokio::test]
    async fn test_traversal_does_not_escape_out_dir() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(temp.path().join("secret.txt"), "nope").unwrap();

        let gate = StaticAssetGate::new("/static", out, "no-cache");
        let response = gate
            .try_serve(&get("/static/../secret.txt"))
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_lookup_waits_for_publish_to_finish() {
        let temp = TempDir::new().unwrap();
        let out_dir = temp.path().join("out");
        let lock = PublishLock::default();
        let gate = StaticAssetGate::new("/static", out_dir.clone(), "no-cache")
            .with_publish_lock(lock.clone());

        let swapping = lock.write().await;
        let lookup = tokio::spawn(async move { gate.try_serve(&get("/static/app.js")).await });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!lookup.is_finished());

        fs::create_dir_all(&out_dir).unwrap();
        fs::write(out_dir.join("app.js"), "x").unwrap();
        drop(swapping);

        let response = lookup.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
