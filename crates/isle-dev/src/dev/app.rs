//! The application contract: one request-handling entry point.
//!
//! Requests and responses are `http` values whose bodies are streams of byte
//! chunks, so both sides can produce and consume them incrementally.

use crate::error::HandlerError;
use async_trait::async_trait;
use std::future::Future;

/// Request handed to the application.
pub type AppRequest = axum::extract::Request;

/// Response returned by the application.
pub type AppResponse = axum::response::Response;

/// A loaded application. Each successful load produces a new instance;
/// instances are never mutated after creation.
#[async_trait]
pub trait Application: Send + Sync {
    /// Handle one request.
    async fn handle(&self, request: AppRequest) -> Result<AppResponse, HandlerError>;

    /// Whether this instance can still serve requests. A cached instance
    /// that reports `false` is discarded and loaded again.
    fn is_alive(&self) -> bool {
        true
    }
}

/// Application backed by an async closure.
pub struct FnApplication<F> {
    handler: F,
}

/// Wrap an async closure as an [`Application`].
///
/// ```rust
/// use isle_dev::dev::app::{handler_fn, AppResponse};
///
/// let app = handler_fn(|_request| async { Ok(AppResponse::new("hello".into())) });
/// ```
pub fn handler_fn<F, Fut>(handler: F) -> FnApplication<F>
where
    F: Fn(AppRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AppResponse, HandlerError>> + Send,
{
    FnApplication { handler }
}

#[async_trait]
impl<F, Fut> Application for FnApplication<F>
where
    F: Fn(AppRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AppResponse, HandlerError>> + Send,
{
    async fn handle(&self, request: AppRequest) -> Result<AppResponse, HandlerError> {
        (self.handler)(request).await
    }
}
