//! On-demand loading of the server entry.
//!
//! The loader holds no cache of its own: every call asks the build service
//! for the entry again, and the service decides whether a recompilation is
//! needed. Calling again always yields an application consistent with the
//! source as the service last observed it.

use crate::dev::app::Application;
use crate::dev::service::BuildService;
use crate::error::LoadError;
use std::sync::Arc;

/// Loads the server entry module through a [`BuildService`].
#[derive(Clone)]
pub struct SsrModuleLoader {
    service: Arc<dyn BuildService>,
    entry: String,
}

impl SsrModuleLoader {
    pub fn new(service: Arc<dyn BuildService>, entry: impl Into<String>) -> Self {
        Self {
            service,
            entry: entry.into(),
        }
    }

    /// Server entry module identifier.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Load the current application object.
    pub async fn load(&self) -> Result<Arc<dyn Application>, LoadError> {
        self.service.ssr_load_module(&self.entry).await
    }
}
