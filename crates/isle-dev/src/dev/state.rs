//! Shared state for the development server.
//!
//! Tracks the client build status, the manifest of the last successful
//! build and the connected event-stream clients. Uses parking_lot locks;
//! none of them is held across an await point.

use crate::dev::manifest::BuildManifest;
use crate::dev::DevEvent;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Buffered events per connected client.
const CLIENT_CHANNEL_CAPACITY: usize = 100;

/// Build status tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    /// No build has been performed yet
    NotStarted,
    /// Build is currently in progress
    InProgress { started_at: Instant },
    /// Build completed successfully
    Success { duration_ms: u64 },
    /// Build failed with error
    Failed { error: String },
}

impl BuildStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildStatus::Success { .. })
    }

    /// Get error message if failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            BuildStatus::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Connected event-stream clients.
pub type ClientRegistry = Arc<RwLock<HashMap<usize, mpsc::Sender<String>>>>;

/// Shared development server state.
pub struct DevServerState {
    status: RwLock<BuildStatus>,
    manifest: RwLock<Arc<BuildManifest>>,
    clients: ClientRegistry,
    next_client_id: RwLock<usize>,
}

impl DevServerState {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(BuildStatus::NotStarted),
            manifest: RwLock::new(Arc::new(BuildManifest::default())),
            clients: Arc::new(RwLock::new(HashMap::new())),
            next_client_id: RwLock::new(0),
        }
    }

    /// Update build status to in-progress.
    pub fn start_build(&self) {
        *self.status.write() = BuildStatus::InProgress {
            started_at: Instant::now(),
        };
    }

    /// Record a successful build and its manifest.
    pub fn complete_build(&self, duration_ms: u64, manifest: BuildManifest) {
        *self.manifest.write() = Arc::new(manifest);
        *self.status.write() = BuildStatus::Success { duration_ms };
    }

    /// Record a failed build. The previous manifest stays current.
    pub fn fail_build(&self, error: String) {
        *self.status.write() = BuildStatus::Failed { error };
    }

    pub fn get_status(&self) -> BuildStatus {
        self.status.read().clone()
    }

    /// Manifest of the last successful build.
    pub fn manifest(&self) -> Arc<BuildManifest> {
        Arc::clone(&self.manifest.read())
    }

    /// Register a new event-stream client.
    ///
    /// # Returns
    ///
    /// Client ID and receiver for serialized events
    pub fn register_client(&self) -> (usize, mpsc::Receiver<String>) {
        let id = {
            let mut next_id = self.next_client_id.write();
            let id = *next_id;
            *next_id += 1;
            id
        };

        let (tx, rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
        self.clients.write().insert(id, tx);

        (id, rx)
    }

    pub fn unregister_client(&self, id: usize) {
        self.clients.write().remove(&id);
    }

    /// Send an event to every connected client, dropping the ones that went away.
    pub async fn broadcast(&self, event: &DevEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to serialize event: {}", e);
                return;
            }
        };

        let clients = self.clients.read().clone();
        let mut failed_ids = Vec::new();
        for (id, tx) in clients {
            if tx.send(json.clone()).await.is_err() {
                failed_ids.push(id);
            }
        }

        for id in failed_ids {
            self.unregister_client(id);
        }
    }

    /// Drop every client channel, ending their event streams.
    pub fn disconnect_all(&self) {
        self.clients.write().clear();
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }
}

impl Default for DevServerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state handle.
pub type SharedState = Arc<DevServerState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::manifest::AssetEntry;

    #[test]
    fn test_build_status_predicates() {
        let status = BuildStatus::InProgress {
            started_at: Instant::now(),
        };
        assert!(!status.is_success());
        assert!(status.error().is_none());

        let status = BuildStatus::Failed {
            error: "Test error".to_string(),
        };
        assert!(!status.is_success());
        assert_eq!(status.error(), Some("Test error"));
    }

    #[test]
    fn test_failed_build_keeps_previous_manifest() {
        let state = DevServerState::new();
        assert_eq!(state.get_status(), BuildStatus::NotStarted);

        let manifest: BuildManifest = serde_json::from_value(serde_json::json!({
            "app/client.tsx": { "file": "client.js", "is_entry": true }
        }))
        .unwrap();

        state.start_build();
        assert!(matches!(state.get_status(), BuildStatus::InProgress { .. }));
        state.complete_build(120, manifest.clone());
        assert!(state.get_status().is_success());

        state.start_build();
        state.fail_build("Unexpected token".to_string());
        assert_eq!(state.get_status().error(), Some("Unexpected token"));
        assert_eq!(*state.manifest(), manifest);
        assert_eq!(
            state.manifest().get("app/client.tsx").map(|a: &AssetEntry| a.file.as_str()),
            Some("client.js")
        );
    }

    #[tokio::test]
    async fn test_broadcast_reaches_clients_and_drops_closed_ones() {
        let state = DevServerState::new();
        let (_, mut rx1) = state.register_client();
        let (_, rx2) = state.register_client();
        assert_eq!(state.client_count(), 2);
        drop(rx2);

        state.broadcast(&DevEvent::BuildStarted).await;

        assert_eq!(rx1.recv().await.unwrap(), r#"{"type":"BuildStarted"}"#);
        assert_eq!(state.client_count(), 1);
    }
}
