// ABOUTME: In-memory registry mapping sandbox ids to live handles
// ABOUTME: Injected into the manager; per-id locks serialise create and terminate

use crate::providers::{GitSource, SandboxStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Live handle for a provisioned sandbox
#[derive(Debug, Clone, Serialize)]
pub struct SandboxHandle {
    pub id: String,
    pub status: SandboxStatus,
    pub agent_server_port: u16,
    pub preview_port: u16,
    #[serde(skip_serializing)]
    pub source: GitSource,
    pub sandbox_url: Option<String>,
    pub preview_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Process-wide store of live sandboxes
///
/// The registry is advisory: the remote platform stays authoritative, so
/// callers fall back to remote lookups when an id is missing here.
#[derive(Default)]
pub struct SandboxRegistry {
    handles: RwLock<HashMap<String, SandboxHandle>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SandboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: SandboxHandle) {
        let mut handles = self.handles.write().await;
        handles.insert(handle.id.clone(), handle);
    }

    pub async fn get(&self, sandbox_id: &str) -> Option<SandboxHandle> {
        let handles = self.handles.read().await;
        handles.get(sandbox_id).cloned()
    }

    pub async fn contains(&self, sandbox_id: &str) -> bool {
        let handles = self.handles.read().await;
        handles.contains_key(sandbox_id)
    }

    pub async fn remove(&self, sandbox_id: &str) -> Option<SandboxHandle> {
        let mut handles = self.handles.write().await;
        handles.remove(sandbox_id)
    }

    /// Apply an in-place update to a registered handle
    pub async fn update<F>(&self, sandbox_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut SandboxHandle),
    {
        let mut handles = self.handles.write().await;
        match handles.get_mut(sandbox_id) {
            Some(handle) => {
                f(handle);
                true
            }
            None => false,
        }
    }

    pub async fn list(&self) -> Vec<SandboxHandle> {
        let handles = self.handles.read().await;
        let mut list: Vec<SandboxHandle> = handles.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }

    /// Acquire the single-writer lock for one sandbox id
    pub async fn lock(&self, sandbox_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(sandbox_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Forget the lock for an id that is no longer registered and not held
    pub async fn release_lock(&self, sandbox_id: &str) {
        if self.contains(sandbox_id).await {
            return;
        }
        let mut locks = self.locks.lock().await;
        if let Some(lock) = locks.get(sandbox_id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(sandbox_id);
            }
        }
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }
}
