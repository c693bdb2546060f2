//! Cluster-wide resource locks
//!
//! A lock is keyed by resource name (usually a volume name). Request
//! handlers take it *before* reading the resource, since the node set a
//! transaction targets is derived from that read.
//!
//! The [`LockBackend`] is the seam to whatever provides cluster-wide mutual
//! exclusion. [`MemLockBackend`] holds locks in this process; a node that is
//! not the lock authority reaches the authority's table through
//! [`HttpLockBackend`].

use crate::common::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(100);

#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Take `name` for `owner` if free. Returns false when someone else holds it.
    async fn try_lock(&self, name: &str, owner: &str) -> Result<bool>;

    /// Release `name` if `owner` holds it; otherwise a no-op.
    async fn unlock(&self, name: &str, owner: &str) -> Result<()>;
}

/// Lock table kept in process memory
#[derive(Default)]
pub struct MemLockBackend {
    held: Mutex<HashMap<String, String>>,
}

impl MemLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self, name: &str) -> Option<String> {
        self.held
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl LockBackend for MemLockBackend {
    async fn try_lock(&self, name: &str, owner: &str) -> Result<bool> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| crate::Error::StoreUnavailable("lock table poisoned".into()))?;
        match held.get(name) {
            Some(current) => Ok(current == owner),
            None => {
                held.insert(name.to_string(), owner.to_string());
                Ok(true)
            }
        }
    }

    async fn unlock(&self, name: &str, owner: &str) -> Result<()> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| crate::Error::StoreUnavailable("lock table poisoned".into()))?;
        if held.get(name).map(String::as_str) == Some(owner) {
            held.remove(name);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRequest {
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockResponse {
    pub acquired: bool,
}

/// Lock table of a remote authority node
pub struct HttpLockBackend {
    client: reqwest::Client,
    authority_url: String,
}

impl HttpLockBackend {
    pub fn new(authority_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            authority_url: authority_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, name: &str, action: &str) -> String {
        format!("{}/internal/v1/locks/{}/{}", self.authority_url, name, action)
    }
}

#[async_trait]
impl LockBackend for HttpLockBackend {
    async fn try_lock(&self, name: &str, owner: &str) -> Result<bool> {
        let response = self
            .client
            .post(self.url(name, "acquire"))
            .json(&LockRequest {
                owner: owner.to_string(),
            })
            .send()
            .await
            .map_err(|e| crate::Error::StoreUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(crate::Error::StoreUnavailable(format!(
                "lock authority returned {}",
                response.status()
            )));
        }
        let body: LockResponse = response
            .json()
            .await
            .map_err(|e| crate::Error::StoreUnavailable(e.to_string()))?;
        Ok(body.acquired)
    }

    async fn unlock(&self, name: &str, owner: &str) -> Result<()> {
        self.client
            .post(self.url(name, "release"))
            .json(&LockRequest {
                owner: owner.to_string(),
            })
            .send()
            .await
            .map_err(|e| crate::Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn LockBackend>,
    default_timeout: Duration,
}

impl LockManager {
    pub fn new(backend: Arc<dyn LockBackend>, default_timeout: Duration) -> Self {
        Self {
            backend,
            default_timeout,
        }
    }

    pub fn in_memory(default_timeout: Duration) -> Self {
        Self::new(Arc::new(MemLockBackend::new()), default_timeout)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Acquire with the configured default timeout
    pub async fn lock(&self, name: &str) -> Result<LockGuard> {
        self.acquire(name, self.default_timeout).await
    }

    /// Block up to `timeout` for `name`. Fails with `Error::LockTimeout`, or
    /// `Error::StoreUnavailable` when the backend cannot be reached.
    pub async fn acquire(&self, name: &str, timeout: Duration) -> Result<LockGuard> {
        let owner = Uuid::new_v4().to_string();
        let deadline = Instant::now() + timeout;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let acquired = self
                .backend
                .try_lock(name, &owner)
                .await
                .map_err(|e| match e {
                    crate::Error::StoreUnavailable(_) => e,
                    other => crate::Error::StoreUnavailable(other.to_string()),
                })?;
            if acquired {
                debug!(lock = %name, owner = %owner, "Lock acquired");
                return Ok(LockGuard {
                    name: name.to_string(),
                    owner,
                    backend: self.backend.clone(),
                    released: false,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(lock = %name, timeout_ms = timeout.as_millis() as u64, "Lock acquisition timed out");
                return Err(crate::Error::LockTimeout(name.to_string()));
            }

            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..5));
            tokio::time::sleep((backoff + jitter).min(deadline - now)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

/// A held lock. Released explicitly with [`LockGuard::release`]; a guard
/// dropped while still held releases in the background.
pub struct LockGuard {
    name: String,
    owner: String,
    backend: Arc<dyn LockBackend>,
    released: bool,
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the lock. Calling it again is a no-op; failures are logged.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match self.backend.unlock(&self.name, &self.owner).await {
            Ok(()) => debug!(lock = %self.name, "Lock released"),
            Err(e) => warn!(lock = %self.name, error = %e, "Failed to release lock"),
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let name = std::mem::take(&mut self.name);
        let owner = std::mem::take(&mut self.owner);
        let backend = self.backend.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = backend.unlock(&name, &owner).await {
                        warn!(lock = %name, error = %e, "Failed to release dropped lock");
                    }
                });
            }
            Err(_) => warn!(lock = %name, "Lock dropped outside a runtime, not released"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_release_reacquire() {
        let locks = LockManager::in_memory(Duration::from_secs(1));
        let mut guard = locks.lock("vol1").await.unwrap();
        assert_eq!(guard.name(), "vol1");
        guard.release().await;
        guard.release().await;
        assert!(guard.is_released());

        let mut again = locks
            .acquire("vol1", Duration::from_millis(50))
            .await
            .unwrap();
        again.release().await;
    }

    #[tokio::test]
    async fn test_guard_debug_names_lock() {
        let locks = LockManager::in_memory(Duration::from_millis(50));
        let mut guard = locks.lock("vol1").await.unwrap();
        let shown = format!("{:?}", guard);
        assert!(shown.contains("vol1"), "{}", shown);
        assert!(shown.contains("released: false"), "{}", shown);
        guard.release().await;

        let held = locks.lock("vol2").await.unwrap();
        let err = locks.acquire("vol2", Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, crate::Error::LockTimeout(_)));
        drop(held);
    }

    #[tokio::test]
    async fn test_unrelated_names_do_not_contend() {
        let locks = LockManager::in_memory(Duration::from_millis(50));
        let _a = locks.lock("vol1").await.unwrap();
        let _b = locks.lock("vol2").await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_guard_is_released() {
        let backend = Arc::new(MemLockBackend::new());
        let locks = LockManager::new(backend.clone(), Duration::from_secs(1));
        {
            let _guard = locks.lock("vol1").await.unwrap();
            assert!(backend.holder("vol1").is_some());
        }
        let mut guard = locks.acquire("vol1", Duration::from_secs(1)).await.unwrap();
        guard.release().await;
        assert!(backend.holder("vol1").is_none());
    }

    #[tokio::test]
    async fn test_unlock_by_other_owner_is_noop() {
        let backend = MemLockBackend::new();
        assert!(backend.try_lock("vol1", "a").await.unwrap());
        assert!(!backend.try_lock("vol1", "b").await.unwrap());
        backend.unlock("vol1", "b").await.unwrap();
        assert_eq!(backend.holder("vol1").as_deref(), Some("a"));
    }
}
