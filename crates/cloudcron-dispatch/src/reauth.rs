use async_trait::async_trait;
use tracing::warn;

use crate::client::WorkerDispatch;
use crate::error::Result;
use crate::types::{AuthToken, WorkerHandle};

/// Dispatcher wrapper that recovers from an expired token.
///
/// When a call fails because the token expired (or was never created) the
/// wrapper authenticates once and retries that single call once. A second
/// failure is returned as is; there is no further recursion.
pub struct Reauthenticating<D> {
    inner: D,
}

impl<D: WorkerDispatch> Reauthenticating<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    async fn refresh(&self, operation: &str) -> Result<()> {
        warn!(%operation, "token expired, re-authenticating before retry");
        self.inner.authenticate().await.map(|_| ())
    }
}

#[async_trait]
impl<D: WorkerDispatch> WorkerDispatch for Reauthenticating<D> {
    async fn authenticate(&self) -> Result<AuthToken> {
        self.inner.authenticate().await
    }

    async fn add_worker(&self, command: &str, parameters: &str) -> Result<WorkerHandle> {
        match self.inner.add_worker(command, parameters).await {
            Err(e) if e.is_auth_expired() => {
                self.refresh("add_worker").await?;
                self.inner.add_worker(command, parameters).await
            }
            other => other,
        }
    }

    async fn remove_worker(&self, worker_id: &str) -> Result<()> {
        match self.inner.remove_worker(worker_id).await {
            Err(e) if e.is_auth_expired() => {
                self.refresh("remove_worker").await?;
                self.inner.remove_worker(worker_id).await
            }
            other => other,
        }
    }

    async fn list_workers(&self) -> Result<Vec<WorkerHandle>> {
        match self.inner.list_workers().await {
            Err(e) if e.is_auth_expired() => {
                self.refresh("list_workers").await?;
                self.inner.list_workers().await
            }
            other => other,
        }
    }

    async fn worker_details(&self, worker_id: &str) -> Result<WorkerHandle> {
        match self.inner.worker_details(worker_id).await {
            Err(e) if e.is_auth_expired() => {
                self.refresh("worker_details").await?;
                self.inner.worker_details(worker_id).await
            }
            other => other,
        }
    }
}
