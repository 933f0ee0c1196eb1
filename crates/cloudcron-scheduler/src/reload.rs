use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cloudcron_dispatch::WorkerDispatch;
use tracing::{debug, info};

use crate::error::Result;
use crate::lock::{marker_path, read_pid, PID_FILE_NAME};

pub const RELOAD_FILE_NAME: &str = "reload_cron.lck";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadRequest {
    /// The marker is set; the running scheduler picks it up within one tick.
    Requested,
    /// No scheduler is running, so there is nothing to reload.
    NoProcess,
}

/// Out-of-process "please reload the crontab" flag.
#[async_trait]
pub trait ReloadMarker: Send + Sync {
    /// Set the marker if a scheduler is running.
    async fn request(&self) -> Result<ReloadRequest>;

    async fn is_pending(&self) -> Result<bool>;

    /// Remove the marker. Safe to call when not set.
    async fn clear(&self) -> Result<()>;
}

/// Reload marker as a lock file next to the scheduler's PID file.
pub struct FileReloadMarker {
    path: PathBuf,
    pid_path: PathBuf,
}

impl FileReloadMarker {
    pub fn new(marker_dir: impl AsRef<Path>, application: &str, environment: &str) -> Self {
        let dir = marker_dir.as_ref();
        Self {
            path: marker_path(dir, application, environment, RELOAD_FILE_NAME),
            pid_path: marker_path(dir, application, environment, PID_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReloadMarker for FileReloadMarker {
    async fn request(&self) -> Result<ReloadRequest> {
        if read_pid(&self.pid_path).await?.is_none() {
            return Ok(ReloadRequest::NoProcess);
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, b"").await?;
        info!(path = %self.path.display(), "reload requested");
        Ok(ReloadRequest::Requested)
    }

    async fn is_pending(&self) -> Result<bool> {
        match tokio::fs::metadata(&self.path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "reload marker removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reload marker as a worker registered with the reload params.
pub struct WorkerReloadMarker {
    dispatch: Arc<dyn WorkerDispatch>,
    command: String,
    cron_params: String,
    reload_params: String,
}

impl WorkerReloadMarker {
    pub fn new(
        dispatch: Arc<dyn WorkerDispatch>,
        command: &str,
        cron_params: &str,
        reload_params: &str,
    ) -> Self {
        Self {
            dispatch,
            command: command.to_string(),
            cron_params: cron_params.to_string(),
            reload_params: reload_params.to_string(),
        }
    }
}

#[async_trait]
impl ReloadMarker for WorkerReloadMarker {
    async fn request(&self) -> Result<ReloadRequest> {
        let crons = self
            .dispatch
            .running_workers(&self.command, &self.cron_params)
            .await?;
        if crons.is_empty() {
            return Ok(ReloadRequest::NoProcess);
        }
        let marker = self
            .dispatch
            .add_worker(&self.command, &self.reload_params)
            .await?;
        info!(worker_id = %marker.worker_id, "reload requested");
        Ok(ReloadRequest::Requested)
    }

    async fn is_pending(&self) -> Result<bool> {
        let markers = self
            .dispatch
            .running_workers(&self.command, &self.reload_params)
            .await?;
        Ok(!markers.is_empty())
    }

    async fn clear(&self) -> Result<()> {
        let markers = self
            .dispatch
            .running_workers(&self.command, &self.reload_params)
            .await?;
        for id in markers {
            self.dispatch.remove_worker(&id).await?;
            debug!(worker_id = %id, "reload marker worker removed");
        }
        Ok(())
    }
}

/// In-process reload flag, set from a signal handler and taken by the loop.
#[derive(Debug, Clone, Default)]
pub struct ReloadHandle {
    requested: Arc<AtomicBool>,
}

impl ReloadHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Returns whether a reload was requested and resets the flag.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::testing::{handle, FakeWorkers};
    use crate::lock::{InstanceLock, PidFileLock};

    const CRON: &str = "cloudcontrol:cron --env=prod --application=backend";
    const RELOAD: &str = "cloudcontrol:reload-cron --env=prod --application=backend";

    #[tokio::test]
    async fn file_request_without_running_cron_is_no_process() {
        let dir = tempfile::tempdir().unwrap();
        let marker = FileReloadMarker::new(dir.path(), "backend", "prod");
        assert_eq!(marker.request().await.unwrap(), ReloadRequest::NoProcess);
        assert!(!marker.is_pending().await.unwrap());
    }

    #[tokio::test]
    async fn file_request_sets_and_clear_removes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = PidFileLock::new(dir.path(), "backend", "prod");
        lock.acquire().await.unwrap();

        let marker = FileReloadMarker::new(dir.path(), "backend", "prod");
        assert_eq!(marker.request().await.unwrap(), ReloadRequest::Requested);
        assert!(marker.path().ends_with("backend/prod/reload_cron.lck"));
        assert!(marker.is_pending().await.unwrap());

        marker.clear().await.unwrap();
        assert!(!marker.is_pending().await.unwrap());
        marker.clear().await.unwrap();
    }

    #[tokio::test]
    async fn worker_request_without_running_cron_is_no_process() {
        let fake = Arc::new(FakeWorkers::default());
        let marker = WorkerReloadMarker::new(fake.clone(), "cloudcron", CRON, RELOAD);
        assert_eq!(marker.request().await.unwrap(), ReloadRequest::NoProcess);
        assert!(fake.snapshot().is_empty());
    }

    #[tokio::test]
    async fn worker_request_registers_reload_marker() {
        let fake = Arc::new(FakeWorkers::with(vec![handle("W1", "cloudcron", CRON)]));
        let marker = WorkerReloadMarker::new(fake.clone(), "cloudcron", CRON, RELOAD);

        assert_eq!(marker.request().await.unwrap(), ReloadRequest::Requested);
        assert!(marker.is_pending().await.unwrap());

        marker.clear().await.unwrap();
        assert!(!marker.is_pending().await.unwrap());
        // the cron marker itself is untouched
        assert_eq!(fake.snapshot(), vec![handle("W1", "cloudcron", CRON)]);
    }

    #[tokio::test]
    async fn worker_marker_leaves_other_applications_alone() {
        let other_cron = "cloudcontrol:cron --env=prod --application=backend2";
        let other_reload = "cloudcontrol:reload-cron --env=prod --application=backend2";
        let fake = Arc::new(FakeWorkers::with(vec![
            handle("W1", "cloudcron", CRON),
            handle("W2", "cloudcron", other_cron),
            handle("W3", "cloudcron", other_reload),
        ]));
        let marker = WorkerReloadMarker::new(fake.clone(), "cloudcron", CRON, RELOAD);

        assert!(!marker.is_pending().await.unwrap());
        marker.clear().await.unwrap();
        assert_eq!(fake.snapshot().len(), 3);

        let lonely = Arc::new(FakeWorkers::with(vec![handle("W2", "cloudcron", other_cron)]));
        let marker = WorkerReloadMarker::new(lonely, "cloudcron", CRON, RELOAD);
        assert_eq!(marker.request().await.unwrap(), ReloadRequest::NoProcess);
    }

    #[test]
    fn reload_handle_take_resets_flag() {
        let handle = ReloadHandle::new();
        let signal_side = handle.clone();
        assert!(!handle.take());
        signal_side.request();
        assert!(handle.take());
        assert!(!handle.take());
    }
}
