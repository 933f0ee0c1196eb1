use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cloudcron_dispatch::WorkerDispatch;
use tracing::{debug, info, warn};

use crate::error::Result;

pub const PID_FILE_NAME: &str = "cloudcontrol_cron.pid";

/// Result of trying to become the only scheduler for an application/environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// Another instance holds the lock; `holder` describes it for the log.
    Held { holder: String },
}

/// Single-instance guard for the scheduler loop.
#[async_trait]
pub trait InstanceLock: Send + Sync {
    async fn acquire(&mut self) -> Result<LockOutcome>;

    /// Give the lock up. Safe to call when not held.
    async fn release(&mut self) -> Result<()>;
}

/// `<marker_dir>/<application>/<environment>/<file>`
pub fn marker_path(marker_dir: &Path, application: &str, environment: &str, file: &str) -> PathBuf {
    marker_dir.join(application).join(environment).join(file)
}

/// Read a PID file. A missing, empty or unparseable file, or a PID of 0, counts as absent.
pub async fn read_pid(path: &Path) -> io::Result<Option<u32>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content.trim().parse::<u32>().ok().filter(|&pid| pid != 0)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Lock backed by a PID file on a filesystem shared by all instances.
///
/// The file is trusted as is; a stale file left by a crashed process keeps
/// the lock held until it is removed.
pub struct PidFileLock {
    path: PathBuf,
    pid: u32,
    held: bool,
}

impl PidFileLock {
    pub fn new(marker_dir: impl AsRef<Path>, application: &str, environment: &str) -> Self {
        Self {
            path: marker_path(marker_dir.as_ref(), application, environment, PID_FILE_NAME),
            pid: std::process::id(),
            held: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl InstanceLock for PidFileLock {
    async fn acquire(&mut self) -> Result<LockOutcome> {
        if let Some(pid) = read_pid(&self.path).await? {
            return Ok(LockOutcome::Held {
                holder: format!("pid {pid}, {}", self.path.display()),
            });
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, self.pid.to_string()).await?;
        self.held = true;
        info!(path = %self.path.display(), pid = self.pid, "pid file written");
        Ok(LockOutcome::Acquired)
    }

    async fn release(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "pid file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "pid file already gone")
            }
            Err(e) => return Err(e.into()),
        }
        self.held = false;
        Ok(())
    }
}

/// Lock backed by a marker worker registered through the cloudControl API.
///
/// Works across boxes without a shared filesystem: the lock is held while any
/// worker runs `command` with this application/environment's marker params.
pub struct WorkerMarkerLock {
    dispatch: Arc<dyn WorkerDispatch>,
    command: String,
    params: String,
    own_worker_id: Option<String>,
    marker_id: Option<String>,
}

impl WorkerMarkerLock {
    /// `own_worker_id` is excluded from the holder check when this process
    /// itself runs as a cloudControl worker started with the marker params.
    pub fn new(
        dispatch: Arc<dyn WorkerDispatch>,
        command: &str,
        params: &str,
        own_worker_id: Option<String>,
    ) -> Self {
        Self {
            dispatch,
            command: command.to_string(),
            params: params.to_string(),
            own_worker_id,
            marker_id: None,
        }
    }

    pub fn marker_id(&self) -> Option<&str> {
        self.marker_id.as_deref()
    }
}

#[async_trait]
impl InstanceLock for WorkerMarkerLock {
    async fn acquire(&mut self) -> Result<LockOutcome> {
        let running = self
            .dispatch
            .running_workers(&self.command, &self.params)
            .await?;
        let others: Vec<String> = running
            .into_iter()
            .filter(|id| Some(id) != self.own_worker_id.as_ref())
            .collect();
        if !others.is_empty() {
            return Ok(LockOutcome::Held {
                holder: format!("worker {}", others.join(", ")),
            });
        }

        let marker = self.dispatch.add_worker(&self.command, &self.params).await?;
        info!(worker_id = %marker.worker_id, params = %self.params, "cron marker worker registered");
        self.marker_id = Some(marker.worker_id);
        Ok(LockOutcome::Acquired)
    }

    async fn release(&mut self) -> Result<()> {
        if let Some(id) = self.marker_id.take() {
            // gone workers count as removed
            self.dispatch.remove_worker(&id).await?;
            debug!(worker_id = %id, "cron marker worker removed");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use cloudcron_dispatch::{AuthToken, DispatchError, WorkerDispatch, WorkerHandle};

    /// In-memory worker registry.
    #[derive(Default)]
    pub struct FakeWorkers {
        pub workers: Mutex<Vec<WorkerHandle>>,
        pub next_id: Mutex<u32>,
    }

    impl FakeWorkers {
        pub fn with(workers: Vec<WorkerHandle>) -> Self {
            Self {
                workers: Mutex::new(workers),
                next_id: Mutex::new(0),
            }
        }

        pub fn snapshot(&self) -> Vec<WorkerHandle> {
            self.workers.lock().unwrap().clone()
        }
    }

    pub fn handle(id: &str, command: &str, params: &str) -> WorkerHandle {
        WorkerHandle {
            worker_id: id.to_string(),
            command: command.to_string(),
            parameters: params.to_string(),
        }
    }

    #[async_trait]
    impl WorkerDispatch for FakeWorkers {
        async fn authenticate(&self) -> cloudcron_dispatch::Result<AuthToken> {
            Ok(AuthToken::new("fake"))
        }

        async fn add_worker(
            &self,
            command: &str,
            parameters: &str,
        ) -> cloudcron_dispatch::Result<WorkerHandle> {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            let worker = handle(&format!("F{next}"), command, parameters);
            self.workers.lock().unwrap().push(worker.clone());
            Ok(worker)
        }

        async fn remove_worker(&self, worker_id: &str) -> cloudcron_dispatch::Result<()> {
            self.workers.lock().unwrap().retain(|w| w.worker_id != worker_id);
            Ok(())
        }

        async fn list_workers(&self) -> cloudcron_dispatch::Result<Vec<WorkerHandle>> {
            Ok(self.snapshot())
        }

        async fn worker_details(&self, worker_id: &str) -> cloudcron_dispatch::Result<WorkerHandle> {
            self.snapshot()
                .into_iter()
                .find(|w| w.worker_id == worker_id)
                .ok_or_else(|| DispatchError::NotFound(worker_id.to_string()))
        }
    }
}
