use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cloudcron_core::{
    config::{DEFAULT_TICK_SECS, DEFAULT_WAIT_TICKS},
    TaskExit,
};
use cloudcron_dispatch::WorkerDispatch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    error::{Result, SchedulerError, StoreError},
    lock::{InstanceLock, LockOutcome},
    reload::{ReloadHandle, ReloadMarker},
    store::ScheduleStore,
    task::{run_task, LoopTask},
    types::ScheduleEntry,
};

/// Position of the scheduler in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    AcquiringLock,
    Running,
    Reloading,
    ShuttingDown,
    Terminated,
    /// Start rejected because another instance holds the lock. Terminal.
    AlreadyRunning,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::Init => "init",
            LoopState::AcquiringLock => "acquiring_lock",
            LoopState::Running => "running",
            LoopState::Reloading => "reloading",
            LoopState::ShuttingDown => "shutting_down",
            LoopState::Terminated => "terminated",
            LoopState::AlreadyRunning => "already_running",
        };
        write!(f, "{s}")
    }
}

/// How one pass over the schedule ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every entry was considered.
    Completed { dispatched: usize, failed: usize },
    /// The token expired; the rest of the pass was skipped.
    AuthExpired,
    /// The store stayed unreachable after a reconnect; the rest of the pass was skipped.
    StoreUnavailable,
    /// Cancelled between two entries.
    Interrupted,
}

/// The cron loop: dispatches every due crontab entry as a cloudControl worker,
/// then idles for one cron minute while watching for reload requests.
pub struct SchedulerLoop {
    state: LoopState,
    store: Box<dyn ScheduleStore>,
    dispatch: Arc<dyn WorkerDispatch>,
    lock: Box<dyn InstanceLock>,
    reload_marker: Box<dyn ReloadMarker>,
    clock: Box<dyn Clock>,
    reload: ReloadHandle,
    schedule: Vec<ScheduleEntry>,
    lock_held: bool,
    tick: Duration,
    wait_ticks: u32,
}

impl SchedulerLoop {
    pub fn new(
        store: Box<dyn ScheduleStore>,
        dispatch: Arc<dyn WorkerDispatch>,
        lock: Box<dyn InstanceLock>,
        reload_marker: Box<dyn ReloadMarker>,
    ) -> Self {
        Self {
            state: LoopState::Init,
            store,
            dispatch,
            lock,
            reload_marker,
            clock: Box::new(SystemClock::default()),
            reload: ReloadHandle::new(),
            schedule: Vec::new(),
            lock_held: false,
            tick: Duration::from_secs(DEFAULT_TICK_SECS),
            wait_ticks: DEFAULT_WAIT_TICKS,
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Idle wait is `wait_ticks` sleeps of `tick`, with a reload check before each.
    pub fn with_timing(mut self, tick: Duration, wait_ticks: u32) -> Self {
        self.tick = tick;
        self.wait_ticks = wait_ticks;
        self
    }

    pub fn with_reload_handle(mut self, reload: ReloadHandle) -> Self {
        self.reload = reload;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn schedule(&self) -> &[ScheduleEntry] {
        &self.schedule
    }

    pub fn lock_held(&self) -> bool {
        self.lock_held
    }

    pub fn reload_handle(&self) -> ReloadHandle {
        self.reload.clone()
    }

    /// Run until cancelled or failed, returning the process exit status.
    pub async fn run(mut self, cancel: CancellationToken) -> TaskExit {
        run_task(&mut self, cancel).await
    }

    fn transition(&mut self, next: LoopState) {
        debug!(from = %self.state, to = %next, "state change");
        self.state = next;
    }

    /// Consider every entry of the current snapshot once, in stored order.
    pub async fn run_pass(&mut self, cancel: &CancellationToken) -> PassOutcome {
        let now = self.clock.now();
        let mut dispatched = 0;
        let mut failed = 0;

        for i in 0..self.schedule.len() {
            if cancel.is_cancelled() {
                return PassOutcome::Interrupted;
            }

            let entry = &self.schedule[i];
            match entry.is_due(now) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(entry_id = %entry.id, err = %e, "cannot evaluate schedule, skipping entry");
                    continue;
                }
            }

            let id = entry.id.clone();
            let command = entry.command.clone();
            let parameters = entry.parameters.clone();
            info!(entry_id = %id, %command, %parameters, "running command line");

            match self.dispatch.add_worker(&command, &parameters).await {
                Ok(worker) => {
                    dispatched += 1;
                    debug!(entry_id = %id, worker_id = %worker.worker_id, "worker started");
                    let at = self.clock.now();
                    self.schedule[i].mark_run(at);
                    match self.store.persist_last_run(&id, at) {
                        Ok(()) => {}
                        Err(StoreError::EntryNotFound { .. }) => {
                            warn!(entry_id = %id, "entry deleted since last reload, last run not saved")
                        }
                        Err(e) if e.is_connection() => {
                            error!(entry_id = %id, err = %e, "store unavailable, ending pass");
                            return PassOutcome::StoreUnavailable;
                        }
                        Err(e) => error!(entry_id = %id, err = %e, "failed to save last run"),
                    }
                }
                Err(e) if e.is_auth_expired() => {
                    warn!(entry_id = %id, code = e.code(), "token expired, aborting pass");
                    return PassOutcome::AuthExpired;
                }
                Err(e) => {
                    failed += 1;
                    error!(entry_id = %id, %command, code = e.code(), err = %e, "cloudControl API returned error");
                }
            }
        }

        PassOutcome::Completed { dispatched, failed }
    }

    /// Clear the reload marker, then replace the snapshot from the store.
    ///
    /// A request made during the load stays pending for the next wait. A
    /// failed load keeps the previous snapshot.
    pub async fn reload_schedule(&mut self) {
        self.transition(LoopState::Reloading);
        if let Err(e) = self.reload_marker.clear().await {
            warn!(code = e.code(), err = %e, "failed to clear reload marker");
        }
        match self.store.reload() {
            Ok(entries) => {
                info!(entries = entries.len(), "crontab reloaded");
                self.schedule = entries;
            }
            Err(e) => error!(err = %e, "crontab reload failed, keeping previous schedule"),
        }
        self.transition(LoopState::Running);
    }

    async fn reload_requested(&mut self) -> bool {
        if self.reload.take() {
            info!("reload requested by signal");
            return true;
        }
        match self.reload_marker.is_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(code = e.code(), err = %e, "cannot check reload marker");
                false
            }
        }
    }

    async fn idle_wait(&mut self, cancel: &CancellationToken) {
        for _ in 0..self.wait_ticks {
            if self.reload_requested().await {
                self.reload_schedule().await;
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.tick) => {}
            }
        }
    }
}

#[async_trait]
impl LoopTask for SchedulerLoop {
    fn name(&self) -> &str {
        "cron"
    }

    async fn pre_execute(&mut self) -> Result<()> {
        self.transition(LoopState::AcquiringLock);
        match self.lock.acquire().await? {
            LockOutcome::Held { holder } => {
                self.transition(LoopState::AlreadyRunning);
                return Err(SchedulerError::AlreadyRunning { holder });
            }
            LockOutcome::Acquired => self.lock_held = true,
        }

        // a request made while no scheduler ran is satisfied by the load below
        if let Err(e) = self.reload_marker.clear().await {
            warn!(code = e.code(), err = %e, "failed to clear stale reload marker");
        }
        self.schedule = self.store.reload()?;
        info!(entries = self.schedule.len(), "crontab loaded");

        self.dispatch.authenticate().await?;
        self.transition(LoopState::Running);
        Ok(())
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<()> {
        match self.run_pass(cancel).await {
            PassOutcome::AuthExpired => {
                self.dispatch.authenticate().await?;
                info!("re-authenticated, starting a fresh pass");
                return Ok(());
            }
            PassOutcome::Interrupted => return Ok(()),
            PassOutcome::Completed { dispatched, failed } => {
                debug!(dispatched, failed, "pass complete");
            }
            PassOutcome::StoreUnavailable => {}
        }
        self.idle_wait(cancel).await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        let rejected = self.state == LoopState::AlreadyRunning;
        if !rejected {
            self.transition(LoopState::ShuttingDown);
        }
        if self.lock_held {
            match self.lock.release().await {
                Ok(()) => self.lock_held = false,
                Err(e) => error!(code = e.code(), err = %e, "failed to release instance lock"),
            }
        }
        self.store.close();
        if !rejected {
            self.transition(LoopState::Terminated);
        }
    }

    fn interrupt_exit(&self) -> TaskExit {
        TaskExit::Restart
    }
}
