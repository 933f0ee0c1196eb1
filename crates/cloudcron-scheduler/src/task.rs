use std::time::Duration;

use async_trait::async_trait;
use cloudcron_core::TaskExit;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;

/// A long-running task driven by [`run_task`].
///
/// The driver calls `pre_execute` once, then `execute` repeatedly until the
/// cancellation token fires or an iteration fails, then `shutdown` exactly once.
#[async_trait]
pub trait LoopTask: Send {
    fn name(&self) -> &str;

    async fn pre_execute(&mut self) -> Result<()> {
        Ok(())
    }

    /// One iteration. Long waits inside must observe `cancel`.
    async fn execute(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Runs after the loop ends, whatever the reason.
    async fn shutdown(&mut self) {}

    /// Exit status reported when the task is interrupted.
    fn interrupt_exit(&self) -> TaskExit;
}

/// Drive `task` to completion and return the process exit status.
pub async fn run_task<T: LoopTask + ?Sized>(task: &mut T, cancel: CancellationToken) -> TaskExit {
    let name = task.name().to_string();
    info!(task = %name, "task starting");

    let exit = match task.pre_execute().await {
        Err(e) => {
            error!(task = %name, code = e.code(), err = %e, "task failed to start");
            e.exit_code()
        }
        Ok(()) => loop {
            if cancel.is_cancelled() {
                info!(task = %name, "task interrupted");
                break task.interrupt_exit();
            }
            if let Err(e) = task.execute(&cancel).await {
                error!(task = %name, code = e.code(), err = %e, "task failed");
                break e.exit_code();
            }
        },
    };

    task.shutdown().await;
    info!(task = %name, exit = %exit, "task stopped");
    exit
}

/// Counts and logs at a fixed interval. Stops cleanly when interrupted.
pub struct HeartbeatTask {
    interval: Duration,
    counter: u64,
}

impl HeartbeatTask {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            counter: 0,
        }
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }
}

#[async_trait]
impl LoopTask for HeartbeatTask {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn pre_execute(&mut self) -> Result<()> {
        self.counter = 0;
        Ok(())
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.counter += 1;
        info!(counter = self.counter, "heartbeat");
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.interval) => {}
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        info!(counter = self.counter, "heartbeat shutting down");
    }

    fn interrupt_exit(&self) -> TaskExit {
        TaskExit::Clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;

    #[tokio::test(start_paused = true)]
    async fn heartbeat_exits_clean_on_interrupt() {
        let cancel = CancellationToken::new();
        let mut task = HeartbeatTask::new(Duration::from_secs(15));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(40)).await;
            trigger.cancel();
        });

        let exit = run_task(&mut task, cancel).await;
        assert_eq!(exit, TaskExit::Clean);
        assert_eq!(exit.code(), 0);
        // ticks at 0s, 15s and 30s; the third sleep is cut short at 40s
        assert_eq!(task.counter(), 3);
    }

    struct Failing {
        shut_down: bool,
        fail_start: bool,
    }

    #[async_trait]
    impl LoopTask for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn pre_execute(&mut self) -> Result<()> {
            if self.fail_start {
                return Err(SchedulerError::AlreadyRunning {
                    holder: "pid 1".into(),
                });
            }
            Ok(())
        }

        async fn execute(&mut self, _cancel: &CancellationToken) -> Result<()> {
            Err(SchedulerError::Config("boom".into()))
        }

        async fn shutdown(&mut self) {
            self.shut_down = true;
        }

        fn interrupt_exit(&self) -> TaskExit {
            TaskExit::Restart
        }
    }

    #[tokio::test]
    async fn failed_start_maps_error_and_still_shuts_down() {
        let mut task = Failing {
            shut_down: false,
            fail_start: true,
        };
        let exit = run_task(&mut task, CancellationToken::new()).await;
        assert_eq!(exit, TaskExit::Fatal);
        assert!(task.shut_down);
    }

    #[tokio::test]
    async fn failed_iteration_ends_loop() {
        let mut task = Failing {
            shut_down: false,
            fail_start: false,
        };
        let exit = run_task(&mut task, CancellationToken::new()).await;
        assert_eq!(exit, TaskExit::Fatal);
        assert!(task.shut_down);
    }

    #[tokio::test]
    async fn cancelled_before_first_iteration_uses_interrupt_exit() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut task = Failing {
            shut_down: false,
            fail_start: false,
        };
        assert_eq!(run_task(&mut task, cancel).await, TaskExit::Restart);
    }
}
