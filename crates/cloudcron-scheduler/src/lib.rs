//! `cloudcron-scheduler`: cron loop that starts cloudControl workers from a SQLite crontab.
//!
//! # Overview
//!
//! Entries live in a SQLite `crontab` table. The [`engine::SchedulerLoop`]
//! loads them into memory, and once per cron minute dispatches every due entry
//! as a worker through [`cloudcron_dispatch::WorkerDispatch`], recording the
//! run time back into the store.
//!
//! Only one loop may run per application/environment. Other processes ask it
//! to reload through a marker:
//!
//! | Strategy | Instance lock           | Reload marker             |
//! |----------|-------------------------|---------------------------|
//! | Worker   | `cloudcontrol:cron` worker | `cloudcontrol:reload-cron` worker |
//! | PidFile  | `cloudcontrol_cron.pid` | `reload_cron.lck`         |

pub mod clock;
pub mod cron;
pub mod db;
pub mod engine;
pub mod error;
pub mod lock;
pub mod reload;
pub mod store;
pub mod task;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cron::{Anchor, CronExpression, CronField};
pub use engine::{LoopState, PassOutcome, SchedulerLoop};
pub use error::{CronError, Result, SchedulerError, StoreError};
pub use lock::{InstanceLock, LockOutcome, PidFileLock, WorkerMarkerLock};
pub use reload::{FileReloadMarker, ReloadHandle, ReloadMarker, ReloadRequest, WorkerReloadMarker};
pub use store::{ScheduleStore, SqliteScheduleStore};
pub use task::{run_task, HeartbeatTask, LoopTask};
pub use types::ScheduleEntry;
