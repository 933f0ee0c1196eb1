//! `cloudcron-dispatch`: client for the cloudControl worker API.
//!
//! Workers are remote processes started from a command line and a parameter
//! string. The scheduler uses this crate to start one worker per due crontab
//! entry, and to register or look up marker workers that coordinate separate
//! scheduler processes.
//!
//! | Type                  | Behaviour                                                |
//! |-----------------------|----------------------------------------------------------|
//! | [`CloudControlClient`] | reqwest client, retries unreachable-host failures        |
//! | [`Reauthenticating`]   | wraps any dispatcher, one re-auth + retry on 401         |
//! | [`RetryPolicy`]        | bounded fixed-delay retry combinator                     |

pub mod client;
pub mod error;
pub mod reauth;
pub mod retry;
pub mod types;

pub use client::{params_match, CloudControlClient, WorkerDispatch};
pub use error::{DispatchError, Result};
pub use reauth::Reauthenticating;
pub use retry::{RetryExhausted, RetryPolicy};
pub use types::{AuthToken, WorkerHandle};
