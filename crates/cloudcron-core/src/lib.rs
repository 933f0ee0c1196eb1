//! `cloudcron-core`: configuration, shared errors and process exit codes.

pub mod config;
pub mod error;
pub mod exit;

pub use config::CloudcronConfig;
pub use error::{CloudcronError, Result};
pub use exit::TaskExit;
