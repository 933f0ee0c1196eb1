use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CloudcronError, Result};

pub const DEFAULT_API_URL: &str = "https://api.cloudcontrol.com";
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_TICK_SECS: u64 = 10; // reload check granularity
pub const DEFAULT_WAIT_TICKS: u32 = 6; // 6 x 10s = one cron minute

/// Params prefix identifying the running scheduler's marker worker.
pub const CRON_MARKER_PREFIX: &str = "cloudcontrol:cron";
/// Params prefix identifying a pending reload request worker.
pub const RELOAD_MARKER_PREFIX: &str = "cloudcontrol:reload-cron";

/// Top-level config (cloudcron.toml + CLOUDCRON_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudcronConfig {
    #[serde(default)]
    pub cloudcontrol: CloudControlConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Account and deployment used to talk to the cloudControl worker API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudControlConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub application: String,
    #[serde(default)]
    pub deployment: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    /// Attempts per request when the API host cannot be reached.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Fixed delay between those attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CloudControlConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            application: String::new(),
            deployment: String::new(),
            email: String::new(),
            password: String::new(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CloudControlConfig {
    /// Reject a configuration that cannot possibly authenticate or address a deployment.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("application", &self.application),
            ("deployment", &self.deployment),
            ("email", &self.email),
            ("password", &self.password),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(CloudcronError::Config(format!(
                    "cloudcontrol.{name} is missing"
                )));
            }
        }
        if self.retry_attempts == 0 {
            return Err(CloudcronError::Config(
                "cloudcontrol.retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// How single-instance detection and reload requests are carried between processes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MarkerStrategy {
    /// Marker workers registered against the cloudControl API. Needs no shared filesystem.
    #[default]
    Worker,
    /// PID file and reload lock file under `marker_dir`.
    PidFile,
}

/// Clock used when evaluating cron expressions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimezoneMode {
    #[default]
    Utc,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_application")]
    pub application: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub marker: MarkerStrategy,
    #[serde(default = "default_marker_dir")]
    pub marker_dir: String,
    /// Command registered for marker workers.
    #[serde(default = "default_marker_command")]
    pub marker_command: String,
    /// Worker id of this process when it runs as a cloudControl worker itself.
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_wait_ticks")]
    pub wait_ticks: u32,
    #[serde(default)]
    pub timezone: TimezoneMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            application: default_application(),
            environment: default_environment(),
            marker: MarkerStrategy::default(),
            marker_dir: default_marker_dir(),
            marker_command: default_marker_command(),
            worker_id: None,
            tick_secs: DEFAULT_TICK_SECS,
            wait_ticks: DEFAULT_WAIT_TICKS,
            timezone: TimezoneMode::default(),
        }
    }
}

impl SchedulerConfig {
    /// Params string identifying this application/environment's scheduler marker.
    pub fn cron_marker_params(&self) -> String {
        format!(
            "{CRON_MARKER_PREFIX} --env={} --application={}",
            self.environment, self.application
        )
    }

    /// Params string identifying a reload request for this application/environment.
    pub fn reload_marker_params(&self) -> String {
        format!(
            "{RELOAD_MARKER_PREFIX} --env={} --application={}",
            self.environment, self.application
        )
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}
fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}
fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_application() -> String {
    "backend".to_string()
}
fn default_environment() -> String {
    "dev".to_string()
}
fn default_marker_command() -> String {
    "cloudcron".to_string()
}
fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}
fn default_wait_ticks() -> u32 {
    DEFAULT_WAIT_TICKS
}
fn default_marker_dir() -> String {
    std::env::temp_dir()
        .join("cloudcron")
        .to_string_lossy()
        .into_owned()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cloudcron/cloudcron.db", home)
}

impl CloudcronConfig {
    /// Load config from a TOML file with CLOUDCRON_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g. `CLOUDCRON_CLOUDCONTROL__PASSWORD`.
    /// A missing file is not an error; every section has defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CloudcronConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CLOUDCRON_").split("__"))
            .extract()
            .map_err(|e| CloudcronError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cloudcron/cloudcron.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_reads_toml_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloudcron.toml");
        std::fs::write(
            &path,
            r#"
[cloudcontrol]
application = "shop"
deployment = "default"
email = "ops@example.com"
password = "secret"
retry_delay_ms = 250

[scheduler]
environment = "prod"
marker = "pid-file"
wait_ticks = 3
"#,
        )
        .unwrap();

        let config = CloudcronConfig::load(path.to_str()).unwrap();
        assert_eq!(config.cloudcontrol.application, "shop");
        assert_eq!(config.cloudcontrol.retry_delay_ms, 250);
        assert_eq!(config.cloudcontrol.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(config.cloudcontrol.api_url, DEFAULT_API_URL);
        assert_eq!(config.scheduler.environment, "prod");
        assert_eq!(config.scheduler.application, "backend");
        assert_eq!(config.scheduler.marker, MarkerStrategy::PidFile);
        assert_eq!(config.scheduler.wait_ticks, 3);
        assert_eq!(config.scheduler.tick_secs, DEFAULT_TICK_SECS);
        assert!(config.cloudcontrol.validate().is_ok());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = CloudcronConfig::load(path.to_str()).unwrap();
        assert_eq!(config.scheduler.marker, MarkerStrategy::Worker);
        assert_eq!(config.scheduler.timezone, TimezoneMode::Utc);
    }

    #[test]
    fn validate_rejects_missing_credentials() {
        let cfg = CloudControlConfig {
            application: "shop".into(),
            deployment: "default".into(),
            email: "ops@example.com".into(),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("password"));
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn marker_params_encode_environment_and_application() {
        let cfg = SchedulerConfig {
            application: "frontend".into(),
            environment: "prod".into(),
            ..Default::default()
        };
        assert_eq!(
            cfg.cron_marker_params(),
            "cloudcontrol:cron --env=prod --application=frontend"
        );
        assert!(cfg.reload_marker_params().starts_with(RELOAD_MARKER_PREFIX));
    }
}
