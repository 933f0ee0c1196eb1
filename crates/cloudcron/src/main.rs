use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use cloudcron_core::{CloudcronConfig, TaskExit};
use cloudcron_dispatch::CloudControlClient;
use cloudcron_scheduler::{
    run_task, Clock, CronExpression, HeartbeatTask, ReloadHandle, SchedulerLoop,
    SqliteScheduleStore, SystemClock,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod commands;
mod markers;
mod signal;

#[derive(Parser, Debug)]
#[command(name = "cloudcron")]
#[command(about = "Runs a crontab by starting cloudControl workers")]
#[command(version)]
struct Cli {
    /// Config file. Defaults to $CLOUDCRON_CONFIG, then ~/.cloudcron/cloudcron.toml.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Application name, overrides scheduler.application.
    #[arg(long, global = true)]
    application: Option<String>,

    /// Environment, overrides scheduler.environment.
    #[arg(long, global = true)]
    env: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the cron loop until interrupted.
    Cron,
    /// Ask the running cron loop to reload its crontab.
    ReloadCron,
    /// Log a counter at a fixed interval until interrupted.
    Heartbeat {
        #[arg(long, default_value_t = 15)]
        interval_secs: u64,
    },
    /// Check a schedule and print its next run times.
    Validate {
        schedule: String,
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
    /// Manage crontab entries.
    #[command(subcommand)]
    Entry(commands::EntryCommand),
    /// Inspect or stop remote workers.
    #[command(subcommand)]
    Workers(commands::WorkersCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cloudcron=info,cloudcron_scheduler=info,cloudcron_dispatch=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(exit) => exit.into(),
        Err(e) => {
            error!("{e:#}");
            TaskExit::Restart.into()
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<TaskExit> {
    // validate and heartbeat need no configuration
    match &cli.command {
        Command::Validate { schedule, count } => return Ok(validate(schedule, *count)),
        Command::Heartbeat { interval_secs } => return Ok(heartbeat(*interval_secs).await),
        _ => {}
    }

    // config: --config > CLOUDCRON_CONFIG env > ~/.cloudcron/cloudcron.toml
    let config_path = cli.config.or_else(|| std::env::var("CLOUDCRON_CONFIG").ok());
    let mut config = match CloudcronConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(code = e.code(), "{e}");
            return Ok(TaskExit::Fatal);
        }
    };
    if let Some(application) = cli.application {
        config.scheduler.application = application;
    }
    if let Some(env) = cli.env {
        config.scheduler.environment = env;
    }

    match cli.command {
        Command::Cron => cron(&config).await,
        Command::ReloadCron => commands::reload_cron(&config).await,
        Command::Entry(cmd) => commands::entry(&config, cmd).await,
        Command::Workers(cmd) => commands::workers(&config, cmd).await,
        Command::Validate { .. } | Command::Heartbeat { .. } => Ok(TaskExit::Clean),
    }
}

async fn cron(config: &CloudcronConfig) -> anyhow::Result<TaskExit> {
    if let Err(e) = config.cloudcontrol.validate() {
        error!(code = e.code(), "{e}");
        return Ok(TaskExit::Fatal);
    }
    let scheduler_cfg = &config.scheduler;
    info!(
        application = %scheduler_cfg.application,
        environment = %scheduler_cfg.environment,
        marker = ?scheduler_cfg.marker,
        "starting cron"
    );

    let client = Arc::new(CloudControlClient::new(&config.cloudcontrol)?);
    ensure_parent_dir(&config.database.path);
    let store = SqliteScheduleStore::open(&config.database.path)?;
    let (lock, reload_marker) = markers::build(config, client.clone());

    let cancel = CancellationToken::new();
    let reload = ReloadHandle::new();
    signal::spawn_handlers(cancel.clone(), reload.clone());

    let scheduler = SchedulerLoop::new(Box::new(store), client, lock, reload_marker)
        .with_clock(Box::new(SystemClock::new(scheduler_cfg.timezone)))
        .with_timing(
            Duration::from_secs(scheduler_cfg.tick_secs),
            scheduler_cfg.wait_ticks,
        )
        .with_reload_handle(reload);
    Ok(scheduler.run(cancel).await)
}

async fn heartbeat(interval_secs: u64) -> TaskExit {
    let cancel = CancellationToken::new();
    signal::spawn_handlers(cancel.clone(), ReloadHandle::new());
    let mut task = HeartbeatTask::new(Duration::from_secs(interval_secs));
    run_task(&mut task, cancel).await
}

fn validate(schedule: &str, count: usize) -> TaskExit {
    let expression = match CronExpression::parse(schedule) {
        Ok(expression) => expression,
        Err(e) => {
            println!("invalid: {e}");
            return TaskExit::Fatal;
        }
    };
    match expression.upcoming(SystemClock::default().now(), count) {
        Ok(runs) => {
            println!("valid: {expression}");
            for run in runs {
                println!("  {run}");
            }
            TaskExit::Clean
        }
        Err(e) => {
            println!("invalid: {e}");
            TaskExit::Fatal
        }
    }
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
