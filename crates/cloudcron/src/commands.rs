use std::sync::Arc;

use clap::Subcommand;
use cloudcron_core::config::{CloudcronConfig, MarkerStrategy};
use cloudcron_core::TaskExit;
use cloudcron_dispatch::{CloudControlClient, Reauthenticating, WorkerDispatch};
use cloudcron_scheduler::{
    Clock, ReloadRequest, ScheduleEntry, ScheduleStore, SqliteScheduleStore, SystemClock,
};
use tracing::{info, warn};

use crate::markers;

#[derive(Subcommand, Debug)]
pub enum EntryCommand {
    /// Add an entry and print its id.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        command: String,
        #[arg(long, default_value = "")]
        parameters: String,
        schedule: String,
    },
    /// List entries in dispatch order.
    List,
    /// Delete an entry.
    Remove { id: String },
    /// Change an entry's schedule.
    SetSchedule { id: String, schedule: String },
}

#[derive(Subcommand, Debug)]
pub enum WorkersCommand {
    /// List workers of the configured deployment.
    List,
    /// Stop a worker.
    Remove { id: String },
}

pub async fn reload_cron(config: &CloudcronConfig) -> anyhow::Result<TaskExit> {
    match request_reload(config).await? {
        ReloadRequest::Requested => info!("reload requested"),
        ReloadRequest::NoProcess => info!("no cron process running, nothing to reload"),
    }
    Ok(TaskExit::Clean)
}

async fn request_reload(config: &CloudcronConfig) -> anyhow::Result<ReloadRequest> {
    if config.scheduler.marker == MarkerStrategy::Worker {
        config.cloudcontrol.validate()?;
    }
    let client = Arc::new(CloudControlClient::new(&config.cloudcontrol)?);
    let (_, reload_marker) = markers::build(config, client);
    Ok(reload_marker.request().await?)
}

pub async fn entry(config: &CloudcronConfig, cmd: EntryCommand) -> anyhow::Result<TaskExit> {
    super::ensure_parent_dir(&config.database.path);
    let mut store = SqliteScheduleStore::open(&config.database.path)?;
    let clock = SystemClock::new(config.scheduler.timezone);

    let reload_needed = match cmd {
        EntryCommand::Add {
            name,
            command,
            parameters,
            schedule,
        } => {
            let entry = match ScheduleEntry::new(&name, &command, &parameters, &schedule, clock.now()) {
                Ok(entry) => entry,
                Err(e) => {
                    println!("invalid: {e}");
                    return Ok(TaskExit::Fatal);
                }
            };
            store.insert(&entry)?;
            println!("{}", entry.id);
            entry.affects_schedule(None)
        }
        EntryCommand::List => {
            for e in store.load_all()? {
                let last_run = e
                    .last_run_at
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}  {:<15} {:<20} {} {}  (last run: {last_run})",
                    e.id, e.expression, e.name, e.command, e.parameters
                );
            }
            false
        }
        EntryCommand::Remove { id } => store.delete(&id)?.affects_schedule(None),
        EntryCommand::SetSchedule { id, schedule } => {
            let (before, after) = store.update_schedule(&id, &schedule, clock.now())?;
            after.affects_schedule(Some(&before))
        }
    };
    store.close();

    if reload_needed {
        match request_reload(config).await {
            Ok(request) => info!(?request, "crontab changed"),
            Err(e) => warn!("crontab saved, but reload request failed: {e:#}"),
        }
    }
    Ok(TaskExit::Clean)
}

pub async fn workers(config: &CloudcronConfig, cmd: WorkersCommand) -> anyhow::Result<TaskExit> {
    config.cloudcontrol.validate()?;
    let api = Reauthenticating::new(CloudControlClient::new(&config.cloudcontrol)?);
    match cmd {
        WorkersCommand::List => {
            for w in api.list_workers().await? {
                println!("{}  {} {}", w.worker_id, w.command, w.parameters);
            }
        }
        WorkersCommand::Remove { id } => {
            api.remove_worker(&id).await?;
            println!("removed {id}");
        }
    }
    Ok(TaskExit::Clean)
}
