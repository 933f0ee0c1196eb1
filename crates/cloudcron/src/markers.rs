use std::sync::Arc;

use cloudcron_core::config::{CloudcronConfig, MarkerStrategy};
use cloudcron_dispatch::{CloudControlClient, Reauthenticating, WorkerDispatch};
use cloudcron_scheduler::{
    FileReloadMarker, InstanceLock, PidFileLock, ReloadMarker, WorkerMarkerLock,
    WorkerReloadMarker,
};

/// Instance lock and reload marker for the configured strategy.
///
/// Worker markers go through a re-authenticating wrapper so a stale token
/// never fails lock or reload handling.
pub fn build(
    config: &CloudcronConfig,
    client: Arc<CloudControlClient>,
) -> (Box<dyn InstanceLock>, Box<dyn ReloadMarker>) {
    let s = &config.scheduler;
    match s.marker {
        MarkerStrategy::Worker => {
            let api: Arc<dyn WorkerDispatch> = Arc::new(Reauthenticating::new(client));
            let cron_params = s.cron_marker_params();
            (
                Box::new(WorkerMarkerLock::new(
                    api.clone(),
                    &s.marker_command,
                    &cron_params,
                    s.worker_id.clone(),
                )),
                Box::new(WorkerReloadMarker::new(
                    api,
                    &s.marker_command,
                    &cron_params,
                    &s.reload_marker_params(),
                )),
            )
        }
        MarkerStrategy::PidFile => (
            Box::new(PidFileLock::new(&s.marker_dir, &s.application, &s.environment)),
            Box::new(FileReloadMarker::new(&s.marker_dir, &s.application, &s.environment)),
        ),
    }
}
