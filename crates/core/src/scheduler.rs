//! Periodic driver for [`FleetReconciler`]: one cycle at a time, with a fixed
//! delay after each cycle completes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument};

use crate::config::{Config, ConfigStore};
use crate::fleet::{Backends, CycleReport, FleetReconciler};
use crate::new_ulid;

/// Owned by whoever spawned the scheduler.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    trigger: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Shared wake-up signal, for callers that outlive a borrow of the handle.
    pub fn trigger(&self) -> Arc<Notify> {
        self.trigger.clone()
    }

    /// Ends the current wait early. A request made during a cycle starts the
    /// next cycle right after it.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    /// Lets an in-flight cycle finish, then stops the loop.
    pub async fn shutdown_and_join(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            error!("scheduler task ended abnormally: {e}");
        }
    }
}

pub fn spawn_scheduler(store: Arc<ConfigStore>, backends: Backends) -> SchedulerHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let trigger = Arc::new(Notify::new());
    let join = tokio::spawn(run_loop(store, backends, trigger.clone(), shutdown_rx));
    SchedulerHandle {
        shutdown_tx,
        trigger,
        join,
    }
}

async fn run_loop(
    store: Arc<ConfigStore>,
    backends: Backends,
    trigger: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let start_delay = store.snapshot().await.maintenance.start_delay_ms;
    if start_delay > 0 && !wait(Duration::from_millis(start_delay), &trigger, &mut shutdown).await {
        return;
    }

    loop {
        if *shutdown.borrow() {
            break;
        }
        let config = store.snapshot().await;
        run_cycle(&config, &store.base_dir(), &backends).await;

        let period = Duration::from_millis(config.maintenance.period_ms);
        if !wait(period, &trigger, &mut shutdown).await {
            break;
        }
    }
    info!("scheduler stopped");
}

/// `false` on shutdown.
async fn wait(period: Duration, trigger: &Notify, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(period) => true,
        _ = trigger.notified() => {
            info!("maintenance run requested");
            true
        }
        _ = shutdown.changed() => false,
    }
}

/// One cycle against the store's current snapshot.
pub async fn run_once(store: &ConfigStore, backends: &Backends) -> CycleReport {
    let config = store.snapshot().await;
    run_cycle(&config, &store.base_dir(), backends).await
}

async fn run_cycle(config: &Config, base_dir: &Path, backends: &Backends) -> CycleReport {
    let span = info_span!("cycle", id = %new_ulid());
    async {
        let apps_root = config.apps_root(base_dir);
        let fleet = match FleetReconciler::from_config(config, apps_root.clone(), backends) {
            Ok(fleet) => fleet,
            Err(e) => {
                error!(error = %e, "cannot build reconciler, skipping cycle");
                return CycleReport {
                    failed: vec![("config".to_string(), e.to_string())],
                    ..Default::default()
                };
            }
        };
        info!(apps = config.apps.len(), root = %apps_root.display(), "maintenance cycle started");
        fleet.reconcile_all(&config.apps).await
    }
    .instrument(span)
    .await
}
