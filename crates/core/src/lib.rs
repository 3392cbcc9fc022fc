#![forbid(unsafe_code)]

//! Keeps a fleet of declared apps installed from their latest (or pinned)
//! release and running under a process supervisor.

pub mod config;
pub mod fleet;
pub mod install;
pub mod layout;
pub mod model;
pub mod reconcile;
pub mod record;
pub mod release;
pub mod scheduler;
pub mod supervisor;
pub mod validation;

mod util;

#[cfg(test)]
mod test_http;

pub use config::{Config, ConfigStore};
pub use fleet::{Backends, CycleReport, FleetReconciler};
pub use model::{AppSpec, ReleaseDescriptor, ReleaseId};
pub use scheduler::{run_once, spawn_scheduler, SchedulerHandle};
pub use util::{new_ulid, now_ms};
