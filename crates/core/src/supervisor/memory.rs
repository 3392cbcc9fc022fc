use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{ProcessSupervisor, StartSpec};
use crate::model::{ManagedProcess, ProcessStatus};

/// In-process supervisor for tests. Started processes go
/// straight to `online`; nothing is actually executed.
#[derive(Default)]
pub struct MemorySupervisor {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    table: BTreeMap<String, ProcessStatus>,
    persisted: Vec<String>,
    started: Vec<StartSpec>,
    restarts: Vec<String>,
    connects: usize,
    disconnects: usize,
    fail: HashSet<String>,
}

impl MemorySupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seeds a process as if it had been started earlier.
    pub fn insert(&self, name: &str, status: ProcessStatus) {
        self.lock().table.insert(name.to_string(), status);
    }

    pub fn set_status(&self, name: &str, status: ProcessStatus) {
        if let Some(s) = self.lock().table.get_mut(name) {
            *s = status;
        }
    }

    pub fn status(&self, name: &str) -> Option<ProcessStatus> {
        self.lock().table.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().table.keys().cloned().collect()
    }

    /// Makes the named operation (`connect`, `list`, `start`, `restart`,
    /// `delete`, `persist`) fail until [`Self::clear_failures`].
    pub fn fail_on(&self, op: &str) {
        self.lock().fail.insert(op.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().fail.clear();
    }

    pub fn started(&self) -> Vec<StartSpec> {
        self.lock().started.clone()
    }

    pub fn restarts(&self) -> Vec<String> {
        self.lock().restarts.clone()
    }

    pub fn persisted_names(&self) -> Vec<String> {
        self.lock().persisted.clone()
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }
}

impl Inner {
    fn check(&self, op: &str) -> Result<(), String> {
        if self.fail.contains(op) {
            Err(format!("injected {op} failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProcessSupervisor for MemorySupervisor {
    async fn connect(&self) -> Result<(), String> {
        let mut inner = self.lock();
        inner.check("connect")?;
        inner.connects += 1;
        Ok(())
    }

    async fn disconnect(&self) {
        self.lock().disconnects += 1;
    }

    async fn list(&self) -> Result<Vec<ManagedProcess>, String> {
        let inner = self.lock();
        inner.check("list")?;
        Ok(inner
            .table
            .iter()
            .map(|(name, status)| ManagedProcess {
                name: name.clone(),
                status: status.clone(),
            })
            .collect())
    }

    async fn start(&self, spec: &StartSpec) -> Result<(), String> {
        let mut inner = self.lock();
        inner.check("start")?;
        if inner.table.contains_key(&spec.name) {
            return Err(format!("{} already exists", spec.name));
        }
        inner.table.insert(spec.name.clone(), ProcessStatus::Online);
        inner.started.push(spec.clone());
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<(), String> {
        let mut inner = self.lock();
        inner.check("restart")?;
        let Some(status) = inner.table.get_mut(name) else {
            return Err(format!("process {name} not found"));
        };
        *status = ProcessStatus::Online;
        inner.restarts.push(name.to_string());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), String> {
        let mut inner = self.lock();
        inner.check("delete")?;
        inner
            .table
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| format!("process {name} not found"))
    }

    async fn persist(&self) -> Result<(), String> {
        let mut inner = self.lock();
        inner.check("persist")?;
        let names = inner.table.keys().cloned().collect();
        inner.persisted = names;
        Ok(())
    }
}
