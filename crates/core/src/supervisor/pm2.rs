use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ProcessSupervisor, StartSpec};
use crate::model::{ManagedProcess, ProcessStatus};

/// Drives a local pm2 daemon through its CLI. Each operation is a separate
/// invocation, so `disconnect` has nothing to release.
#[derive(Debug, Clone)]
pub struct Pm2Supervisor {
    binary: PathBuf,
}

impl Default for Pm2Supervisor {
    fn default() -> Self {
        Self::new("pm2")
    }
}

impl Pm2Supervisor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[&str], cwd: Option<&std::path::Path>) -> Result<String, String> {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        let out = cmd
            .output()
            .await
            .map_err(|e| format!("run {} {:?}: {e}", self.binary.display(), args))?;
        if !out.status.success() {
            return Err(format!(
                "{} {:?} failed ({})\nstdout:{}\nstderr:{}",
                self.binary.display(),
                args,
                out.status,
                String::from_utf8_lossy(&out.stdout).trim(),
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }
}

#[derive(Debug, Deserialize)]
struct JlistEntry {
    name: String,
    #[serde(default)]
    pm2_env: Option<JlistEnv>,
}

#[derive(Debug, Deserialize)]
struct JlistEnv {
    #[serde(default)]
    status: Option<String>,
}

fn parse_jlist(raw: &str) -> Result<Vec<ManagedProcess>, String> {
    let entries: Vec<JlistEntry> =
        serde_json::from_str(raw).map_err(|e| format!("unexpected jlist output: {e}"))?;
    Ok(entries
        .into_iter()
        .map(|e| ManagedProcess {
            name: e.name,
            status: ProcessStatus::parse(
                e.pm2_env
                    .and_then(|env| env.status)
                    .as_deref()
                    .unwrap_or("unknown"),
            ),
        })
        .collect())
}

#[async_trait]
impl ProcessSupervisor for Pm2Supervisor {
    async fn connect(&self) -> Result<(), String> {
        self.run(&["ping"], None).await.map(|_| ())
    }

    async fn disconnect(&self) {}

    async fn list(&self) -> Result<Vec<ManagedProcess>, String> {
        let raw = self.run(&["jlist"], None).await?;
        parse_jlist(&raw)
    }

    async fn start(&self, spec: &StartSpec) -> Result<(), String> {
        let cwd = spec.cwd.to_string_lossy();
        self.run(
            &["start", &spec.script, "--name", &spec.name, "--cwd", &cwd],
            Some(&spec.cwd),
        )
        .await
        .map(|_| ())
    }

    async fn restart(&self, name: &str) -> Result<(), String> {
        self.run(&["restart", name], None).await.map(|_| ())
    }

    async fn delete(&self, name: &str) -> Result<(), String> {
        self.run(&["delete", name], None).await.map(|_| ())
    }

    async fn persist(&self) -> Result<(), String> {
        self.run(&["save"], None).await.map(|_| ())
    }
}
