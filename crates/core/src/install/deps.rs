use std::path::Path;
use std::process::Stdio;

/// External command that installs an app's dependencies inside its
/// directory, `npm update` by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCommand {
    program: String,
    args: Vec<String>,
    fail_on_stderr: bool,
}

/// Why a dependency install was judged failed, with everything it printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyFailure {
    pub reason: String,
    pub stdout: String,
    pub stderr: String,
}

impl DependencyCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>, fail_on_stderr: bool) -> Self {
        Self {
            program: program.into(),
            args,
            fail_on_stderr,
        }
    }

    /// `None` for an empty argv.
    pub fn from_argv(argv: &[String], fail_on_stderr: bool) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec(), fail_on_stderr))
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Runs to completion in `dir`. Returns trimmed stdout on success.
    pub async fn run(&self, dir: &Path) -> Result<String, DependencyFailure> {
        let out = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DependencyFailure {
                reason: format!("failed to spawn: {e}"),
                stdout: String::new(),
                stderr: String::new(),
            })?;

        let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();

        let reason = if !out.status.success() {
            Some(format!("exited with {}", out.status))
        } else if self.fail_on_stderr && !stderr.is_empty() {
            Some("wrote to stderr".to_string())
        } else {
            None
        };

        match reason {
            Some(reason) => Err(DependencyFailure {
                reason,
                stdout,
                stderr,
            }),
            None => Ok(stdout),
        }
    }
}
