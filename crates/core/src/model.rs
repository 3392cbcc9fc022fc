use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier assigned to a release by the release host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ReleaseId(pub u64);

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One declared application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppSpec {
    /// Unique id. Used as the install directory name and the process name suffix.
    pub id: String,
    /// Where releases come from.
    pub repo: RepoRef,
}

/// Source repository plus the release intent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub release: ReleasePin,
}

/// Pins a specific release; `id: null` tracks the latest release.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReleasePin {
    #[serde(default)]
    pub id: Option<ReleaseId>,
}

impl RepoRef {
    pub fn desired_release(&self) -> Option<ReleaseId> {
        self.release.id
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A concrete release resolved from a [`RepoRef`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    pub id: ReleaseId,
    /// Display name, diagnostic only.
    pub name: String,
    pub archive_url: String,
}

/// Supervisor-reported process status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    Online,
    Launching,
    Stopping,
    Stopped,
    Errored,
    /// Anything the supervisor reports that we don't model.
    Other(String),
}

impl ProcessStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "online" => Self::Online,
            "launching" => Self::Launching,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "errored" => Self::Errored,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Online => "online",
            Self::Launching => "launching",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Errored => "errored",
            Self::Other(s) => s,
        }
    }

    /// Registered but not running: the process needs a restart.
    pub fn needs_restart(&self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped | Self::Errored)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProcessStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProcessStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// A process as the supervisor sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagedProcess {
    pub name: String,
    pub status: ProcessStatus,
}

/// Maps app ids to supervisor process names and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessNaming {
    prefix: String,
}

impl ProcessNaming {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn process_name(&self, app_id: &str) -> String {
        format!("{}{}", self.prefix, app_id)
    }

    /// App id for a process we manage, `None` for foreign processes.
    pub fn app_id<'a>(&self, process_name: &'a str) -> Option<&'a str> {
        process_name
            .strip_prefix(self.prefix.as_str())
            .filter(|id| !id.is_empty())
    }
}
