mod config;
mod spec;

pub use config::{AppConfig, AppsFile, ArgsConfig, WatchConfig};
pub use spec::{DEFAULT_MAX_RESTARTS, ProcessSpec, SpecError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProcessId(pub String);

impl ProcessId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Control token returned by a successful start.
///
/// A handle only addresses the run it was issued for; once the supervisor
/// is started again the old handle is stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    id: ProcessId,
}

impl Handle {
    pub fn new() -> Self {
        Self {
            id: ProcessId::new(),
        }
    }

    pub fn id(&self) -> &ProcessId {
        &self.id
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
    Exhausted,
}

impl ProcessState {
    /// A pid is only meaningful in these states.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    pub fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Crashed)
                | (Running, Stopping)
                | (Running, Crashed)
                | (Stopping, Stopped)
                | (Stopping, Starting)
                | (Crashed, Starting)
                | (Crashed, Exhausted)
                | (Crashed, Stopped)
        )
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
            Self::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProcessStatus {
    pub id: ProcessId,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub message: Option<String>,
}
