use keeper_process::{ProcessId, SpecError};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("invalid process spec: {0}")]
    InvalidSpec(#[from] SpecError),
    #[error("process already running: {0}")]
    AlreadyRunning(ProcessId),
    #[error("spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown process handle: {0}")]
    NotFound(ProcessId),
    #[error("process is not running: {0}")]
    NotRunning(ProcessId),
    #[error("process {id} crashed (exit_code={exit_code:?} signal={signal:?})")]
    Crashed {
        id: ProcessId,
        exit_code: Option<i32>,
        signal: Option<i32>,
    },
    #[error("process {id} exhausted its restart budget after {restarts} restarts")]
    Exhausted { id: ProcessId, restarts: u32 },
}

impl SupervisorError {
    /// OS error code of a failed spawn.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::SpawnFailed { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("app name must be non-empty")]
    EmptyName,
    #[error("duplicate app name: {0}")]
    DuplicateName(String),
    #[error("invalid app {name}: {source}")]
    InvalidApp {
        name: String,
        #[source]
        source: SpecError,
    },
    #[error("unknown app: {0}")]
    UnknownApp(String),
}
