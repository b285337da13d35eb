use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

pub const DEFAULT_MAX_RESTARTS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("command must be non-empty")]
    EmptyCommand,
    #[error("interpreter must be non-empty when set")]
    EmptyInterpreter,
    #[error("invalid environment variable name: {0:?}")]
    InvalidEnvKey(String),
    #[error("max_restarts must be >= 0 (got {0})")]
    NegativeMaxRestarts(i64),
}

/// Launch parameters for one managed process.
///
/// Built with the `with_*` methods and read through accessors; nothing can
/// change a spec once it has been handed to a supervisor.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ProcessSpec {
    command: String,
    args: Vec<String>,
    interpreter: Option<PathBuf>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
    auto_restart: bool,
    max_restarts: u32,
    watch: bool,
    watch_paths: Vec<PathBuf>,
}

impl ProcessSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            interpreter: None,
            env: BTreeMap::new(),
            cwd: None,
            auto_restart: true,
            max_restarts: DEFAULT_MAX_RESTARTS,
            watch: false,
            watch_paths: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_auto_restart(mut self, auto_restart: bool) -> Self {
        self.auto_restart = auto_restart;
        self
    }

    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_watch_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.watch_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn interpreter(&self) -> Option<&Path> {
        self.interpreter.as_deref()
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn auto_restart(&self) -> bool {
        self.auto_restart
    }

    /// Restart budget; only meaningful when `auto_restart` is set.
    pub fn max_restarts(&self) -> u32 {
        self.max_restarts
    }

    pub fn watch(&self) -> bool {
        self.watch
    }

    pub fn watch_paths(&self) -> &[PathBuf] {
        &self.watch_paths
    }

    /// The binary actually executed: the interpreter when one is set.
    pub fn program(&self) -> &std::ffi::OsStr {
        match &self.interpreter {
            Some(i) => i.as_os_str(),
            None => std::ffi::OsStr::new(&self.command),
        }
    }

    /// Arguments passed to [`ProcessSpec::program`].
    pub fn argv(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len() + 1);
        if self.interpreter.is_some() {
            out.push(self.command.clone());
        }
        out.extend(self.args.iter().cloned());
        out
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.command.trim().is_empty() {
            return Err(SpecError::EmptyCommand);
        }
        if let Some(i) = &self.interpreter
            && i.as_os_str().is_empty()
        {
            return Err(SpecError::EmptyInterpreter);
        }
        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(SpecError::InvalidEnvKey(key.clone()));
            }
        }
        Ok(())
    }
}
