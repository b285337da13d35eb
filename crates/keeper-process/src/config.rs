use std::{collections::BTreeMap, path::PathBuf};

use serde::Deserialize;

use crate::spec::{DEFAULT_MAX_RESTARTS, ProcessSpec, SpecError};

/// `{"apps": [...]}` as handed to the host binary.
#[derive(Debug, Clone, Deserialize)]
pub struct AppsFile {
    pub apps: Vec<AppConfig>,
}

/// `args` may be a single command line or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ArgsConfig {
    Line(String),
    List(Vec<String>),
}

impl Default for ArgsConfig {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl ArgsConfig {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            // No quoting rules: a line is split on whitespace only.
            Self::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            Self::List(list) => list.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WatchConfig {
    Enabled(bool),
    Paths(Vec<PathBuf>),
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::Enabled(false)
    }
}

/// Serde shape of one app entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(alias = "script")]
    pub command: String,
    #[serde(default)]
    pub args: ArgsConfig,
    #[serde(default)]
    pub interpreter: Option<PathBuf>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_auto_restart", alias = "autorestart")]
    pub auto_restart: bool,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: i64,
    #[serde(default)]
    pub watch: WatchConfig,
}

fn default_auto_restart() -> bool {
    true
}

fn default_max_restarts() -> i64 {
    i64::from(DEFAULT_MAX_RESTARTS)
}

impl AppConfig {
    pub fn into_spec(self) -> Result<ProcessSpec, SpecError> {
        if self.max_restarts < 0 {
            return Err(SpecError::NegativeMaxRestarts(self.max_restarts));
        }
        let max_restarts = u32::try_from(self.max_restarts).unwrap_or(u32::MAX);

        let (watch, watch_paths) = match self.watch {
            WatchConfig::Enabled(on) => (on, Vec::new()),
            WatchConfig::Paths(paths) => (!paths.is_empty(), paths),
        };

        let mut spec = ProcessSpec::new(self.command)
            .with_args(self.args.to_vec())
            .with_auto_restart(self.auto_restart)
            .with_max_restarts(max_restarts)
            .with_watch(watch)
            .with_watch_paths(watch_paths);
        if let Some(i) = self.interpreter {
            spec = spec.with_interpreter(i);
        }
        if let Some(cwd) = self.cwd {
            spec = spec.with_cwd(cwd);
        }
        for (k, v) in self.env {
            spec = spec.with_env(k, v);
        }

        spec.validate()?;
        Ok(spec)
    }
}
