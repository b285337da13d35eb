use std::{collections::BTreeMap, sync::Arc, time::Duration};

use keeper_process::{AppConfig, Handle, ProcessSpec, ProcessStatus};
use tokio::sync::Mutex;

use crate::error::ConfigError;
use crate::support::SupervisorConfig;
use crate::supervisor::Supervisor;

#[derive(Debug)]
struct ManagedApp {
    spec: ProcessSpec,
    supervisor: Supervisor,
    handle: Mutex<Option<Handle>>,
}

/// Name → supervisor table owned by the host.
///
/// Each app gets its own [`Supervisor`]; nothing is shared between them.
#[derive(Clone, Debug, Default)]
pub struct ProcessTable {
    apps: Arc<BTreeMap<String, ManagedApp>>,
}

impl ProcessTable {
    pub fn from_apps(apps: Vec<AppConfig>, config: SupervisorConfig) -> Result<Self, ConfigError> {
        let mut out = BTreeMap::new();
        for app in apps {
            let name = app.name.trim().to_string();
            if name.is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if out.contains_key(&name) {
                return Err(ConfigError::DuplicateName(name));
            }
            let spec = app
                .into_spec()
                .map_err(|source| ConfigError::InvalidApp {
                    name: name.clone(),
                    source,
                })?;
            out.insert(
                name,
                ManagedApp {
                    spec,
                    supervisor: Supervisor::new(config),
                    handle: Mutex::new(None),
                },
            );
        }
        Ok(Self {
            apps: Arc::new(out),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.apps.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&Supervisor> {
        self.apps.get(name).map(|a| &a.supervisor)
    }

    fn app(&self, name: &str) -> anyhow::Result<&ManagedApp> {
        self.apps
            .get(name)
            .ok_or_else(|| ConfigError::UnknownApp(name.to_string()).into())
    }

    pub async fn start(&self, name: &str) -> anyhow::Result<Handle> {
        let app = self.app(name)?;
        let handle = app.supervisor.start(app.spec.clone()).await?;
        *app.handle.lock().await = Some(handle.clone());
        tracing::info!(app = name, process_id = %handle.id(), "app started");
        Ok(handle)
    }

    /// Starts every app; stops at the first failure, leaving earlier apps running.
    pub async fn start_all(&self) -> anyhow::Result<()> {
        for name in self.apps.keys() {
            self.start(name).await.map_err(|e| e.context(format!("start app {name}")))?;
        }
        Ok(())
    }

    pub async fn stop(&self, name: &str, timeout: Duration) -> anyhow::Result<()> {
        let app = self.app(name)?;
        let Some(handle) = app.handle.lock().await.clone() else {
            return Ok(());
        };
        app.supervisor.stop(&handle, timeout).await?;
        Ok(())
    }

    /// Stops every app concurrently; returns the first error after all finished.
    pub async fn stop_all(&self, timeout: Duration) -> anyhow::Result<()> {
        let mut tasks = Vec::new();
        for name in self.apps.keys() {
            let table = self.clone();
            let name = name.clone();
            tasks.push(tokio::spawn(async move {
                let res = table.stop(&name, timeout).await;
                (name, res)
            }));
        }

        let mut first_err: Option<anyhow::Error> = None;
        for task in tasks {
            let (name, res) = task.await?;
            if let Err(err) = res {
                tracing::warn!(
                    app = %name,
                    error = %crate::support::format_error_chain(&err),
                    "stop failed"
                );
                first_err.get_or_insert(err.context(format!("stop app {name}")));
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub async fn status(&self, name: &str) -> anyhow::Result<Option<ProcessStatus>> {
        Ok(self.app(name)?.supervisor.status().await)
    }

    pub async fn list(&self) -> Vec<(String, Option<ProcessStatus>)> {
        let mut out = Vec::with_capacity(self.apps.len());
        for (name, app) in self.apps.iter() {
            out.push((name.clone(), app.supervisor.status().await));
        }
        out
    }

    /// Current handle of an app, if it has been started.
    pub async fn handle(&self, name: &str) -> anyhow::Result<Option<Handle>> {
        Ok(self.app(name)?.handle.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_process::{ProcessState, SpecError};

    fn app(name: &str, command: &str) -> AppConfig {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "command": command,
            "args": "100",
        }))
        .unwrap()
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = ProcessTable::from_apps(
            vec![app("backend", "sleep"), app("backend", "sleep")],
            SupervisorConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(ref n) if n == "backend"));
    }

    #[test]
    fn duplicate_detection_ignores_surrounding_whitespace() {
        let err = ProcessTable::from_apps(
            vec![app("backend", "sleep"), app(" backend ", "sleep")],
            SupervisorConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(_)));
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = ProcessTable::from_apps(vec![app("  ", "sleep")], SupervisorConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyName));
    }

    #[test]
    fn invalid_spec_names_the_app() {
        let err = ProcessTable::from_apps(vec![app("web", "")], SupervisorConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidApp {
                ref name,
                source: SpecError::EmptyCommand
            } if name == "web"
        ));
    }

    #[test]
    fn apps_get_their_own_supervisor() {
        let table = ProcessTable::from_apps(
            vec![app("a", "sleep"), app("b", "sleep")],
            SupervisorConfig::default(),
        )
        .unwrap();
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(table.get("a").is_some());
        assert!(table.get("c").is_none());
    }

    #[tokio::test]
    async fn unknown_app_is_an_error() {
        let table = ProcessTable::default();
        let err = table.start("ghost").await.unwrap_err();
        assert!(err.to_string().contains("unknown app: ghost"));
        assert!(table.handle("ghost").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_all_then_stop_all() {
        let table = ProcessTable::from_apps(
            vec![app("a", "sleep"), app("b", "sleep")],
            SupervisorConfig::default(),
        )
        .unwrap();

        table.start_all().await.unwrap();
        for (name, status) in table.list().await {
            let status = status.unwrap_or_else(|| panic!("{name} has no status"));
            assert_eq!(status.state, ProcessState::Running);
        }

        table.stop_all(Duration::from_secs(2)).await.unwrap();
        for (_, status) in table.list().await {
            assert_eq!(status.unwrap().state, ProcessState::Stopped);
        }
        assert!(table.handle("a").await.unwrap().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stopping_unstarted_app_is_noop() {
        let table =
            ProcessTable::from_apps(vec![app("a", "sleep")], SupervisorConfig::default()).unwrap();
        table.stop("a", Duration::from_secs(1)).await.unwrap();
        assert!(table.status("a").await.unwrap().is_none());
    }
}
