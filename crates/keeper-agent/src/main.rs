use std::path::{Path, PathBuf};

use anyhow::Context;
use keeper_agent::{ProcessTable, SupervisorConfig, support::format_error_chain};
use keeper_process::AppsFile;
use tokio::sync::broadcast::error::RecvError;

const DEFAULT_APPS_PATH: &str = "keeper.json";

fn load_apps(path: &Path) -> anyhow::Result<AppsFile> {
    let data =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parse {}", path.display()))
}

/// Forwards one app's lifecycle events to the log as JSON.
fn spawn_event_logger(table: &ProcessTable, name: &str) {
    let Some(supervisor) = table.get(name) else {
        return;
    };
    let mut rx = supervisor.subscribe();
    let app = name.to_string();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => match serde_json::to_string(&ev) {
                    Ok(json) => tracing::debug!(app = %app, event = %json, "lifecycle"),
                    Err(err) => tracing::warn!(app = %app, error = %err, "serialize event"),
                },
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(app = %app, skipped = n, "event logger lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn run() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_APPS_PATH));
    let apps = load_apps(&path)?;

    let config = SupervisorConfig::from_env();
    let table = ProcessTable::from_apps(apps.apps, config)
        .with_context(|| format!("load apps from {}", path.display()))?;

    let names: Vec<String> = table.names().map(str::to_string).collect();
    for name in &names {
        spawn_event_logger(&table, name);
    }
    tracing::info!(apps = ?names, path = %path.display(), "keeper starting");

    if let Err(err) = table.start_all().await {
        tracing::error!(error = %format_error_chain(&err), "start failed; stopping started apps");
        table.stop_all(config.stop_timeout).await.ok();
        return Err(err);
    }

    tokio::signal::ctrl_c().await.context("listen for ctrl-c")?;
    tracing::info!(
        timeout_ms = config.stop_timeout.as_millis() as u64,
        "shutdown requested"
    );
    table.stop_all(config.stop_timeout).await?;

    for (name, status) in table.list().await {
        if let Some(st) = status {
            tracing::info!(app = %name, state = %st.state, restarts = st.restart_count, "final state");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    run().await
}
