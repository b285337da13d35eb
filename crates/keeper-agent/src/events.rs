//! Lifecycle events published by a [`Supervisor`](crate::Supervisor).
//!
//! Events go out on a `tokio::sync::broadcast` channel: publishing never
//! blocks, receivers only see events sent after they subscribed, and slow
//! receivers observe `RecvError::Lagged`.

use keeper_process::{ProcessId, ProcessState};
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopSignal {
    Terminate,
    Kill,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    StateChanged {
        id: ProcessId,
        from: ProcessState,
        to: ProcessState,
        restart_count: u32,
    },
    Spawned {
        id: ProcessId,
        pid: Option<u32>,
    },
    Exited {
        id: ProcessId,
        pid: Option<u32>,
        exit_code: Option<i32>,
        signal: Option<i32>,
    },
    SignalSent {
        id: ProcessId,
        pid: u32,
        signal: StopSignal,
    },
    RestartScheduled {
        id: ProcessId,
        attempt: u32,
        max_restarts: u32,
        delay_ms: u64,
    },
    SpawnFailed {
        id: ProcessId,
        message: String,
    },
    WatchTriggered {
        id: ProcessId,
    },
}

impl LifecycleEvent {
    pub fn id(&self) -> &ProcessId {
        match self {
            Self::StateChanged { id, .. }
            | Self::Spawned { id, .. }
            | Self::Exited { id, .. }
            | Self::SignalSent { id, .. }
            | Self::RestartScheduled { id, .. }
            | Self::SpawnFailed { id, .. }
            | Self::WatchTriggered { id } => id,
        }
    }

    fn log(&self) {
        match self {
            Self::StateChanged {
                id,
                from,
                to,
                restart_count,
            } => match to {
                ProcessState::Crashed | ProcessState::Exhausted => {
                    tracing::warn!(process_id = %id, %from, %to, restart_count, "state changed")
                }
                _ => tracing::info!(process_id = %id, %from, %to, restart_count, "state changed"),
            },
            Self::Spawned { id, pid } => tracing::info!(process_id = %id, ?pid, "spawned"),
            Self::Exited {
                id,
                pid,
                exit_code,
                signal,
            } => tracing::info!(process_id = %id, ?pid, ?exit_code, ?signal, "exited"),
            Self::SignalSent { id, pid, signal } => {
                tracing::info!(process_id = %id, pid, ?signal, "signal sent")
            }
            Self::RestartScheduled {
                id,
                attempt,
                max_restarts,
                delay_ms,
            } => tracing::info!(
                process_id = %id,
                attempt,
                max_restarts,
                delay_ms,
                "auto-restart scheduled"
            ),
            Self::SpawnFailed { id, message } => {
                tracing::error!(process_id = %id, %message, "spawn failed")
            }
            Self::WatchTriggered { id } => {
                tracing::info!(process_id = %id, "watched files changed")
            }
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }
}

impl EventBus {
    pub(crate) fn publish(&self, ev: LifecycleEvent) {
        ev.log();
        let _ = self.tx.send(ev);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}
