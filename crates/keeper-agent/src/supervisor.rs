use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use keeper_process::{Handle, ProcessId, ProcessSpec, ProcessState, ProcessStatus};
use tokio::{
    process::Command,
    sync::{Mutex, broadcast},
    time::Instant,
};

use crate::error::SupervisorError;
use crate::events::{EventBus, LifecycleEvent, StopSignal};
use crate::os;
use crate::support::SupervisorConfig;
use crate::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StopIntent {
    Shutdown,
    Reload,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ExitAction {
    Stop,
    Relaunch,
    Crash,
    Restart,
    Exhaust,
    Ignore,
}

/// What a child exit means for a process currently in `state`.
pub(crate) fn decide_exit(
    state: ProcessState,
    reloading: bool,
    auto_restart: bool,
    restart_count: u32,
    max_restarts: u32,
) -> ExitAction {
    match state {
        ProcessState::Stopping if reloading => ExitAction::Relaunch,
        ProcessState::Stopping => ExitAction::Stop,
        ProcessState::Starting | ProcessState::Running => {
            if !auto_restart {
                ExitAction::Crash
            } else if restart_count < max_restarts {
                ExitAction::Restart
            } else {
                ExitAction::Exhaust
            }
        }
        ProcessState::Idle
        | ProcessState::Stopped
        | ProcessState::Crashed
        | ProcessState::Exhausted => ExitAction::Ignore,
    }
}

fn exit_message(res: &std::io::Result<std::process::ExitStatus>) -> String {
    match res {
        Ok(status) => match (status.code(), os::exit_signal(status)) {
            (Some(code), _) => format!("exited with code {code}"),
            (None, Some(sig)) => format!("killed by signal {sig}"),
            (None, None) => "exited".to_string(),
        },
        Err(err) => format!("wait failed: {err}"),
    }
}

#[derive(Debug)]
struct SupervisedProcess {
    handle: Handle,
    spec: Arc<ProcessSpec>,
    state: ProcessState,
    restart_count: u32,
    pid: Option<u32>,
    exit_code: Option<i32>,
    signal: Option<i32>,
    message: Option<String>,
    // Identifies the live child; exit and restart tasks holding an older value are ignored.
    generation: u64,
    restart_pending: bool,
    stop_intent: StopIntent,
}

impl SupervisedProcess {
    fn occupies_slot(&self) -> bool {
        self.state.is_active() || self.restart_pending
    }

    fn status(&self) -> ProcessStatus {
        ProcessStatus {
            id: self.handle.id().clone(),
            state: self.state,
            pid: self.pid,
            restart_count: self.restart_count,
            exit_code: self.exit_code,
            signal: self.signal,
            message: self.message.clone(),
        }
    }
}

/// Owns the lifecycle of one child process.
///
/// All state transitions happen under a single mutex, so an exit
/// notification and a concurrent `start`/`stop` never interleave.
#[derive(Clone, Debug)]
pub struct Supervisor {
    inner: Arc<Mutex<Option<SupervisedProcess>>>,
    generations: Arc<AtomicU64>,
    events: EventBus,
    config: SupervisorConfig,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            generations: Arc::new(AtomicU64::new(0)),
            events: EventBus::default(),
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> Option<ProcessStatus> {
        self.inner.lock().await.as_ref().map(SupervisedProcess::status)
    }

    pub async fn start(&self, spec: ProcessSpec) -> Result<Handle, SupervisorError> {
        spec.validate()?;

        let handle = Handle::new();
        let watched = {
            let mut slot = self.inner.lock().await;
            if let Some(p) = slot.as_ref()
                && p.occupies_slot()
            {
                return Err(SupervisorError::AlreadyRunning(p.handle.id().clone()));
            }

            let p = slot.insert(SupervisedProcess {
                handle: handle.clone(),
                spec: Arc::new(spec),
                state: ProcessState::Idle,
                restart_count: 0,
                pid: None,
                exit_code: None,
                signal: None,
                message: None,
                generation: 0,
                restart_pending: false,
                stop_intent: StopIntent::Shutdown,
            });
            tracing::info!(
                process_id = %handle.id(),
                command = %p.spec.command(),
                "start requested"
            );
            self.launch(p)?;
            p.spec.watch().then(|| watch::resolve_watch_paths(&p.spec))
        };

        if let Some(roots) = watched {
            let supervisor = self.clone();
            let handle = handle.clone();
            tokio::spawn(async move { supervisor.watch_loop(handle, roots).await });
        }

        Ok(handle)
    }

    /// Graceful stop: SIGTERM, then SIGKILL once `timeout` elapses.
    ///
    /// Returns after the exit is observed, or after `kill_grace` past the
    /// SIGKILL. In the latter case the result is still `Ok` but the state
    /// stays Stopping until the exit is reaped. Stopping a settled process
    /// is a no-op.
    pub async fn stop(&self, handle: &Handle, timeout: Duration) -> Result<(), SupervisorError> {
        self.terminate(handle, timeout, StopIntent::Shutdown).await
    }

    /// Restarts a running process in place without touching the restart budget.
    pub async fn reload(&self, handle: &Handle, timeout: Duration) -> Result<(), SupervisorError> {
        self.terminate(handle, timeout, StopIntent::Reload).await
    }

    /// Waits until the process settles. Crashed and Exhausted come back as errors.
    pub async fn wait(&self, handle: &Handle) -> Result<ProcessStatus, SupervisorError> {
        loop {
            {
                let slot = self.inner.lock().await;
                let p = slot
                    .as_ref()
                    .filter(|p| p.handle == *handle)
                    .ok_or_else(|| SupervisorError::NotFound(handle.id().clone()))?;
                if !p.occupies_slot() {
                    return match p.state {
                        ProcessState::Crashed => Err(SupervisorError::Crashed {
                            id: p.handle.id().clone(),
                            exit_code: p.exit_code,
                            signal: p.signal,
                        }),
                        ProcessState::Exhausted => Err(SupervisorError::Exhausted {
                            id: p.handle.id().clone(),
                            restarts: p.restart_count,
                        }),
                        _ => Ok(p.status()),
                    };
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    fn transition(&self, p: &mut SupervisedProcess, to: ProcessState) {
        debug_assert!(
            p.state.can_transition_to(to),
            "illegal transition {} -> {}",
            p.state,
            to
        );
        let from = p.state;
        p.state = to;
        self.events.publish(LifecycleEvent::StateChanged {
            id: p.handle.id().clone(),
            from,
            to,
            restart_count: p.restart_count,
        });
    }

    /// Spawns the spec's child. Must be called with the slot locked.
    fn launch(&self, p: &mut SupervisedProcess) -> Result<(), SupervisorError> {
        p.generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        p.pid = None;
        self.transition(p, ProcessState::Starting);

        let spec = p.spec.clone();
        let mut cmd = Command::new(spec.program());
        cmd.args(spec.argv())
            .envs(spec.env())
            .stdin(std::process::Stdio::null());
        if let Some(cwd) = spec.cwd() {
            cmd.current_dir(cwd);
        }
        os::isolate_process_group(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                let program = spec.program().to_string_lossy().into_owned();
                // A failed spawn has no exit status of its own.
                p.exit_code = None;
                p.signal = None;
                p.message = Some(format!("spawn {program}: {source}"));
                self.events.publish(LifecycleEvent::SpawnFailed {
                    id: p.handle.id().clone(),
                    message: source.to_string(),
                });
                self.transition(p, ProcessState::Crashed);
                return Err(SupervisorError::SpawnFailed { program, source });
            }
        };

        p.pid = child.id();
        p.exit_code = None;
        p.signal = None;
        p.message = None;
        self.events.publish(LifecycleEvent::Spawned {
            id: p.handle.id().clone(),
            pid: p.pid,
        });
        self.transition(p, ProcessState::Running);

        let supervisor = self.clone();
        let generation = p.generation;
        tokio::spawn(async move {
            let res = child.wait().await;
            supervisor.on_exit(generation, res).await;
        });
        Ok(())
    }

    async fn on_exit(&self, generation: u64, res: std::io::Result<std::process::ExitStatus>) {
        let restart_after = {
            let mut slot = self.inner.lock().await;
            let Some(p) = slot.as_mut() else {
                return;
            };
            if p.generation != generation {
                return;
            }

            let pid = p.pid.take();
            match &res {
                Ok(status) => {
                    p.exit_code = status.code();
                    p.signal = os::exit_signal(status);
                }
                Err(_) => {
                    p.exit_code = None;
                    p.signal = None;
                }
            }
            self.events.publish(LifecycleEvent::Exited {
                id: p.handle.id().clone(),
                pid,
                exit_code: p.exit_code,
                signal: p.signal,
            });

            let action = decide_exit(
                p.state,
                p.stop_intent == StopIntent::Reload,
                p.spec.auto_restart(),
                p.restart_count,
                p.spec.max_restarts(),
            );
            match action {
                ExitAction::Stop => {
                    p.message = Some("stopped".to_string());
                    self.transition(p, ProcessState::Stopped);
                    None
                }
                ExitAction::Relaunch => {
                    p.stop_intent = StopIntent::Shutdown;
                    // A failed relaunch is already recorded on the entry and published.
                    let _ = self.launch(p);
                    None
                }
                ExitAction::Crash => {
                    p.message = Some(exit_message(&res));
                    self.transition(p, ProcessState::Crashed);
                    None
                }
                ExitAction::Restart => {
                    p.restart_count = p.restart_count.saturating_add(1);
                    p.restart_pending = true;
                    self.transition(p, ProcessState::Crashed);

                    let delay = self.config.backoff.delay(p.restart_count);
                    p.message = Some(format!(
                        "{}; restarting in {}ms (attempt {}/{})",
                        exit_message(&res),
                        delay.as_millis(),
                        p.restart_count,
                        p.spec.max_restarts()
                    ));
                    self.events.publish(LifecycleEvent::RestartScheduled {
                        id: p.handle.id().clone(),
                        attempt: p.restart_count,
                        max_restarts: p.spec.max_restarts(),
                        delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    });
                    Some(delay)
                }
                ExitAction::Exhaust => {
                    self.transition(p, ProcessState::Crashed);
                    p.message = Some(format!(
                        "{}; restart budget exhausted after {} restarts",
                        exit_message(&res),
                        p.restart_count
                    ));
                    self.transition(p, ProcessState::Exhausted);
                    None
                }
                ExitAction::Ignore => None,
            }
        };

        let Some(delay) = restart_after else {
            return;
        };
        tokio::time::sleep(delay).await;

        let mut slot = self.inner.lock().await;
        let Some(p) = slot.as_mut() else {
            return;
        };
        // A stop during the back-off clears the flag; a new start replaces the generation.
        if p.generation != generation || !p.restart_pending {
            return;
        }
        p.restart_pending = false;
        let _ = self.launch(p);
    }

    async fn terminate(
        &self,
        handle: &Handle,
        timeout: Duration,
        intent: StopIntent,
    ) -> Result<(), SupervisorError> {
        let (pid, generation, send_term) = {
            let mut slot = self.inner.lock().await;
            let p = slot
                .as_mut()
                .filter(|p| p.handle == *handle)
                .ok_or_else(|| SupervisorError::NotFound(handle.id().clone()))?;

            match (p.state, intent) {
                (ProcessState::Running, _) => {
                    p.stop_intent = intent;
                    p.message = Some(
                        match intent {
                            StopIntent::Shutdown => "stopping",
                            StopIntent::Reload => "reloading",
                        }
                        .to_string(),
                    );
                    self.transition(p, ProcessState::Stopping);
                    (p.pid, p.generation, true)
                }
                (ProcessState::Stopping, _) => {
                    // A stop overrides an in-flight reload; a reload joins an in-flight stop.
                    if intent == StopIntent::Shutdown {
                        p.stop_intent = StopIntent::Shutdown;
                    }
                    (p.pid, p.generation, false)
                }
                (ProcessState::Crashed, StopIntent::Shutdown) if p.restart_pending => {
                    p.restart_pending = false;
                    p.message = Some("stopped during restart back-off".to_string());
                    self.transition(p, ProcessState::Stopped);
                    return Ok(());
                }
                (_, StopIntent::Reload) => {
                    return Err(SupervisorError::NotRunning(handle.id().clone()));
                }
                (_, StopIntent::Shutdown) => return Ok(()),
            }
        };

        tracing::info!(
            process_id = %handle.id(),
            ?pid,
            timeout_ms = timeout.as_millis() as u64,
            reload = intent == StopIntent::Reload,
            "stop requested"
        );

        if send_term && let Some(pid) = pid {
            self.send_signal(handle.id(), pid, StopSignal::Terminate);
        }

        if self
            .wait_exit(handle, generation, Instant::now() + timeout)
            .await
        {
            return Ok(());
        }

        if let Some(pid) = pid {
            self.send_signal(handle.id(), pid, StopSignal::Kill);
        }
        {
            let mut slot = self.inner.lock().await;
            if let Some(p) = slot.as_mut()
                && p.handle == *handle
                && p.generation == generation
            {
                p.message = Some("killed after timeout".to_string());
            }
        }

        if !self
            .wait_exit(handle, generation, Instant::now() + self.config.kill_grace)
            .await
        {
            tracing::warn!(
                process_id = %handle.id(),
                ?pid,
                grace_ms = self.config.kill_grace.as_millis() as u64,
                "process still not reaped after SIGKILL"
            );
        }
        Ok(())
    }

    fn send_signal(&self, id: &ProcessId, pid: u32, signal: StopSignal) {
        match os::signal_group(pid, signal) {
            Ok(()) => self.events.publish(LifecycleEvent::SignalSent {
                id: id.clone(),
                pid,
                signal,
            }),
            Err(err) => {
                tracing::warn!(process_id = %id, pid, ?signal, error = %err, "signal delivery failed")
            }
        }
    }

    async fn exit_observed(&self, handle: &Handle, generation: u64) -> bool {
        let slot = self.inner.lock().await;
        match slot.as_ref() {
            Some(p) if p.handle == *handle => {
                p.generation != generation || p.state != ProcessState::Stopping
            }
            _ => true,
        }
    }

    async fn wait_exit(&self, handle: &Handle, generation: u64, deadline: Instant) -> bool {
        loop {
            if self.exit_observed(handle, generation).await {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    async fn is_live(&self, handle: &Handle) -> bool {
        let slot = self.inner.lock().await;
        slot.as_ref()
            .is_some_and(|p| p.handle == *handle && p.occupies_slot())
    }

    async fn watch_loop(self, handle: Handle, roots: Vec<PathBuf>) {
        let fingerprint = |roots: Vec<PathBuf>| async move {
            tokio::task::spawn_blocking(move || watch::fingerprint(&roots))
                .await
                .ok()
        };

        tracing::info!(process_id = %handle.id(), ?roots, "watching for changes");
        let mut last = fingerprint(roots.clone()).await;
        loop {
            tokio::time::sleep(self.config.watch_interval).await;
            if !self.is_live(&handle).await {
                return;
            }

            let now = fingerprint(roots.clone()).await;
            if now == last {
                continue;
            }
            last = now;

            self.events.publish(LifecycleEvent::WatchTriggered {
                id: handle.id().clone(),
            });
            match self.reload(&handle, self.config.stop_timeout).await {
                Ok(()) | Err(SupervisorError::NotRunning(_)) => {}
                Err(err) => {
                    tracing::warn!(process_id = %handle.id(), error = %err, "watch reload failed");
                    return;
                }
            }
        }
    }
}
