use std::time::Duration;

const DEFAULT_BACKOFF_MS: u64 = 1000;
const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_KILL_GRACE_MS: u64 = 5000;
const DEFAULT_WATCH_INTERVAL_MS: u64 = 1000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    parse_u64(std::env::var(name).ok())
}

fn parse_u64(raw: Option<String>) -> Option<u64> {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
}

/// Exponential delay between a crash and the next spawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestartBackoff {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for RestartBackoff {
    fn default() -> Self {
        Self {
            base_ms: DEFAULT_BACKOFF_MS,
            max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

impl RestartBackoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(compute_backoff_ms(*self, attempt))
    }
}

pub(crate) fn compute_backoff_ms(cfg: RestartBackoff, attempt: u32) -> u64 {
    // attempt is 1-based.
    let pow = attempt.saturating_sub(1).min(30);
    let mult = 1u64.checked_shl(pow).unwrap_or(u64::MAX);
    cfg.base_ms.saturating_mul(mult).min(cfg.max_ms)
}

#[derive(Clone, Copy, Debug)]
pub struct SupervisorConfig {
    pub backoff: RestartBackoff,
    /// Default graceful window used by the table and by watch reloads.
    pub stop_timeout: Duration,
    /// Upper bound on waiting for the exit after SIGKILL.
    pub kill_grace: Duration,
    pub watch_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff: RestartBackoff::default(),
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
            kill_grace: Duration::from_millis(DEFAULT_KILL_GRACE_MS),
            watch_interval: Duration::from_millis(DEFAULT_WATCH_INTERVAL_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl SupervisorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_u64)
    }

    /// Same clamping as [`from_env`](Self::from_env), reading knobs through `var`.
    pub(crate) fn from_lookup(var: impl Fn(&str) -> Option<u64>) -> Self {
        let base_ms = var("KEEPER_RESTART_BACKOFF_MS")
            .map(|v| v.clamp(10, 10 * 60 * 1000))
            .unwrap_or(DEFAULT_BACKOFF_MS);
        let max_ms = var("KEEPER_RESTART_BACKOFF_MAX_MS")
            .unwrap_or(DEFAULT_BACKOFF_MAX_MS)
            .clamp(base_ms, 60 * 60 * 1000);
        let stop_timeout = var("KEEPER_STOP_TIMEOUT_MS")
            .map(|v| v.clamp(0, 10 * 60 * 1000))
            .unwrap_or(DEFAULT_STOP_TIMEOUT_MS);
        let kill_grace = var("KEEPER_KILL_GRACE_MS")
            .map(|v| v.clamp(100, 60_000))
            .unwrap_or(DEFAULT_KILL_GRACE_MS);
        let watch_interval = var("KEEPER_WATCH_INTERVAL_MS")
            .map(|v| v.clamp(100, 60_000))
            .unwrap_or(DEFAULT_WATCH_INTERVAL_MS);

        Self {
            backoff: RestartBackoff { base_ms, max_ms },
            stop_timeout: Duration::from_millis(stop_timeout),
            kill_grace: Duration::from_millis(kill_grace),
            watch_interval: Duration::from_millis(watch_interval),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

pub fn format_error_chain(err: &anyhow::Error) -> String {
    let mut parts = Vec::<String>::new();
    for cause in err.chain() {
        let s = cause.to_string();
        if s.is_empty() {
            continue;
        }
        if parts.last() == Some(&s) {
            continue;
        }
        parts.push(s);
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(": ")
    }
}
