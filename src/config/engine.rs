//! Engine configuration: lane sizes, loop timing and lifecycle delays.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::status_proxy::ProxyTimings;
use crate::core::scheduler::SchedulerSettings;
use crate::core::worker_pool::PoolConfig;

/// Prefix of every environment variable read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "WORK_QUEUE_";

fn default_name() -> String {
    "work-queue".into()
}

const fn default_stat_threads() -> usize {
    1
}

fn default_normal_threads() -> usize {
    num_cpus::get().max(2)
}

const fn default_poll_interval_ms() -> u64 {
    2500
}

const fn default_intake_delay_secs() -> u64 {
    5
}

const fn default_expire_delay_secs() -> u64 {
    90
}

const fn default_delete_delay_minutes() -> u64 {
    60
}

const fn default_postpone_secs() -> u64 {
    30
}

const fn default_thread_stack_size() -> usize {
    2 * 1024 * 1024
}

const fn default_shutdown_grace_ms() -> u64 {
    2000
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine name, used for worker thread names and logs.
    #[serde(default = "default_name")]
    pub name: String,
    /// Worker slots reserved for stat-priority jobs.
    #[serde(default = "default_stat_threads")]
    pub stat_threads: usize,
    /// Worker slots for high- and normal-priority jobs.
    #[serde(default = "default_normal_threads")]
    pub normal_threads: usize,
    /// Longest idle wait between scheduling cycles.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay between submission and first eligibility.
    #[serde(default = "default_intake_delay_secs")]
    pub intake_delay_secs: u64,
    /// Offset from submission to expiration.
    #[serde(default = "default_expire_delay_secs")]
    pub expire_delay_secs: u64,
    /// How long finished jobs are kept before the deletion sweep.
    #[serde(default = "default_delete_delay_minutes")]
    pub delete_delay_minutes: u64,
    /// Delay applied when a job is postponed.
    #[serde(default = "default_postpone_secs")]
    pub postpone_secs: u64,
    /// Maximum simultaneously running jobs per kind.
    #[serde(default)]
    pub kind_limits: HashMap<String, usize>,
    /// Worker thread stack size in bytes.
    #[serde(default = "default_thread_stack_size")]
    pub thread_stack_size: usize,
    /// How long shutdown waits for each worker to finish.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            stat_threads: default_stat_threads(),
            normal_threads: default_normal_threads(),
            poll_interval_ms: default_poll_interval_ms(),
            intake_delay_secs: default_intake_delay_secs(),
            expire_delay_secs: default_expire_delay_secs(),
            delete_delay_minutes: default_delete_delay_minutes(),
            postpone_secs: default_postpone_secs(),
            kind_limits: HashMap::new(),
            thread_stack_size: default_thread_stack_size(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl EngineConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the engine name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set both lane sizes.
    #[must_use]
    pub const fn with_threads(mut self, stat_threads: usize, normal_threads: usize) -> Self {
        self.stat_threads = stat_threads;
        self.normal_threads = normal_threads;
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub const fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the submission delay.
    #[must_use]
    pub const fn with_intake_delay_secs(mut self, secs: u64) -> Self {
        self.intake_delay_secs = secs;
        self
    }

    /// Set the expiration offset.
    #[must_use]
    pub const fn with_expire_delay_secs(mut self, secs: u64) -> Self {
        self.expire_delay_secs = secs;
        self
    }

    /// Set the retention of finished jobs.
    #[must_use]
    pub const fn with_delete_delay_minutes(mut self, minutes: u64) -> Self {
        self.delete_delay_minutes = minutes;
        self
    }

    /// Set the postponement delay.
    #[must_use]
    pub const fn with_postpone_secs(mut self, secs: u64) -> Self {
        self.postpone_secs = secs;
        self
    }

    /// Cap the number of running jobs of `kind`.
    #[must_use]
    pub fn with_kind_limit(mut self, kind: impl Into<String>, limit: usize) -> Self {
        self.kind_limits.insert(kind.into(), limit);
        self
    }

    /// Set the worker stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Check that the settings describe a runnable engine.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.stat_threads + self.normal_threads == 0 {
            return Err(SchedulerError::InvalidConfig(
                "stat_threads + normal_threads must be greater than 0".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }
        if self.postpone_secs == 0 {
            return Err(SchedulerError::InvalidConfig(
                "postpone_secs must be greater than 0".into(),
            ));
        }
        if let Some((kind, _)) = self.kind_limits.iter().find(|(_, limit)| **limit == 0) {
            return Err(SchedulerError::InvalidConfig(format!(
                "kind limit for `{kind}` must be greater than 0"
            )));
        }
        self.pool_config().validate()
    }

    /// Parse from JSON and validate. Missing fields take their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, SchedulerError> {
        let cfg: Self = serde_json::from_str(input)
            .map_err(|e| SchedulerError::InvalidConfig(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `WORK_QUEUE_*` variables, after loading a
    /// `.env` file if one exists.
    ///
    /// `WORK_QUEUE_KIND_LIMITS` takes `kind=limit` pairs separated by commas.
    pub fn from_env() -> Result<Self, SchedulerError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(env_var)
    }

    /// Defaults overridden by the values `lookup` returns for `WORK_QUEUE_*` keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SchedulerError> {
        let mut cfg = Self::default();
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(name) = get("NAME") {
            cfg.name = name;
        }
        if let Some(v) = get("STAT_THREADS") {
            cfg.stat_threads = parse("STAT_THREADS", &v)?;
        }
        if let Some(v) = get("NORMAL_THREADS") {
            cfg.normal_threads = parse("NORMAL_THREADS", &v)?;
        }
        if let Some(v) = get("POLL_INTERVAL_MS") {
            cfg.poll_interval_ms = parse("POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("INTAKE_DELAY_SECS") {
            cfg.intake_delay_secs = parse("INTAKE_DELAY_SECS", &v)?;
        }
        if let Some(v) = get("EXPIRE_DELAY_SECS") {
            cfg.expire_delay_secs = parse("EXPIRE_DELAY_SECS", &v)?;
        }
        if let Some(v) = get("DELETE_DELAY_MINUTES") {
            cfg.delete_delay_minutes = parse("DELETE_DELAY_MINUTES", &v)?;
        }
        if let Some(v) = get("POSTPONE_SECS") {
            cfg.postpone_secs = parse("POSTPONE_SECS", &v)?;
        }
        if let Some(v) = get("THREAD_STACK_SIZE") {
            cfg.thread_stack_size = parse("THREAD_STACK_SIZE", &v)?;
        }
        if let Some(v) = get("KIND_LIMITS") {
            for pair in v.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (kind, limit) = pair.split_once('=').ok_or_else(|| {
                    SchedulerError::InvalidConfig(format!("KIND_LIMITS entry `{pair}` is not kind=limit"))
                })?;
                cfg.kind_limits
                    .insert(kind.trim().to_string(), parse("KIND_LIMITS", limit.trim())?);
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Worker pool sizing.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.stat_threads, self.normal_threads)
            .with_thread_stack_size(self.thread_stack_size)
            .with_thread_name(self.name.clone())
    }

    /// Scheduling loop settings.
    #[must_use]
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            poll_interval: StdDuration::from_millis(self.poll_interval_ms),
            kind_limits: self.kind_limits.clone(),
            shutdown_grace: StdDuration::from_millis(self.shutdown_grace_ms),
        }
    }

    /// Delays used by status transitions.
    #[must_use]
    pub fn proxy_timings(&self) -> ProxyTimings {
        ProxyTimings {
            postpone: seconds(self.postpone_secs),
            delete_delay: seconds(self.delete_delay_minutes.saturating_mul(60)),
        }
    }

    /// Delay between submission and first eligibility.
    #[must_use]
    pub fn intake_delay(&self) -> Duration {
        seconds(self.intake_delay_secs)
    }

    /// Offset from submission to expiration.
    #[must_use]
    pub fn expire_delay(&self) -> Duration {
        seconds(self.expire_delay_secs)
    }

    /// Retention of finished jobs.
    #[must_use]
    pub fn delete_delay(&self) -> Duration {
        seconds(self.delete_delay_minutes.saturating_mul(60))
    }
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::from(u32::try_from(secs).unwrap_or(u32::MAX)))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, SchedulerError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| SchedulerError::InvalidConfig(format!("{ENV_PREFIX}{name}=`{value}`: {e}")))
}
