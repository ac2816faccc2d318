//! Liveness probing.
//!
//! `HealthMonitor` follows the container supervisor's rules (interval, timeout,
//! start period, retries) so the same semantics apply whether the probe is run by
//! the container runtime or by `tab supervise`.

use std::time::{Duration, Instant};

use serde::Serialize;
use utoipa::ToSchema;

use crate::config::{parse_u32, parse_u64};
use crate::{errors::Error, Result};

/// Probe timing, mirroring a compose `healthcheck:` block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbePolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub start_period: Duration,
    pub retries: u32,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            start_period: Duration::from_secs(5),
            retries: 3,
        }
    }
}

impl ProbePolicy {
    pub fn from_env() -> Self {
        Self::from_vars(|k| std::env::var(k).ok())
    }

    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            interval: parse_u64(get("HEALTHCHECK_INTERVAL_SECS"))
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(d.interval),
            timeout: parse_u64(get("HEALTHCHECK_TIMEOUT_SECS"))
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(d.timeout),
            start_period: parse_u64(get("HEALTHCHECK_START_PERIOD_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(d.start_period),
            retries: parse_u32(get("HEALTHCHECK_RETRIES"))
                .filter(|r| *r > 0)
                .unwrap_or(d.retries),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
}

/// Result of a single probe attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    /// Non-success status, connection failure or timeout.
    Failure(String),
}

/// Supervisor-side health state machine.
#[derive(Debug)]
pub struct HealthMonitor {
    policy: ProbePolicy,
    started_at: Instant,
    status: HealthStatus,
    failing_streak: u32,
    last_failure: Option<String>,
}

impl HealthMonitor {
    pub fn new(policy: ProbePolicy) -> Self {
        Self::started_at(policy, Instant::now())
    }

    pub fn started_at(policy: ProbePolicy, started_at: Instant) -> Self {
        Self {
            policy,
            started_at,
            status: HealthStatus::Starting,
            failing_streak: 0,
            last_failure: None,
        }
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn failing_streak(&self) -> u32 {
        self.failing_streak
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Record a probe result observed at `now`.
    ///
    /// Returns the new status when it changed.
    pub fn observe_at(&mut self, now: Instant, outcome: ProbeOutcome) -> Option<HealthStatus> {
        let before = self.status;
        match outcome {
            ProbeOutcome::Success => {
                self.failing_streak = 0;
                self.status = HealthStatus::Healthy;
            }
            ProbeOutcome::Failure(reason) => {
                self.last_failure = Some(reason);
                let in_grace = self.status == HealthStatus::Starting
                    && now.saturating_duration_since(self.started_at) < self.policy.start_period;
                if !in_grace {
                    self.failing_streak = self.failing_streak.saturating_add(1);
                    if self.failing_streak >= self.policy.retries {
                        self.status = HealthStatus::Unhealthy;
                    }
                }
            }
        }
        (self.status != before).then_some(self.status)
    }

    pub fn observe(&mut self, outcome: ProbeOutcome) -> Option<HealthStatus> {
        self.observe_at(Instant::now(), outcome)
    }
}

/// Why a supervised instance stopped running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    Exited { code: Option<i32> },
    Unhealthy,
    StoppedByOperator,
}

/// Restart policy, named after the compose `restart:` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    OnFailure,
    UnlessStopped,
}

impl RestartPolicy {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "no" | "never" => Ok(Self::No),
            "on-failure" => Ok(Self::OnFailure),
            "unless-stopped" | "always" => Ok(Self::UnlessStopped),
            other => Err(Error::Config(format!("unknown restart policy: {other}"))),
        }
    }

    pub fn should_restart(self, reason: &StopReason) -> bool {
        match (self, reason) {
            (_, StopReason::StoppedByOperator) => false,
            (Self::No, _) => false,
            (Self::OnFailure, StopReason::Exited { code: Some(0) }) => false,
            (Self::OnFailure, _) => true,
            (Self::UnlessStopped, _) => true,
        }
    }
}

/// Body of the detailed `/health` response.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct HealthReport {
    pub status: &'static str,
    pub service: &'static str,
    pub port: u16,
    pub framework: &'static str,
    pub environment: &'static str,
    pub public_url: String,
    pub uptime_seconds: u64,
    pub prompts: Vec<String>,
    pub endpoints: HealthEndpoints,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct HealthEndpoints {
    pub teams_webhook: &'static str,
    pub test_chat: &'static str,
    pub docs: &'static str,
}

impl Default for HealthEndpoints {
    fn default() -> Self {
        Self {
            teams_webhook: "/api/messages",
            test_chat: "/api/test",
            docs: "/docs",
        }
    }
}
