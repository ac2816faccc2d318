//! Minimal process supervisor for hosts without a container runtime.
//!
//! Mirrors the compose healthcheck: probe on an interval, count consecutive
//! failures after the start period, and restart per the restart policy.

use std::{path::Path, time::Duration};

use anyhow::{bail, Context};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use tab_core::{
    config::probe_target_from_env,
    health::{HealthMonitor, HealthStatus, ProbePolicy, RestartPolicy, StopReason},
};

use crate::{healthcheck, signals};

const STOP_GRACE: Duration = Duration::from_secs(10);
const MAX_BACKOFF_SECS: u64 = 60;

pub async fn run(restart: &str, url: Option<String>) -> anyhow::Result<()> {
    tab_core::logging::init("tab")?;

    let restart = RestartPolicy::parse(restart)?;
    let probe_policy = ProbePolicy::from_env();
    let target = match url {
        Some(u) => u,
        None => probe_target_from_env()?,
    };
    let exe = std::env::current_exe().context("locating the tab executable")?;
    let http = healthcheck::probe_client(&probe_policy)?;

    let stop = CancellationToken::new();
    signals::cancel_on_signal(stop.clone());

    tracing::info!(
        target = %target,
        restart = ?restart,
        interval_secs = probe_policy.interval.as_secs(),
        retries = probe_policy.retries,
        "supervising tab serve"
    );

    let mut restarts: u32 = 0;
    loop {
        let mut child = spawn_server(&exe)?;
        let reason = watch(&mut child, &http, &target, probe_policy, &stop).await?;
        stop_child(&mut child, &reason).await;
        tracing::warn!(reason = ?reason, "server stopped");

        if !restart.should_restart(&reason) {
            return match reason {
                StopReason::Exited { code: Some(code) } if code != 0 => {
                    bail!("server exited with status {code}")
                }
                StopReason::Exited { code: None } => bail!("server was killed by a signal"),
                StopReason::Unhealthy => bail!("server became unhealthy"),
                _ => Ok(()),
            };
        }

        restarts += 1;
        let wait = backoff(restarts);
        tracing::info!(restarts, wait_secs = wait.as_secs(), "restarting server");
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = stop.cancelled() => return Ok(()),
        }
    }
}

fn spawn_server(exe: &Path) -> anyhow::Result<Child> {
    let child = Command::new(exe)
        .arg("serve")
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning {} serve", exe.display()))?;
    tracing::info!(pid = ?child.id(), "server started");
    Ok(child)
}

/// Run probes until the child exits, turns unhealthy or the operator stops us.
async fn watch(
    child: &mut Child,
    http: &reqwest::Client,
    target: &str,
    policy: ProbePolicy,
    stop: &CancellationToken,
) -> anyhow::Result<StopReason> {
    let mut monitor = HealthMonitor::new(policy);
    let mut ticker = tokio::time::interval(policy.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First probe after one interval, like the container runtime.
    ticker.tick().await;

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.context("waiting for server")?;
                return Ok(StopReason::Exited { code: status.code() });
            }
            _ = stop.cancelled() => return Ok(StopReason::StoppedByOperator),
            _ = ticker.tick() => {
                let outcome = healthcheck::probe(http, target).await;
                if let Some(status) = monitor.observe(outcome) {
                    tracing::info!(
                        status = ?status,
                        failing_streak = monitor.failing_streak(),
                        last_failure = monitor.last_failure().unwrap_or(""),
                        "health status changed"
                    );
                    if status == HealthStatus::Unhealthy {
                        return Ok(StopReason::Unhealthy);
                    }
                }
            }
        }
    }
}

async fn stop_child(child: &mut Child, reason: &StopReason) {
    match reason {
        StopReason::Exited { .. } => {}
        StopReason::StoppedByOperator => {
            if let Err(e) = terminate(child) {
                tracing::warn!("could not signal server: {e:#}");
            }
            if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_err() {
                tracing::warn!("server did not stop in time; killing it");
                if let Err(e) = child.kill().await {
                    tracing::warn!("kill failed: {e}");
                }
            }
        }
        StopReason::Unhealthy => {
            if let Err(e) = child.kill().await {
                tracing::warn!("kill failed: {e}");
            }
        }
    }
}

/// Send SIGTERM so the server drains in-flight requests before exiting.
#[cfg(unix)]
fn terminate(child: &Child) -> anyhow::Result<()> {
    use nix::{
        sys::signal::{kill, Signal},
        unistd::Pid,
    };

    // No pid means the child was already reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = i32::try_from(pid).context("server pid out of range")?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).context("sending SIGTERM")?;
    Ok(())
}

#[cfg(not(unix))]
fn terminate(_child: &Child) -> anyhow::Result<()> {
    Ok(())
}

/// 1s, 2s, 4s ... capped at a minute.
fn backoff(restarts: u32) -> Duration {
    let exp = restarts.saturating_sub(1).min(6);
    Duration::from_secs((1u64 << exp).min(MAX_BACKOFF_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(4), Duration::from_secs(8));
        assert_eq!(backoff(7), Duration::from_secs(60));
        assert_eq!(backoff(50), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn exited_child_is_reported_with_its_code() {
        let mut child = Command::new("sh")
            .args(["-c", "exit 3"])
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let http = reqwest::Client::new();
        let stop = CancellationToken::new();
        let policy = ProbePolicy {
            interval: Duration::from_secs(60),
            ..ProbePolicy::default()
        };
        let reason = watch(&mut child, &http, "http://127.0.0.1:9/health", policy, &stop)
            .await
            .unwrap();
        assert_eq!(reason, StopReason::Exited { code: Some(3) });
    }

    #[tokio::test]
    async fn unreachable_server_turns_unhealthy() {
        let mut child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let stop = CancellationToken::new();
        let policy = ProbePolicy {
            interval: Duration::from_millis(20),
            timeout: Duration::from_millis(200),
            start_period: Duration::ZERO,
            retries: 2,
        };
        let reason = watch(&mut child, &http, "http://127.0.0.1:9/health", policy, &stop)
            .await
            .unwrap();
        assert_eq!(reason, StopReason::Unhealthy);
        stop_child(&mut child, &reason).await;
    }

    #[tokio::test]
    async fn operator_stop_wins() {
        let mut child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stop = CancellationToken::new();
        stop.cancel();
        let reason = watch(
            &mut child,
            &reqwest::Client::new(),
            "http://127.0.0.1:9/health",
            ProbePolicy::default(),
            &stop,
        )
        .await
        .unwrap();
        assert_eq!(reason, StopReason::StoppedByOperator);
        child.kill().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn operator_stop_sends_sigterm_before_the_grace_period() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let started = std::time::Instant::now();
        stop_child(&mut child, &StopReason::StoppedByOperator).await;

        let status = child.wait().await.unwrap();
        assert_eq!(status.signal(), Some(15));
        assert!(started.elapsed() < STOP_GRACE, "{:?}", started.elapsed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminating_a_reaped_child_is_a_no_op() {
        let mut child = Command::new("true").spawn().unwrap();
        child.wait().await.unwrap();
        assert!(terminate(&child).is_ok());
    }
}
