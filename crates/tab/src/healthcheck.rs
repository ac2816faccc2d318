use anyhow::Context;

use tab_core::{
    config::probe_target_from_env,
    health::{ProbeOutcome, ProbePolicy},
};

/// HTTP client for liveness probes; each request is bounded by the probe timeout.
pub fn probe_client(policy: &ProbePolicy) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(policy.timeout)
        .build()
        .context("building probe client")
}

/// One liveness probe. Any 2xx is healthy.
pub async fn probe(http: &reqwest::Client, url: &str) -> ProbeOutcome {
    match http.get(url).send().await {
        Ok(resp) if resp.status().is_success() => ProbeOutcome::Success,
        Ok(resp) => ProbeOutcome::Failure(format!("{url} returned {}", resp.status())),
        Err(e) if e.is_timeout() => ProbeOutcome::Failure(format!("{url} timed out")),
        Err(e) => ProbeOutcome::Failure(format!("{url}: {e}")),
    }
}

/// Container `HEALTHCHECK` entry point. Returns whether the probe succeeded.
pub async fn run(url: Option<String>) -> anyhow::Result<bool> {
    let target = match url {
        Some(u) => u,
        None => probe_target_from_env()?,
    };
    let http = probe_client(&ProbePolicy::from_env())?;

    match probe(&http, &target).await {
        ProbeOutcome::Success => {
            println!("healthy: {target}");
            Ok(true)
        }
        ProbeOutcome::Failure(reason) => {
            eprintln!("unhealthy: {reason}");
            Ok(false)
        }
    }
}
