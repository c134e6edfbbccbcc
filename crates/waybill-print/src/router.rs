// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Backend health routing.
//
// Local-network label service instances are preferred over the cloud. A
// background cycle probes every local candidate in parallel and publishes a
// new immutable ranking; request paths read the latest ranking without
// waiting on a probe. When no local candidate is healthy the cloud address is
// used; that is the normal fallback and not an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use waybill_core::config::SdkConfig;
use waybill_core::error::{Result, WaybillError};

/// Liveness check against one backend base address.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Ok` only if the backend answered with the expected liveness payload.
    async fn probe(&self, base: &Url) -> Result<()>;
}

/// Result of the most recent probe of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Healthy,
    Unhealthy,
    /// Not probed yet.
    Unknown,
}

/// One local backend as seen by the last probe round.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendCandidate {
    pub base_address: Url,
    /// Round-trip time of the last successful probe.
    pub last_probe_latency_ms: Option<u64>,
    pub last_probe_result: ProbeStatus,
    pub last_error: Option<String>,
}

impl BackendCandidate {
    fn new(base_address: Url) -> Self {
        Self {
            base_address,
            last_probe_latency_ms: None,
            last_probe_result: ProbeStatus::Unknown,
            last_error: None,
        }
    }

    fn healthy_latency(&self) -> Option<u64> {
        match self.last_probe_result {
            ProbeStatus::Healthy => self.last_probe_latency_ms,
            _ => None,
        }
    }
}

/// An immutable ranking published after each probe round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingSnapshot {
    /// Local candidates in configuration order.
    pub candidates: Vec<BackendCandidate>,
    /// Index of the selected local candidate; `None` means the cloud.
    pub selected: Option<usize>,
    /// Number of completed probe rounds.
    pub round: u64,
}

impl RoutingSnapshot {
    pub fn selected_candidate(&self) -> Option<&BackendCandidate> {
        self.selected.and_then(|i| self.candidates.get(i))
    }
}

/// Chooses the backend every outgoing request targets.
pub struct BackendRouter {
    cloud: Url,
    probe_interval: Duration,
    probe_timeout: Duration,
    snapshot: watch::Sender<Arc<RoutingSnapshot>>,
}

impl std::fmt::Debug for BackendRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRouter")
            .field("cloud", &self.cloud.as_str())
            .field("probe_interval", &self.probe_interval)
            .field("probe_timeout", &self.probe_timeout)
            .field("snapshot", &*self.snapshot.borrow())
            .finish()
    }
}

impl BackendRouter {
    /// Build a router for one cloud address and any number of local ones.
    ///
    /// Fails if any address is missing or malformed. An empty `locals` list
    /// means cloud-only operation.
    pub fn configure(cloud: &str, locals: &[String]) -> Result<Self> {
        let cloud = normalize_base(cloud)?;
        let candidates = locals
            .iter()
            .map(|raw| normalize_base(raw).map(BackendCandidate::new))
            .collect::<Result<Vec<_>>>()?;

        info!(
            cloud = %cloud,
            locals = candidates.len(),
            "label backend router configured"
        );

        let (snapshot, _) = watch::channel(Arc::new(RoutingSnapshot {
            candidates,
            selected: None,
            round: 0,
        }));

        Ok(Self {
            cloud,
            probe_interval: Duration::from_secs(20),
            probe_timeout: Duration::from_secs(10),
            snapshot,
        })
    }

    pub fn from_config(config: &SdkConfig) -> Result<Self> {
        Ok(Self::configure(&config.cloud_address, &config.local_addresses)?
            .with_probe_timing(config.probe_interval(), config.probe_timeout()))
    }

    pub fn with_probe_timing(mut self, interval: Duration, timeout: Duration) -> Self {
        self.probe_interval = interval;
        self.probe_timeout = timeout;
        self
    }

    pub fn cloud_address(&self) -> &Url {
        &self.cloud
    }

    /// The address requests should target right now.
    pub fn current_best(&self) -> Url {
        let snapshot = self.snapshot.borrow();
        snapshot
            .selected_candidate()
            .map(|c| c.base_address.clone())
            .unwrap_or_else(|| self.cloud.clone())
    }

    /// The latest committed ranking.
    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Observe ranking changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RoutingSnapshot>> {
        self.snapshot.subscribe()
    }

    /// Probe every local candidate once, in parallel, and publish the result.
    pub async fn probe_round(&self, prober: Arc<dyn HealthProbe>) -> Arc<RoutingSnapshot> {
        let previous = self.snapshot();
        let mut probes = JoinSet::new();

        for (index, candidate) in previous.candidates.iter().enumerate() {
            let prober = Arc::clone(&prober);
            let base = candidate.base_address.clone();
            let timeout = self.probe_timeout;
            probes.spawn(async move {
                let started = Instant::now();
                let result = match tokio::time::timeout(timeout, prober.probe(&base)).await {
                    Ok(Ok(())) => Ok(started.elapsed()),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(_) => Err(format!("no answer within {}s", timeout.as_secs_f32())),
                };
                (index, result)
            });
        }

        let mut candidates = previous.candidates.clone();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((index, Ok(latency))) => {
                    let candidate = &mut candidates[index];
                    let latency_ms = latency.as_millis() as u64;
                    debug!(base = %candidate.base_address, latency_ms, "backend healthy");
                    candidate.last_probe_result = ProbeStatus::Healthy;
                    candidate.last_probe_latency_ms = Some(latency_ms);
                    candidate.last_error = None;
                }
                Ok((index, Err(reason))) => {
                    let candidate = &mut candidates[index];
                    debug!(base = %candidate.base_address, %reason, "backend unhealthy");
                    candidate.last_probe_result = ProbeStatus::Unhealthy;
                    candidate.last_error = Some(reason);
                }
                Err(err) => warn!(error = %err, "probe task failed"),
            }
        }

        let selected = select_best(&candidates, previous.selected);
        let next = Arc::new(RoutingSnapshot {
            candidates,
            selected,
            round: previous.round + 1,
        });

        let before = previous.selected_candidate().map(|c| c.base_address.as_str());
        let after = next.selected_candidate().map(|c| c.base_address.as_str());
        if before != after {
            info!(
                from = before.unwrap_or(self.cloud.as_str()),
                to = after.unwrap_or(self.cloud.as_str()),
                "switching label backend"
            );
        }

        self.snapshot.send_replace(Arc::clone(&next));
        next
    }

    /// Start the periodic probe cycle on its own task.
    ///
    /// The first round runs immediately. In cloud-only mode nothing is spawned.
    pub fn spawn_probe_cycle(self: &Arc<Self>, prober: Arc<dyn HealthProbe>) -> ProbeCycle {
        if self.snapshot.borrow().candidates.is_empty() {
            info!("no local backends configured, cloud only");
            return ProbeCycle { handle: None };
        }

        let router = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(router.probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                router.probe_round(Arc::clone(&prober)).await;
            }
        });
        ProbeCycle {
            handle: Some(handle),
        }
    }
}

/// Handle of the background probe task; dropping it stops probing.
#[derive(Debug)]
pub struct ProbeCycle {
    handle: Option<JoinHandle<()>>,
}

impl ProbeCycle {
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for ProbeCycle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Lowest healthy latency wins; on a tie the previous selection stays.
fn select_best(candidates: &[BackendCandidate], previous: Option<usize>) -> Option<usize> {
    let best = candidates.iter().filter_map(BackendCandidate::healthy_latency).min()?;

    if let Some(prev) = previous {
        if candidates.get(prev).and_then(BackendCandidate::healthy_latency) == Some(best) {
            return Some(prev);
        }
    }
    candidates
        .iter()
        .position(|c| c.healthy_latency() == Some(best))
}

/// Parse a base address and make sure relative joins stay beneath it.
fn normalize_base(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(WaybillError::InvalidConfig("backend address is empty".into()));
    }
    let mut url = Url::parse(trimmed)
        .map_err(|e| WaybillError::InvalidConfig(format!("invalid backend address '{trimmed}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(WaybillError::InvalidConfig(format!(
            "backend address '{trimmed}' must be an http(s) URL"
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProbe, ProbeAnswer};

    fn router(locals: &[&str]) -> BackendRouter {
        let locals: Vec<String> = locals.iter().map(|s| s.to_string()).collect();
        BackendRouter::configure("https://cloud.example.com/labelservice", &locals).unwrap()
    }

    #[test]
    fn cloud_address_is_required_and_validated() {
        assert!(BackendRouter::configure("", &[]).is_err());
        assert!(BackendRouter::configure("not a url", &[]).is_err());
        assert!(BackendRouter::configure("ftp://cloud/", &[]).is_err());
        assert!(BackendRouter::configure("https://cloud/", &["::".into()]).is_err());
    }

    #[test]
    fn cloud_only_mode_routes_to_cloud() {
        let router = router(&[]);
        assert_eq!(
            router.current_best().as_str(),
            "https://cloud.example.com/labelservice/"
        );
    }

    #[test]
    fn unprobed_locals_are_not_used() {
        let router = router(&["http://10.0.0.5/"]);
        assert_eq!(router.current_best(), *router.cloud_address());
    }

    #[tokio::test(start_paused = true)]
    async fn fastest_healthy_local_wins() {
        let router = router(&["http://10.0.0.5/", "http://10.0.0.6/"]);
        let probe = FakeProbe::new()
            .answer("http://10.0.0.5/", ProbeAnswer::Healthy(30))
            .answer("http://10.0.0.6/", ProbeAnswer::Healthy(10));
        router.probe_round(probe.clone()).await;
        assert_eq!(router.current_best().as_str(), "http://10.0.0.6/");

        let snapshot = router.snapshot();
        assert_eq!(snapshot.round, 1);
        assert_eq!(snapshot.candidates[0].last_probe_latency_ms, Some(30));
    }

    #[tokio::test(start_paused = true)]
    async fn all_unhealthy_falls_back_to_cloud() {
        let router = router(&["http://10.0.0.5/", "http://10.0.0.6/"]);
        let probe = FakeProbe::new()
            .answer("http://10.0.0.5/", ProbeAnswer::Healthy(5))
            .answer("http://10.0.0.6/", ProbeAnswer::Down);
        router.probe_round(probe.clone()).await;
        assert_eq!(router.current_best().as_str(), "http://10.0.0.5/");

        probe.set("http://10.0.0.5/", ProbeAnswer::Down);
        router.probe_round(probe.clone()).await;
        assert_eq!(router.current_best(), *router.cloud_address());
        assert_eq!(
            router.snapshot().candidates[0].last_probe_result,
            ProbeStatus::Unhealthy
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_times_out() {
        let router = router(&["http://10.0.0.5/"])
            .with_probe_timing(Duration::from_secs(20), Duration::from_secs(10));
        let probe = FakeProbe::new().answer("http://10.0.0.5/", ProbeAnswer::Hang);
        let snapshot = router.probe_round(probe).await;
        assert_eq!(snapshot.candidates[0].last_probe_result, ProbeStatus::Unhealthy);
        assert!(snapshot.candidates[0].last_error.as_deref().unwrap().contains("no answer"));
        assert_eq!(router.current_best(), *router.cloud_address());
    }

    #[tokio::test(start_paused = true)]
    async fn equal_latency_keeps_previous_selection() {
        let router = router(&["http://10.0.0.5/", "http://10.0.0.6/"]);
        let probe = FakeProbe::new()
            .answer("http://10.0.0.5/", ProbeAnswer::Healthy(20))
            .answer("http://10.0.0.6/", ProbeAnswer::Healthy(10));
        router.probe_round(probe.clone()).await;
        assert_eq!(router.current_best().as_str(), "http://10.0.0.6/");

        probe.set("http://10.0.0.5/", ProbeAnswer::Healthy(10));
        router.probe_round(probe.clone()).await;
        assert_eq!(router.current_best().as_str(), "http://10.0.0.6/");
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_candidate_is_used_again() {
        let router = router(&["http://10.0.0.5/"]);
        let probe = FakeProbe::new().answer("http://10.0.0.5/", ProbeAnswer::Down);
        router.probe_round(probe.clone()).await;
        assert_eq!(router.current_best(), *router.cloud_address());

        probe.set("http://10.0.0.5/", ProbeAnswer::Healthy(15));
        router.probe_round(probe.clone()).await;
        assert_eq!(router.current_best().as_str(), "http://10.0.0.5/");
    }

    #[tokio::test(start_paused = true)]
    async fn any_healthy_local_beats_cloud() {
        let locals = ["http://10.0.0.5/", "http://10.0.0.6/", "http://10.0.0.7/"];
        let answers = [ProbeAnswer::Down, ProbeAnswer::Healthy(40), ProbeAnswer::Hang];
        // Rotate which candidate is the lone healthy one.
        for shift in 0..locals.len() {
            let router = router(&locals);
            let mut probe = FakeProbe::new();
            for (i, local) in locals.iter().enumerate() {
                probe = probe.answer(local, answers[(i + shift) % answers.len()]);
            }
            router.probe_round(probe).await;
            assert_ne!(router.current_best(), *router.cloud_address());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn probe_cycle_runs_on_its_own_schedule() {
        let router = Arc::new(
            router(&["http://10.0.0.5/"])
                .with_probe_timing(Duration::from_secs(20), Duration::from_secs(10)),
        );
        let probe = FakeProbe::new().answer("http://10.0.0.5/", ProbeAnswer::Healthy(10));
        let mut updates = router.subscribe();

        let cycle = router.spawn_probe_cycle(probe.clone());
        assert!(cycle.is_running());

        updates.changed().await.unwrap();
        assert_eq!(router.current_best().as_str(), "http://10.0.0.5/");

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(probe.calls("http://10.0.0.5/"), 3);

        cycle.stop();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.calls("http://10.0.0.5/"), 3);
    }

    #[tokio::test]
    async fn cloud_only_spawns_nothing() {
        let router = Arc::new(router(&[]));
        let cycle = router.spawn_probe_cycle(FakeProbe::new());
        assert!(!cycle.is_running());
    }
}
