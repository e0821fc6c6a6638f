//! The poll loop driving reconciliation on a fixed period.

use crate::config::{Config, IdentityPolicy};
use crate::discovery::PodDiscovery;
use crate::error::{CycleError, TargetError};
use crate::membership::Membership;
use crate::reconcile::{DesiredSet, ReconcileReport, Reconciler};
use crate::target::{Target, resolve_target};
use log::{debug, error, info};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// One sidekick instance: the two collaborators plus the resolved target.
pub struct Sidekick {
    discovery: Arc<dyn PodDiscovery>,
    membership: Arc<dyn Membership>,
    reconciler: Reconciler,
    namespace: String,
    pod_name: String,
    // Some under IdentityPolicy::Cached, resolved again every cycle otherwise.
    target: Option<Target>,
}

impl Sidekick {
    /// Under [`IdentityPolicy::Cached`] the target is resolved here and a
    /// failure is returned to the caller.
    pub async fn try_new(
        discovery: Arc<dyn PodDiscovery>,
        membership: Arc<dyn Membership>,
        cfg: &Config,
    ) -> Result<Self, TargetError> {
        let target = match cfg.identity_policy {
            IdentityPolicy::Cached => {
                Some(resolve_target(discovery.as_ref(), &cfg.namespace, &cfg.pod_name).await?)
            }
            IdentityPolicy::PerCycle => None,
        };

        Ok(Self {
            reconciler: Reconciler::new(membership.clone(), cfg.peer_concurrency),
            discovery,
            membership,
            namespace: cfg.namespace.clone(),
            pod_name: cfg.pod_name.clone(),
            target,
        })
    }

    pub fn cached_target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    /// Run one reconciliation cycle. Only failing to obtain the inputs fails
    /// the cycle, peer failures are part of the returned report.
    pub async fn run_cycle(&self) -> Result<ReconcileReport, CycleError> {
        let target = match &self.target {
            Some(target) => Cow::Borrowed(target),
            None => Cow::Owned(
                resolve_target(self.discovery.as_ref(), &self.namespace, &self.pod_name).await?,
            ),
        };

        let desired: DesiredSet = self
            .discovery
            .list_pod_ips(&self.namespace, &target.selector)
            .await
            .map_err(|source| CycleError::ListDesired {
                selector: target.selector.clone(),
                source,
            })?
            .into_iter()
            .collect();

        let peers = self
            .membership
            .list_peers()
            .await
            .map_err(CycleError::ListPeers)?;

        Ok(self
            .reconciler
            .reconcile(&desired, &peers, &target.self_ip)
            .await)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Reconciling,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub failed_cycles: u64,
}

/// Runs [`Sidekick::run_cycle`] every `period`, strictly one cycle at a time.
pub struct PollLoop {
    sidekick: Sidekick,
    period: Duration,
    state: LoopState,
    stats: LoopStats,
}

impl PollLoop {
    pub fn new(sidekick: Sidekick, period: Duration) -> Self {
        Self {
            sidekick,
            period,
            state: LoopState::Idle,
            stats: LoopStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Loop until `stop` turns true or its sender goes away. The first cycle
    /// starts right away. A stop request never interrupts a running cycle,
    /// it is picked up once the loop is idle again.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) -> LoopStats {
        let mut ticker = tokio::time::interval(self.period);
        // a slow cycle delays the schedule instead of causing a burst of cycles
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            target: "sidekick::poll",
            "starting poll loop, period {}",
            humantime::format_duration(self.period)
        );

        loop {
            if *stop.borrow_and_update() {
                break;
            }
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            self.state = LoopState::Reconciling;
            self.stats.cycles += 1;
            let cycle = self.stats.cycles;
            match self.sidekick.run_cycle().await {
                Ok(report) if report.removed.is_empty()
                    && report.added.is_empty()
                    && report.is_clean() =>
                {
                    debug!(target: "sidekick::poll", "cycle {cycle}: peers in sync");
                }
                Ok(report) => {
                    info!(target: "sidekick::poll", "cycle {cycle}: {report}");
                }
                Err(e) => {
                    self.stats.failed_cycles += 1;
                    error!(target: "sidekick::poll", "cycle {cycle} failed: {e}");
                }
            }
            self.state = LoopState::Idle;
        }

        info!(
            target: "sidekick::poll",
            "poll loop stopped after {} cycles ({} failed)",
            self.stats.cycles,
            self.stats.failed_cycles
        );
        self.stats
    }
}
