//! Converges the consul peer list towards the set of live pods.
//!
//! One pass works in two steps. [`ConvergencePlan::compute`] diffs the desired
//! pod IPs against the peers reported by the agent, then [`Reconciler`] runs
//! the resulting force-leave and join commands. Every command is independent:
//! a failing peer is recorded in the [`ReconcileReport`] and the pass carries
//! on with the others.

use crate::error::{AddressError, PeerError};
use crate::membership::Membership;
use futures::StreamExt;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Pod IPs that should be members of the cluster, rebuilt every cycle.
pub type DesiredSet = BTreeSet<String>;

/// A peer address as reported by the agent, split into host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    /// Split `host:port`, where an IPv6 host has to be bracketed (`[::1]:8301`).
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        let colon = address.rfind(':').ok_or(AddressError::MissingPort)?;

        let (host, host_start, host_end) = if address.starts_with('[') {
            let end = address.find(']').ok_or(AddressError::UnclosedBracket)?;
            if end + 1 == address.len() {
                return Err(AddressError::MissingPort);
            }
            if end + 1 != colon {
                return Err(if address.as_bytes()[end + 1] == b':' {
                    AddressError::TooManyColons
                } else {
                    AddressError::MissingPort
                });
            }
            (&address[1..end], 1, end + 1)
        } else {
            let host = &address[..colon];
            if host.contains(':') {
                return Err(AddressError::TooManyColons);
            }
            (host, 0, 0)
        };

        if address[host_start..].contains('[') || address[host_end..].contains(']') {
            return Err(AddressError::UnexpectedBracket);
        }
        if host.is_empty() {
            return Err(AddressError::EmptyHost);
        }

        let port = &address[colon + 1..];
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressError::InvalidPort(port.to_string()))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// The commands one reconciliation pass has to issue.
#[derive(Debug, Default)]
pub struct ConvergencePlan {
    /// Peers (verbatim agent addresses) whose host is not desired.
    pub to_remove: Vec<String>,
    /// Desired members with no matching peer, never including ourselves.
    pub to_add: Vec<String>,
    /// Peers skipped because their address could not be parsed.
    pub invalid: Vec<PeerError>,
}

impl ConvergencePlan {
    pub fn compute(desired: &DesiredSet, actual_peers: &[String], self_ip: &str) -> Self {
        let mut plan = ConvergencePlan::default();
        let mut missing = desired.clone();

        for peer in actual_peers {
            let address = match PeerAddress::parse(peer) {
                Ok(address) => address,
                Err(reason) => {
                    plan.invalid.push(PeerError::InvalidAddress {
                        address: peer.clone(),
                        reason,
                    });
                    continue;
                }
            };

            if !desired.contains(&address.host) {
                plan.to_remove.push(peer.clone());
            }
            // The remaining ips are the ones which should be added
            missing.remove(&address.host);
        }

        plan.to_add = missing.into_iter().filter(|ip| ip != self_ip).collect();
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Peers that were successfully forced to leave.
    pub removed: Vec<String>,
    /// Members that were successfully joined.
    pub added: Vec<String>,
    pub errors: Vec<PeerError>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "removed={} added={} errors={}",
            self.removed.len(),
            self.added.len(),
            self.errors.len()
        )
    }
}

/// Executes convergence plans against a [`Membership`] backend.
pub struct Reconciler {
    membership: Arc<dyn Membership>,
    concurrency: usize,
}

impl Reconciler {
    /// `concurrency` bounds the number of in-flight peer commands per phase.
    pub fn new(membership: Arc<dyn Membership>, concurrency: usize) -> Self {
        Self {
            membership,
            concurrency: concurrency.max(1),
        }
    }

    /// Diff `desired` against `actual_peers` and issue the resulting commands.
    /// Removals run before joins. Peer failures end up in the report and
    /// never stop the pass.
    pub async fn reconcile(
        &self,
        desired: &DesiredSet,
        actual_peers: &[String],
        self_ip: &str,
    ) -> ReconcileReport {
        let plan = ConvergencePlan::compute(desired, actual_peers, self_ip);
        debug!(
            target: "sidekick::reconcile",
            "plan: desired={} peers={} remove={:?} add={:?} invalid={}",
            desired.len(),
            actual_peers.len(),
            plan.to_remove,
            plan.to_add,
            plan.invalid.len()
        );
        self.execute(plan).await
    }

    pub async fn execute(&self, plan: ConvergencePlan) -> ReconcileReport {
        let mut report = ReconcileReport {
            errors: plan.invalid,
            ..Default::default()
        };
        for err in report.errors.iter() {
            warn!(target: "sidekick::reconcile", "{err}");
        }

        let removals = futures::stream::iter(plan.to_remove)
            .map(|peer| {
                let membership = self.membership.clone();
                async move {
                    info!(target: "sidekick::reconcile", "Deleting peer {peer}");
                    match membership.force_leave(&peer).await {
                        Ok(()) => Ok(peer),
                        Err(source) => Err(PeerError::ForceLeave {
                            address: peer,
                            source,
                        }),
                    }
                }
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;
        for outcome in removals {
            match outcome {
                Ok(peer) => report.removed.push(peer),
                Err(err) => {
                    warn!(target: "sidekick::reconcile", "{err}");
                    report.errors.push(err);
                }
            }
        }

        let joins = futures::stream::iter(plan.to_add)
            .map(|peer| {
                let membership = self.membership.clone();
                async move {
                    info!(target: "sidekick::reconcile", "Adding peer {peer}");
                    match membership.join(&peer, false).await {
                        Ok(()) => Ok(peer),
                        Err(source) => Err(PeerError::Join {
                            address: peer,
                            source,
                        }),
                    }
                }
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;
        for outcome in joins {
            match outcome {
                Ok(peer) => report.added.push(peer),
                Err(err) => {
                    warn!(target: "sidekick::reconcile", "{err}");
                    report.errors.push(err);
                }
            }
        }

        report
    }
}
