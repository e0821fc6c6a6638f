#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use common::{LabelSelector, ObjectMeta, OwnerReference, PodInfo, PodStatus, ResourceKind};
use sidekick::{PodDiscovery, membership::Membership};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ForceLeave(String),
    Join(String, bool),
}

/// In-memory consul agent. Successful commands are applied to its peer list
/// when `apply` is set, so a following pass sees the converged state.
#[derive(Default)]
pub struct FakeMembership {
    peers: Mutex<Vec<String>>,
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<String>>,
    fail_list: AtomicBool,
    list_calls: AtomicUsize,
    apply: bool,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeMembership {
    pub fn new(peers: &[&str]) -> Self {
        Self {
            peers: Mutex::new(peers.iter().map(|p| p.to_string()).collect()),
            ..Default::default()
        }
    }

    /// Apply successful commands to the peer list, joined peers get port 8301.
    pub fn applying(mut self) -> Self {
        self.apply = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_for(self, address: &str) -> Self {
        self.failing.lock().unwrap().insert(address.to_string());
        self
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn peers(&self) -> Vec<String> {
        self.peers.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn command(&self, call: Call, address: &str) -> Result<()> {
        self.calls.lock().unwrap().push(call);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(address) {
            return Err(anyhow!("Unexpected response code: 500 (agent unreachable)"));
        }
        Ok(())
    }
}

#[async_trait]
impl Membership for FakeMembership {
    async fn list_peers(&self) -> Result<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(anyhow!("No cluster leader"));
        }
        Ok(self.peers())
    }

    async fn force_leave(&self, address: &str) -> Result<()> {
        self.command(Call::ForceLeave(address.to_string()), address)
            .await?;
        if self.apply {
            self.peers.lock().unwrap().retain(|p| p != address);
        }
        Ok(())
    }

    async fn join(&self, address: &str, replay: bool) -> Result<()> {
        self.command(Call::Join(address.to_string(), replay), address)
            .await?;
        if self.apply {
            self.peers.lock().unwrap().push(format!("{address}:8301"));
        }
        Ok(())
    }
}

/// In-memory API server holding pods and ReplicaSet selectors.
#[derive(Default)]
pub struct FakeDiscovery {
    pods: Mutex<Vec<PodInfo>>,
    replicasets: Mutex<HashMap<String, LabelSelector>>,
    fail_list: AtomicBool,
    get_pod_calls: AtomicUsize,
}

impl FakeDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replicaset(self, name: &str, labels: &[(&str, &str)]) -> Self {
        let selector = LabelSelector {
            match_labels: to_map(labels),
            match_expressions: vec![],
        };
        self.replicasets
            .lock()
            .unwrap()
            .insert(name.to_string(), selector);
        self
    }

    pub fn with_pod(self, pod: PodInfo) -> Self {
        self.add_pod(pod);
        self
    }

    pub fn add_pod(&self, pod: PodInfo) {
        self.pods.lock().unwrap().push(pod);
    }

    pub fn remove_pod(&self, name: &str) {
        self.pods.lock().unwrap().retain(|p| p.metadata.name != name);
    }

    pub fn set_pod_ip(&self, name: &str, ip: &str) {
        for pod in self.pods.lock().unwrap().iter_mut() {
            if pod.metadata.name == name {
                pod.status.pod_ip = Some(ip.to_string());
            }
        }
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn get_pod_calls(&self) -> usize {
        self.get_pod_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PodDiscovery for FakeDiscovery {
    async fn list_pod_ips(&self, namespace: &str, selector: &str) -> Result<Vec<String>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(anyhow!("pods is forbidden: cannot list resource \"pods\""));
        }
        let selector = self
            .replicasets
            .lock()
            .unwrap()
            .values()
            .find(|s| s.to_query_string().ok().as_deref() == Some(selector))
            .cloned()
            .ok_or_else(|| anyhow!("unable to parse requirement: {selector:?}"))?;

        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.metadata.namespace == namespace && selector.matches(&p.metadata.labels))
            .filter_map(|p| p.ip().map(str::to_string))
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodInfo> {
        self.get_pod_calls.fetch_add(1, Ordering::SeqCst);
        self.pods
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.metadata.namespace == namespace && p.metadata.name == name)
            .cloned()
            .ok_or_else(|| anyhow!("pods \"{name}\" not found"))
    }

    async fn get_replicaset_selector(&self, _namespace: &str, name: &str) -> Result<LabelSelector> {
        self.replicasets
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("replicasets.apps \"{name}\" not found"))
    }
}

fn to_map(labels: &[(&str, &str)]) -> HashMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A pod controlled by ReplicaSet `owner` in the default namespace.
pub fn make_pod(name: &str, ip: Option<&str>, owner: &str, labels: &[(&str, &str)]) -> PodInfo {
    PodInfo {
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: "default".to_string(),
            labels: to_map(labels),
            owner_references: Some(vec![OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: ResourceKind::ReplicaSet,
                name: owner.to_string(),
                uid: format!("{owner}-uid"),
                controller: true,
                block_owner_deletion: Some(true),
            }]),
        },
        status: PodStatus {
            pod_ip: ip.map(str::to_string),
        },
    }
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
