//! Pod discovery against the Kubernetes API server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::{
    LabelSelector, LabelSelectorOperator, LabelSelectorRequirement, ObjectMeta, OwnerReference,
    PodInfo, PodStatus, ResourceKind, SelectorError,
};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, api::ListParams};
use log::{debug, info};
use std::path::Path;

/// Read access to the orchestrator, the source of truth for which pods exist.
#[async_trait]
pub trait PodDiscovery: Send + Sync + 'static {
    /// IPs of the pods in `namespace` matching the `selector` query string.
    /// Pods that have not been assigned an IP yet are left out.
    async fn list_pod_ips(&self, namespace: &str, selector: &str) -> Result<Vec<String>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodInfo>;

    /// The pod selector of the named ReplicaSet.
    async fn get_replicaset_selector(&self, namespace: &str, name: &str) -> Result<LabelSelector>;
}

#[derive(Clone)]
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the kubeconfig at `kubeconfig`, or from the
    /// in-cluster service account when no path is given.
    pub async fn try_new(kubeconfig: Option<&Path>) -> Result<Self> {
        let config = match kubeconfig {
            Some(path) => {
                let raw = Kubeconfig::read_from(path).with_context(|| {
                    format!("cannot read kubeconfig from {}", path.display())
                })?;
                kube::Config::from_custom_kubeconfig(raw, &KubeConfigOptions::default())
                    .await
                    .with_context(|| {
                        format!("cannot create cluster configuration from {}", path.display())
                    })?
            }
            None => kube::Config::incluster().context(
                "cannot create kubernetes in-cluster configuration, are you running in a pod?",
            )?,
        };
        info!(target: "sidekick::discovery", "using kubernetes api server {}", config.cluster_url);

        let client = Client::try_from(config).context("cannot create kubernetes client")?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl PodDiscovery for KubeDiscovery {
    async fn list_pod_ips(&self, namespace: &str, selector: &str) -> Result<Vec<String>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default().labels(selector)).await?;

        let total = list.items.len();
        let ips: Vec<String> = list
            .items
            .into_iter()
            .filter_map(|pod| pod_info_from(pod).ip().map(str::to_string))
            .collect();
        debug!(
            target: "sidekick::discovery",
            "selector {selector:?} matched {total} pods, {} with an IP",
            ips.len()
        );
        Ok(ips)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodInfo> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods.get(name).await?;
        Ok(pod_info_from(pod))
    }

    async fn get_replicaset_selector(&self, namespace: &str, name: &str) -> Result<LabelSelector> {
        let replicasets: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let rs = replicasets.get(name).await?;
        let spec = rs
            .spec
            .with_context(|| format!("ReplicaSet {namespace}/{name} has no spec"))?;
        Ok(selector_from(spec.selector)?)
    }
}

pub(crate) fn pod_info_from(pod: Pod) -> PodInfo {
    let meta = pod.metadata;
    let owner_references = meta.owner_references.map(|owners| {
        owners
            .into_iter()
            .map(|o| OwnerReference {
                api_version: o.api_version,
                kind: ResourceKind::from(o.kind.as_str()),
                name: o.name,
                uid: o.uid,
                controller: o.controller.unwrap_or(false),
                block_owner_deletion: o.block_owner_deletion,
            })
            .collect()
    });

    PodInfo {
        metadata: ObjectMeta {
            name: meta.name.unwrap_or_default(),
            namespace: meta.namespace.unwrap_or_else(|| "default".to_string()),
            labels: meta.labels.unwrap_or_default().into_iter().collect(),
            owner_references,
        },
        status: PodStatus {
            pod_ip: pod.status.and_then(|s| s.pod_ip),
        },
    }
}

pub(crate) fn selector_from(selector: metav1::LabelSelector) -> Result<LabelSelector, SelectorError> {
    let match_expressions = selector
        .match_expressions
        .unwrap_or_default()
        .into_iter()
        .map(|req| {
            Ok(LabelSelectorRequirement {
                operator: LabelSelectorOperator::try_from(req.operator.as_str())?,
                key: req.key,
                values: req.values.unwrap_or_default(),
            })
        })
        .collect::<Result<Vec<_>, SelectorError>>()?;

    Ok(LabelSelector {
        match_labels: selector.match_labels.unwrap_or_default().into_iter().collect(),
        match_expressions,
    })
}
