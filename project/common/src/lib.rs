use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

mod macros;
pub mod selector;

pub use selector::{LabelSelector, LabelSelectorOperator, LabelSelectorRequirement, SelectorError};

#[doc(hidden)]
pub mod _private {
    pub use log::error;
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(rename = "ownerReferences", default)]
    pub owner_references: Option<Vec<OwnerReference>>,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// The kinds of workload objects a pod can be owned by.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Pod,
    ReplicaSet,
    ReplicationController,
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    #[serde(other)]
    Unknown,
}

impl From<&str> for ResourceKind {
    fn from(kind: &str) -> Self {
        match kind {
            "Pod" => Self::Pod,
            "ReplicaSet" => Self::ReplicaSet,
            "ReplicationController" => Self::ReplicationController,
            "Deployment" => Self::Deployment,
            "StatefulSet" => Self::StatefulSet,
            "DaemonSet" => Self::DaemonSet,
            "Job" => Self::Job,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pod => "Pod",
            Self::ReplicaSet => "ReplicaSet",
            Self::ReplicationController => "ReplicationController",
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::Job => "Job",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OwnerReference {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: ResourceKind,
    pub name: String,
    #[serde(default)]
    pub uid: String,
    /// Set when the owner is the managing controller of the object.
    #[serde(default)]
    pub controller: bool,
    #[serde(rename = "blockOwnerDeletion", default)]
    pub block_owner_deletion: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PodStatus {
    #[serde(rename = "podIP")]
    pub pod_ip: Option<String>,
}

/// The subset of a pod the sidekick needs to know about.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PodInfo {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: PodStatus,
}

impl PodInfo {
    pub fn owner_references(&self) -> &[OwnerReference] {
        self.metadata.owner_references.as_deref().unwrap_or(&[])
    }

    /// The pod IP, `None` while the pod has not been assigned one yet.
    pub fn ip(&self) -> Option<&str> {
        self.status.pod_ip.as_deref().filter(|ip| !ip.is_empty())
    }
}

/// A `namespace/name` pair identifying a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
