use crate::discovery::PodDiscovery;
use crate::error::TargetError;
use common::{ObjectKey, ResourceKind};
use log::info;

/// Who we are and which pods belong to our cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// IP of the pod the sidekick runs in.
    pub self_ip: String,
    /// Label selector of the owning ReplicaSet, in query form.
    pub selector: String,
}

/// Resolve the consul pod's IP and the selector of the ReplicaSet that
/// controls it. The pod must have exactly one owner, and that owner must be
/// its controlling ReplicaSet.
pub async fn resolve_target(
    discovery: &dyn PodDiscovery,
    namespace: &str,
    pod_name: &str,
) -> Result<Target, TargetError> {
    let key = ObjectKey::new(namespace, pod_name);
    let pod = discovery
        .get_pod(namespace, pod_name)
        .await
        .map_err(|source| TargetError::PodLookup {
            key: key.clone(),
            source,
        })?;

    let owner = match pod.owner_references() {
        [owner] => owner,
        owners => {
            return Err(TargetError::OwnerCount {
                key,
                count: owners.len(),
            });
        }
    };
    if !owner.controller || owner.kind != ResourceKind::ReplicaSet {
        return Err(TargetError::NotReplicaSetOwned {
            key,
            kind: owner.kind,
            owner: owner.name.clone(),
            controller: owner.controller,
        });
    }

    let rs_key = ObjectKey::new(namespace, owner.name.as_str());
    let selector = discovery
        .get_replicaset_selector(namespace, &owner.name)
        .await
        .map_err(|source| TargetError::OwnerLookup {
            key: rs_key.clone(),
            source,
        })?;
    if selector.is_empty() {
        return Err(TargetError::EmptySelector { key: rs_key });
    }
    let selector = selector
        .to_query_string()
        .map_err(|source| TargetError::InvalidSelector {
            key: rs_key,
            source,
        })?;

    let self_ip = pod
        .ip()
        .ok_or(TargetError::MissingPodIp { key: key.clone() })?
        .to_string();

    info!(
        target: "sidekick::target",
        "resolved {key}: ip={self_ip} owner=ReplicaSet/{} selector={selector:?}",
        owner.name
    );
    Ok(Target { self_ip, selector })
}
