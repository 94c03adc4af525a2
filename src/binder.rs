//! Binder (spec §4.7): commits a placement decision by creating the Pod's
//! `binding` subresource, UID-pinned so a stale plan can never bind the
//! wrong incarnation of a pod.

use k8s_openapi::api::core::v1::{Binding, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, ObjectReference};
use kube::api::{Api, PostParams};
use kube::ResourceExt;

use crate::error::Error;

/// Binds a single pod to `node_name` by creating its `binding` subresource.
/// The binding's target carries the pod's UID, so the Kubernetes apiserver
/// rejects the bind outright if the pod was deleted and recreated since the
/// plan was computed.
pub async fn bind(api: &Api<Pod>, pod: &Pod, node_name: &str) -> Result<(), Error> {
    let binding = Binding {
        metadata: ObjectMeta {
            name: pod.metadata.name.clone(),
            namespace: pod.metadata.namespace.clone(),
            uid: pod.metadata.uid.clone(),
            ..Default::default()
        },
        target: ObjectReference {
            kind: Some("Node".to_string()),
            api_version: Some("v1".to_string()),
            name: Some(node_name.to_string()),
            ..Default::default()
        },
    };
    api.create_subresource::<Binding>(
        "binding",
        &pod.name_any(),
        &PostParams::default(),
        serde_json::to_vec(&binding)?,
    )
    .await?;
    Ok(())
}

/// Binds every member of a gang's plan in order, stopping at the first
/// failure (spec §4.7). Already-bound members are left as-is — the caller
/// is responsible for deciding whether to unwind them (spec §7 leaves
/// partial binds in place rather than attempting a rollback that itself
/// can fail).
pub async fn bind_gang(api: &Api<Pod>, plan: &crate::planner::Plan) -> Result<(), (usize, Error)> {
    for (index, (pod, node_name)) in plan.iter().enumerate() {
        bind(api, pod, node_name).await.map_err(|e| (index, e))?;
    }
    Ok(())
}
