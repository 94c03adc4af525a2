//! Placement Planner (spec §4.6): pure, all-or-nothing first-fit bin
//! packing over a fixed-order resource snapshot. Given the gang's unbound
//! members and a committed node's remaining capacity, either every member
//! gets a node or the attempt produces no plan at all — nothing is
//! partially placed.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::resources::{pod_request, ResourceState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoFeasibleNode {
    pub pod_key: String,
}

/// Ordered pod -> node assignments for one gang.
pub type Plan = Vec<(Arc<Pod>, String)>;

/// Packs `pods` against `nodes` (already in a fixed, deterministic order)
/// using first-fit: each pod takes the first node with room, in iteration
/// order, and that node's remaining capacity is debited before considering
/// the next pod. Bails out on the first pod with no feasible node, per
/// spec §4.6's all-or-nothing invariant — the caller never sees a partial
/// plan.
pub fn plan(pods: &[Arc<Pod>], nodes: &BTreeMap<String, ResourceState>) -> Result<Plan, NoFeasibleNode> {
    let mut remaining = nodes.clone();
    let mut assignments = Plan::with_capacity(pods.len());

    for pod in pods {
        let request = pod_request(pod).unwrap_or_default();
        let chosen = remaining
            .iter()
            .find(|(_, state)| state.fits(request))
            .map(|(name, _)| name.clone());

        let Some(node_name) = chosen else {
            return Err(NoFeasibleNode {
                pod_key: format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any()),
            });
        };

        let state = remaining.get_mut(&node_name).expect("chosen node exists in snapshot");
        *state = state.saturating_sub(request);
        assignments.push((pod.clone(), node_name));
    }

    Ok(assignments)
}
