//! Resource Accountant (spec §4.5): parses Kubernetes `Quantity` strings for
//! cpu/memory, computes per-node remaining allocatable by subtracting the
//! requests of pods already assigned there, and exposes that as a snapshot
//! the Placement Planner can pack against.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;

use crate::error::Error;

/// A node's remaining cpu (milli-cores) and memory (bytes), after
/// subtracting the requests of every pod already bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceState {
    pub cpu_millis: i64,
    pub memory_bytes: i64,
}

impl ResourceState {
    pub(crate) fn saturating_sub(self, request: Request) -> Self {
        Self {
            cpu_millis: self.cpu_millis.saturating_sub(request.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_sub(request.memory_bytes),
        }
    }

    pub fn fits(&self, request: Request) -> bool {
        self.cpu_millis >= request.cpu_millis && self.memory_bytes >= request.memory_bytes
    }
}

/// A single pod's summed container resource requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Request {
    pub cpu_millis: i64,
    pub memory_bytes: i64,
}

/// Parses a cpu `Quantity`: a bare number of cores (`"2"`, `"0.5"`) or a
/// milli-core suffix (`"500m"`).
pub fn parse_cpu(q: &Quantity) -> Result<i64, Error> {
    let raw = q.0.trim();
    if let Some(milli) = raw.strip_suffix('m') {
        return milli.parse::<i64>().map_err(|e| Error::InvalidQuantity {
            value: raw.to_string(),
            reason: e.to_string(),
        });
    }
    raw.parse::<f64>()
        .map(|cores| (cores * 1000.0).round() as i64)
        .map_err(|e| Error::InvalidQuantity {
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

const BINARY_SUFFIXES: &[(&str, i64)] = &[
    ("Ki", 1024),
    ("Mi", 1024i64.pow(2)),
    ("Gi", 1024i64.pow(3)),
    ("Ti", 1024i64.pow(4)),
    ("Pi", 1024i64.pow(5)),
    ("Ei", 1024i64.pow(6)),
];

const DECIMAL_SUFFIXES: &[(&str, i64)] = &[
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
];

/// Parses a memory `Quantity`: binary (Ki/Mi/Gi/Ti/Pi/Ei), decimal
/// (k/M/G/T/P/E), or bare bytes.
pub fn parse_memory(q: &Quantity) -> Result<i64, Error> {
    let raw = q.0.trim();

    for (suffix, multiplier) in BINARY_SUFFIXES {
        if let Some(num) = raw.strip_suffix(suffix) {
            return num.parse::<f64>().map(|n| (n * *multiplier as f64).round() as i64).map_err(|e| {
                Error::InvalidQuantity {
                    value: raw.to_string(),
                    reason: e.to_string(),
                }
            });
        }
    }
    for (suffix, multiplier) in DECIMAL_SUFFIXES {
        if let Some(num) = raw.strip_suffix(suffix) {
            return num.parse::<f64>().map(|n| (n * *multiplier as f64).round() as i64).map_err(|e| {
                Error::InvalidQuantity {
                    value: raw.to_string(),
                    reason: e.to_string(),
                }
            });
        }
    }
    raw.parse::<f64>().map(|n| n.round() as i64).map_err(|e| Error::InvalidQuantity {
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Sums the cpu/memory requests of every container in `pod`. Missing
/// requests on a container contribute zero, per spec §4.5.
pub fn pod_request(pod: &Pod) -> Result<Request, Error> {
    let mut total = Request::default();
    let Some(spec) = pod.spec.as_ref() else {
        return Ok(total);
    };
    for container in &spec.containers {
        let Some(resources) = container.resources.as_ref() else {
            continue;
        };
        let Some(requests) = resources.requests.as_ref() else {
            continue;
        };
        if let Some(cpu) = requests.get("cpu") {
            total.cpu_millis += parse_cpu(cpu)?;
        }
        if let Some(mem) = requests.get("memory") {
            total.memory_bytes += parse_memory(mem)?;
        }
    }
    Ok(total)
}

/// A node is schedulable iff it is not marked unschedulable and carries a
/// `Ready=True` condition (spec §4.5).
pub fn node_ready(node: &Node) -> bool {
    let Some(spec) = node.spec.as_ref() else {
        return false;
    };
    if spec.unschedulable.unwrap_or(false) {
        return false;
    }
    let Some(status) = node.status.as_ref() else {
        return false;
    };
    let Some(conditions) = status.conditions.as_ref() else {
        return false;
    };
    conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True")
}

fn node_allocatable(node: &Node) -> Result<ResourceState, Error> {
    let Some(status) = node.status.as_ref() else {
        return Ok(ResourceState { cpu_millis: 0, memory_bytes: 0 });
    };
    let Some(allocatable) = status.allocatable.as_ref() else {
        return Ok(ResourceState { cpu_millis: 0, memory_bytes: 0 });
    };
    let cpu_millis = allocatable.get("cpu").map(parse_cpu).transpose()?.unwrap_or(0);
    let memory_bytes = allocatable.get("memory").map(parse_memory).transpose()?.unwrap_or(0);
    Ok(ResourceState { cpu_millis, memory_bytes })
}

/// Builds a per-node resource snapshot: every ready, schedulable node's
/// allocatable capacity, less the summed requests of every pod in
/// `assigned_pods` bound to it. Keyed by node name in a `BTreeMap` so
/// downstream first-fit packing iterates nodes in a fixed, reproducible
/// order (spec §4.6's determinism requirement).
pub fn build_resource_states(
    nodes: &[Arc<Node>],
    assigned_pods: &[Arc<Pod>],
) -> Result<BTreeMap<String, ResourceState>, Error> {
    let mut states = BTreeMap::new();
    for node in nodes {
        if !node_ready(node) {
            continue;
        }
        states.insert(node.name_any(), node_allocatable(node)?);
    }

    for pod in assigned_pods {
        let Some(node_name) = pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) else {
            continue;
        };
        if node_name.is_empty() {
            continue;
        }
        let Some(state) = states.get_mut(node_name) else {
            continue;
        };
        let request = pod_request(pod)?;
        *state = state.saturating_sub(request);
    }

    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeSpec, NodeStatus, PodSpec, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn quantity(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[test]
    fn parses_bare_cpu_cores() {
        assert_eq!(parse_cpu(&quantity("2")).unwrap(), 2000);
        assert_eq!(parse_cpu(&quantity("0.5")).unwrap(), 500);
    }

    #[test]
    fn parses_milli_cpu_suffix() {
        assert_eq!(parse_cpu(&quantity("500m")).unwrap(), 500);
        assert_eq!(parse_cpu(&quantity("1500m")).unwrap(), 1500);
    }

    #[test]
    fn parses_binary_memory_suffixes() {
        assert_eq!(parse_memory(&quantity("1Ki")).unwrap(), 1024);
        assert_eq!(parse_memory(&quantity("8Gi")).unwrap(), 8 * 1024i64.pow(3));
    }

    #[test]
    fn parses_decimal_memory_suffixes() {
        assert_eq!(parse_memory(&quantity("1k")).unwrap(), 1_000);
        assert_eq!(parse_memory(&quantity("2G")).unwrap(), 2_000_000_000);
    }

    #[test]
    fn parses_bare_byte_memory() {
        assert_eq!(parse_memory(&quantity("1024")).unwrap(), 1024);
    }

    #[test]
    fn invalid_quantity_is_rejected() {
        assert!(parse_cpu(&quantity("not-a-number")).is_err());
        assert!(parse_memory(&quantity("lots")).is_err());
    }

    fn node(name: &str, cpu: &str, memory: &str, ready: bool, unschedulable: bool) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                unschedulable: Some(unschedulable),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                allocatable: Some(BTreeMap::from([
                    ("cpu".to_string(), quantity(cpu)),
                    ("memory".to_string(), quantity(memory)),
                ])),
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True".to_string() } else { "False".to_string() },
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    fn pod_requesting(namespace: &str, name: &str, node_name: Option<&str>, cpu: &str, memory: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: node_name.map(str::to_string),
                containers: vec![k8s_openapi::api::core::v1::Container {
                    name: "app".to_string(),
                    resources: Some(ResourceRequirements {
                        requests: Some(BTreeMap::from([
                            ("cpu".to_string(), quantity(cpu)),
                            ("memory".to_string(), quantity(memory)),
                        ])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn node_ready_excludes_unschedulable_and_not_ready() {
        assert!(node_ready(&node("a", "4", "8Gi", true, false)));
        assert!(!node_ready(&node("a", "4", "8Gi", false, false)));
        assert!(!node_ready(&node("a", "4", "8Gi", true, true)));
    }

    #[test]
    fn build_resource_states_excludes_not_ready_nodes() {
        let nodes = vec![
            Arc::new(node("ready", "4", "8Gi", true, false)),
            Arc::new(node("broken", "4", "8Gi", false, false)),
        ];
        let states = build_resource_states(&nodes, &[]).unwrap();
        assert!(states.contains_key("ready"));
        assert!(!states.contains_key("broken"));
    }

    #[test]
    fn build_resource_states_subtracts_assigned_pod_requests() {
        let nodes = vec![Arc::new(node("a", "4", "8Gi", true, false))];
        let pods = vec![Arc::new(pod_requesting("ns", "p1", Some("a"), "1", "2Gi"))];
        let states = build_resource_states(&nodes, &pods).unwrap();
        let state = states.get("a").unwrap();
        assert_eq!(state.cpu_millis, 3000);
        assert_eq!(state.memory_bytes, 6 * 1024i64.pow(3));
    }

    #[test]
    fn build_resource_states_ignores_unbound_pods() {
        let nodes = vec![Arc::new(node("a", "4", "8Gi", true, false))];
        let pods = vec![Arc::new(pod_requesting("ns", "p1", None, "1", "2Gi"))];
        let states = build_resource_states(&nodes, &pods).unwrap();
        let state = states.get("a").unwrap();
        assert_eq!(state.cpu_millis, 4000);
    }

    #[test]
    fn fits_checks_both_dimensions() {
        let state = ResourceState { cpu_millis: 1000, memory_bytes: 1024 };
        assert!(state.fits(Request { cpu_millis: 1000, memory_bytes: 1024 }));
        assert!(!state.fits(Request { cpu_millis: 1001, memory_bytes: 0 }));
        assert!(!state.fits(Request { cpu_millis: 0, memory_bytes: 1025 }));
    }
}
