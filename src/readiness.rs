//! Readiness Gate (spec §4.4): resolves the effective min-available for a
//! gang and decides whether enough unbound members exist to attempt
//! placement.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

/// A gang member is terminating iff its deletion marker is non-empty.
/// Per spec §9's second Open Question, terminating members are excluded
/// from both the percentage-resolution base and the unbound count — the
/// spec's own recommended resolution.
pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// A pod is unbound iff its assigned node name is empty.
pub fn is_unbound(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .unwrap_or("")
        .is_empty()
}

/// Resolves the effective min-available for a gang from the first member
/// carrying `annotation_key`, against `gang_size` (already excluding
/// terminating members). A value is treated as a percentage iff its string
/// form ends in `%` — otherwise it is parsed as a bare integer. This
/// explicitly resolves spec §9's first Open Question: the source's helper
/// discriminated string-vs-int ambiguously, so here `"3"` always parses as
/// the integer 3 and only `"60%"` is read as a percentage.
///
/// Out-of-range or unparseable values collapse to `gang_size` ("require
/// all members"), per spec §4.4.
pub fn effective_min_available(annotation_key: &str, members: &[Arc<Pod>], gang_size: usize) -> usize {
    let value = members
        .iter()
        .find_map(|p| p.annotations().get(annotation_key).cloned());

    let Some(value) = value else {
        return gang_size;
    };

    let resolved: Option<i64> = match value.trim().strip_suffix('%') {
        Some(pct) => pct
            .trim()
            .parse::<f64>()
            .ok()
            .map(|p| (p * gang_size as f64 / 100.0).ceil() as i64),
        None => value.trim().parse::<i64>().ok(),
    };

    match resolved {
        Some(v) if v >= 1 && (v as usize) <= gang_size => v as usize,
        _ => gang_size,
    }
}

/// Whether a gang has enough unbound members to attempt placement.
pub fn gate(effective_min_available: usize, unbound_count: usize) -> bool {
    unbound_count >= effective_min_available
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use k8s_openapi::chrono::Utc;
    use std::collections::BTreeMap;

    const ANNOT: &str = "scheduling.k8s.io/min-available";

    fn pod_with_annotation(value: Option<&str>) -> Pod {
        let mut annotations = BTreeMap::new();
        if let Some(v) = value {
            annotations.insert(ANNOT.to_string(), v.to_string());
        }
        Pod {
            metadata: ObjectMeta {
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn members(values: &[Option<&str>]) -> Vec<Arc<Pod>> {
        values.iter().map(|v| Arc::new(pod_with_annotation(*v))).collect()
    }

    #[test]
    fn no_annotation_defaults_to_full_gang_size() {
        let m = members(&[None, None, None]);
        assert_eq!(effective_min_available(ANNOT, &m, 3), 3);
    }

    #[test]
    fn bare_integer_annotation_parses_as_integer() {
        let m = members(&[Some("2"), None, None]);
        assert_eq!(effective_min_available(ANNOT, &m, 3), 2);
    }

    #[test]
    fn integer_below_one_collapses_to_full_gang() {
        let m = members(&[Some("0")]);
        assert_eq!(effective_min_available(ANNOT, &m, 5), 5);
        let m = members(&[Some("-3")]);
        assert_eq!(effective_min_available(ANNOT, &m, 5), 5);
    }

    #[test]
    fn integer_above_gang_size_collapses_to_full_gang() {
        let m = members(&[Some("10")]);
        assert_eq!(effective_min_available(ANNOT, &m, 3), 3);
    }

    #[test]
    fn percentage_boundary_rounds_up() {
        // ceil(50% of 3) = ceil(1.5) = 2
        let m = members(&[Some("50%")]);
        assert_eq!(effective_min_available(ANNOT, &m, 3), 2);
    }

    #[test]
    fn percentage_sixty_of_five_rounds_up_to_three() {
        let m = members(&[Some("60%")]);
        assert_eq!(effective_min_available(ANNOT, &m, 5), 3);
    }

    #[test]
    fn unparseable_value_collapses_to_full_gang() {
        let m = members(&[Some("not-a-number")]);
        assert_eq!(effective_min_available(ANNOT, &m, 4), 4);
    }

    #[test]
    fn first_annotated_member_wins() {
        let m = members(&[None, Some("1"), Some("2")]);
        assert_eq!(effective_min_available(ANNOT, &m, 4), 1);
    }

    #[test]
    fn gate_defers_when_unbound_below_effective_minimum() {
        assert!(!gate(2, 1));
        assert!(gate(2, 2));
        assert!(gate(2, 3));
    }

    #[test]
    fn is_terminating_reflects_deletion_timestamp() {
        let mut pod = pod_with_annotation(None);
        assert!(!is_terminating(&pod));
        pod.metadata.deletion_timestamp = Some(Time(Utc::now()));
        assert!(is_terminating(&pod));
    }

    #[test]
    fn is_unbound_reflects_node_name() {
        let mut pod = Pod {
            spec: Some(PodSpec::default()),
            ..Default::default()
        };
        assert!(is_unbound(&pod));
        pod.spec.as_mut().unwrap().node_name = Some("node-1".to_string());
        assert!(!is_unbound(&pod));
    }
}
