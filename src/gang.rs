//! Gang Assembler (spec §4.3): pure peer-collection over a `PodView`
//! snapshot. No I/O, no mutation — the gang is recomputed fresh on every
//! scheduling attempt per spec §9 ("gangs are derived, not stored").

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::view::PodView;

/// The gang identifier for `pod`: its gang-label value, or its own name if
/// the label is absent (spec §3: "pods lacking the label form a trivial
/// singleton gang keyed by the pod's own name").
pub fn gang_id(gang_label: &str, pod: &Pod) -> String {
    pod.labels()
        .get(gang_label)
        .cloned()
        .unwrap_or_else(|| pod.name_any())
}

/// All pods in `pod`'s namespace sharing its gang identifier and naming
/// `scheduler_name`, bound or unbound (spec §4.3).
pub fn assemble(
    view: &PodView,
    gang_label: &str,
    scheduler_name: &str,
    pod: &Pod,
) -> Vec<Arc<Pod>> {
    let Some(namespace) = pod.namespace() else {
        return Vec::new();
    };
    let id = gang_id(gang_label, pod);
    view.list_namespace(&namespace)
        .into_iter()
        .filter(|p| {
            p.spec
                .as_ref()
                .and_then(|s| s.scheduler_name.as_deref())
                == Some(scheduler_name)
        })
        .filter(|p| gang_id(gang_label, p) == id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::api::core::v1::PodSpec;
    use kube::runtime::watcher::Event;
    use std::collections::BTreeMap;

    const SCHED: &str = "gang-scheduler";
    const GANG_LABEL: &str = "scheduling.k8s.io/gang";

    fn pod(namespace: &str, name: &str, gang: Option<&str>, scheduler: &str) -> Pod {
        let mut labels = BTreeMap::new();
        if let Some(gang) = gang {
            labels.insert(GANG_LABEL.to_string(), gang.to_string());
        }
        Pod {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                scheduler_name: Some(scheduler.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn populated(pods: Vec<Pod>) -> PodView {
        let view = PodView::default();
        for pod in pods {
            view.handle_event(Event::Apply(pod)).await;
        }
        view
    }

    #[tokio::test]
    async fn groups_by_gang_label_within_namespace() {
        let view = populated(vec![
            pod("ns", "a", Some("g1"), SCHED),
            pod("ns", "b", Some("g1"), SCHED),
            pod("ns", "c", Some("g2"), SCHED),
        ])
        .await;
        let trigger = pod("ns", "a", Some("g1"), SCHED);
        let members = assemble(&view, GANG_LABEL, SCHED, &trigger);
        let mut names: Vec<_> = members.iter().map(|p| p.name_any()).collect();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn unlabeled_pod_is_a_singleton_gang() {
        let view = populated(vec![
            pod("ns", "solo", None, SCHED),
            pod("ns", "other", None, SCHED),
        ])
        .await;
        let trigger = pod("ns", "solo", None, SCHED);
        let members = assemble(&view, GANG_LABEL, SCHED, &trigger);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name_any(), "solo");
    }

    #[tokio::test]
    async fn filters_out_pods_targeting_a_different_scheduler() {
        let view = populated(vec![
            pod("ns", "a", Some("g1"), SCHED),
            pod("ns", "b", Some("g1"), "other-scheduler"),
        ])
        .await;
        let trigger = pod("ns", "a", Some("g1"), SCHED);
        let members = assemble(&view, GANG_LABEL, SCHED, &trigger);
        assert_eq!(members.len(), 1);
    }

    #[tokio::test]
    async fn does_not_cross_namespace_boundaries() {
        let view = populated(vec![
            pod("ns-a", "a", Some("g1"), SCHED),
            pod("ns-b", "b", Some("g1"), SCHED),
        ])
        .await;
        let trigger = pod("ns-a", "a", Some("g1"), SCHED);
        let members = assemble(&view, GANG_LABEL, SCHED, &trigger);
        assert_eq!(members.len(), 1);
    }
}
