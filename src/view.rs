//! Cluster Watch (spec §4.1): two in-memory, read-only views over pods and
//! nodes, fed by long-lived `kube::runtime::watcher` streams with periodic
//! full resyncs to heal silent divergence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client, ResourceExt};
use owo_colors::OwoColorize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::colors::{FG1, FG2};
use crate::error::Error;
use crate::queue::WorkQueue;

/// A pod is eligible for scheduling iff its scheduler-name field equals the
/// configured name, its assigned node is empty, and its deletion marker is
/// empty (spec §3 invariants).
pub fn is_eligible(pod: &Pod, scheduler_name: &str) -> bool {
    if pod.metadata.deletion_timestamp.is_some() {
        return false;
    }
    let spec = match pod.spec.as_ref() {
        Some(spec) => spec,
        None => return false,
    };
    if spec.scheduler_name.as_deref() != Some(scheduler_name) {
        return false;
    }
    spec.node_name.as_deref().unwrap_or("").is_empty()
}

pub type PodKey = (String, String);

fn pod_key(pod: &Pod) -> Option<PodKey> {
    Some((pod.namespace()?, pod.name_any()))
}

/// A generic eventually-consistent cache keyed by namespace+name, backed by
/// a single `RwLock`-guarded index. Reads (`get`, `list`) are synchronous
/// in-memory lookups, per spec §4.1's contract; the only writer is the
/// watch loop driving this view.
struct Index<T> {
    by_key: RwLock<HashMap<PodKey, Arc<T>>>,
    synced: Notify,
    has_synced: std::sync::atomic::AtomicBool,
}

impl<T> Default for Index<T> {
    fn default() -> Self {
        Self {
            by_key: RwLock::new(HashMap::new()),
            synced: Notify::new(),
            has_synced: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl<T> Index<T> {
    fn insert(&self, key: PodKey, value: T) {
        self.by_key.write().unwrap().insert(key, Arc::new(value));
    }

    fn remove(&self, key: &PodKey) {
        self.by_key.write().unwrap().remove(key);
    }

    fn replace_all(&self, items: HashMap<PodKey, Arc<T>>) {
        *self.by_key.write().unwrap() = items;
    }

    fn get(&self, key: &PodKey) -> Option<Arc<T>> {
        self.by_key.read().unwrap().get(key).cloned()
    }

    fn list(&self) -> Vec<Arc<T>> {
        self.by_key.read().unwrap().values().cloned().collect()
    }

    fn mark_synced(&self) {
        if !self.has_synced.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.synced.notify_waiters();
        }
    }

    async fn wait_synced(&self) {
        if self.has_synced.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        self.synced.notified().await;
    }
}

/// Read-only view over pods naming this scheduler.
#[derive(Default)]
pub struct PodView {
    index: Index<Pod>,
}

impl PodView {
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<Pod>> {
        self.index.get(&(namespace.to_string(), name.to_string()))
    }

    /// All pods known to the view in the given namespace.
    pub fn list_namespace(&self, namespace: &str) -> Vec<Arc<Pod>> {
        self.index
            .list()
            .into_iter()
            .filter(|p| p.namespace().as_deref() == Some(namespace))
            .collect()
    }

    /// All pods known to the view, across every namespace. Used by the
    /// Resource Accountant, which must subtract requests of assigned pods
    /// regardless of which namespace the gang being planned lives in.
    pub fn list_all(&self) -> Vec<Arc<Pod>> {
        self.index.list()
    }

    pub async fn wait_synced(&self) {
        self.index.wait_synced().await
    }

    pub(crate) async fn handle_event(&self, event: Event<Pod>) {
        match event {
            Event::Apply(pod) | Event::InitApply(pod) => {
                if let Some(key) = pod_key(&pod) {
                    self.index.insert(key, pod);
                }
            }
            Event::Delete(pod) => {
                if let Some(key) = pod_key(&pod) {
                    self.index.remove(&key);
                }
            }
            Event::Init => {}
            Event::InitDone => self.index.mark_synced(),
        }
    }

    async fn full_list(&self, api: &Api<Pod>) -> Result<(), Error> {
        let list = api.list(&Default::default()).await?;
        let mut items = HashMap::with_capacity(list.items.len());
        for pod in list.items {
            if let Some(key) = pod_key(&pod) {
                items.insert(key, Arc::new(pod));
            }
        }
        self.index.replace_all(items);
        self.index.mark_synced();
        Ok(())
    }
}

/// Read-only view over cluster nodes.
#[derive(Default)]
pub struct NodeView {
    index: Index<Node>,
}

fn node_key(node: &Node) -> Option<PodKey> {
    Some((String::new(), node.name_any()))
}

impl NodeView {
    pub fn list(&self) -> Vec<Arc<Node>> {
        self.index.list()
    }

    pub async fn wait_synced(&self) {
        self.index.wait_synced().await
    }

    async fn handle_event(&self, event: Event<Node>) {
        match event {
            Event::Apply(node) | Event::InitApply(node) => {
                if let Some(key) = node_key(&node) {
                    self.index.insert(key, node);
                }
            }
            Event::Delete(node) => {
                if let Some(key) = node_key(&node) {
                    self.index.remove(&key);
                }
            }
            Event::Init => {}
            Event::InitDone => self.index.mark_synced(),
        }
    }

    async fn full_list(&self, api: &Api<Node>) -> Result<(), Error> {
        let list = api.list(&Default::default()).await?;
        let mut items = HashMap::with_capacity(list.items.len());
        for node in list.items {
            if let Some(key) = node_key(&node) {
                items.insert(key, Arc::new(node));
            }
        }
        self.index.replace_all(items);
        self.index.mark_synced();
        Ok(())
    }
}

/// Drives the pod watch: initial list, then a `tokio::select!` loop between
/// the watch stream and a periodic resync tick, reconnecting with a fixed
/// backoff on stream error or premature end.
pub async fn run_pod_watch(
    client: Client,
    namespace: Option<String>,
    view: Arc<PodView>,
    queue: Arc<WorkQueue>,
    scheduler_name: String,
    resync_period: Duration,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let api: Api<Pod> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    view.full_list(&api).await?;

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let stream = watcher::watcher(api.clone(), watcher::Config::default());
        tokio::pin!(stream);
        let mut resync = tokio::time::interval(resync_period);
        resync.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = stream.next() => {
                    match event {
                        Some(Ok(event)) => {
                            // Single-threaded per watch, per spec §4.1: the
                            // event handler enqueues before handing off to
                            // the worker pool, never blocking on it.
                            if let Event::Apply(pod) | Event::InitApply(pod) = &event
                                && is_eligible(pod, &scheduler_name)
                                && let Some(ns) = pod.namespace()
                            {
                                queue.add(format!("{ns}/{}", pod.name_any()));
                            }
                            view.handle_event(event).await
                        }
                        Some(Err(e)) => {
                            eprintln!("{} {}", "pod watch error, reconnecting:".color(FG1), e.to_string().color(FG2));
                            break;
                        }
                        None => {
                            eprintln!("{}", "pod watch stream ended, reconnecting".color(FG1));
                            break;
                        }
                    }
                }
                _ = resync.tick() => {
                    if let Err(e) = view.full_list(&api).await {
                        eprintln!("{} {}", "pod resync failed:".color(FG1), e.to_string().color(FG2));
                    }
                }
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        }
    }
}

/// Drives the node watch, mirroring `run_pod_watch`.
pub async fn run_node_watch(
    client: Client,
    view: Arc<NodeView>,
    resync_period: Duration,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let api: Api<Node> = Api::all(client);
    view.full_list(&api).await?;

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let stream = watcher::watcher(api.clone(), watcher::Config::default());
        tokio::pin!(stream);
        let mut resync = tokio::time::interval(resync_period);
        resync.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = stream.next() => {
                    match event {
                        Some(Ok(event)) => view.handle_event(event).await,
                        Some(Err(e)) => {
                            eprintln!("{} {}", "node watch error, reconnecting:".color(FG1), e.to_string().color(FG2));
                            break;
                        }
                        None => {
                            eprintln!("{}", "node watch stream ended, reconnecting".color(FG1));
                            break;
                        }
                    }
                }
                _ = resync.tick() => {
                    if let Err(e) = view.full_list(&api).await {
                        eprintln!("{} {}", "node resync failed:".color(FG1), e.to_string().color(FG2));
                    }
                }
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(namespace: &str, name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn get_returns_none_before_sync() {
        let view = PodView::default();
        assert!(view.get("ns", "a").is_none());
    }

    #[tokio::test]
    async fn apply_then_delete_round_trips() {
        let view = PodView::default();
        view.handle_event(Event::Apply(pod("ns", "a"))).await;
        assert!(view.get("ns", "a").is_some());
        view.handle_event(Event::Delete(pod("ns", "a"))).await;
        assert!(view.get("ns", "a").is_none());
    }

    #[tokio::test]
    async fn list_namespace_filters_by_namespace() {
        let view = PodView::default();
        view.handle_event(Event::Apply(pod("ns-a", "p1"))).await;
        view.handle_event(Event::Apply(pod("ns-b", "p2"))).await;
        assert_eq!(view.list_namespace("ns-a").len(), 1);
        assert_eq!(view.list_namespace("ns-b").len(), 1);
        assert_eq!(view.list_namespace("ns-c").len(), 0);
    }

    #[tokio::test]
    async fn init_done_marks_synced() {
        let view = PodView::default();
        let waited = tokio::time::timeout(Duration::from_millis(50), view.wait_synced()).await;
        assert!(waited.is_err(), "should not be synced yet");
        view.handle_event(Event::InitDone).await;
        tokio::time::timeout(Duration::from_millis(50), view.wait_synced())
            .await
            .expect("should resolve once InitDone observed");
    }
}
