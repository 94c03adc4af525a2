//! Worker pool (spec §4 control flow, §5 Concurrency, §7 error disposition):
//! pulls keys off the `WorkQueue`, re-reads the triggering pod from the
//! local view, and runs it through gang assembly, the readiness gate,
//! resource accounting, the planner, and the binder.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::Client;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use crate::colors::{FG1, FG2};
use crate::config::Args;
use crate::error::Error;
use crate::gang::{assemble, gang_id};
use crate::planner::{self, NoFeasibleNode};
use crate::queue::WorkQueue;
use crate::readiness::{effective_min_available, gate, is_terminating, is_unbound};
use crate::resources::build_resource_states;
use crate::view::{is_eligible, NodeView, PodView};

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

/// Outcome of one key's processing, used only to decide the queue
/// disposition (spec §7); never surfaced to callers beyond logging.
enum Outcome {
    /// Nothing left to do: pod gone, already bound, or ineligible.
    Skipped,
    /// Gang lacked enough unbound members; re-evaluate later.
    NotReady,
    /// Every gang member was bound.
    Bound(usize),
    /// A transient or placement failure occurred; re-evaluate later.
    Failed(Error),
}

/// Shared, read-only context every worker task needs.
#[derive(Clone)]
pub struct WorkerContext {
    pub client: Client,
    pub pods: Arc<PodView>,
    pub nodes: Arc<NodeView>,
    pub queue: Arc<WorkQueue>,
    pub args: Arc<Args>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<Arc<Metrics>>,
}

/// Runs one worker: loops on `queue.get()` until the queue shuts down or
/// `cancel` fires, processing one key per iteration.
pub async fn run_worker(ctx: WorkerContext, cancel: CancellationToken) {
    loop {
        let key = tokio::select! {
            _ = cancel.cancelled() => return,
            key = ctx.queue.get() => key,
        };
        let Some(key) = key else { return };

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &ctx.metrics {
            metrics.queue_depth.set(ctx.queue.len() as i64);
        }

        let outcome = process_key(&ctx, &key).await;
        match &outcome {
            Outcome::Skipped => {
                ctx.queue.forget(&key);
            }
            Outcome::Bound(count) => {
                println!("{} {} {}", "bound gang for key".color(FG1), key.color(FG2), count);
                ctx.queue.forget(&key);
            }
            Outcome::NotReady => {
                ctx.queue.add_rate_limited(key.clone());
            }
            Outcome::Failed(err) => {
                eprintln!("{} {} {}", "scheduling attempt failed for".color(FG1), key.color(FG2), err.to_string().color(FG2));
                #[cfg(feature = "metrics")]
                if let Some(metrics) = &ctx.metrics {
                    metrics.record_bind_failure(error_reason(err));
                }
                if err.is_retryable() {
                    ctx.queue.add_rate_limited(key.clone());
                } else {
                    ctx.queue.forget(&key);
                }
            }
        }
        ctx.queue.done(&key);
    }
}

/// Short, low-cardinality label for the `bind_failures_total` metric.
#[cfg(feature = "metrics")]
fn error_reason(err: &Error) -> &'static str {
    match err {
        Error::Kube { .. } => "kube_api",
        Error::GangNotReady { .. } => "gang_not_ready",
        Error::NoFeasibleNode { .. } => "no_feasible_node",
        Error::Config(_) => "config",
        Error::ParseDuration { .. } => "parse_duration",
        Error::Json { .. } => "json",
        Error::Io { .. } => "io",
        Error::InvalidQuantity { .. } => "invalid_quantity",
        Error::PodMissing(_) => "pod_missing",
    }
}

fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
}

async fn process_key(ctx: &WorkerContext, key: &str) -> Outcome {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = &ctx.metrics {
        metrics.record_attempt();
    }

    let Some((namespace, name)) = split_key(key) else {
        return Outcome::Skipped;
    };

    let Some(pod) = ctx.pods.get(namespace, name) else {
        // Missing pod in view (spec §7): deleted between enqueue and
        // processing, silently forgotten.
        return Outcome::Skipped;
    };

    if !is_eligible(&pod, &ctx.args.scheduler_name) {
        return Outcome::Skipped;
    }

    let members = assemble(&ctx.pods, &ctx.args.gang_label, &ctx.args.scheduler_name, &pod);
    let live_members: Vec<_> = members.into_iter().filter(|p| !is_terminating(p)).collect();
    if live_members.is_empty() {
        return Outcome::Skipped;
    }

    let unbound: Vec<_> = live_members.iter().filter(|p| is_unbound(p)).cloned().collect();
    if unbound.is_empty() {
        // Round-trip property (spec §8): a gang fully bound produces no
        // binds even if the key is re-added.
        return Outcome::Skipped;
    }

    let required = effective_min_available(&ctx.args.min_available_annotation, &live_members, live_members.len());
    if !gate(required, unbound.len()) {
        return Outcome::NotReady;
    }

    let nodes = ctx.nodes.list();
    let assigned_pods = ctx.pods.list_all();
    let resource_states = match build_resource_states(&nodes, &assigned_pods) {
        Ok(states) => states,
        Err(e) => return Outcome::Failed(e),
    };

    let plan = match planner::plan(&unbound, &resource_states) {
        Ok(plan) => plan,
        Err(NoFeasibleNode { pod_key }) => {
            return Outcome::Failed(Error::NoFeasibleNode {
                gang_id: gang_id(&ctx.args.gang_label, &pod),
                pod_key,
            });
        }
    };

    let api: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
    if let Err((_index, err)) = crate::binder::bind_gang(&api, &plan).await {
        return Outcome::Failed(err);
    }

    #[cfg(feature = "metrics")]
    if let Some(metrics) = &ctx.metrics {
        metrics.record_bind(plan.len());
    }

    Outcome::Bound(plan.len())
}

/// Spawns `count` worker tasks and returns their join handles.
pub fn spawn_workers(ctx: WorkerContext, count: usize, cancel: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
    (0..count)
        .map(|_| {
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { run_worker(ctx, cancel).await })
        })
        .collect()
}
