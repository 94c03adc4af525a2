use std::sync::Arc;

use clap::Parser;
use kube::Client;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

mod binder;
mod colors;
mod config;
mod error;
mod gang;
mod planner;
mod queue;
mod readiness;
mod resources;
mod shutdown;
mod view;
mod worker;

#[cfg(feature = "metrics")]
mod metrics;

use colors::{FG1, FG2};
use config::Args;
use error::Error;
use queue::WorkQueue;
use shutdown::shutdown_signal;
use view::{run_node_watch, run_pod_watch, NodeView, PodView};
use worker::{spawn_workers, WorkerContext};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let client = match args.kubeconfig_path() {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path).map_err(|e| {
                Error::Config(format!("failed to read kubeconfig at {path}: {e}"))
            })?;
            let config = kube::Config::from_custom_kubeconfig(kubeconfig, &Default::default())
                .await
                .map_err(|e| Error::Config(format!("failed to build client config: {e}")))?;
            Client::try_from(config)?
        }
        None => Client::try_default().await?,
    };

    let resync_period = args.resync_period()?;
    let args = Arc::new(args);

    println!(
        "{} {}",
        "starting gang scheduler for scheduler-name".color(FG1),
        args.scheduler_name.color(FG2)
    );

    let pods = Arc::new(PodView::default());
    let nodes = Arc::new(NodeView::default());
    let queue = Arc::new(WorkQueue::new());
    let cancel = CancellationToken::new();

    #[cfg(feature = "metrics")]
    let metrics = match args.metrics_port {
        Some(port) => {
            let m = Arc::new(metrics::Metrics::new());
            tokio::spawn(metrics::run_metrics_server(m.clone(), port, cancel.clone()));
            Some(m)
        }
        None => None,
    };

    let pod_watch = tokio::spawn(run_pod_watch(
        client.clone(),
        args.namespace().map(str::to_string),
        pods.clone(),
        queue.clone(),
        args.scheduler_name.clone(),
        resync_period,
        cancel.clone(),
    ));
    let node_watch = tokio::spawn(run_node_watch(client.clone(), nodes.clone(), resync_period, cancel.clone()));

    // Run blocks until both views have completed their initial full-list sync.
    pods.wait_synced().await;
    nodes.wait_synced().await;
    println!("{}", "initial view sync complete, starting workers".color(FG1));

    let ctx = WorkerContext {
        client: client.clone(),
        pods: pods.clone(),
        nodes: nodes.clone(),
        queue: queue.clone(),
        args: args.clone(),
        #[cfg(feature = "metrics")]
        metrics,
    };
    let workers = spawn_workers(ctx, args.workers, cancel.clone());

    shutdown_signal().await;
    println!("{}", "shutdown signal received, draining in-flight work".color(FG1));
    cancel.cancel();
    queue.shut_down();

    let _ = pod_watch.await;
    let _ = node_watch.await;
    for worker in workers {
        let _ = worker.await;
    }

    println!("{}", "gang scheduler stopped".color(FG1));
    Ok(())
}
