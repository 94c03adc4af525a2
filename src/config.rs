use std::time::Duration;

use clap::Parser;

/// Configuration for the gang-aware pod scheduler, one flag per spec §6
/// option plus the ambient knobs (worker pool size, resync cadence,
/// metrics port) a production deployment needs.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The scheduler name this instance matches against each pod's
    /// `spec.schedulerName`. Pods naming a different scheduler are ignored.
    #[arg(long, env = "SCHEDULER_NAME", required = true)]
    pub scheduler_name: String,

    /// Label key used to derive a pod's gang identifier.
    #[arg(long, env = "GANG_LABEL", default_value = "scheduling.k8s.io/gang")]
    pub gang_label: String,

    /// Annotation key read on any gang member to override the default
    /// min-available (full gang) policy.
    #[arg(
        long,
        env = "MIN_AVAILABLE_ANNOTATION",
        default_value = "scheduling.k8s.io/min-available"
    )]
    pub min_available_annotation: String,

    /// Path to an external kubeconfig file. Empty means use in-cluster
    /// credentials.
    #[arg(long, env = "KUBECONFIG", default_value = "")]
    pub kubeconfig: String,

    /// Interval between full resyncs of the pod/node views, healing any
    /// silent divergence from missed watch events.
    #[arg(long, env = "RESYNC_PERIOD", default_value = "30s")]
    pub resync_period: String,

    /// Number of worker tasks draining the work queue.
    #[arg(long, env = "WORKERS", default_value_t = 5)]
    pub workers: usize,

    /// Port to serve `/metrics` and `/healthz` on. Unset disables the
    /// metrics server entirely.
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Namespace to restrict the pod/node views to. Empty means watch
    /// pods across all namespaces (nodes are always cluster-scoped).
    #[arg(long, env = "NAMESPACE", default_value = "")]
    pub namespace: String,
}

impl Args {
    pub fn resync_period(&self) -> Result<Duration, crate::error::Error> {
        Ok(parse_duration::parse(&self.resync_period)?)
    }

    pub fn kubeconfig_path(&self) -> Option<&str> {
        if self.kubeconfig.is_empty() {
            None
        } else {
            Some(&self.kubeconfig)
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        if self.namespace.is_empty() {
            None
        } else {
            Some(&self.namespace)
        }
    }
}
