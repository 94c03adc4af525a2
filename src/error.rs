#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse duration: {source}")]
    ParseDuration {
        #[from]
        source: parse_duration::parse::Error,
    },

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid resource quantity {value:?}: {reason}")]
    InvalidQuantity { value: String, reason: String },

    #[error("gang {gang_id} not ready: {unbound} of {required} required members unbound")]
    GangNotReady {
        gang_id: String,
        unbound: usize,
        required: usize,
    },

    #[error("no feasible node for pod {pod_key} in gang {gang_id}")]
    NoFeasibleNode { gang_id: String, pod_key: String },

    #[error("pod {0} no longer present in the local view")]
    PodMissing(String),
}

impl Error {
    /// Whether this error should cause the key to be rate-limited and
    /// requeued (spec §7). `PodMissing` is deliberately excluded: a pod
    /// deleted between enqueue and processing is silently forgotten.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::PodMissing(_))
    }
}
