//! Metrics (ambient, feature `metrics`): a small `prometheus` registry
//! served over a bare `hyper` 1.x server exposing `/metrics` and
//! `/healthz`, nothing fancier.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder;
use owo_colors::OwoColorize;
use prometheus::{HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::colors::{FG1, FG2};

/// The scheduler's process-wide counters/gauges, one instance owned by
/// `main` and cloned (behind `Arc`) into every worker.
pub struct Metrics {
    registry: Registry,
    pub scheduling_attempts_total: IntCounter,
    pub binds_total: IntCounter,
    pub gang_size: HistogramVec,
    pub queue_depth: IntGauge,
    pub bind_failures_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let scheduling_attempts_total = IntCounter::new(
            "gang_scheduler_scheduling_attempts_total",
            "Number of scheduling attempts started",
        )
        .expect("metric name is valid");
        let binds_total = IntCounter::new("gang_scheduler_binds_total", "Number of pod binds issued")
            .expect("metric name is valid");
        let gang_size = HistogramVec::new(
            prometheus::HistogramOpts::new("gang_scheduler_gang_size", "Size of gangs bound per attempt"),
            &[],
        )
        .expect("metric name is valid");
        let queue_depth = IntGauge::new("gang_scheduler_queue_depth", "Current depth of the work queue")
            .expect("metric name is valid");
        let bind_failures_total = IntCounterVec::new(
            Opts::new("gang_scheduler_bind_failures_total", "Number of failed bind attempts"),
            &["reason"],
        )
        .expect("metric name is valid");

        registry.register(Box::new(scheduling_attempts_total.clone())).expect("register metric");
        registry.register(Box::new(binds_total.clone())).expect("register metric");
        registry.register(Box::new(gang_size.clone())).expect("register metric");
        registry.register(Box::new(queue_depth.clone())).expect("register metric");
        registry.register(Box::new(bind_failures_total.clone())).expect("register metric");

        Self {
            registry,
            scheduling_attempts_total,
            binds_total,
            gang_size,
            queue_depth,
            bind_failures_total,
        }
    }

    pub fn record_attempt(&self) {
        self.scheduling_attempts_total.inc();
    }

    pub fn record_bind(&self, gang_size: usize) {
        self.binds_total.inc_by(gang_size as u64);
        self.gang_size.with_label_values(&[]).observe(gang_size as f64);
    }

    pub fn record_bind_failure(&self, reason: &str) {
        self.bind_failures_total.with_label_values(&[reason]).inc();
    }

    fn render(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf).expect("encode metrics");
        String::from_utf8(buf).expect("prometheus output is utf8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

async fn handle(metrics: Arc<Metrics>, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => Response::new(Full::new(Bytes::from(metrics.render()))),
        "/healthz" => Response::new(Full::new(Bytes::from_static(b"ok"))),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from_static(b"not found")))
            .expect("static response builds"),
    };
    Ok(response)
}

/// Serves `/metrics` and `/healthz` on `port` until `cancel` fires.
pub async fn run_metrics_server(metrics: Arc<Metrics>, port: u16, cancel: CancellationToken) -> std::io::Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr).await?;
    println!("{} {}", "metrics server listening on".color(FG1), addr.to_string().color(FG2));

    loop {
        let (stream, _) = tokio::select! {
            _ = cancel.cancelled() => {
                println!("{}", "metrics server shutting down".color(FG1));
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    eprintln!("{} {}", "metrics server accept failed:".color(FG1), e.to_string().color(FG2));
                    continue;
                }
            },
        };

        let io = TokioIo::new(stream);
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| handle(metrics.clone(), req));
            if let Err(e) = Builder::new(hyper_util::rt::TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                eprintln!("{} {}", "metrics connection error:".color(FG1), e.to_string().color(FG2));
            }
        });
    }
}
