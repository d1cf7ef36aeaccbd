// Metrics module for the spot rescheduler
// Exposes node map snapshots to Prometheus

use crate::nodes::{NodeClass, NodeMap};
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use warp::{Filter, Reply};

// Metric definitions
lazy_static::lazy_static! {
    // Snapshot metrics
    static ref SNAPSHOT_COUNTER: CounterVec = register_counter_vec!(
        "spot_rescheduler_snapshots_total",
        "Total number of node map builds",
        &["result"]
    ).unwrap();

    static ref SNAPSHOT_DURATION: HistogramVec = register_histogram_vec!(
        "spot_rescheduler_snapshot_duration_seconds",
        "Time spent building the node map",
        &["result"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    ).unwrap();

    // Node metrics
    static ref CLASSIFIED_NODES: GaugeVec = register_gauge_vec!(
        "spot_rescheduler_nodes",
        "Number of nodes per class in the last node map",
        &["class"]
    ).unwrap();

    static ref NODE_REQUESTED_CPU: GaugeVec = register_gauge_vec!(
        "spot_rescheduler_node_requested_cpu_millicores",
        "CPU requested by the pods counted on a node",
        &["class", "node"]
    ).unwrap();

    static ref NODE_FREE_CPU: GaugeVec = register_gauge_vec!(
        "spot_rescheduler_node_free_cpu_millicores",
        "Allocatable minus requested CPU on a node",
        &["class", "node"]
    ).unwrap();

    // Error metrics
    static ref ERROR_COUNTER: CounterVec = register_counter_vec!(
        "spot_rescheduler_errors_total",
        "Total number of errors by type",
        &["error_type"]
    ).unwrap();

    static ref CONTROLLER_INFO: GaugeVec = register_gauge_vec!(
        "spot_rescheduler_info",
        "Rescheduler version and build info",
        &["version", "build_date", "git_commit"]
    ).unwrap();
}

/// Metrics collector for node map snapshots
#[derive(Clone)]
pub struct MetricsCollector {
    start_time: Instant,
    ready: Arc<AtomicBool>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let build_date = std::env::var("BUILD_DATE").unwrap_or_else(|_| "unknown".to_string());
        let git_commit = std::env::var("GIT_COMMIT").unwrap_or_else(|_| "unknown".to_string());
        CONTROLLER_INFO
            .with_label_values(&[
                env!("CARGO_PKG_VERSION"),
                build_date.as_str(),
                git_commit.as_str(),
            ])
            .set(1.0);

        Self {
            start_time: Instant::now(),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start timing a node map build
    pub fn start_snapshot(&self) -> SnapshotTimer {
        SnapshotTimer {
            start: Instant::now(),
            ready: self.ready.clone(),
        }
    }

    /// Publish per-class and per-node figures of a node map.
    /// Gauges of nodes that left the cluster are dropped.
    pub fn observe_node_map(&self, map: &NodeMap) {
        NODE_REQUESTED_CPU.reset();
        NODE_FREE_CPU.reset();

        for class in NodeClass::ALL {
            let infos = map.get(class);
            CLASSIFIED_NODES
                .with_label_values(&[class.as_str()])
                .set(infos.len() as f64);

            for info in infos.iter() {
                let name = info.name();
                NODE_REQUESTED_CPU
                    .with_label_values(&[class.as_str(), name.as_str()])
                    .set(info.requested_cpu() as f64);
                NODE_FREE_CPU
                    .with_label_values(&[class.as_str(), name.as_str()])
                    .set(info.free_cpu() as f64);
            }
        }
    }

    /// True once a node map has been built successfully
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

/// Timer for tracking node map build duration
pub struct SnapshotTimer {
    start: Instant,
    ready: Arc<AtomicBool>,
}

impl SnapshotTimer {
    /// Complete the build with success
    pub fn success(self) {
        let duration = self.start.elapsed().as_secs_f64();

        SNAPSHOT_COUNTER.with_label_values(&["success"]).inc();
        SNAPSHOT_DURATION
            .with_label_values(&["success"])
            .observe(duration);

        self.ready.store(true, Ordering::Relaxed);
    }

    /// Complete the build with error
    pub fn error(self, error_type: &str) {
        let duration = self.start.elapsed().as_secs_f64();

        SNAPSHOT_COUNTER.with_label_values(&["error"]).inc();
        SNAPSHOT_DURATION
            .with_label_values(&["error"])
            .observe(duration);

        ERROR_COUNTER.with_label_values(&[error_type]).inc();
    }
}

/// Create metrics endpoint for Prometheus scraping
pub fn metrics_handler() -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path("metrics")
        .and(warp::get())
        .map(|| {
            let encoder = TextEncoder::new();
            let metric_families = prometheus::gather();
            let mut buffer = Vec::new();
            if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                tracing::error!(error = %e, "failed to encode metrics");
            }
            String::from_utf8(buffer).unwrap_or_default()
        })
        .map(|metrics: String| {
            warp::reply::with_header(
                metrics,
                "content-type",
                "text/plain; version=0.0.4; charset=utf-8",
            )
        })
}

/// Health check endpoint
pub fn health_handler(
    metrics: MetricsCollector,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path("health").and(warp::get()).map(move || {
        warp::reply::json(&serde_json::json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "uptimeSeconds": metrics.uptime_seconds(),
            "version": env!("CARGO_PKG_VERSION")
        }))
    })
}

/// Readiness check endpoint, ready after the first successful node map
pub fn ready_handler(
    metrics: MetricsCollector,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path("ready").and(warp::get()).map(move || {
        let ready = metrics.is_ready();
        let status = if ready {
            warp::http::StatusCode::OK
        } else {
            warp::http::StatusCode::SERVICE_UNAVAILABLE
        };
        warp::reply::with_status(
            warp::reply::json(&serde_json::json!({
                "status": if ready { "ready" } else { "waiting" },
                "timestamp": chrono::Utc::now().to_rfc3339()
            })),
            status,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testing::{node, on_demand_labels, pod, spot_labels};
    use crate::nodes::NodeInfo;

    #[test]
    fn test_metrics_collector() {
        let collector = MetricsCollector::new();
        assert!(!collector.is_ready());

        let timer = collector.start_snapshot();
        timer.error("pod_query_error");
        assert!(!collector.is_ready());

        let timer = collector.start_snapshot();
        std::thread::sleep(std::time::Duration::from_millis(5));
        timer.success();
        assert!(collector.is_ready());

        assert!(
            ERROR_COUNTER
                .with_label_values(&["pod_query_error"])
                .get()
                >= 1.0
        );

        let metrics = prometheus::gather();
        assert!(!metrics.is_empty());
    }

    #[test]
    fn test_observe_node_map() {
        let collector = MetricsCollector::new();
        let map = NodeMap::from_infos(vec![
            (
                NodeClass::Spot,
                NodeInfo::new(
                    Arc::new(node("metrics-spot", "4", spot_labels())),
                    vec![Arc::new(pod("p", 0, &["1"]))],
                ),
            ),
            (
                NodeClass::OnDemand,
                NodeInfo::new(Arc::new(node("metrics-od", "2", on_demand_labels())), Vec::new()),
            ),
        ]);

        collector.observe_node_map(&map);

        assert_eq!(
            NODE_REQUESTED_CPU
                .with_label_values(&["spot", "metrics-spot"])
                .get(),
            1000.0
        );
        assert_eq!(
            NODE_FREE_CPU
                .with_label_values(&["on_demand", "metrics-od"])
                .get(),
            2000.0
        );
    }

    #[tokio::test]
    async fn test_ready_handler_waits_for_first_snapshot() {
        let collector = MetricsCollector::new();
        let filter = ready_handler(collector.clone());

        let res = warp::test::request().path("/ready").reply(&filter).await;
        assert_eq!(res.status(), 503);

        collector.start_snapshot().success();
        let res = warp::test::request().path("/ready").reply(&filter).await;
        assert_eq!(res.status(), 200);
    }
}
