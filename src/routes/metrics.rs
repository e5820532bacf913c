use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics: Prometheus text exposition of the job counters.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

/// Register descriptions for every metric the service emits.
pub fn describe() {
    ::metrics::describe_counter!("analysis_jobs_submitted", "Analysis jobs accepted, by priority");
    ::metrics::describe_counter!("analysis_jobs_completed", "Analysis jobs completed");
    ::metrics::describe_counter!("analysis_jobs_failed", "Analysis jobs that failed");
    ::metrics::describe_counter!("analysis_jobs_cancelled", "Analysis jobs cancelled while pending");
    ::metrics::describe_counter!(
        "analysis_jobs_reclaimed",
        "Jobs returned to the queue after their worker went away"
    );
    ::metrics::describe_histogram!(
        "analysis_processing_seconds",
        "Time to process one analysis job"
    );
    ::metrics::describe_gauge!("analysis_queue_depth", "Pending jobs in the queue");
}
