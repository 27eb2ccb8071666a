// Telemetry module for structured logging, metrics, and tracing

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

const SERVICE_NAME: &str = "task-engine";

/// Initialize structured logging with JSON formatting and trace context.
///
/// `RUST_LOG` takes precedence over `log_level`. When `tracing_endpoint` is
/// set, spans are also exported over OTLP.
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized"
    );

    Ok(())
}

/// Initialize OpenTelemetry tracer with OTLP exporter
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer(SERVICE_NAME);

    tracing::info!(endpoint = endpoint, "OpenTelemetry tracer initialized");

    Ok(tracer)
}

/// Flush remaining spans on graceful shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus exporter with its own HTTP listener.
/// Used by the headless scheduler process.
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_metrics();

    tracing::info!(metrics_port = metrics_port, "Prometheus metrics exporter initialized");

    Ok(())
}

/// Install the Prometheus recorder without a listener.
/// The API renders the returned handle on `GET /metrics`.
pub fn install_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!(
        "execution_success_total",
        "Total number of executions that finished successfully"
    );
    describe_counter!(
        "execution_failed_total",
        "Total number of executions that failed after exhausting retries"
    );
    describe_counter!(
        "execution_terminated_total",
        "Total number of executions terminated on request"
    );
    describe_counter!("execution_retry_total", "Total number of retry attempts scheduled");
    describe_histogram!(
        "execution_duration_seconds",
        "Duration of finished executions in seconds"
    );
    describe_gauge!("executions_running", "Executions currently holding a worker slot");
    describe_counter!("scheduler_fires_total", "Scheduled fires handed to the coordinator");
    describe_counter!(
        "scheduler_fires_skipped_total",
        "Scheduled fires skipped because the task was still in flight"
    );
}

#[inline]
pub fn record_execution_success(task_id: &Uuid, task_name: &str) {
    counter!("execution_success_total", "task_id" => task_id.to_string(), "task_name" => task_name.to_string()).increment(1);
}

#[inline]
pub fn record_execution_failure(task_id: &Uuid, task_name: &str, reason: &str) {
    counter!(
        "execution_failed_total",
        "task_id" => task_id.to_string(),
        "task_name" => task_name.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_execution_terminated(task_id: &Uuid, task_name: &str) {
    counter!("execution_terminated_total", "task_id" => task_id.to_string(), "task_name" => task_name.to_string()).increment(1);
}

#[inline]
pub fn record_execution_retry(task_id: &Uuid, task_name: &str) {
    counter!("execution_retry_total", "task_id" => task_id.to_string(), "task_name" => task_name.to_string()).increment(1);
}

#[inline]
pub fn record_execution_duration(task_id: &Uuid, task_name: &str, duration_seconds: f64) {
    histogram!(
        "execution_duration_seconds",
        "task_id" => task_id.to_string(),
        "task_name" => task_name.to_string()
    )
    .record(duration_seconds);
}

#[inline]
pub fn update_running_executions(count: usize) {
    gauge!("executions_running").set(count as f64);
}

#[inline]
pub fn record_scheduled_fire(skipped: bool) {
    if skipped {
        counter!("scheduler_fires_skipped_total").increment(1);
    } else {
        counter!("scheduler_fires_total").increment(1);
    }
}
