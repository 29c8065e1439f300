use crate::config::{LogFormat, TelemetryConfig};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub fn init(config: &TelemetryConfig) -> anyhow::Result<()> {
    // RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    if config.metrics_enabled {
        let addr: SocketAddr = ([0, 0, 0, 0], config.metrics_port).into();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;

        describe_metrics();

        tracing::info!(
            port = config.metrics_port,
            "Metrics endpoint started at http://0.0.0.0:{}/metrics",
            config.metrics_port
        );
    }

    Ok(())
}

fn describe_metrics() {
    describe_counter!("harvester_requests_total", "Page requests issued to the origin");
    describe_counter!("harvester_pages_total", "Decoded pages received");
    describe_counter!("harvester_messages_written_total", "Records appended to the sink");
    describe_counter!("harvester_ignored_responses_total", "Responses skipped as non-data");
    describe_counter!("harvester_retries_total", "Requests resubmitted after a transport failure");
    describe_gauge!("harvester_cursor", "Lowest message id seen in this run");
}

pub fn shutdown() {
    tracing::info!("Shutting down telemetry");
}
