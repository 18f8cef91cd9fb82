use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use graphos_core::config::OtelConfig;

/// Where JSON log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    /// Used in stdio mode, where stdout carries protocol frames.
    Stderr,
}

/// Initialized telemetry resources that must be kept alive and flushed on shutdown.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    pub fn flush(&self) {
        if let Some(ref provider) = self.provider {
            let _ = provider.force_flush();
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        self.flush();
        if let Some(provider) = self.provider.take() {
            let _: Result<(), _> = provider.shutdown();
        }
    }
}

/// Install the JSON log layer, plus an OTLP span exporter when
/// `otel.otlp_endpoint` is set. `verbose` lowers the default level to debug.
pub fn init_telemetry(otel: &OtelConfig, verbose: bool, target: LogTarget) -> Result<TelemetryGuard> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let writer = match target {
        LogTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
    };
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_writer(writer);

    let Some(ref endpoint) = otel.otlp_endpoint else {
        tracing_subscriber::registry()
            .with(filter)
            .with(json_layer)
            .try_init()?;
        return Ok(TelemetryGuard { provider: None });
    };

    let service_name = otel
        .service_name
        .clone()
        .unwrap_or_else(|| "graphosd".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(service_name)
                .build(),
        )
        .build();

    let tracer = provider.tracer("graphosd");
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(TelemetryGuard {
        provider: Some(provider),
    })
}
