//! OpenTelemetry-backed tracing bootstrap.
//!
//! Structured logs go to the console via `tracing-subscriber`; when an
//! OTLP collector endpoint is configured, spans are additionally
//! exported over gRPC so the observe-plan-act-verify loop can be
//! watched in Jaeger/Tempo/etc. This is ambient observability and
//! stays opt-in — it never gates task execution.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing::Level;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Telemetry bootstrap options.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub otlp_endpoint: Option<String>,
    pub sampling_ratio: f64,
    pub enable_console_logging: bool,
    pub log_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "browser-task-engine".to_string(),
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            enable_console_logging: true,
            log_level: Level::INFO,
        }
    }
}

impl TelemetryConfig {
    /// Reads `OTEL_SERVICE_NAME`, `OTEL_EXPORTER_OTLP_ENDPOINT`, and
    /// `OTEL_TRACES_SAMPLER_ARG`, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("OTEL_SERVICE_NAME") {
            config.service_name = name;
        }

        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.otlp_endpoint = Some(endpoint);
        }

        if let Ok(ratio) = std::env::var("OTEL_TRACES_SAMPLER_ARG") {
            if let Ok(r) = ratio.parse::<f64>() {
                config.sampling_ratio = r.clamp(0.0, 1.0);
            }
        }

        config
    }
}

/// Initializes console logging and, if configured, OTLP export.
///
/// Returns `Ok(Some(Tracer))` when OTLP is active, `Ok(None)` for
/// console-only logging.
pub fn init_telemetry(config: TelemetryConfig) -> anyhow::Result<Option<Tracer>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(endpoint) = &config.otlp_endpoint {
        let tracer = init_otlp_tracer(&config.service_name, endpoint, config.sampling_ratio)?;
        let telemetry_layer = OpenTelemetryLayer::new(tracer.clone());

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(telemetry_layer);

        if config.enable_console_logging {
            subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
        } else {
            subscriber.init();
        }

        tracing::info!(
            service_name = %config.service_name,
            endpoint = %endpoint,
            sampling_ratio = config.sampling_ratio,
            "telemetry initialized with OTLP export"
        );

        Ok(Some(tracer))
    } else {
        let subscriber = tracing_subscriber::registry().with(env_filter);

        if config.enable_console_logging {
            subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
        } else {
            subscriber.init();
        }

        tracing::info!("telemetry initialized (console only, no OTLP)");
        Ok(None)
    }
}

fn init_otlp_tracer(
    service_name: &str,
    endpoint: &str,
    sampling_ratio: f64,
) -> anyhow::Result<Tracer> {
    let sampler = if sampling_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if sampling_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(sampling_ratio)
    };

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .build_span_exporter()?,
            Tokio,
        )
        .with_config(
            sdktrace::Config::default()
                .with_sampler(sampler)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    service_name.to_string(),
                )])),
        )
        .build();

    let tracer = tracer_provider.tracer(service_name.to_string());
    global::set_tracer_provider(tracer_provider);

    Ok(tracer)
}

/// Flushes pending spans. Must be called before process exit or
/// buffered batch-exporter spans are lost.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
    tracing::info!("telemetry shut down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_matches_service_name() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "browser-task-engine");
        assert!(config.otlp_endpoint.is_none());
        assert_eq!(config.sampling_ratio, 1.0);
    }

    #[test]
    fn from_env_picks_up_overrides() {
        std::env::set_var("OTEL_SERVICE_NAME", "custom-name");
        std::env::set_var("OTEL_TRACES_SAMPLER_ARG", "0.25");
        let config = TelemetryConfig::from_env();
        assert_eq!(config.service_name, "custom-name");
        assert_eq!(config.sampling_ratio, 0.25);
        std::env::remove_var("OTEL_SERVICE_NAME");
        std::env::remove_var("OTEL_TRACES_SAMPLER_ARG");
    }
}
