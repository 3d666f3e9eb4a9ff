//! Process-wide tracing setup.

use anyhow::{Result, anyhow};
use once_cell::sync::OnceCell;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{self as sdk, Resource};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: OnceCell<()> = OnceCell::new();

/// Used when neither the config nor `RUST_LOG` names a filter.
pub const DEFAULT_FILTER: &str = "info,platform_authz=info,sqlx=warn,tower_http=warn";

#[derive(Clone, Debug)]
pub struct ObsConfig {
    pub service_name: String,
    pub env_filter: Option<String>,
    pub otlp_endpoint: Option<String>,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self::new("gauge-server")
    }
}

impl ObsConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            env_filter: None,
            otlp_endpoint: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.env_filter = filter.filter(|f| !f.trim().is_empty());
        self
    }

    pub fn with_otlp_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.otlp_endpoint = endpoint.filter(|e| !e.trim().is_empty());
        self
    }

    /// Explicit filter, then `RUST_LOG`, then [`DEFAULT_FILTER`].
    pub fn resolved_filter(&self) -> String {
        self.env_filter
            .clone()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string())
    }
}

pub fn is_initialized() -> bool {
    INIT.get().is_some()
}

/// Install the fmt subscriber, plus an OTLP span exporter when an endpoint is set.
///
/// Calling it again after a successful install is a no-op.
pub fn init_tracing(config: ObsConfig) -> Result<()> {
    if is_initialized() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(config.resolved_filter())?;
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if let Some(endpoint) = config.otlp_endpoint.clone() {
        let exporter = SpanExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(endpoint.clone())
            .build()?;

        let resource = Resource::builder()
            .with_service_name(config.service_name.clone())
            .build();

        let provider = sdk::trace::SdkTracerProvider::builder()
            .with_resource(resource)
            .with_batch_exporter(exporter)
            .build();
        let tracer = provider.tracer(config.service_name.clone());

        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
        info!(service = %config.service_name, %endpoint, "tracing exported over otlp");
    } else {
        registry.try_init()?;
    }

    INIT.set(())
        .map_err(|_| anyhow!("tracing already initialized"))?;
    Ok(())
}
