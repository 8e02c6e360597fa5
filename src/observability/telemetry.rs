//! Span recording and export over OpenTelemetry.
//!
//! # Responsibilities
//! - Start spans with parent linkage and attributes (`Tracer`)
//! - Record events, status and errors on a span, end it exactly once
//! - Batch finished spans to stdout (`local`) or an OTLP/HTTP collector (`remote`)
//! - Flush and shut the provider down on shutdown
//!
//! # Design Decisions
//! - Export runs in the SDK batch processor; span producers never wait, and
//!   a full queue drops the span
//! - A span dropped without `end` is still exported, marked as aborted
//! - The provider is owned by `TelemetryHandle`, not installed globally

use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer as _, TracerProvider as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, Sampler, SdkTracer, SdkTracerProvider, SpanExporter,
};
use opentelemetry_sdk::Resource;
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::{TelemetryConfig, TelemetryMode};

/// Errors raised while setting up span export.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("remote telemetry requires an endpoint")]
    MissingEndpoint,

    #[error("failed to build span exporter: {0}")]
    Exporter(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Starts spans on the service's tracer provider.
#[derive(Clone, Debug)]
pub struct Tracer {
    inner: SdkTracer,
}

impl Tracer {
    pub fn new(provider: &SdkTracerProvider, name: &str) -> Self {
        Self {
            inner: provider.tracer(name.to_string()),
        }
    }

    /// A tracer whose spans carry ids but are never recorded or exported.
    pub fn disabled() -> Self {
        let provider = SdkTracerProvider::builder()
            .with_sampler(Sampler::AlwaysOff)
            .build();
        Self::new(&provider, "disabled")
    }

    /// Start a span under `parent`, or a new server-side trace when there is none.
    pub fn start_span(
        &self,
        parent: Option<&Context>,
        name: impl Into<Cow<'static, str>>,
        attributes: Vec<KeyValue>,
    ) -> TraceSpan {
        let (parent, kind) = match parent {
            Some(parent) => (parent.clone(), SpanKind::Internal),
            None => (Context::new(), SpanKind::Server),
        };
        let span = self
            .inner
            .span_builder(name)
            .with_kind(kind)
            .with_attributes(attributes)
            .start_with_context(&self.inner, &parent);

        TraceSpan {
            cx: parent.with_span(span),
            status_set: false,
            ended: false,
        }
    }
}

/// An open span. Ends exactly once: through `end`, or on drop as aborted.
#[derive(Debug)]
pub struct TraceSpan {
    cx: Context,
    status_set: bool,
    ended: bool,
}

impl TraceSpan {
    /// Context carrying this span, for starting children.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn add_event(&self, name: &'static str) {
        self.cx.span().add_event(name, Vec::new());
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        self.cx.span().set_attribute(attribute);
    }

    pub fn set_status(&mut self, status: Status) {
        self.status_set = true;
        self.cx.span().set_status(status);
    }

    /// Record an `exception` event carrying the error message.
    pub fn record_error(&self, err: &dyn std::error::Error) {
        self.cx.span().record_error(err);
    }

    /// End the span and hand it to the batch processor.
    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.ended {
            self.ended = true;
            self.cx.span().end();
        }
    }
}

impl Drop for TraceSpan {
    fn drop(&mut self) {
        if !self.ended && !self.status_set {
            self.set_status(Status::error("aborted before completion"));
        }
        self.finish();
    }
}

/// Owner of the tracer provider and its batch processor.
pub struct TelemetryHandle {
    provider: SdkTracerProvider,
}

impl fmt::Debug for TelemetryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryHandle").finish_non_exhaustive()
    }
}

impl TelemetryHandle {
    /// Flush everything queued and shut the provider down.
    pub async fn shutdown(self) {
        tracing::debug!("Shutting down telemetry exporter");
        let provider = self.provider;
        // The SDK flush blocks until the exporter answers.
        match tokio::task::spawn_blocking(move || provider.shutdown()).await {
            Ok(Ok(())) => tracing::debug!("Telemetry exporter terminated"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Telemetry flush failed"),
            Err(e) => tracing::error!(error = %e, "Telemetry shutdown task failed"),
        }
    }
}

/// Build the tracer and, unless telemetry is disabled, its exporting provider.
pub fn init_telemetry(
    config: &TelemetryConfig,
    environment: &str,
) -> Result<(Tracer, Option<TelemetryHandle>), TelemetryError> {
    let provider = match config.mode {
        TelemetryMode::Disabled => return Ok((Tracer::disabled(), None)),
        TelemetryMode::Local => batch_provider(
            opentelemetry_stdout::SpanExporter::default(),
            config,
            environment,
        ),
        TelemetryMode::Remote => {
            let endpoint = config
                .endpoint
                .clone()
                .filter(|e| !e.is_empty())
                .ok_or(TelemetryError::MissingEndpoint)?;
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_endpoint(endpoint)
                .with_timeout(Duration::from_secs(config.export_timeout_secs))
                .build()
                .map_err(|e| TelemetryError::Exporter(Box::new(e)))?;
            batch_provider(exporter, config, environment)
        }
    };

    tracing::info!(mode = ?config.mode, "Telemetry enabled");
    let tracer = Tracer::new(&provider, &config.service_name);
    Ok((tracer, Some(TelemetryHandle { provider })))
}

fn batch_provider<E>(exporter: E, config: &TelemetryConfig, environment: &str) -> SdkTracerProvider
where
    E: SpanExporter + 'static,
{
    let batch = BatchConfigBuilder::default()
        .with_max_queue_size(config.queue_capacity.max(1))
        .with_max_export_batch_size(config.batch_size.max(1))
        .with_scheduled_delay(Duration::from_millis(config.flush_interval_ms.max(1)))
        .build();
    let processor = BatchSpanProcessor::builder(exporter)
        .with_batch_config(batch)
        .build();

    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes([
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", environment.to_string()),
        ])
        .build();

    SdkTracerProvider::builder()
        .with_span_processor(processor)
        .with_resource(resource)
        .build()
}
