//! This module provides a `tracing` layer that turns host application events
//! into telemetry records.
use super::OWN_TARGET_PREFIX;
use crate::telemetry::Telemetry;
use crate::types::{ErrorInfo, Metadata, RecordKind, Severity};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

/// Targets whose events are never recorded: this crate and the transport
/// stack used by sinks, whose own events would otherwise feed back into the
/// next flush.
const IGNORED_TARGETS: &[&str] = &[OWN_TARGET_PREFIX, "hyper", "h2", "reqwest", "rustls", "sled"];

/// A `tracing` layer that records events into a `Telemetry` instance.
pub struct TelemetryLayer {
    telemetry: Telemetry,
}

impl TelemetryLayer {
    pub fn new(telemetry: Telemetry) -> Self {
        Self { telemetry }
    }
}

fn severity_for(level: &Level) -> Severity {
    match *level {
        Level::ERROR => Severity::Error,
        Level::WARN => Severity::Warn,
        Level::INFO => Severity::Info,
        _ => Severity::Debug,
    }
}

impl<S> Layer<S> for TelemetryLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    /// Builds a log record from the event's message and fields. The module
    /// path becomes the record's component; other fields go to `extra`.
    /// An error event with `critical = true` is recorded as critical.
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let target = metadata.target();
        if IGNORED_TARGETS.iter().any(|prefix| target.starts_with(prefix)) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let component = metadata
            .module_path()
            .map(|path| path.rsplit("::").next().unwrap_or(path))
            .unwrap_or(target)
            .to_string();

        let mut severity = severity_for(metadata.level());
        if severity == Severity::Error && visitor.fields.get("critical") == Some(&Value::Bool(true)) {
            severity = Severity::Critical;
        }
        let error = visitor
            .fields
            .get("error")
            .filter(|_| severity.carries_error())
            .map(|value| match value {
                Value::String(text) => ErrorInfo::new("Error", text.clone()),
                other => ErrorInfo::new("Error", other.to_string()),
            });

        let mut meta = Metadata::new().component(component);
        meta.extra = visitor.fields;
        meta.extra
            .insert("target".to_string(), Value::from(target));

        let mut record = self
            .telemetry
            .build_record(RecordKind::Log, severity, visitor.message, Some(meta));
        record.error = error;

        // The fmt layer already printed this event.
        self.telemetry.submit(record, false);
    }
}

/// Collects the `message` field and every other field as JSON values.
#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: BTreeMap<String, Value>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .insert(field.name().to_string(), Value::from(format!("{:?}", value)));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .insert(field.name().to_string(), Value::from(value));
        }
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }
}
