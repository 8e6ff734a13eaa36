//! Development-mode mirror of records onto the console via `tracing`.
use crate::types::{Record, Severity};
use tracing::{debug, error, info, warn};

pub const CONSOLE_TARGET: &str = "site_telemetry::console";

pub fn mirror(record: &Record) {
    let kind = record.kind.as_str();
    let page = record.context.page_path.as_deref().unwrap_or("-");
    let component = record.context.component.as_deref().unwrap_or("-");
    let error = record
        .error
        .as_ref()
        .map(|e| format!("{}: {}", e.name, e.message));

    match record.severity {
        Severity::Debug => {
            debug!(target: CONSOLE_TARGET, kind, page, component, "{}", record.message)
        }
        Severity::Info => {
            info!(target: CONSOLE_TARGET, kind, page, component, "{}", record.message)
        }
        Severity::Warn => {
            warn!(target: CONSOLE_TARGET, kind, page, component, "{}", record.message)
        }
        Severity::Error => error!(
            target: CONSOLE_TARGET,
            kind,
            page,
            component,
            error = ?error,
            "{}",
            record.message
        ),
        Severity::Critical => error!(
            target: CONSOLE_TARGET,
            kind,
            page,
            component,
            error = ?error,
            critical = true,
            "{}",
            record.message
        ),
    }
}

#[cfg(test)]
pub(crate) mod capture {
    use super::CONSOLE_TARGET;
    use std::fmt;
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::{layer::Context, Layer};

    /// Collects the messages of console mirror events.
    #[derive(Clone, Default)]
    pub(crate) struct ConsoleCapture {
        messages: Arc<Mutex<Vec<String>>>,
    }

    impl ConsoleCapture {
        pub(crate) fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    impl<S: Subscriber> Layer<S> for ConsoleCapture {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if event.metadata().target() != CONSOLE_TARGET {
                return;
            }
            let mut visitor = MessageVisitor::default();
            event.record(&mut visitor);
            self.messages.lock().unwrap().push(visitor.0);
        }
    }

    #[derive(Default)]
    struct MessageVisitor(String);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{:?}", value);
            }
        }
    }
}
