//! `tracing` layer that copies events into a [`DiagnosticLog`].

use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::{DiagnosticLog, LogLevel};

const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Forwards `tracing` events from other components (HTTP stacks, the host
/// application) into a [`DiagnosticLog`].
///
/// Events emitted by this crate are skipped: its sources already append to the
/// log directly.
pub struct DiagnosticLayer {
    log: DiagnosticLog,
    target_prefix: Option<String>,
    max_level: Level,
}

impl DiagnosticLayer {
    pub fn new(log: DiagnosticLog) -> Self {
        Self {
            log,
            target_prefix: None,
            max_level: Level::INFO,
        }
    }

    /// Only forward events whose target starts with `prefix`.
    pub fn with_target_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.target_prefix = Some(prefix.into());
        self
    }

    /// Most verbose level forwarded (default `INFO`).
    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = level;
        self
    }

    fn accepts(&self, target: &str, level: &Level) -> bool {
        if target.starts_with(OWN_TARGET) || *level > self.max_level {
            return false;
        }
        self.target_prefix
            .as_deref()
            .is_none_or(|prefix| target.starts_with(prefix))
    }
}

impl<S> Layer<S> for DiagnosticLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !self.accepts(metadata.target(), metadata.level()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        self.log.append_with_level(
            level_for(metadata.level()),
            metadata.target(),
            visitor.finish(),
        );
    }
}

fn level_for(level: &Level) -> LogLevel {
    match *level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warning,
        Level::INFO => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{} {}", self.message, self.fields)
        }
    }

    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{}", value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.push_field(field.name(), format_args!("{:?}", value));
        }
    }
}
