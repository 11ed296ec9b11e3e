use std::fmt::{self, Write as _};
use std::sync::Arc;

use chrono::Local;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use super::formatter::{LogFormatter, LogRecord};

/// Event field carrying the enclosing type name.
pub const CONTEXT_FIELD: &str = "context";

/// `tracing_subscriber` event format that renders through a [`LogFormatter`].
///
/// The innermost span's name becomes the record's `function`; a `context` field on
/// the event becomes its `context`. Other fields are appended to the message as
/// `key=value`.
#[derive(Clone)]
pub struct ProjectEventFormat {
    formatter: Arc<dyn LogFormatter>,
}

impl ProjectEventFormat {
    pub fn new(formatter: Arc<dyn LogFormatter>) -> Self {
        Self { formatter }
    }
}

impl fmt::Debug for ProjectEventFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectEventFormat").finish_non_exhaustive()
    }
}

impl<S, N> FormatEvent<S, N> for ProjectEventFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let message = visitor.message();
        let span = ctx.lookup_current();
        let record = LogRecord {
            level: *metadata.level(),
            timestamp: Local::now(),
            target: metadata.target(),
            module_path: metadata.module_path(),
            file: metadata.file(),
            line: metadata.line(),
            function: span.as_ref().map(|span| span.name()),
            context: visitor.context.as_deref(),
            message: &message,
        };
        writeln!(writer, "{}", self.formatter.format(&record))
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    context: Option<String>,
    fields: String,
}

impl RecordVisitor {
    fn message(&self) -> String {
        let mut out = self.message.clone();
        if !self.fields.is_empty() {
            if out.is_empty() {
                out.push_str(self.fields.trim_start());
            } else {
                out.push_str(&self.fields);
            }
        }
        out
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            CONTEXT_FIELD => self.context = Some(value.to_string()),
            name => {
                let _ = write!(self.fields, " {name}={value}");
            }
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            CONTEXT_FIELD => self.context = Some(format!("{value:?}")),
            name => {
                let _ = write!(self.fields, " {name}={value:?}");
            }
        }
    }
}
