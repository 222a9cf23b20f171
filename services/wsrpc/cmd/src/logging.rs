//! Console log formatting for the wsrpc binary.
//!
//! Lines look like `[timestamp] [component] [level] message key=value`, where
//! the component is taken from an explicit `component` field or, failing
//! that, from the crate that emitted the event.

use std::fmt::{self, Write as _};
use std::io::IsTerminal;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

const COMPONENT_WIDTH: usize = 16;
const LOG_LEVEL_WIDTH: usize = 7;

/// Formatter producing aligned, optionally coloured log lines
pub struct WsRpcLogFormatter {
    service_name: String,
    color_enabled: bool,
}

impl WsRpcLogFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            color_enabled: color_supported(),
        }
    }

    fn format_component(&self, component: Option<&str>, target: &str) -> String {
        let name = match component {
            Some(component) => format!("{}-{}", self.service_name, component),
            None => component_from_target(target).unwrap_or_else(|| self.service_name.clone()),
        };

        if name.chars().count() > COMPONENT_WIDTH {
            let truncated: String = name.chars().take(COMPONENT_WIDTH - 1).collect();
            format!("{}…", truncated)
        } else {
            format!("{:<width$}", name, width = COMPONENT_WIDTH)
        }
    }

    fn format_level(level: &Level) -> String {
        let label = match *level {
            Level::ERROR => "✗ ERROR",
            Level::WARN => "⚠ WARN",
            Level::INFO => "ℹ INFO",
            Level::DEBUG => "◦ DEBUG",
            Level::TRACE => "◦ TRACE",
        };
        format!("{:<width$}", label, width = LOG_LEVEL_WIDTH + 2)
    }

    fn color_for(&self, level: &Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }
        match *level {
            Level::ERROR => COLOR_BRIGHT_RED,
            Level::WARN => COLOR_BRIGHT_YELLOW,
            Level::INFO => COLOR_GREEN,
            Level::DEBUG | Level::TRACE => COLOR_BRIGHT_GRAY,
        }
    }
}

/// `wsrpc_session::session` becomes `session`, `wsrpc` stays `wsrpc`
fn component_from_target(target: &str) -> Option<String> {
    let crate_name = target.split("::").next()?;
    let component = crate_name
        .strip_prefix("wsrpc_")
        .unwrap_or(crate_name);
    Some(component.replace('_', "-"))
}

impl<S, N> FormatEvent<S, N> for WsRpcLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let metadata = event.metadata();
        let level = metadata.level();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let component = self.format_component(visitor.component.as_deref(), metadata.target());
        let color = self.color_for(level);
        let (reset, cyan) = if self.color_enabled {
            (COLOR_RESET, COLOR_CYAN)
        } else {
            ("", "")
        };

        write!(
            writer,
            "{}[{}]{} [{}] [{}{}{}] {}",
            cyan,
            timestamp,
            reset,
            component,
            color,
            Self::format_level(level),
            reset,
            visitor.message
        )?;
        if !visitor.fields.is_empty() {
            write!(writer, " {}", visitor.fields)?;
        }
        writeln!(writer)
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
    fields: String,
}

impl FieldVisitor {
    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            name => self.push_field(name, format_args!("{}", value)),
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        match field.name() {
            // Format-string messages arrive as fmt::Arguments, whose Debug output is unquoted.
            "message" => self.message = format!("{:?}", value),
            "component" => self.component = Some(format!("{:?}", value).trim_matches('"').to_string()),
            name => self.push_field(name, format_args!("{:?}", value)),
        }
    }
}

fn color_supported() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var("TERM").map(|term| term == "dumb").unwrap_or(false) {
        return false;
    }
    std::io::stdout().is_terminal()
}
