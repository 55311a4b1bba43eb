//! Console logging: one coloured `[TAG] timestamp: message` line per event.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{Event, Level, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

/// Target used by [`success!`] so the formatter can tell it apart from plain info.
pub const SUCCESS_TARGET: &str = "success";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const RESET: &str = "\x1b[0m";

/// Log a success line (an info event tagged `SUCCESS`).
macro_rules! success {
    ($($arg:tt)+) => {
        tracing::info!(target: $crate::logger::SUCCESS_TARGET, $($arg)+)
    };
}
pub(crate) use success;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Info,
    Success,
    Warning,
    Error,
}

impl Tag {
    pub fn for_event(metadata: &Metadata<'_>) -> Self {
        let level = *metadata.level();
        if level == Level::ERROR {
            Tag::Error
        } else if level == Level::WARN {
            Tag::Warning
        } else if metadata.target() == SUCCESS_TARGET {
            Tag::Success
        } else {
            Tag::Info
        }
    }

    fn label(self) -> &'static str {
        match self {
            Tag::Info => "INFO",
            Tag::Success => "SUCCESS",
            Tag::Warning => "WARNING",
            Tag::Error => "ERROR",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Tag::Info => "\x1b[36m",
            Tag::Success => "\x1b[32m",
            Tag::Warning => "\x1b[33m",
            Tag::Error => "\x1b[31m",
        }
    }
}

/// Render the `[TAG] YYYY-MM-DD HH:MM:SS:` prefix, including the trailing space.
pub fn render_prefix(tag: Tag, at: DateTime<Utc>, ansi: bool) -> String {
    let stamp = at.format(TIMESTAMP_FORMAT);
    if ansi {
        format!("{}[{}] {}:{} ", tag.color(), tag.label(), stamp, RESET)
    } else {
        format!("[{}] {}: ", tag.label(), stamp)
    }
}

/// Event formatter producing the relay's console line shape.
pub struct ConsoleFormat {
    ansi: bool,
}

impl ConsoleFormat {
    pub fn new(ansi: bool) -> Self {
        Self { ansi }
    }
}

impl<S, N> FormatEvent<S, N> for ConsoleFormat
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
        let tag = Tag::for_event(event.metadata());
        write!(writer, "{}", render_prefix(tag, Utc::now(), self.ansi))?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber: stdout always, plus a daily file when `log_dir` is set.
///
/// The returned guard flushes the file writer and must live until shutdown.
pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let console = tracing_subscriber::fmt::layer()
        .event_format(ConsoleFormat::new(true))
        .with_writer(std::io::stdout)
        .with_filter(default_filter());

    let Some(dir) = log_dir else {
        tracing_subscriber::registry().with(console).init();
        return None;
    };

    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("Failed to create log dir {}: {e}", dir.display());
    }
    let appender = tracing_appender::rolling::daily(dir, "chatrelay.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(console)
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(ConsoleFormat::new(false))
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(default_filter()),
        )
        .init();

    Some(guard)
}

fn default_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into())
}
