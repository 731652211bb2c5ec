//! Logging setup using the tracing crate
//!
//! Every event is written twice: to stdout and, through a non-blocking
//! worker, to a size-rotating log file. Both sinks share one line format:
//!
//! ```text
//! 2024-05-01 12:00:00,123 - mqtt_logger::agent::sink - INFO - Topic: iot/a/status | QoS: 0 | Message: online
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Override log filtering (follows env_logger format)

use super::rotating_file::RotatingFileWriter;
use crate::config::{parse_log_level, LoggingSection};
use chrono::{DateTime, Local};
use std::env;
use std::fmt;
use std::io;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Timestamp layout with millisecond precision after a comma
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Dependencies whose chatter is capped at WARN
const QUIET_TARGETS: &[&str] = &["rumqttc=warn"];

/// Level name as printed in log lines
pub fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

/// Render the `timestamp - component - LEVEL - ` prefix (pure function)
pub fn render_prefix(timestamp: &DateTime<Local>, component: &str, level: &Level) -> String {
    format!(
        "{} - {} - {} - ",
        timestamp.format(TIMESTAMP_FORMAT),
        component,
        level_name(level)
    )
}

/// Line-oriented event format shared by stdout and the log file
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
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
        write!(
            writer,
            "{}",
            render_prefix(&Local::now(), metadata.target(), metadata.level())
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Build the level filter, honoring a `RUST_LOG` override
pub fn build_filter(level: Level) -> EnvFilter {
    if let Ok(rust_log) = env::var("RUST_LOG") {
        return EnvFilter::new(rust_log);
    }

    let mut filter = EnvFilter::new(level.as_str().to_lowercase());
    // Reduce noise from dependencies
    for target in QUIET_TARGETS {
        if let Ok(directive) = target.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Resolve the effective level: CLI override, then config, then INFO
pub fn effective_level(settings: &LoggingSection, level_override: Option<Level>) -> Level {
    level_override
        .or_else(|| parse_log_level(&settings.log_level))
        .unwrap_or(Level::INFO)
}

/// Initialize stdout and rotating-file logging
///
/// The returned guard flushes the file worker when dropped and must be held
/// until the process exits.
pub fn init_logging(
    settings: &LoggingSection,
    level_override: Option<Level>,
) -> io::Result<WorkerGuard> {
    let level = effective_level(settings, level_override);

    let file = RotatingFileWriter::new(
        settings.log_path(),
        settings.max_bytes,
        settings.backup_count,
    )?;
    let (file_writer, guard) = NonBlockingBuilder::default()
        .lossy(false)
        .thread_name("mqtt-logger-file")
        .finish(file);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .event_format(LineFormat)
        .with_writer(io::stdout)
        .with_ansi(false);

    let file_layer = tracing_subscriber::fmt::layer()
        .event_format(LineFormat)
        .with_writer(file_writer)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(build_filter(level))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_level_names() {
        assert_eq!(level_name(&Level::WARN), "WARNING");
        assert_eq!(level_name(&Level::ERROR), "ERROR");
        assert_eq!(level_name(&Level::INFO), "INFO");
    }

    #[test]
    fn test_render_prefix() {
        let timestamp = Local
            .with_ymd_and_hms(2024, 5, 1, 12, 30, 45)
            .single()
            .unwrap();

        let prefix = render_prefix(&timestamp, "mqtt_logger::agent::sink", &Level::INFO);
        assert_eq!(
            prefix,
            "2024-05-01 12:30:45,000 - mqtt_logger::agent::sink - INFO - "
        );
    }

    #[test]
    fn test_effective_level_precedence() {
        let mut settings = LoggingSection::default();
        settings.log_level = "DEBUG".to_string();

        assert_eq!(effective_level(&settings, None), Level::DEBUG);
        assert_eq!(effective_level(&settings, Some(Level::TRACE)), Level::TRACE);

        settings.log_level = "bogus".to_string();
        assert_eq!(effective_level(&settings, None), Level::INFO);
    }
}
