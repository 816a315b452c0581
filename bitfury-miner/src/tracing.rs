//! Provide tracing, tailored to this program.
//!
//! At startup, the program should call [`init_journald_or_stdout`] to install
//! a tracing subscriber. The rest of the program uses `use
//! crate::tracing::prelude::*` for the `trace!()`, `debug!()`, `info!()`,
//! `warn!()` and `error!()` macros.
//!
//! Events carrying a `chip` or `device` field are tagged with it ahead of the
//! message, since nearly everything the driver logs is about one chip.

use std::env;
use std::fmt;

use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime, FmtContext, FormatEvent, FormatFields},
    prelude::*,
    registry::LookupSpan,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

const CRATE_PREFIX: &str = concat!(env!("CARGO_CRATE_NAME"), "::");

/// Initialize logging.
///
/// If running under systemd, use journald; otherwise fall back to stdout.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(layer) = tracing_journald::layer() {
            tracing_subscriber::registry().with(layer).init();
        } else {
            use_stdout();
            error!("Failed to initialize journald logging, using stdout.");
        }
    } else {
        use_stdout();
    }
}

// Log to stdout, filtering according to RUST_LOG and defaulting to INFO.
fn use_stdout() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().event_format(ChipFormatter))
        .init();
}

/// Single-line event format: time, level, short target, chip tag, message,
/// then remaining fields dimmed.
struct ChipFormatter;

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    tag: Vec<String>,
    fields: Vec<(&'static str, String)>,
}

impl tracing::field::Visit for FieldCollector {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let value = clean_value(&format!("{:?}", value));
        match field.name() {
            "message" => self.message = Some(value),
            "device" | "chip" => self.tag.push(value),
            name if name.starts_with("log.") => {}
            name => self.fields.push((name, value)),
        }
    }
}

impl<S, N> FormatEvent<S, N> for ChipFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        LocalTimer.format_time(&mut writer)?;

        let (color, level) = match *event.metadata().level() {
            tracing::Level::ERROR => ("\x1b[31m", "ERROR"),
            tracing::Level::WARN => ("\x1b[33m", "WARN "),
            tracing::Level::INFO => ("\x1b[32m", "INFO "),
            tracing::Level::DEBUG => ("\x1b[34m", "DEBUG"),
            tracing::Level::TRACE => ("\x1b[35m", "TRACE"),
        };
        write!(
            writer,
            " {}{}\x1b[0m {}: ",
            color,
            level,
            short_target(event.metadata().target())
        )?;

        if !visitor.tag.is_empty() {
            write!(writer, "[{}] ", visitor.tag.join(" "))?;
        }
        if let Some(message) = &visitor.message {
            write!(writer, "{}", message)?;
        }
        if !visitor.fields.is_empty() {
            write!(writer, "\x1b[90m")?;
            for (key, value) in &visitor.fields {
                write!(writer, " {}={}", key, value)?;
            }
            write!(writer, "\x1b[0m")?;
        }

        writeln!(writer)
    }
}

/// Module path relative to this crate; dependency targets are kept whole.
fn short_target(target: &str) -> &str {
    target.strip_prefix(CRATE_PREFIX).unwrap_or(target)
}

/// Strip the quoting and `Some(..)` wrapping that Debug formatting adds.
fn clean_value(formatted: &str) -> String {
    let inner = formatted
        .strip_prefix("Some(")
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(formatted);
    inner.trim_matches('"').to_string()
}

// Local time to the nearest second; the default timer is UTC and verbose.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!(
                "[hour]:[minute]:[second]"
            ))
            .map_err(|_| fmt::Error)?;
        write!(w, "{}", formatted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_targets_shortened() {
        assert_eq!(short_target("bitfury_miner::device"), "device");
        assert_eq!(short_target("mio::poll"), "mio::poll");
    }

    #[test]
    fn test_values_cleaned() {
        assert_eq!(clean_value("\"0/3\""), "0/3");
        assert_eq!(clean_value("Some(54)"), "54");
        assert_eq!(clean_value("None"), "None");
    }
}
