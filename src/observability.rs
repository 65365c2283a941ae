//! Tracing initialization and the line-delimited JSON log schema.
//!
//! The wire schema is fixed by the design:
//! `{"timestamp":..,"logLevel":..,"threadName":..,"moduleName":..,"message":..,"exceptionMessage":?,"stacktrace":?}`.
//! `tracing-subscriber`'s JSON formatter emits a different field set, so a
//! thin field-mapping layer renders events into the schema instead of
//! parsing an already-formatted message (the anti-pattern this design calls
//! out explicitly).

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// One line of the fixed wire log schema.
#[derive(Debug, Serialize)]
struct LogLine {
    timestamp: String,
    #[serde(rename = "logLevel")]
    log_level: String,
    #[serde(rename = "threadName")]
    thread_name: String,
    #[serde(rename = "moduleName")]
    module_name: String,
    message: String,
    #[serde(rename = "exceptionMessage", skip_serializing_if = "Option::is_none")]
    exception_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stacktrace: Option<String>,
}

/// A `tracing_subscriber::Layer` that writes one [`LogLine`] per event to
/// stdout, matching the design's wire log format exactly.
pub struct WireJsonLayer;

impl<S> Layer<S> for WireJsonLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let line = LogLine {
            timestamp: format_timestamp(SystemTime::now()),
            log_level: event.metadata().level().to_string(),
            thread_name: std::thread::current()
                .name()
                .unwrap_or("unnamed")
                .to_string(),
            module_name: event.metadata().target().to_string(),
            message: visitor.message,
            exception_message: None,
            stacktrace: None,
        };

        if let Ok(rendered) = serde_json::to_string(&line) {
            println!("{rendered}");
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

fn format_timestamp(time: SystemTime) -> String {
    let millis = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    // MM/dd/yyyy hh:mm:ss.SSS, computed without pulling in a full calendar
    // dependency: civil_from_days is the same algorithm used by musl/glibc.
    let secs = millis / 1000;
    let ms = millis % 1000;
    let days = secs / 86400;
    let time_of_day = secs % 86400;
    let (year, month, day) = civil_from_days(days as i64);
    let hour = time_of_day / 3600;
    let min = (time_of_day % 3600) / 60;
    let sec = time_of_day % 60;
    format!("{month:02}/{day:02}/{year:04} {hour:02}:{min:02}:{sec:02}.{ms:03}")
}

/// Howard Hinnant's days-to-civil-date algorithm (proleptic Gregorian).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// Install the process-wide tracing subscriber: `EnvFilter` (defaulting to
/// `info`, overridable via `RUST_LOG`) feeding the wire JSON layer.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn init_tracing() -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(WireJsonLayer)
        .try_init()
}

/// Minimum level kept after filtering, exposed for diagnostics endpoints.
#[must_use]
pub fn default_level() -> Level {
    Level::INFO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn civil_from_days_epoch_is_1970_01_01() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
    }

    #[test]
    fn format_timestamp_has_expected_shape() {
        let rendered = format_timestamp(UNIX_EPOCH);
        assert_eq!(rendered, "01/01/1970 00:00:00.000");
    }
}
