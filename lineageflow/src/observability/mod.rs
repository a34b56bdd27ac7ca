//! Tracing subscriber setup and span helpers.

use std::sync::OnceLock;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Installs the global tracing subscriber.
///
/// Levels come from `RUST_LOG` and default to `info`. Only the first call
/// installs anything; it returns false if another subscriber was already
/// set by someone else.
pub fn init_tracing(format: LogFormat) -> bool {
    *INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);
        match format {
            LogFormat::Text => registry.with(fmt::layer()).try_init().is_ok(),
            LogFormat::Json => registry.with(fmt::layer().json()).try_init().is_ok(),
        }
    })
}

/// Span for one store writer batch.
#[must_use]
pub fn writer_span(channel: &str, batch_size: usize) -> Span {
    tracing::info_span!("store_writer", channel = channel, batch_size = batch_size)
}

/// Span for one retrace attempt.
#[must_use]
pub fn retrace_span(request_id: &str, root_id: &str, attempt: u32) -> Span {
    tracing::info_span!(
        "retrace",
        request_id = request_id,
        root_id = root_id,
        attempt = attempt,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        let first = init_tracing(LogFormat::Text);
        assert_eq!(init_tracing(LogFormat::Json), first);
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_span_helpers() {
        let span = retrace_span("req-1", "R", 1);
        let _guard = span.enter();
        tracing::info!("inside retrace span");
        let _ = writer_span("lineage-events", 10);
    }
}
