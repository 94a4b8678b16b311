//! Shared log sink, base logger, and log-span correlation.
//!
//! All records — ordinary structured log lines and exported span records —
//! multiplex into one stream behind [`LogSink`]. In production the sink wraps
//! a non-blocking rolling file writer; rotation and compression are the
//! appender's concern. [`trace_log`] is the correlation entry: a log call made
//! with an ambient [`TraceContext`] also lands as an event on the active span.

use crate::attrs::{convert_value, AttrMap, AttributeValue, Attributes};
use crate::context::{append_span_event, TraceContext};
use crate::error::InitError;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;

/// Clonable handle over the single shared byte stream.
///
/// Both the base logger's formatter and the span log exporter write through
/// this handle, which is what keeps span records and ordinary records in one
/// multiplexed stream.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
    #[cfg(test)]
    captured: Option<Arc<Mutex<Vec<u8>>>>,
}

impl LogSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
            #[cfg(test)]
            captured: None,
        }
    }

    /// Writes one record followed by a newline.
    pub(crate) fn write_line(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log sink poisoned"))?;
        writer.write_all(bytes)?;
        writer.write_all(b"\n")
    }

    pub(crate) fn flush_all(&self) -> io::Result<()> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log sink poisoned"))?;
        writer.flush()
    }

    /// In-memory sink whose content tests can read back.
    #[cfg(test)]
    pub(crate) fn for_test() -> Self {
        let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0
                    .lock()
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "poisoned"))?
                    .extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        Self {
            inner: Arc::new(Mutex::new(Box::new(Shared(Arc::clone(&buffer))))),
            captured: Some(buffer),
        }
    }

    #[cfg(test)]
    pub(crate) fn test_lines(&self) -> Vec<String> {
        let buffer = self
            .captured
            .as_ref()
            .expect("not a test sink")
            .lock()
            .unwrap();
        let text = String::from_utf8_lossy(&buffer).into_owned();
        text.lines().map(ToString::to_string).collect()
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log sink poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_all()
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink").finish_non_exhaustive()
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Values handed over by the config collaborator, already parsed.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub directory: PathBuf,
    pub file_name: String,
    /// Level string; an unparsable value is fatal at startup.
    pub level: String,
    /// Switches the base formatter to its expanded human-readable form.
    pub pretty_print: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            file_name: "tracepipe.log".to_string(),
            level: "info".to_string(),
            pretty_print: false,
        }
    }
}

/// Keeps the appender's background writer alive; dropping it flushes and
/// stops the writer thread.
pub struct LoggerGuard {
    _worker: WorkerGuard,
}

impl std::fmt::Debug for LoggerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerGuard").finish_non_exhaustive()
    }
}

/// Initializes the shared sink and installs the global base logger.
///
/// The returned [`LogSink`] is the stream span exporters write through.
/// Call once at startup; a second call fails, as does an invalid level.
pub fn init_logging(config: &LogConfig) -> Result<(LogSink, LoggerGuard), InitError> {
    let level: tracing::level_filters::LevelFilter = config
        .level
        .parse()
        .map_err(|_| InitError::InvalidLogLevel(config.level.clone()))?;

    let appender = tracing_appender::rolling::daily(&config.directory, &config.file_name);
    let (non_blocking, worker) = tracing_appender::non_blocking(appender);
    let sink = LogSink::new(non_blocking);

    install_subscriber(sink.clone(), level, config.pretty_print)?;
    Ok((sink, LoggerGuard { _worker: worker }))
}

fn install_subscriber(
    sink: LogSink,
    level: tracing::level_filters::LevelFilter,
    pretty: bool,
) -> Result<(), InitError> {
    if pretty {
        let subscriber = tracing_subscriber::fmt()
            .pretty()
            .with_max_level(level)
            .with_writer(sink)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|_| InitError::SubscriberInstalled)
    } else {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(level)
            .with_writer(sink)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|_| InitError::SubscriberInstalled)
    }
}

/// Starts a context-correlated log record.
pub fn trace_log(ctx: &TraceContext) -> TraceLog<'_> {
    TraceLog {
        ctx,
        fields: AttrMap::new(),
    }
}

/// Builder for one structured log record bound to a [`TraceContext`].
///
/// Emitting always forwards to the base logger. When the context carries a
/// recording span the record is additionally appended to that span as an
/// event named after the message, carrying level, message, and fields as
/// event attributes — in-memory mutation only, no I/O on the calling thread.
pub struct TraceLog<'a> {
    ctx: &'a TraceContext,
    fields: AttrMap,
}

impl TraceLog<'_> {
    pub fn field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn trace(self, message: &str) {
        self.emit(Level::TRACE, message);
    }

    pub fn debug(self, message: &str) {
        self.emit(Level::DEBUG, message);
    }

    pub fn info(self, message: &str) {
        self.emit(Level::INFO, message);
    }

    pub fn warn(self, message: &str) {
        self.emit(Level::WARN, message);
    }

    pub fn error(self, message: &str) {
        self.emit(Level::ERROR, message);
    }

    fn emit(self, level: Level, message: &str) {
        if self.ctx.is_recording() {
            let mut attributes = Attributes::new();
            attributes.set(
                "level",
                AttributeValue::Str(level.to_string().to_lowercase()),
            );
            attributes.set("message", AttributeValue::Str(message.to_string()));
            for (key, value) in &self.fields {
                attributes.set(key.clone(), convert_value(value));
            }
            append_span_event(self.ctx, message, attributes);
        }

        let fields = serde_json::Value::Object(self.fields).to_string();
        match level {
            Level::TRACE => tracing::trace!(fields = %fields, "{}", message),
            Level::DEBUG => tracing::debug!(fields = %fields, "{}", message),
            Level::INFO => tracing::info!(fields = %fields, "{}", message),
            Level::WARN => tracing::warn!(fields = %fields, "{}", message),
            Level::ERROR => tracing::error!(fields = %fields, "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_multiplexes_writers() {
        let sink = LogSink::for_test();
        sink.write_line(b"{\"logType\":\"span\"}").unwrap();
        let mut clone = sink.clone();
        clone.write_all(b"ordinary record\n").unwrap();

        let lines = sink.test_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("span"));
        assert_eq!(lines[1], "ordinary record");
    }

    #[test]
    fn invalid_level_is_fatal() {
        let config = LogConfig {
            level: "chatty".to_string(),
            ..Default::default()
        };
        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, InitError::InvalidLogLevel(level) if level == "chatty"));
    }

    #[test]
    fn trace_log_without_span_reaches_base_logger_only() {
        // no recording span anywhere: must not panic, must not touch a span
        let ctx = TraceContext::new();
        trace_log(&ctx).field("k", 1).info("plain record");
    }
}
