//! Log subscriber setup.

use std::io::{self, Write};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Output format selected with `--logfmt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
    /// No subscriber is installed.
    None,
}

impl LogFormat {
    /// Maps a `--logfmt` value; anything unrecognised falls back to text.
    pub fn parse(s: &str) -> Self {
        match s {
            "json" => LogFormat::Json,
            "none" => LogFormat::None,
            _ => LogFormat::Text,
        }
    }
}

/// Logging configuration taken from the global flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub format: LogFormat,
    pub level: String,
    /// Pretty-print each JSON event.
    pub pretty: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: "info".to_string(),
            pretty: false,
        }
    }
}

/// Maps a `--loglvl` value, including its short aliases, to a level filter.
///
/// `fatal` has no tracing counterpart and maps to `error`.
pub fn level_filter(level: &str) -> LevelFilter {
    match level {
        "trace" | "t" => LevelFilter::TRACE,
        "debug" | "d" => LevelFilter::DEBUG,
        "info" | "i" => LevelFilter::INFO,
        "warn" | "warning" | "w" => LevelFilter::WARN,
        "error" | "err" | "e" | "fatal" | "f" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

/// Installs the global subscriber. Logs always go to stderr so stdout stays
/// reserved for stream data.
pub fn init(settings: &LogSettings) {
    let level = level_filter(&settings.level);
    let filter = EnvFilter::try_new(level.to_string()).unwrap_or_else(|_| EnvFilter::new("info"));

    match settings.format {
        LogFormat::None => {}
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .init();
        }
        LogFormat::Json if settings.pretty => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(|| PrettyJsonWriter::new(io::stderr()))
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .init();
        }
    }
}

/// Re-renders one JSON event as indented JSON. Input that is not JSON is
/// returned unchanged.
pub fn prettify(line: &[u8]) -> Vec<u8> {
    let value: serde_json::Value = match serde_json::from_slice(line) {
        Ok(value) => value,
        Err(_) => return line.to_vec(),
    };
    let mut out = Vec::with_capacity(line.len() * 2);
    if serde_json::to_writer_pretty(&mut out, &value).is_err() {
        return line.to_vec();
    }
    out.push(b'\n');
    out
}

/// Buffers one formatted event and writes it pretty-printed when dropped.
///
/// The fmt layer creates a fresh writer per event, so each buffer holds
/// exactly one JSON object.
pub struct PrettyJsonWriter<W: Write> {
    inner: W,
    buf: Vec<u8>,
}

impl<W: Write> PrettyJsonWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }
}

impl<W: Write> Write for PrettyJsonWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> Drop for PrettyJsonWriter<W> {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let _ = self.inner.write_all(&prettify(&self.buf));
        let _ = self.inner.flush();
    }
}
