//! Logging module for tunnel sessions.
//!
//! Two flavours of logging live here. [`init_logging`] installs the global
//! `tracing` subscriber for binaries such as `tunnelctl`. [`Logger`] is the
//! per-session sink: a scoped `tracing` dispatcher that routes the debug,
//! info and error channels of one session to the destination the host
//! handed over, discarding whatever is below the requested severity.

use std::fs::File;
use std::future::Future;
use std::io;
use std::os::unix::io::{FromRawFd, RawFd};
use std::sync::Arc;

use tracing::instrument::{WithDispatch, WithSubscriber};
use tracing::level_filters::LevelFilter;
use tracing::Dispatch;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, fmt, fmt::writer::BoxMakeWriter, prelude::*};

/// Minimum severity a session logger lets through.
///
/// Ordered from least to most verbose; a channel is enabled when its own
/// severity is at or below the logger's threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Nothing is written
    Silent,
    /// Only the error channel is written
    Error,
    /// Error and info channels are written
    Info,
    /// All three channels are written
    Debug,
}

impl Severity {
    /// Map the raw integer level used at the host boundary.
    ///
    /// `0` (or anything negative) is silent, `1` error, `2` info and `3` or
    /// above debug.
    pub fn from_level(level: i32) -> Self {
        match level {
            i32::MIN..=0 => Severity::Silent,
            1 => Severity::Error,
            2 => Severity::Info,
            _ => Severity::Debug,
        }
    }

    /// Parse a textual level as used in configuration files.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "silent" | "off" | "none" => Some(Severity::Silent),
            "error" => Some(Severity::Error),
            "info" => Some(Severity::Info),
            "debug" | "trace" => Some(Severity::Debug),
            _ => None,
        }
    }
}

impl From<Severity> for LevelFilter {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Silent => LevelFilter::OFF,
            Severity::Error => LevelFilter::ERROR,
            Severity::Info => LevelFilter::INFO,
            Severity::Debug => LevelFilter::DEBUG,
        }
    }
}

/// Where a session logger writes.
pub enum LogDestination {
    /// The process's standard output
    Stdout,
    /// A raw file descriptor owned by the host; it is duplicated, never closed
    Fd(RawFd),
    /// Any `tracing_subscriber` writer (embedding, tests)
    Writer(BoxMakeWriter),
}

impl LogDestination {
    /// Destination for a host-supplied descriptor, negative meaning "none".
    pub fn from_raw_fd(fd: RawFd) -> Self {
        if fd < 0 {
            LogDestination::Stdout
        } else {
            LogDestination::Fd(fd)
        }
    }
}

impl std::fmt::Debug for LogDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogDestination::Stdout => f.write_str("Stdout"),
            LogDestination::Fd(fd) => f.debug_tuple("Fd").field(fd).finish(),
            LogDestination::Writer(_) => f.write_str("Writer"),
        }
    }
}

/// Per-session logger with debug, info and error channels.
///
/// Cloning is cheap; all clones share one dispatcher and one writer. The
/// logger is immutable once built.
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
    severity: Severity,
    /// Keeps the non-blocking writer flushing for fd destinations
    _guard: Option<Arc<WorkerGuard>>,
}

impl Logger {
    /// Build a logger writing to `destination`, discarding channels below
    /// `severity`.
    ///
    /// A descriptor that cannot be duplicated falls back to stdout; building
    /// a logger never fails.
    pub fn build(destination: LogDestination, severity: Severity) -> Self {
        let (writer, guard) = match destination {
            LogDestination::Stdout => (BoxMakeWriter::new(io::stdout), None),
            LogDestination::Fd(fd) => match duplicate_fd(fd) {
                Ok(file) => {
                    let (non_blocking, guard) = tracing_appender::non_blocking(file);
                    (BoxMakeWriter::new(non_blocking), Some(Arc::new(guard)))
                }
                Err(_) => (BoxMakeWriter::new(io::stdout), None),
            },
            LogDestination::Writer(writer) => (writer, None),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer)
            .with_max_level(LevelFilter::from(severity))
            .with_ansi(false)
            .with_target(false)
            .finish();

        Logger {
            dispatch: Dispatch::new(subscriber),
            severity,
            _guard: guard,
        }
    }

    /// A logger that discards everything.
    pub fn silent() -> Self {
        Logger::build(LogDestination::Stdout, Severity::Silent)
    }

    /// The severity threshold this logger was built with.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Whether output on `channel` reaches the destination.
    pub fn is_enabled(&self, channel: Severity) -> bool {
        channel != Severity::Silent && channel <= self.severity
    }

    /// Run `f` with this logger as the current `tracing` dispatcher.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    /// Attach this logger to a future so every poll logs to the session sink.
    pub fn attach<F: Future>(&self, future: F) -> WithDispatch<F> {
        future.with_subscriber(self.dispatch.clone())
    }

    pub fn debug(&self, message: &str) {
        self.in_scope(|| tracing::debug!("{message}"));
    }

    pub fn info(&self, message: &str) {
        self.in_scope(|| tracing::info!("{message}"));
    }

    pub fn error(&self, message: &str) {
        self.in_scope(|| tracing::error!("{message}"));
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("severity", &self.severity)
            .finish_non_exhaustive()
    }
}

fn duplicate_fd(fd: RawFd) -> nix::Result<File> {
    let owned = nix::unistd::dup(fd)?;
    // SAFETY: `owned` was just returned by dup(2) and nothing else holds it.
    Ok(unsafe { File::from_raw_fd(owned) })
}

/// Process-wide log initialization options.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Maximum level written (default: INFO); `OFF` silences everything
    pub level: LevelFilter,

    /// Whether to log to stdout (default: true)
    pub log_to_stdout: bool,

    /// Whether to log to a file (default: false)
    pub log_to_file: bool,

    /// Directory to store log files (default: "./logs")
    pub log_dir: String,

    /// Base filename for log files (default: "tunnel")
    pub log_file_name: String,

    /// Whether to use JSON format for logs (default: false)
    pub json_format: bool,

    /// Whether to include file and line information (default: false)
    pub include_file_line: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions {
            level: LevelFilter::INFO,
            log_to_stdout: true,
            log_to_file: false,
            log_dir: "./logs".to_string(),
            log_file_name: "tunnel".to_string(),
            json_format: false,
            include_file_line: false,
        }
    }
}

/// Install the global subscriber for a binary.
///
/// Returns a guard that must be kept alive for the duration of the program
/// when file logging is enabled, so buffered lines are flushed.
pub fn init_logging(options: LogOptions) -> Option<WorkerGuard> {
    // Bridge `log` crate records into `tracing`
    let _ = LogTracer::init();

    let filter = EnvFilter::from_default_env().add_directive(options.level.into());

    let mut layers = Vec::new();
    let mut guard = None;

    if options.log_to_stdout {
        let stdout_layer = fmt::layer()
            .with_file(options.include_file_line)
            .with_line_number(options.include_file_line)
            .with_target(true);

        let stdout_layer = if options.json_format {
            stdout_layer.json().boxed()
        } else {
            stdout_layer.boxed()
        };

        layers.push(stdout_layer);
    }

    if options.log_to_file {
        let file_appender =
            RollingFileAppender::new(Rotation::DAILY, &options.log_dir, &options.log_file_name);

        let (non_blocking, worker_guard) = NonBlocking::new(file_appender);
        guard = Some(worker_guard);

        let file_layer = fmt::layer()
            .with_file(options.include_file_line)
            .with_line_number(options.include_file_line)
            .with_ansi(false)
            .with_writer(non_blocking);

        let file_layer = if options.json_format {
            file_layer.json().boxed()
        } else {
            file_layer.boxed()
        };

        layers.push(file_layer);
    }

    // Ignore the error if a subscriber is already set in this process
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init();

    guard
}

/// Initialize process logging from the `[log]` section of a configuration.
pub fn init_logging_from_config(config: &crate::config::ControllerConfig) -> Option<WorkerGuard> {
    init_logging(LogOptions::from_config(config))
}

impl LogOptions {
    /// Options for the `[log]` section; an unknown level name means info.
    pub fn from_config(config: &crate::config::ControllerConfig) -> Self {
        let severity = Severity::from_name(&config.log.level).unwrap_or(Severity::Info);
        LogOptions {
            level: severity.into(),
            json_format: config.log.json,
            ..Default::default()
        }
    }
}
