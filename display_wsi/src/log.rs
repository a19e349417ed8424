//! Diagnostics for the display WSI layer
//!
//! The layer runs inside an application it does not own, so everything it
//! prints goes to stderr and is gated by `VULKAN_WSI_DEBUG_LEVEL`
//! (0 silent, 1 errors, 2 warnings, 3 info, 4 debug, 5 and above trace).
//! Applications may route entries elsewhere with [`Logger`].

use colored::*;
use std::time::SystemTime;
use chrono::{DateTime, Local};

/// Environment variable holding the stderr verbosity
pub const DEBUG_LEVEL_ENV: &str = "VULKAN_WSI_DEBUG_LEVEL";

/// Verbosity used when the environment does not set one (warnings and errors)
pub const DEFAULT_DEBUG_LEVEL: i32 = 2;

/// Destination for layer diagnostics
///
/// # Example
///
/// ```no_run
/// use display_wsi::wsi::log::{Logger, LogEntry};
///
/// struct SyslogLogger;
///
/// impl Logger for SyslogLogger {
///     fn log(&self, entry: &LogEntry) {
///         // Forward to syslog...
///     }
/// }
/// ```
pub trait Logger: Send + Sync {
    fn log(&self, entry: &LogEntry);
}

/// One diagnostic line
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub severity: LogSeverity,
    pub timestamp: SystemTime,
    /// Subsystem, e.g. "wsi::display" or "wsi::vulkan"
    pub source: String,
    pub message: String,
    /// Call site, only recorded for errors
    pub file: Option<&'static str>,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogSeverity {
    Trace,
    Debug,
    Info,
    Warn,
    /// Failed kernel or device calls; carries file:line
    Error,
}

impl LogSeverity {
    /// Least severe entry printed at a numeric debug level, `None` when silent
    pub fn threshold_for_level(level: i32) -> Option<LogSeverity> {
        match level {
            i32::MIN..=0 => None,
            1 => Some(LogSeverity::Error),
            2 => Some(LogSeverity::Warn),
            3 => Some(LogSeverity::Info),
            4 => Some(LogSeverity::Debug),
            _ => Some(LogSeverity::Trace),
        }
    }

    /// Fixed-width label
    pub fn name(self) -> &'static str {
        match self {
            LogSeverity::Trace => "TRACE",
            LogSeverity::Debug => "DEBUG",
            LogSeverity::Info => "INFO ",
            LogSeverity::Warn => "WARN ",
            LogSeverity::Error => "ERROR",
        }
    }

    fn colored_name(self) -> ColoredString {
        match self {
            LogSeverity::Trace => self.name().bright_black(),
            LogSeverity::Debug => self.name().cyan(),
            LogSeverity::Info => self.name().green(),
            LogSeverity::Warn => self.name().yellow(),
            LogSeverity::Error => self.name().red().bold(),
        }
    }
}

/// Parse a debug level the way the environment variable is read
///
/// Leading whitespace is ignored and parsing stops at the first non-digit,
/// so `"3"` and `"3 # info"` both give 3. Anything unparsable gives `None`.
pub fn parse_debug_level(value: &str) -> Option<i32> {
    let value = value.trim_start();
    let (sign, digits) = match value.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, value),
    };
    let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    digits[..end].parse::<i32>().ok().map(|level| sign * level)
}

/// Colored stderr logger
///
/// Format:
/// - `[timestamp] [SEVERITY] [source] message`
/// - errors append `(file:line)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultLogger {
    threshold: Option<LogSeverity>,
}

impl DefaultLogger {
    /// Logger printing entries at or above the severity of `level`
    pub fn with_level(level: i32) -> Self {
        Self { threshold: LogSeverity::threshold_for_level(level) }
    }

    /// Logger configured from `VULKAN_WSI_DEBUG_LEVEL`
    pub fn from_env() -> Self {
        let level = std::env::var(DEBUG_LEVEL_ENV)
            .ok()
            .and_then(|value| parse_debug_level(&value))
            .unwrap_or(DEFAULT_DEBUG_LEVEL);
        Self::with_level(level)
    }

    pub fn enabled(&self, severity: LogSeverity) -> bool {
        self.threshold.is_some_and(|threshold| severity >= threshold)
    }

    /// Render an entry without color codes
    pub fn format_entry(entry: &LogEntry) -> String {
        Self::render(entry, entry.severity.name(), &entry.source)
    }

    fn render(entry: &LogEntry, severity: &str, source: &str) -> String {
        let datetime: DateTime<Local> = entry.timestamp.into();
        let timestamp = datetime.format("%Y-%m-%d %H:%M:%S%.3f");
        match (entry.file, entry.line) {
            (Some(file), Some(line)) => {
                format!("[{}] [{}] [{}] {} ({}:{})", timestamp, severity, source, entry.message, file, line)
            }
            _ => format!("[{}] [{}] [{}] {}", timestamp, severity, source, entry.message),
        }
    }
}

impl Default for DefaultLogger {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Logger for DefaultLogger {
    fn log(&self, entry: &LogEntry) {
        if !self.enabled(entry.severity) {
            return;
        }
        let severity = entry.severity.colored_name().to_string();
        let source = entry.source.bright_blue().to_string();
        eprintln!("{}", Self::render(entry, &severity, &source));
    }
}

// ===== LOGGING MACROS =====

/// Log a TRACE message (very verbose)
#[macro_export]
macro_rules! wsi_trace {
    ($source:expr, $($arg:tt)*) => {
        $crate::wsi::Layer::log(
            $crate::wsi::log::LogSeverity::Trace,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log a DEBUG message (development information)
#[macro_export]
macro_rules! wsi_debug {
    ($source:expr, $($arg:tt)*) => {
        $crate::wsi::Layer::log(
            $crate::wsi::log::LogSeverity::Debug,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log an INFO message (important events)
///
/// # Example
///
/// ```no_run
/// display_wsi::wsi_info!("wsi::display", "Mode set on CRTC {}", 42);
/// ```
#[macro_export]
macro_rules! wsi_info {
    ($source:expr, $($arg:tt)*) => {
        $crate::wsi::Layer::log(
            $crate::wsi::log::LogSeverity::Info,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log a WARN message (potential issues)
#[macro_export]
macro_rules! wsi_warn {
    ($source:expr, $($arg:tt)*) => {
        $crate::wsi::Layer::log(
            $crate::wsi::log::LogSeverity::Warn,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log an ERROR message with file:line information
#[macro_export]
macro_rules! wsi_error {
    ($source:expr, $($arg:tt)*) => {
        $crate::wsi::Layer::log_detailed(
            $crate::wsi::log::LogSeverity::Error,
            $source,
            format!($($arg)*),
            file!(),
            line!()
        )
    };
}

/// Log an ERROR message and evaluate to a `BackendError` carrying the same text
///
/// # Example
///
/// ```no_run
/// # use display_wsi::wsi::Error;
/// let err: Error = display_wsi::wsi_err!("wsi::vulkan", "vkCreateFence failed: {}", -1);
/// ```
#[macro_export]
macro_rules! wsi_err {
    ($source:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::wsi::Layer::log_detailed(
            $crate::wsi::log::LogSeverity::Error,
            $source,
            message.clone(),
            file!(),
            line!()
        );
        $crate::wsi::Error::BackendError(message)
    }};
}

/// Log an ERROR message and return early with a `BackendError`
#[macro_export]
macro_rules! wsi_bail {
    ($source:expr, $($arg:tt)*) => {
        return Err($crate::wsi_err!($source, $($arg)*))
    };
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
