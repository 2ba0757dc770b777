//! Trestle Logging
//!
//! Lightweight logging shared by every Trestle crate. Repositories log their
//! staged writes, units of work log commits and rollbacks, and the tenancy
//! layer logs cache hits, misses and evictions through these macros.
//!
//! # Usage
//!
//! ```rust
//! use trestle_log::{debug, info, warn, error, trace};
//!
//! debug!("Staging insert");
//! info!("Built pipeline for tenant {}", "acme");
//! warn!("Commit failed, rolling back");
//! error!("Tenant store unreachable");
//!
//! let tenant = "acme";
//! debug!(target: "trestle::tenancy", "Cache miss for {}", tenant);
//! ```
//!
//! # Environment Variables
//!
//! - `TRESTLE_DEBUG=1` - Enable debug logging
//! - `TRESTLE_LOG_LEVEL=trace|debug|info|warn|error|off` - Minimum level
//! - `TRESTLE_LOG_FORMAT=pretty|compact|json` - Output format (default `json`)
//! - `TRESTLE_LOG_COLOR=1|0` - Colored level names in pretty output
//! - `TRESTLE_LOG_TIMESTAMPS=1|0` - Prefix lines with a timestamp
//! - `TRESTLE_LOG_MODULE=1|0` - Include the emitting module path

use once_cell::sync::Lazy;
use std::env;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Per-operation detail (cache probes, chain steps)
    Trace = 0,
    /// Staging and resolution detail
    Debug = 1,
    /// Lifecycle events
    Info = 2,
    /// Recoverable failures (rollbacks)
    Warn = 3,
    /// Unrecoverable failures
    Error = 4,
    /// Logging disabled
    Off = 5,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Upper-case level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Off,
        }
    }

    #[cfg(feature = "color")]
    fn colored(&self) -> colored::ColoredString {
        use colored::Colorize;
        match self {
            Level::Trace => "TRACE".magenta(),
            Level::Debug => "DEBUG".blue(),
            Level::Info => "INFO".green(),
            Level::Warn => "WARN".yellow(),
            Level::Error => "ERROR".red().bold(),
            Level::Off => "OFF".white(),
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human readable, full timestamp
    Pretty,
    /// Single short line
    Compact,
    /// One JSON object per line
    Json,
}

impl Format {
    /// Parse a format name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

/// Logging configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `TRESTLE_DEBUG`
    pub debug: bool,
    /// Minimum level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Colored level names (pretty format only)
    pub color: bool,
    /// Include timestamps
    pub timestamps: bool,
    /// Include the module path of the call site
    pub module_path: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false,
            timestamps: true,
            module_path: true,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl LogConfig {
    /// Build the configuration from `TRESTLE_*` variables and publish the
    /// level to the global atomics used by the macros.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let debug = env_flag("TRESTLE_DEBUG").unwrap_or(false);

        let level = env::var("TRESTLE_LOG_LEVEL")
            .ok()
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { defaults.level });

        let format = env::var("TRESTLE_LOG_FORMAT")
            .ok()
            .and_then(|s| Format::parse(&s))
            .unwrap_or(defaults.format);

        let color = env_flag("TRESTLE_LOG_COLOR")
            .unwrap_or_else(|| env::var("NO_COLOR").is_err() && env::var("TERM").is_ok());

        let config = Self {
            debug,
            level,
            format,
            color,
            timestamps: env_flag("TRESTLE_LOG_TIMESTAMPS").unwrap_or(defaults.timestamps),
            module_path: env_flag("TRESTLE_LOG_MODULE").unwrap_or(defaults.module_path),
        };

        DEBUG_ENABLED.store(config.debug, Ordering::SeqCst);
        LOG_LEVEL.store(config.level as u8, Ordering::SeqCst);
        config
    }
}

/// Force configuration loading. Called lazily by the first emitted line.
pub fn init() {
    Lazy::force(&CONFIG);
}

/// Get the global configuration.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

/// Whether `TRESTLE_DEBUG` (or [`set_debug`]) is on.
#[inline]
pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Whether lines at `level` are emitted.
#[inline]
pub fn is_level_enabled(level: Level) -> bool {
    level != Level::Off && level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Current minimum level.
pub fn current_level() -> Level {
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Change the minimum level at runtime.
pub fn set_level(level: Level) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Toggle debug mode at runtime. Enabling lowers the level to `Debug`.
pub fn set_debug(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    if enabled && current_level() > Level::Debug {
        set_level(Level::Debug);
    }
}

/// Emit one line. Used by the macros.
#[doc(hidden)]
pub fn log(level: Level, target: &str, message: &str) {
    let config = config();
    if !enabled(level) {
        return;
    }

    match config.format {
        Format::Pretty => write_pretty(level, target, message, config),
        Format::Compact => write_compact(level, target, message, config),
        Format::Json => write_json(level, target, message),
    }
}

fn write_pretty(level: Level, target: &str, message: &str, config: &LogConfig) {
    let mut out = std::io::stderr().lock();

    if config.timestamps {
        let _ = write!(out, "{} ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"));
    }

    #[cfg(feature = "color")]
    {
        if config.color {
            let _ = write!(out, "{:5} ", level.colored());
        } else {
            let _ = write!(out, "{:5} ", level.as_str());
        }
    }
    #[cfg(not(feature = "color"))]
    let _ = write!(out, "{:5} ", level.as_str());

    if config.module_path && !target.is_empty() {
        let _ = write!(out, "[{}] ", target);
    }

    let _ = writeln!(out, "{}", message);
}

fn write_compact(level: Level, target: &str, message: &str, config: &LogConfig) {
    let mut out = std::io::stderr().lock();

    if config.timestamps {
        let _ = write!(out, "{} ", chrono::Local::now().format("%H:%M:%S"));
    }
    let _ = write!(out, "{} ", &level.as_str()[..1]);
    if config.module_path && !target.is_empty() {
        let _ = write!(out, "{}: ", target);
    }
    let _ = writeln!(out, "{}", message);
}

#[cfg(feature = "json")]
fn write_json(level: Level, target: &str, message: &str) {
    #[derive(serde::Serialize)]
    struct Line<'a> {
        timestamp: String,
        level: &'a str,
        target: &'a str,
        message: &'a str,
    }

    let line = Line {
        timestamp: chrono::Utc::now().to_rfc3339(),
        level: level.as_str(),
        target,
        message,
    };

    if let Ok(json) = serde_json::to_string(&line) {
        eprintln!("{}", json);
    }
}

#[cfg(not(feature = "json"))]
fn write_json(level: Level, target: &str, message: &str) {
    eprintln!(
        r#"{{"timestamp":"{}","level":"{}","target":{:?},"message":{:?}}}"#,
        chrono::Utc::now().to_rfc3339(),
        level.as_str(),
        target,
        message
    );
}

/// Whether a line at `level` would be emitted. `TRESTLE_DEBUG` turns debug
/// lines on regardless of the configured level.
#[doc(hidden)]
#[inline]
pub fn enabled(level: Level) -> bool {
    is_level_enabled(level) || (level == Level::Debug && is_debug_enabled())
}

#[doc(hidden)]
#[macro_export]
macro_rules! __emit {
    ($level:expr, target: $target:expr, $($arg:tt)+) => {
        if $crate::enabled($level) {
            $crate::log($level, $target, &format!($($arg)+));
        }
    };
    ($level:expr, $($arg:tt)+) => {
        $crate::__emit!($level, target: module_path!(), $($arg)+)
    };
}

/// Log a trace line.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => { $crate::__emit!($crate::Level::Trace, $($arg)+) };
}

/// Log a debug line.
///
/// Emitted when `TRESTLE_DEBUG=1` or the level is `debug` or lower.
///
/// ```rust
/// use trestle_log::debug;
///
/// let rows = 3;
/// debug!("Flushed {} staged rows", rows);
/// debug!(target: "trestle::data", "Commit finished");
/// ```
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => { $crate::__emit!($crate::Level::Debug, $($arg)+) };
}

/// Log an info line.
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => { $crate::__emit!($crate::Level::Info, $($arg)+) };
}

/// Log a warning line.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => { $crate::__emit!($crate::Level::Warn, $($arg)+) };
}

/// Log an error line.
#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => { $crate::__emit!($crate::Level::Error, $($arg)+) };
}

#[cfg(feature = "tracing")]
pub mod tracing_compat {
    //! Bridge into `tracing`.
    //!
    //! Builds a subscriber whose filter follows `TRESTLE_LOG_LEVEL`, unless
    //! `RUST_LOG` is set.

    use super::*;

    /// Create a tracing subscriber that honours the Trestle configuration.
    pub fn subscriber() -> impl tracing::Subscriber {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{EnvFilter, fmt};

        let config = config();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_ascii_lowercase()));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(config.color))
    }
}
