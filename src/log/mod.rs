//! Hierarchical logging substrate.
//!
//! Loggers form a tree keyed by colon-separated names: `http:client:codec`
//! is a child of `http:client`, which is a child of `http`, which hangs
//! off the root logger (the empty name). Intermediate loggers are created
//! implicitly. A message emitted through a logger goes to the sinks of
//! that logger and of every ancestor, stopping upward at the first logger
//! whose inherit-sinks flag is off.
//!
//! Every logger has its own level. `enabled` is a cheap atomic check so
//! call sites can skip formatting entirely; the `log_*` macros do exactly
//! that.

mod sink;

pub use sink::{FileSink, LogRecord, MemorySink, Sink};

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Instant, SystemTime};

/// The level of a log message, most severe first. `None` disables a
/// logger outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    None = 0,

    /// the process cannot continue
    Fatal = 1,

    /// an error that cannot locally be recovered from
    Error = 2,

    /// an error that was ignored or recovered
    Warning = 3,

    /// a normal but significant event
    Info = 4,

    /// a somewhat significant event
    Verbose = 5,

    /// debugging detail, most calls a component makes
    Debug = 6,

    /// everything under the sun, including internal state
    Trace = 7,
}

impl Level {
    fn from_u8(value: u8) -> Level {
        match value {
            1 => Level::Fatal,
            2 => Level::Error,
            3 => Level::Warning,
            4 => Level::Info,
            5 => Level::Verbose,
            6 => Level::Debug,
            7 => Level::Trace,
            _ => Level::None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::None => "NONE",
            Level::Fatal => "FATAL",
            Level::Error => "ERROR",
            Level::Warning => "WARNING",
            Level::Info => "INFO",
            Level::Verbose => "VERBOSE",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        f.write_str(name)
    }
}

struct LoggerNode {
    name: String,
    parent: Option<Arc<LoggerNode>>,
    level: AtomicU8,
    inherit_sinks: AtomicBool,
    sinks: RwLock<Vec<Sink>>,
}

/// A handle to one logger in the process-wide tree. Cheap to clone.
#[derive(Clone)]
pub struct Logger {
    node: Arc<LoggerNode>,
}

impl Logger {
    /// Whether a message at `level` would be emitted right now. Cheap;
    /// also false while a [`LogDisabler`] is active on this task.
    pub fn enabled(&self, level: Level) -> bool {
        if level == Level::None {
            return false;
        }
        if DISABLED_DEPTH.with(|depth| depth.get() > 0) {
            return false;
        }
        level as u8 <= self.node.level.load(Ordering::Relaxed)
    }

    pub fn level(&self) -> Level {
        Level::from_u8(self.node.level.load(Ordering::Relaxed))
    }

    /// Sets this logger's level; with `propagate`, every existing
    /// descendant is set to the same level.
    pub fn set_level(&self, level: Level, propagate: bool) {
        self.node.level.store(level as u8, Ordering::Relaxed);
        if propagate {
            let prefix = child_prefix(&self.node.name);
            for node in read_registry().values() {
                if node.name.starts_with(&prefix) {
                    node.level.store(level as u8, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn inherit_sinks(&self) -> bool {
        self.node.inherit_sinks.load(Ordering::Relaxed)
    }

    pub fn set_inherit_sinks(&self, inherit: bool) {
        self.node.inherit_sinks.store(inherit, Ordering::Relaxed);
    }

    pub fn add_sink(&self, sink: Sink) {
        write_sinks(&self.node).push(sink);
    }

    pub fn clear_sinks(&self) {
        write_sinks(&self.node).clear();
    }

    /// The full colon-separated name of this logger; empty for the root.
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Emits a message. Call sites should gate on [`Logger::enabled`]
    /// first (the `log_*` macros do) so disabled messages are never
    /// formatted.
    pub fn log(&self, level: Level, message: impl AsRef<str>, file: &'static str, line: u32) {
        if !self.enabled(level) {
            return;
        }

        let record = LogRecord {
            logger: &self.node.name,
            timestamp: SystemTime::now(),
            elapsed_micros: process_start().elapsed().as_micros() as u64,
            thread: format!("{:?}", std::thread::current().id()),
            task: current_task_tag(),
            level,
            message: message.as_ref(),
            file,
            line,
        };

        // every ancestor's sinks see the message, but only when that
        // ancestor's own level admits it; the walk stops at the first
        // logger that does not inherit sinks
        let mut node = &self.node;
        loop {
            if level as u8 <= node.level.load(Ordering::Relaxed) {
                for sink in read_sinks(node).iter() {
                    sink.log(&record);
                }
            }
            if !node.inherit_sinks.load(Ordering::Relaxed) {
                break;
            }
            match &node.parent {
                Some(parent) => node = parent,
                None => break,
            }
        }
    }
}

/// Finds (or creates) the logger with the given colon-separated name.
pub fn logger(name: &str) -> Logger {
    if let Some(node) = read_registry().get(name) {
        return Logger { node: node.clone() };
    }

    let mut registry = write_registry();
    Logger { node: lookup_locked(&mut registry, name) }
}

/// The root of the logger hierarchy.
pub fn root() -> Logger {
    logger("")
}

/// Calls `f` for each registered logger, implicitly created intermediates
/// included.
pub fn visit(mut f: impl FnMut(Logger)) {
    let snapshot: Vec<Arc<LoggerNode>> = read_registry().values().cloned().collect();
    for node in snapshot {
        f(Logger { node });
    }
}

fn lookup_locked(
    registry: &mut HashMap<String, Arc<LoggerNode>>,
    name: &str,
) -> Arc<LoggerNode> {
    if let Some(node) = registry.get(name) {
        return node.clone();
    }

    let (parent, default_level) = match name.rsplit_once(':') {
        Some((parent_name, _)) => {
            let parent = lookup_locked(registry, parent_name);
            let level = parent.level.load(Ordering::Relaxed);
            (Some(parent), level)
        }
        None if name.is_empty() => (None, Level::Info as u8),
        None => {
            let parent = lookup_locked(registry, "");
            let level = parent.level.load(Ordering::Relaxed);
            (Some(parent), level)
        }
    };

    let node = Arc::new(LoggerNode {
        name: name.to_string(),
        parent,
        level: AtomicU8::new(default_level),
        inherit_sinks: AtomicBool::new(true),
        sinks: RwLock::new(Vec::new()),
    });
    registry.insert(name.to_string(), node.clone());
    node
}

fn child_prefix(name: &str) -> String {
    if name.is_empty() {
        String::new()
    } else {
        format!("{name}:")
    }
}

type Registry = HashMap<String, Arc<LoggerNode>>;

fn registry() -> &'static RwLock<Registry> {
    static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

fn read_registry() -> RwLockReadGuard<'static, Registry> {
    registry().read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_registry() -> RwLockWriteGuard<'static, Registry> {
    registry().write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_sinks(node: &LoggerNode) -> RwLockReadGuard<'_, Vec<Sink>> {
    node.sinks.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_sinks(node: &LoggerNode) -> RwLockWriteGuard<'_, Vec<Sink>> {
    node.sinks.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

fn current_task_tag() -> Option<String> {
    tokio::task::try_id().map(|id| id.to_string())
}

thread_local! {
    static DISABLED_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Temporarily disables logging for the current task.
///
/// While any disabler is alive, `enabled` returns false regardless of
/// level. The counter is task-local in the cooperative sense: hold the
/// guard across synchronous sections only, not across `.await`s.
pub struct LogDisabler {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl LogDisabler {
    pub fn new() -> Self {
        DISABLED_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self { _not_send: std::marker::PhantomData }
    }
}

impl Default for LogDisabler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LogDisabler {
    fn drop(&mut self) {
        DISABLED_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

#[macro_export]
macro_rules! log_at {
    ($logger:expr, $level:expr, $($arg:tt)+) => {{
        let __logger = &$logger;
        if __logger.enabled($level) {
            __logger.log($level, format!($($arg)+), file!(), line!());
        }
    }};
}

#[macro_export]
macro_rules! log_fatal {
    ($logger:expr, $($arg:tt)+) => { $crate::log_at!($logger, $crate::log::Level::Fatal, $($arg)+) };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)+) => { $crate::log_at!($logger, $crate::log::Level::Error, $($arg)+) };
}

#[macro_export]
macro_rules! log_warning {
    ($logger:expr, $($arg:tt)+) => { $crate::log_at!($logger, $crate::log::Level::Warning, $($arg)+) };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)+) => { $crate::log_at!($logger, $crate::log::Level::Info, $($arg)+) };
}

#[macro_export]
macro_rules! log_verbose {
    ($logger:expr, $($arg:tt)+) => { $crate::log_at!($logger, $crate::log::Level::Verbose, $($arg)+) };
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)+) => { $crate::log_at!($logger, $crate::log::Level::Debug, $($arg)+) };
}

#[macro_export]
macro_rules! log_trace {
    ($logger:expr, $($arg:tt)+) => { $crate::log_at!($logger, $crate::log::Level::Trace, $($arg)+) };
}
