use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::log::Level;

/// Everything a sink learns about a single message.
pub struct LogRecord<'a> {
    pub logger: &'a str,
    pub timestamp: SystemTime,
    pub elapsed_micros: u64,
    pub thread: String,
    pub task: Option<String>,
    pub level: Level,
    pub message: &'a str,
    pub file: &'static str,
    pub line: u32,
}

impl LogRecord<'_> {
    /// The standard single-line rendering used by the built-in sinks.
    pub fn format_line(&self) -> String {
        let epoch =
            self.timestamp.duration_since(UNIX_EPOCH).unwrap_or_default();
        let task = self.task.as_deref().unwrap_or("-");
        format!(
            "{}.{:06} {}us {} task={} {} {}: {} ({}:{})",
            epoch.as_secs(),
            epoch.subsec_micros(),
            self.elapsed_micros,
            self.thread,
            task,
            self.level,
            if self.logger.is_empty() { "root" } else { self.logger },
            self.message,
            self.file,
            self.line,
        )
    }
}

/// A destination for log messages.
#[derive(Clone)]
pub enum Sink {
    /// line-oriented standard output
    Stdout,

    /// append-mode file; each message is one `write_all` call so
    /// concurrent writers never interleave within a message
    File(Arc<FileSink>),

    /// syslog where the platform has it, standard error elsewhere
    Platform,

    /// in-memory line buffer
    Memory(MemorySink),

    /// user-defined callback carrying the full record
    Callback(Arc<dyn Fn(&LogRecord<'_>) + Send + Sync>),
}

impl Sink {
    pub fn file(path: impl AsRef<Path>) -> std::io::Result<Sink> {
        Ok(Sink::File(Arc::new(FileSink::open(path)?)))
    }

    pub fn callback(f: impl Fn(&LogRecord<'_>) + Send + Sync + 'static) -> Sink {
        Sink::Callback(Arc::new(f))
    }

    pub(crate) fn log(&self, record: &LogRecord<'_>) {
        match self {
            Sink::Stdout => {
                let line = record.format_line();
                let stdout = std::io::stdout();
                let mut handle = stdout.lock();
                let _ = writeln!(handle, "{line}");
            }
            Sink::File(file_sink) => file_sink.log(record),
            Sink::Platform => platform_log(record),
            Sink::Memory(memory_sink) => memory_sink.push(record.format_line()),
            Sink::Callback(f) => f(record),
        }
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sink::Stdout => f.write_str("Sink::Stdout"),
            Sink::File(file_sink) => write!(f, "Sink::File({})", file_sink.path().display()),
            Sink::Platform => f.write_str("Sink::Platform"),
            Sink::Memory(_) => f.write_str("Sink::Memory"),
            Sink::Callback(_) => f.write_str("Sink::Callback"),
        }
    }
}

/// Appends messages to a file opened in append mode. The file is created
/// if it does not exist.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn log(&self, record: &LogRecord<'_>) {
        let mut line = record.format_line();
        line.push('\n');
        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = file.write_all(line.as_bytes());
    }
}

/// Collects formatted lines in memory; the test sink.
#[derive(Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, line: String) {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(unix)]
fn platform_log(record: &LogRecord<'_>) {
    let priority = match record.level {
        Level::Fatal => libc::LOG_CRIT,
        Level::Error => libc::LOG_ERR,
        Level::Warning => libc::LOG_WARNING,
        Level::Info | Level::Verbose => libc::LOG_INFO,
        _ => libc::LOG_DEBUG,
    };
    if let Ok(message) = std::ffi::CString::new(record.format_line()) {
        unsafe {
            libc::syslog(priority, b"%s\0".as_ptr().cast(), message.as_ptr());
        }
    }
}

#[cfg(not(unix))]
fn platform_log(record: &LogRecord<'_>) {
    eprintln!("{}", record.format_line());
}
