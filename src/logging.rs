use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Log levels, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(C)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl From<u32> for LogLevel {
    fn from(raw: u32) -> Self {
        match raw {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub module: &'static str,
    pub message: String,
    pub timestamp: Instant,
}

/// In-process ring-buffer logger. The engine runs behind FFI with no
/// stdout of its own, so entries are buffered and fetched by the host.
pub struct Logger {
    enabled: AtomicBool,
    min_level: AtomicUsize,
    entries: Mutex<VecDeque<LogEntry>>,
    max_entries: usize,
    start_time: Instant,
}

lazy_static::lazy_static! {
    pub static ref LOGGER: Logger = Logger::new();
}

impl Logger {
    fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            min_level: AtomicUsize::new(LogLevel::Info as usize),
            entries: Mutex::new(VecDeque::new()),
            max_entries: 10_000,
            start_time: Instant::now(),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_level(&self, level: LogLevel) {
        self.min_level.store(level as usize, Ordering::SeqCst);
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from(self.min_level.load(Ordering::SeqCst) as u32)
    }

    pub fn log(&self, level: LogLevel, module: &'static str, message: String) {
        if !self.is_enabled() || level < self.level() {
            return;
        }

        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            level,
            module,
            message,
            timestamp: Instant::now(),
        });
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn entries_json(&self) -> String {
        let entries = self.entries.lock().unwrap();
        let rendered: Vec<serde_json::Value> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "level": format!("{:?}", e.level),
                    "module": e.module,
                    "message": e.message,
                    "elapsed_ms": e.timestamp.duration_since(self.start_time).as_millis() as u64,
                })
            })
            .collect();
        serde_json::to_string(&rendered).unwrap_or_else(|_| "[]".to_string())
    }
}

pub fn enable_logging() {
    LOGGER.enable();
}

pub fn disable_logging() {
    LOGGER.disable();
}

pub fn set_log_level(level: LogLevel) {
    LOGGER.set_level(level);
}

pub fn get_logs() -> Vec<LogEntry> {
    LOGGER.entries()
}

pub fn get_logs_json() -> String {
    LOGGER.entries_json()
}

pub fn clear_logs() {
    LOGGER.clear();
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::logging::LOGGER.log(
            $crate::logging::LogLevel::Trace,
            module_path!(),
            format!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::LOGGER.log(
            $crate::logging::LogLevel::Debug,
            module_path!(),
            format!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::LOGGER.log(
            $crate::logging::LogLevel::Info,
            module_path!(),
            format!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::LOGGER.log(
            $crate::logging::LogLevel::Warn,
            module_path!(),
            format!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::LOGGER.log(
            $crate::logging::LogLevel::Error,
            module_path!(),
            format!($($arg)*),
        )
    };
}
