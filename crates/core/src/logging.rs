//! Centralized logging for the emulator.
//!
//! Per-category log levels with lazy message construction: the message
//! closure only runs when the category/level combination is enabled, so
//! disabled logging costs a pair of atomic loads. Output goes to stderr by
//! default, or to a file through a background writer thread so emulation
//! never blocks on disk I/O.
//!
//! ```rust
//! use sano_core::logging::{log, LogCategory, LogLevel};
//!
//! log(LogCategory::Bus, LogLevel::Debug, || {
//!     format!("open bus read at ${:06X}", 0x123456)
//! });
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Mutex;
use std::thread;

/// Verbosity levels, ordered from silent to chatty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse a level from a string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }
}

/// Emulator subsystems with independently configurable levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// CPU stepping and reset/boot transitions
    Cpu,
    /// Bus and memory access
    Bus,
    /// Video timing and rendering
    Video,
    /// Audio FIFOs and mixing
    Audio,
    /// Per-scanline raster effects
    Raster,
    /// IRQ assertion and clearing
    Interrupts,
}

const CATEGORY_COUNT: usize = 6;

fn category_index(category: LogCategory) -> usize {
    match category {
        LogCategory::Cpu => 0,
        LogCategory::Bus => 1,
        LogCategory::Video => 2,
        LogCategory::Audio => 3,
        LogCategory::Raster => 4,
        LogCategory::Interrupts => 5,
    }
}

/// Global logging configuration.
pub struct LogConfig {
    /// Fallback level for categories left at `Off`
    global_level: AtomicU8,
    /// Per-category levels; `Off` defers to the global level
    category_levels: [AtomicU8; CATEGORY_COUNT],
    log_sender: Mutex<Option<Sender<String>>>,
    file_logging_enabled: AtomicBool,
}

impl LogConfig {
    fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            category_levels: Default::default(),
            log_sender: Mutex::new(None),
            file_logging_enabled: AtomicBool::new(false),
        }
    }

    /// The process-wide singleton.
    pub fn global() -> &'static Self {
        use std::sync::OnceLock;
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn get_global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.category_levels[category_index(category)].store(level as u8, Ordering::Relaxed);
    }

    pub fn get_level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.category_levels[category_index(category)].load(Ordering::Relaxed))
    }

    /// A message passes if its category level admits it, or, when the
    /// category is `Off`, if the global level does.
    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        let category_level = self.get_level(category);
        if category_level != LogLevel::Off {
            level <= category_level
        } else {
            level <= self.get_global_level()
        }
    }

    /// Silence everything.
    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for lvl in &self.category_levels {
            lvl.store(LogLevel::Off as u8, Ordering::Relaxed);
        }
    }

    /// Route output to `path` through a background writer thread.
    pub fn set_log_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let (sender, receiver) = channel::<String>();
        thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || {
                let mut file = file;
                while let Ok(message) = receiver.recv() {
                    let _ = writeln!(file, "{}", message);
                    let _ = file.flush();
                }
                let _ = file.flush();
            })?;

        let mut log_sender = self.log_sender.lock().unwrap();
        *log_sender = Some(sender);
        self.file_logging_enabled.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Stop file logging; subsequent messages go to stderr.
    pub fn clear_log_file(&self) {
        let mut log_sender = self.log_sender.lock().unwrap();
        *log_sender = None;
        self.file_logging_enabled.store(false, Ordering::Relaxed);
    }

    fn write_message(&self, message: &str) {
        if self.file_logging_enabled.load(Ordering::Relaxed) {
            let log_sender = self.log_sender.lock().unwrap();
            if let Some(ref sender) = *log_sender {
                if sender.send(message.to_string()).is_err() {
                    eprintln!("{}", message);
                }
                return;
            }
        }
        eprintln!("{}", message);
    }
}

/// Log a message; `message_fn` is only evaluated when enabled.
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    let config = LogConfig::global();
    if config.should_log(category, level) {
        config.write_message(&message_fn());
    }
}
