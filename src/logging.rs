//! Timestamped logging backend.
//!
//! Every line, whether it comes from the engine's `log::*!` calls or the `logi!`/`logw!`/`loge!`
//! macros here, is shaped like:
//!     <timestamp> [TAG][thread] message
//!
//! The tag is the `log` target. stderr is the canonical sink; `--log-file` adds an append-only
//! copy. `LEDMATRIX_LOG` sets the level (`trace|debug|info|warn|error`, default `info`).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

static RUN_ID: OnceLock<String> = OnceLock::new();
static LOGGER: OnceLock<Logger> = OnceLock::new();

struct Logger {
    level: LevelFilter,
    // Read once in `init`; the local offset cannot be queried once other threads exist.
    offset: UtcOffset,
    file: Mutex<Option<File>>,
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} [{}][{}] {}",
            log_timestamp(self.offset),
            short_tag(record.target()),
            log_thread_name(),
            record.args()
        );
        eprintln!("{line}");
        if let Some(f) = self.file.lock().as_mut() {
            let _ = writeln!(f, "{line}");
        }
    }

    fn flush(&self) {
        if let Some(f) = self.file.lock().as_mut() {
            let _ = f.flush();
        }
    }
}

/// Module-path targets (`ledmatrix_engine::foo`) become their last segment.
fn short_tag(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

pub fn level_from_env() -> LevelFilter {
    std::env::var("LEDMATRIX_LOG")
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(LevelFilter::Info)
}

/// Install the backend. Call once at startup, before any thread is spawned; returns the run id.
pub fn init(log_file: Option<PathBuf>, level: LevelFilter) -> String {
    let (offset, offset_failed) = match UtcOffset::current_local_offset() {
        Ok(offset) => (offset, None),
        Err(e) => (UtcOffset::UTC, Some(e)),
    };

    let rid = RUN_ID
        .get_or_init(|| {
            // time xor pid, enough to group the lines of one run
            let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
            format!("{:08x}", (now.as_nanos() as u64) ^ u64::from(std::process::id()))
        })
        .clone();

    let mut open_failed = None;
    let file = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => Some(f),
            Err(e) => {
                open_failed = Some(format!("failed to open log file {}: {e}", path.display()));
                None
            }
        }
    });

    let logger = LOGGER.get_or_init(|| Logger {
        level,
        offset,
        file: Mutex::new(file),
    });
    if log::set_logger(logger).is_ok() {
        log::set_max_level(level);
    }
    if let Some(msg) = open_failed {
        log::warn!(target: "LOG", "{msg}");
    }
    if let Some(e) = offset_failed {
        log::warn!(target: "LOG", "local UTC offset unavailable ({e}); timestamps and schedules use UTC");
    }
    rid
}

pub fn run_id() -> &'static str {
    RUN_ID.get().map(|s| s.as_str()).unwrap_or("")
}

/// Offset captured by `init`, UTC before that.
pub fn utc_offset() -> UtcOffset {
    LOGGER.get().map_or(UtcOffset::UTC, |l| l.offset)
}

/// `YYYY-MM-DD HH:MM:SS.mmm` at `offset`.
pub fn log_timestamp(offset: UtcOffset) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");
    OffsetDateTime::now_utc()
        .to_offset(offset)
        .format(&fmt)
        .unwrap_or_else(|_| "<time-format-error>".to_string())
}

pub fn log_thread_name() -> String {
    std::thread::current().name().unwrap_or("main").to_string()
}

#[macro_export]
macro_rules! logi {
    ($tag:expr, $($arg:tt)*) => {
        ::log::info!(target: $tag, $($arg)*)
    };
}

#[macro_export]
macro_rules! logw {
    ($tag:expr, $($arg:tt)*) => {
        ::log::warn!(target: $tag, $($arg)*)
    };
}

#[macro_export]
macro_rules! loge {
    ($tag:expr, $($arg:tt)*) => {
        ::log::error!(target: $tag, $($arg)*)
    };
}
