use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

pub trait LogSink: Send + Sync {
    fn log(&self, record: LogRecord);
}

#[derive(Default)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn log(&self, _record: LogRecord) {}
}

/// Collects records in memory; used by tests to assert on progress output.
#[derive(Default)]
pub struct VecLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl VecLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn messages_at(&self, level: LogLevel) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|record| record.level == level)
            .map(|record| record.message)
            .collect()
    }
}

impl LogSink for VecLogSink {
    fn log(&self, record: LogRecord) {
        if let Ok(mut guard) = self.records.lock() {
            guard.push(record);
        }
    }
}

/// Console sink. Warnings and errors go to stderr, everything else to stdout.
#[derive(Clone)]
pub struct StdoutLogSink {
    min_level: LogLevel,
}

impl Default for StdoutLogSink {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }
}

impl StdoutLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_level(min_level: LogLevel) -> Self {
        Self { min_level }
    }
}

impl LogSink for StdoutLogSink {
    fn log(&self, record: LogRecord) {
        if record.level < self.min_level {
            return;
        }
        if record.level >= LogLevel::Warn {
            eprintln!("[{}] {}", record.level, record.message);
        } else {
            println!("[{}] {}", record.level, record.message);
        }
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => LogLevel::Trace,
            log::Level::Debug => LogLevel::Debug,
            log::Level::Info => LogLevel::Info,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Error => LogLevel::Error,
        }
    }
}

impl LogLevel {
    fn as_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

/// Forwards records emitted through the `log` facade (HTTP adapters, retry
/// helper) into a [`LogSink`].
pub struct LogBridge<S> {
    sink: S,
    min_level: LogLevel,
}

impl<S: LogSink> LogBridge<S> {
    pub fn new(sink: S, min_level: LogLevel) -> Self {
        Self { sink, min_level }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: LogSink> log::Log for LogBridge<S> {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        LogLevel::from(metadata.level()) >= self.min_level
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.sink.log(LogRecord::new(
            record.level().into(),
            record.args().to_string(),
        ));
    }

    fn flush(&self) {}
}

/// Installs a process-wide `log` backend writing to `sink`. Fails if another
/// logger is already installed.
pub fn install_log_bridge<S>(sink: S, min_level: LogLevel) -> Result<(), log::SetLoggerError>
where
    S: LogSink + 'static,
{
    log::set_boxed_logger(Box::new(LogBridge::new(sink, min_level)))?;
    log::set_max_level(min_level.as_filter());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Error > LogLevel::Warn);
    }

    #[test]
    fn vec_sink_filters_by_level() {
        let sink = VecLogSink::new();
        sink.log(LogRecord::new(LogLevel::Info, "split into 2 chunks"));
        sink.log(LogRecord::new(LogLevel::Error, "chunk 2 failed"));
        assert_eq!(sink.records().len(), 2);
        assert_eq!(sink.messages_at(LogLevel::Error), vec!["chunk 2 failed"]);
    }

    #[test]
    fn bridge_forwards_facade_warnings_above_threshold() {
        use log::Log;

        let bridge = LogBridge::new(VecLogSink::new(), LogLevel::Info);
        bridge.log(
            &log::Record::builder()
                .level(log::Level::Warn)
                .args(format_args!("response truncated at max_tokens"))
                .build(),
        );
        bridge.log(
            &log::Record::builder()
                .level(log::Level::Debug)
                .args(format_args!("request body"))
                .build(),
        );

        assert_eq!(
            bridge.sink().messages_at(LogLevel::Warn),
            vec!["response truncated at max_tokens"]
        );
        assert!(bridge.sink().messages_at(LogLevel::Debug).is_empty());
    }
}
