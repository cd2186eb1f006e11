//! Structured logging for the Steel client.
//!
//! Records are filtered by the configured [`Verbosity`] and either handed to
//! an external callback or forwarded to the `log` facade under the
//! `steel_rs` target, so binaries pick them up through `env_logger`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Verbosity;

/// Convenience alias for external logging callbacks.
pub type LogCallback = Arc<dyn Fn(&SteelLogRecord) + Send + Sync + 'static>;

const LOG_TARGET: &str = "steel_rs";

/// Categories used by the client's components.
pub mod category {
    pub const CONFIG: &str = "config";
    pub const SESSION: &str = "session";
    pub const RETRY: &str = "retry";
    pub const REQUEST: &str = "request";
    pub const LOADER: &str = "loader";
}

/// Logging configuration shared by every component of one client.
#[derive(Clone, Default)]
pub struct LogConfig {
    pub verbose: Verbosity,
    pub external_logger: Option<LogCallback>,
}

impl LogConfig {
    pub fn new(verbose: Verbosity) -> Self {
        Self {
            verbose,
            ..Default::default()
        }
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level.threshold() <= self.verbose.as_u8()
    }
}

/// Log severity used across the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Lowest verbosity at which records of this level are emitted.
    fn threshold(self) -> u8 {
        match self {
            LogLevel::Error | LogLevel::Warn => 0,
            LogLevel::Info => 1,
            LogLevel::Debug => 2,
        }
    }

    pub fn as_log_level(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

/// Structured log entry shared with external callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SteelLogRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<Value>,
}

impl SteelLogRecord {
    pub fn new(
        message: impl Into<String>,
        level: LogLevel,
        category: Option<String>,
        auxiliary: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level,
            category,
            auxiliary,
        }
    }
}

/// Default sink: forward to the `log` facade.
pub fn default_log_handler(record: &SteelLogRecord) {
    let level = record.level.as_log_level();
    match (&record.category, &record.auxiliary) {
        (Some(category), Some(aux)) if !aux.is_null() => {
            log::log!(target: LOG_TARGET, level, "[{}] {} {}", category, record.message, aux)
        }
        (Some(category), _) => {
            log::log!(target: LOG_TARGET, level, "[{}] {}", category, record.message)
        }
        (None, Some(aux)) if !aux.is_null() => {
            log::log!(target: LOG_TARGET, level, "{} {}", record.message, aux)
        }
        (None, _) => log::log!(target: LOG_TARGET, level, "{}", record.message),
    }
}

/// Cheaply clonable logger handed to every client component.
#[derive(Clone)]
pub struct SteelLogger {
    config: LogConfig,
}

impl fmt::Debug for SteelLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SteelLogger")
            .field("verbosity", &self.config.verbose)
            .field("external_logger", &self.config.external_logger.is_some())
            .finish()
    }
}

impl Default for SteelLogger {
    fn default() -> Self {
        Self::with_config(LogConfig::default())
    }
}

impl SteelLogger {
    pub fn with_config(config: LogConfig) -> Self {
        Self { config }
    }

    pub fn new(verbose: Verbosity) -> Self {
        Self::with_config(LogConfig::new(verbose))
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn set_external_logger(&mut self, logger: Option<LogCallback>) {
        self.config.external_logger = logger;
    }

    pub fn log(
        &self,
        message: impl Into<String>,
        level: LogLevel,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        if !self.config.should_log(level) {
            return;
        }

        let record =
            SteelLogRecord::new(message, level, category.map(|c| c.to_string()), auxiliary);

        match &self.config.external_logger {
            Some(callback) => callback(&record),
            None => default_log_handler(&record),
        }
    }

    pub fn error(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Error, category, auxiliary);
    }

    pub fn warn(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Warn, category, auxiliary);
    }

    pub fn info(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Info, category, auxiliary);
    }

    pub fn debug(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Debug, category, auxiliary);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Logger whose records land in the returned vector.
    pub(crate) fn capturing_logger(
        verbose: Verbosity,
    ) -> (SteelLogger, Arc<Mutex<Vec<SteelLogRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&records);
        let callback: LogCallback = Arc::new(move |record| {
            capture.lock().unwrap().push(record.clone());
        });
        let mut logger = SteelLogger::new(verbose);
        logger.set_external_logger(Some(callback));
        (logger, records)
    }

    #[test]
    fn respects_verbosity() {
        let logger = SteelLogger::new(Verbosity::Minimal);
        assert!(logger.config.should_log(LogLevel::Error));
        assert!(logger.config.should_log(LogLevel::Warn));
        assert!(!logger.config.should_log(LogLevel::Info));
        assert!(!logger.config.should_log(LogLevel::Debug));

        let medium = SteelLogger::new(Verbosity::Medium);
        assert!(medium.config.should_log(LogLevel::Info));
        assert!(!medium.config.should_log(LogLevel::Debug));
    }

    #[test]
    fn external_logger_is_invoked() {
        let (logger, records) = capturing_logger(Verbosity::Detailed);

        logger.info("hello", Some(category::SESSION), None);
        logger.debug(
            "retrying",
            Some(category::RETRY),
            Some(serde_json::json!({ "attempt": 2 })),
        );

        let values = records.lock().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].message, "hello");
        assert_eq!(values[0].category.as_deref(), Some("session"));
        assert_eq!(values[0].level, LogLevel::Info);
        assert_eq!(
            values[1].auxiliary.as_ref().unwrap(),
            &serde_json::json!({ "attempt": 2 })
        );
    }

    #[test]
    fn filtered_records_never_reach_the_callback() {
        let (logger, records) = capturing_logger(Verbosity::Minimal);
        logger.debug("noise", None, None);
        logger.warn("close failed", Some(category::SESSION), None);

        let values = records.lock().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].level, LogLevel::Warn);
    }
}
