//! # Logging
//!
//! Adapters for the [`Logger`] port. The default adapter renders
//! structured key/value fields as logfmt-style pairs through the `log`
//! crate facade, so whatever backend the binary installs (env_logger in
//! our case) receives one line per record.

use crate::service::{LogLevel, Logger};

/// Logger backed by the `log` crate. Group names become part of the log
/// target, e.g. `kamini::audit`.
#[derive(Debug, Clone)]
pub struct StdLogger {
    target: String,
}

impl StdLogger {
    pub fn new() -> Self {
        StdLogger {
            target: "kamini".to_string(),
        }
    }
}

impl Default for StdLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for StdLogger {
    fn log(&self, level: LogLevel, message: &str, fields: &[(String, String)]) {
        let level = match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        };
        if fields.is_empty() {
            log::log!(target: &self.target, level, "{}", message);
        } else {
            let rendered = fields
                .iter()
                .map(|(k, v)| format!("{}={}", k, quote_value(v)))
                .collect::<Vec<_>>()
                .join(" ");
            log::log!(target: &self.target, level, "{} {}", message, rendered);
        }
    }

    fn with_group(&self, name: &str) -> Box<dyn Logger> {
        Box::new(StdLogger {
            target: format!("{}::{}", self.target, name),
        })
    }
}

/// Logger that discards everything. For tests and optional wiring.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopLogger;

impl Logger for NopLogger {
    fn log(&self, _level: LogLevel, _message: &str, _fields: &[(String, String)]) {}

    fn with_group(&self, _name: &str) -> Box<dyn Logger> {
        Box::new(NopLogger)
    }
}

fn quote_value(v: &str) -> String {
    if v.is_empty() || v.chars().any(char::is_whitespace) {
        format!("{:?}", v)
    } else {
        v.to_string()
    }
}
