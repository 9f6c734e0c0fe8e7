// Author: Jacques Murray

//! Session-scoped logging.
//!
//! The client never logs through a process-wide logger. It holds a
//! [`SessionLogger`] chosen at construction and, for every entry, binds it to
//! a fresh [`LogContext`] built from the call context and the session current
//! at that moment. Logging is a side channel: nothing reads it back.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{Dispatch, Level};

use crate::config::LogConfig;
use crate::context::CallContext;
use crate::error::Error;
use crate::session::SessionId;
use crate::sink;

/// Tags attached to every entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContext {
    pub session_id: Option<SessionId>,
    pub request_id: Option<String>,
}

impl LogContext {
    pub fn new(call: &CallContext, session_id: Option<SessionId>) -> Self {
        Self {
            session_id,
            request_id: call.request_id().map(str::to_string),
        }
    }
}

/// One log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub attempt: Option<u32>,
    pub error: Option<String>,
}

impl LogRecord {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            attempt: None,
            error: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Level::INFO, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Level::ERROR, message)
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Destination of session-tagged log entries.
pub trait SessionLogger: Send + Sync {
    fn log(&self, context: &LogContext, record: LogRecord);
}

/// A logger bound to one [`LogContext`]. Cheap; build one per entry.
pub struct SessionLog<'a> {
    logger: &'a dyn SessionLogger,
    context: LogContext,
}

impl<'a> SessionLog<'a> {
    pub fn new(logger: &'a dyn SessionLogger, context: LogContext) -> Self {
        Self { logger, context }
    }

    pub fn context(&self) -> &LogContext {
        &self.context
    }

    pub fn record(&self, record: LogRecord) {
        self.logger.log(&self.context, record);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogRecord::info(message));
    }

    pub fn error(&self, message: impl Into<String>, error: impl fmt::Display) {
        self.record(LogRecord::error(message).with_error(error));
    }
}

/// Emits entries as `tracing` events into its own [`Dispatch`].
///
/// The dispatch is scoped to each call, so two clients with different sinks
/// can live in one process without touching the global subscriber.
#[derive(Clone)]
pub struct TracingLogger {
    dispatch: Dispatch,
}

impl TracingLogger {
    pub fn new(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }

    /// JSON entries to the rotating file (and stdout) described by `config`.
    pub fn from_config(config: &LogConfig) -> Result<Self, Error> {
        Ok(Self::new(sink::json_dispatch(config)?))
    }
}

impl fmt::Debug for TracingLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingLogger").finish_non_exhaustive()
    }
}

macro_rules! emit {
    ($level:expr, $context:expr, $record:expr) => {
        tracing::event!(
            target: "bca_api",
            $level,
            session_id = $context.session_id.as_ref().map(SessionId::as_str),
            request_id = $context.request_id.as_deref(),
            attempt = $record.attempt,
            error = $record.error.as_deref(),
            "{}",
            $record.message
        )
    };
}

impl SessionLogger for TracingLogger {
    fn log(&self, context: &LogContext, record: LogRecord) {
        tracing::dispatcher::with_default(&self.dispatch, || {
            let level = record.level;
            if level == Level::ERROR {
                emit!(Level::ERROR, context, record);
            } else if level == Level::WARN {
                emit!(Level::WARN, context, record);
            } else if level == Level::INFO {
                emit!(Level::INFO, context, record);
            } else if level == Level::DEBUG {
                emit!(Level::DEBUG, context, record);
            } else {
                emit!(Level::TRACE, context, record);
            }
        });
    }
}

/// Keeps entries in memory. Meant for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogger {
    entries: Arc<Mutex<Vec<(LogContext, LogRecord)>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(LogContext, LogRecord)> {
        self.entries.lock().clone()
    }

    /// Entries whose message equals `message`.
    pub fn find(&self, message: &str) -> Vec<(LogContext, LogRecord)> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, record)| record.message == message)
            .cloned()
            .collect()
    }
}

impl SessionLogger for MemoryLogger {
    fn log(&self, context: &LogContext, record: LogRecord) {
        self.entries.lock().push((context.clone(), record));
    }
}

/// Drops every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl SessionLogger for NoopLogger {
    fn log(&self, _: &LogContext, _: LogRecord) {}
}
