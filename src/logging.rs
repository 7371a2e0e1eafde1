//! Structured log sinks
//!
//! The interceptor never talks to a logging backend directly. It asks an
//! injected `LoggerProvider` for a named `AuditLogger`, checks
//! `is_enabled` before doing any work, and hands finished `LogEvent`s to
//! `write`. Two providers ship with the crate:
//!
//! - **`TracingLoggerProvider`** forwards events to `tracing` under the
//!   `saga_audit` target. The rendered message, the template and each audit
//!   property are recorded as separate fields, in property order. Filter
//!   audit output with `RUST_LOG=saga_audit=<level>`.
//! - **`MemoryLoggerProvider`** keeps events in memory for tests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::field::DisplayValue;
use tracing::Level;

/// `tracing` target used for audit events
///
/// `tracing` targets are static, so this is also the default audit logger
/// name. Other names are kept as the `logger` field only.
pub const AUDIT_TARGET: &str = "saga_audit";

/// Properties the `tracing` sink records as fields of their own, in order
const FIELD_PROPERTIES: [&str; 9] = [
    "SagaType",
    "SagaId",
    "StartTime",
    "FinishTime",
    "IsCompleted",
    "IsNew",
    "Initiator",
    "ResultingMessages",
    "Entity",
];

/// Log severity, ordered from most verbose to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Very detailed tracing
    Trace,
    /// Debugging detail
    Debug,
    /// Informational
    #[default]
    Info,
    /// Warnings
    Warn,
    /// Errors
    Error,
}

impl LogLevel {
    /// Convert to the equivalent `tracing` level
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" | "verbose" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" | "information" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// One structured log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    /// Severity
    pub level: LogLevel,

    /// Name of the logger that produced the event
    pub logger: String,

    /// Message template with `{Name}` placeholders
    pub message_template: String,

    /// Named properties, in insertion order
    pub properties: Vec<(String, serde_json::Value)>,
}

impl LogEvent {
    /// Create an event with no properties
    pub fn new(level: LogLevel, logger: impl Into<String>, message_template: impl Into<String>) -> Self {
        Self {
            level,
            logger: logger.into(),
            message_template: message_template.into(),
            properties: Vec::new(),
        }
    }

    /// Append a named property
    pub fn with_property(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.push((name.into(), value));
        self
    }

    /// Look up a property by name
    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Properties as a single JSON object, keys in insertion order
    pub fn properties_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self.properties.iter().cloned().collect();
        serde_json::Value::Object(map)
    }

    /// Substitute `{Name}` placeholders with property values
    ///
    /// Strings are inserted without quotes. Unknown placeholders are left
    /// as written.
    pub fn render(&self) -> String {
        let template = self.message_template.as_str();
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                out.push_str(&rest[open..]);
                return out;
            };
            let name = &after[..close];
            match self.property(name) {
                Some(serde_json::Value::String(s)) => out.push_str(s),
                Some(value) => out.push_str(&value.to_string()),
                None => {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        out
    }
}

/// A named structured logger
pub trait AuditLogger: Send + Sync {
    /// Logger name
    fn name(&self) -> &str;

    /// Whether events at `level` would be recorded
    fn is_enabled(&self, level: LogLevel) -> bool;

    /// Record an event
    fn write(&self, event: LogEvent);
}

/// Factory for named loggers, supplied by the host
pub trait LoggerProvider: Send + Sync {
    /// Get the logger with the given name
    fn logger(&self, name: &str) -> Arc<dyn AuditLogger>;
}

/// Provider that forwards to `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingLoggerProvider {
    min_level: LogLevel,
}

impl TracingLoggerProvider {
    /// Create a provider recording at `min_level` and above
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }
}

impl LoggerProvider for TracingLoggerProvider {
    fn logger(&self, name: &str) -> Arc<dyn AuditLogger> {
        if name != AUDIT_TARGET {
            tracing::warn!(
                logger = %name,
                audit_target = AUDIT_TARGET,
                "Audit logger name is not a tracing target, filter on the target instead"
            );
        }
        Arc::new(TracingLogger {
            name: name.to_string(),
            min_level: self.min_level,
        })
    }
}

/// Logger backed by the active `tracing` subscriber
#[derive(Debug, Clone)]
pub struct TracingLogger {
    name: String,
    min_level: LogLevel,
}

impl AuditLogger for TracingLogger {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self, level: LogLevel) -> bool {
        if level < self.min_level {
            return false;
        }
        match level {
            LogLevel::Trace => tracing::enabled!(target: AUDIT_TARGET, Level::TRACE),
            LogLevel::Debug => tracing::enabled!(target: AUDIT_TARGET, Level::DEBUG),
            LogLevel::Info => tracing::enabled!(target: AUDIT_TARGET, Level::INFO),
            LogLevel::Warn => tracing::enabled!(target: AUDIT_TARGET, Level::WARN),
            LogLevel::Error => tracing::enabled!(target: AUDIT_TARGET, Level::ERROR),
        }
    }

    fn write(&self, event: LogEvent) {
        let logger = self.name.as_str();
        let message = event.render();
        let extra = extra_properties(&event);

        macro_rules! emit {
            ($level:expr) => {
                tracing::event!(
                    target: AUDIT_TARGET,
                    $level,
                    logger = %logger,
                    template = %event.message_template,
                    SagaType = field(&event, "SagaType"),
                    SagaId = field(&event, "SagaId"),
                    StartTime = field(&event, "StartTime"),
                    FinishTime = field(&event, "FinishTime"),
                    IsCompleted = field(&event, "IsCompleted"),
                    IsNew = field(&event, "IsNew"),
                    Initiator = field(&event, "Initiator"),
                    ResultingMessages = field(&event, "ResultingMessages"),
                    Entity = field(&event, "Entity"),
                    extra = extra.as_deref(),
                    "{}",
                    message
                )
            };
        }

        match event.level {
            LogLevel::Trace => emit!(Level::TRACE),
            LogLevel::Debug => emit!(Level::DEBUG),
            LogLevel::Info => emit!(Level::INFO),
            LogLevel::Warn => emit!(Level::WARN),
            LogLevel::Error => emit!(Level::ERROR),
        }
    }
}

/// JSON value formatted for a log field; strings are written unquoted
struct JsonText<'a>(&'a serde_json::Value);

impl fmt::Display for JsonText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            serde_json::Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

fn field<'a>(event: &'a LogEvent, name: &str) -> Option<DisplayValue<JsonText<'a>>> {
    event
        .property(name)
        .map(|value| tracing::field::display(JsonText(value)))
}

/// Properties without a field of their own, as an ordered JSON object
fn extra_properties(event: &LogEvent) -> Option<String> {
    let extra: serde_json::Map<String, serde_json::Value> = event
        .properties
        .iter()
        .filter(|(name, _)| !FIELD_PROPERTIES.contains(&name.as_str()))
        .cloned()
        .collect();
    if extra.is_empty() {
        return None;
    }
    Some(serde_json::Value::Object(extra).to_string())
}

/// In-memory provider for testing
///
/// Every logger it hands out appends to one shared buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoggerProvider {
    min_level: LogLevel,
    events: Arc<RwLock<Vec<LogEvent>>>,
}

impl MemoryLoggerProvider {
    /// Create a provider recording at `min_level` and above
    pub fn with_min_level(min_level: LogLevel) -> Self {
        Self {
            min_level,
            events: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Snapshot of recorded events, oldest first
    ///
    /// A poisoned buffer still yields what was recorded before the panic.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events
            .read()
            .map(|events| events.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Drop all recorded events
    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl LoggerProvider for MemoryLoggerProvider {
    fn logger(&self, name: &str) -> Arc<dyn AuditLogger> {
        Arc::new(MemoryLogger {
            name: name.to_string(),
            min_level: self.min_level,
            events: self.events.clone(),
        })
    }
}

/// Logger that appends to a shared in-memory buffer
#[derive(Debug, Clone)]
pub struct MemoryLogger {
    name: String,
    min_level: LogLevel,
    events: Arc<RwLock<Vec<LogEvent>>>,
}

impl AuditLogger for MemoryLogger {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    fn write(&self, event: LogEvent) {
        if !self.is_enabled(event.level) {
            return;
        }
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
