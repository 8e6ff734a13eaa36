use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Ordered severity of a record, lowest first.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    /// Whether records of this severity may carry an `ErrorInfo`.
    pub fn carries_error(&self) -> bool {
        matches!(self, Severity::Error | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            "critical" | "fatal" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Log,
    Error,
    Metric,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Log => "log",
            RecordKind::Error => "error",
            RecordKind::Metric => "metric",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment mode. Fixed when the telemetry instance is built.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    Development,
    Production,
}

impl RuntimeMode {
    /// Development for debug builds, production for release builds.
    pub fn from_build() -> Self {
        if cfg!(debug_assertions) {
            RuntimeMode::Development
        } else {
            RuntimeMode::Production
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, RuntimeMode::Development)
    }
}

impl Default for RuntimeMode {
    fn default() -> Self {
        Self::from_build()
    }
}

impl FromStr for RuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(RuntimeMode::Development),
            "production" | "prod" => Ok(RuntimeMode::Production),
            other => Err(format!("unknown runtime mode '{}'", other)),
        }
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeMode::Development => f.write_str("development"),
            RuntimeMode::Production => f.write_str("production"),
        }
    }
}

/// Structured shape of an error attached to error and critical records.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    /// One line per frame. For Rust errors this is the `source()` chain.
    pub stack: Option<String>,
}

impl ErrorInfo {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Captures an error value, using its type name as `name` and its cause
    /// chain as `stack`.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        Self {
            name: short_type_name(std::any::type_name::<E>()),
            message: error.to_string(),
            stack: if causes.is_empty() {
                None
            } else {
                Some(causes.join("\n"))
            },
        }
    }

    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        let causes: Vec<String> = error
            .chain()
            .skip(1)
            .map(|cause| format!("caused by: {}", cause))
            .collect();

        Self {
            name: "Error".to_string(),
            message: error.to_string(),
            stack: if causes.is_empty() {
                None
            } else {
                Some(causes.join("\n"))
            },
        }
    }

    /// The first `n` lines of the stack, empty when there is none.
    pub fn stack_head(&self, n: usize) -> Vec<&str> {
        self.stack
            .as_deref()
            .map(|stack| stack.lines().take(n).collect())
            .unwrap_or_default()
    }
}

fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Healthy,
    Warning,
    Critical,
}

impl MetricStatus {
    /// Severity a metric record is filed under.
    pub fn severity(&self) -> Severity {
        match self {
            MetricStatus::Healthy => Severity::Info,
            MetricStatus::Warning => Severity::Warn,
            MetricStatus::Critical => Severity::Error,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub status: MetricStatus,
}

/// Call-site fields merged over the ambient context. Anything set here wins.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    pub session_id: Option<String>,
    pub page_path: Option<String>,
    pub user_agent: Option<String>,
    pub component: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn page_path(mut self, path: impl Into<String>) -> Self {
        self.page_path = Some(path.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Context attached to every record.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RecordContext {
    pub session_id: String,
    pub page_path: Option<String>,
    pub user_agent: Option<String>,
    pub component: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Record {
    pub id: Uuid,
    pub kind: RecordKind,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub context: RecordContext,
    pub error: Option<ErrorInfo>,
    pub metric: Option<MetricSample>,
}

impl Record {
    pub fn new(
        kind: RecordKind,
        severity: Severity,
        message: impl Into<String>,
        context: RecordContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            message: message.into(),
            timestamp: Utc::now(),
            context,
            error: None,
            metric: None,
        }
    }
}

/// One row of the append-only remote events table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SinkRow {
    pub id: Uuid,
    pub category: RecordKind,
    pub severity: Severity,
    pub action: String,
    pub resource_path: Option<String>,
    pub details: Value,
    pub error_message: Option<String>,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Record> for SinkRow {
    fn from(record: &Record) -> Self {
        let mut details = serde_json::Map::new();
        details.insert(
            "context".to_string(),
            serde_json::json!({
                "user_agent": record.context.user_agent,
                "component": record.context.component,
                "extra": record.context.extra,
            }),
        );
        if let Some(ref error) = record.error {
            details.insert("error".to_string(), serde_json::json!(error));
        }
        if let Some(ref metric) = record.metric {
            details.insert("metric".to_string(), serde_json::json!(metric));
        }

        Self {
            id: record.id,
            category: record.kind,
            severity: record.severity,
            action: record.message.clone(),
            resource_path: record.context.page_path.clone(),
            details: Value::Object(details),
            error_message: record.error.as_ref().map(|e| e.message.clone()),
            session_id: record.context.session_id.clone(),
            created_at: record.timestamp,
        }
    }
}
