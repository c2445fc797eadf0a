//! Records written to the run log directory.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tracing event, serialized as a single JSONL line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonLogEntry {
    /// RFC 3339 timestamp with milliseconds
    pub ts: String,

    /// trace, debug, info, warn or error
    pub level: String,

    /// Session this event belongs to
    pub session: String,

    /// Module path the event was emitted from
    pub target: String,

    pub msg: String,

    /// Structured event fields (`group`, `step`, `status`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,

    /// Enclosing spans, outermost first, joined with ` > `
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl JsonLogEntry {
    pub fn new(
        level: impl Into<String>,
        session: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: level.into(),
            session: session.into(),
            target: target.into(),
            msg: msg.into(),
            fields: None,
            span: None,
        }
    }

    pub fn with_fields(mut self, fields: Value) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    /// Serialize without a trailing newline.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// What a run was pointed at, written once when the session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub started_at: String,
    pub target_version: String,
    /// e.g. `container zerotier/zerotier:1.14.0` or `external 10.0.0.5:9993`
    pub target_mode: String,
    pub schema_bundle: String,
    pub cwd: Option<String>,
}

impl RunMetadata {
    pub fn new(
        run_id: impl Into<String>,
        target_version: impl Into<String>,
        target_mode: impl Into<String>,
        schema_bundle: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            target_version: target_version.into(),
            target_mode: target_mode.into(),
            schema_bundle: schema_bundle.into(),
            cwd: std::env::current_dir().ok().map(|p| p.display().to_string()),
        }
    }
}
