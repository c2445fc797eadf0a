//! Per-step failure conditions.
//!
//! A `StepFailure` fails the group the step belongs to and nothing else.
//! Session-fatal conditions are `ztconform_core::HarnessError`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use ztconform_core::{CallError, FieldError, Method, TemplateError};

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFailure {
    /// A parameter references a state key no earlier step has written
    #[error("Unresolved state reference: {key}")]
    UnresolvedReference { key: String },

    /// The call never produced a response
    #[error("Call failed: {reason}")]
    Call { reason: String },

    /// The resource addressed by the call does not exist (HTTP 404)
    #[error("{method} {path} returned 404 Not Found")]
    NotFound { method: Method, path: String },

    /// Any other non-2xx status
    #[error("{method} {path} returned unexpected status {status}")]
    UnexpectedStatus {
        method: Method,
        path: String,
        status: u16,
        body: Option<Value>,
    },

    /// Response body does not conform to the expected schema
    #[error("Response does not conform to {schema} ({} error(s))", .errors.len())]
    Validation {
        schema: String,
        errors: Vec<FieldError>,
        payload: Option<Value>,
    },

    /// Response conforms but does not contain what the scenario expects
    #[error("Expectation failed: {description}")]
    Expectation {
        description: String,
        actual: Option<Value>,
    },

    /// Extraction pointer matched nothing in the response
    #[error("Nothing at {pointer} to store as {key}")]
    Extraction { pointer: String, key: String },

    /// A state key was already written by a different step in this scope
    #[error("State key {key} already written by {owner}")]
    StateConflict { key: String, owner: String },

    /// A resolved value cannot be used where it is substituted
    #[error("Invalid value for {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The step's path template is malformed
    #[error("Path template error: {reason}")]
    Template { reason: String },
}

impl StepFailure {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StepFailure::NotFound { .. })
    }
}

impl From<CallError> for StepFailure {
    fn from(err: CallError) -> Self {
        StepFailure::Call {
            reason: err.to_string(),
        }
    }
}

impl From<TemplateError> for StepFailure {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::InvalidValue { name, value } => StepFailure::InvalidParameter {
                name,
                reason: format!("{value:?} is not a single path segment"),
            },
            other => StepFailure::Template {
                reason: other.to_string(),
            },
        }
    }
}
