//! Error types for the conformance core

use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading a schema bundle
#[derive(Error, Debug)]
pub enum BundleError {
    /// Bundle file could not be read
    #[error("IO error reading schema bundle: {0}")]
    Io(#[from] std::io::Error),

    /// Bundle file is not valid JSON
    #[error("Schema bundle is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Bundle parsed but does not have the expected shape
    #[error("Malformed schema bundle: {0}")]
    Format(String),

    /// A definition references itself, directly or transitively
    #[error("Schema cycle detected: {}", .chain.join(" -> "))]
    SchemaCycle { chain: Vec<String> },
}

/// Errors raised while resolving a validator
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No definition with this ID exists in the bundle
    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    /// Definition exists but the evaluator rejected it
    #[error("Schema {id} failed to compile: {reason}")]
    Compile { id: String, reason: String },
}

/// Errors raised while expanding a path template
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Template references a parameter that was not supplied
    #[error("Missing path parameter: {0}")]
    MissingParam(String),

    /// A parameter was supplied that the template does not reference
    #[error("Unknown path parameter: {0}")]
    UnknownParam(String),

    /// Parameter value cannot be used as a single path segment
    #[error("Invalid value for path parameter {name}: {value:?}")]
    InvalidValue { name: String, value: String },

    /// Template text itself is malformed
    #[error("Malformed path template {template}: {reason}")]
    Malformed { template: String, reason: String },
}

/// Errors raised while issuing an API call
#[derive(Error, Debug)]
pub enum CallError {
    /// Request never produced a response (connect, timeout, reset)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded as JSON
    #[error("Response with status {status} is not valid JSON: {reason}")]
    Decode { status: u16, reason: String },

    /// Base URL or rendered path could not form a valid URL
    #[error("Invalid URL: {0}")]
    Url(String),

    /// Client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Build(String),
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        CallError::Transport(err.to_string())
    }
}

/// Errors raised while building the harness configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// External mode selected without a credential
    #[error("No AUTH_TOKEN env var set. Exiting.")]
    MissingToken,

    /// Target version is not a semantic version
    #[error("Invalid target version {value:?}: {reason}")]
    InvalidVersion { value: String, reason: String },

    /// External target is not `host:port`
    #[error("Invalid target {0:?}, expected host:port")]
    InvalidTarget(String),

    /// Unknown not-found policy name
    #[error("Invalid not-found policy {0:?}, expected 'fail' or 'skip'")]
    InvalidPolicy(String),
}

/// Errors raised while bringing up the service under test
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// A docker command failed
    #[error("docker {command} failed: {reason}")]
    Docker { command: String, reason: String },

    /// Instance started but never answered the API
    #[error("Instance not reachable within {timeout:?}")]
    NotReachable { timeout: Duration },

    /// Published port could not be determined
    #[error("Could not determine mapped port: {0}")]
    PortMapping(String),

    /// Local IO failure (seed file, process spawn)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Client for readiness polling could not be built
    #[error("Readiness client error: {0}")]
    Client(#[from] CallError),

    /// Readiness probe request could not be formed
    #[error("Invalid readiness probe: {0}")]
    Probe(#[from] TemplateError),
}

/// Errors that end a conformance session before or outside any group
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] CallError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Result type for bundle operations
pub type BundleResult<T> = Result<T, BundleError>;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for session-level operations
pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_shows_chain() {
        let err = BundleError::SchemaCycle {
            chain: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(format!("{}", err), "Schema cycle detected: A -> B -> A");
    }

    #[test]
    fn test_missing_token_message() {
        assert_eq!(
            ConfigError::MissingToken.to_string(),
            "No AUTH_TOKEN env var set. Exiting."
        );
    }

    #[test]
    fn test_harness_error_is_transparent() {
        let err: HarnessError = RegistryError::SchemaNotFound("NodeStatus".into()).into();
        assert_eq!(err.to_string(), "Schema not found: NodeStatus");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BundleError = io_err.into();
        assert!(matches!(err, BundleError::Io(_)));
    }
}
