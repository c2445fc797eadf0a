//! Validator registry: named schema lookup with compiled-matcher caching.

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::path::Path;
use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bundle::SchemaBundle;
use crate::error::{BundleResult, RegistryError, RegistryResult};

/// One violated constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// JSON pointer into the checked value (`""` for the root)
    pub pointer: String,
    /// JSON pointer into the schema naming the violated keyword
    pub keyword: String,
    /// Human-readable reason
    pub message: String,
}

/// Outcome of checking one value against one schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationResult {
    Valid,
    Invalid(Vec<FieldError>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    /// Field errors, empty when valid.
    pub fn errors(&self) -> &[FieldError] {
        match self {
            ValidationResult::Valid => &[],
            ValidationResult::Invalid(errors) => errors,
        }
    }

    /// Render the errors alongside the offending parts of `payload`.
    ///
    /// Each error shows where it occurred, which keyword rejected it and the
    /// actual value found there, followed by the whole payload.
    pub fn render(&self, schema_id: &str, payload: Option<&Value>) -> String {
        let mut out = String::new();
        match self {
            ValidationResult::Valid => {
                let _ = writeln!(out, "payload conforms to {schema_id}");
            }
            ValidationResult::Invalid(errors) => {
                let _ = writeln!(out, "payload does not conform to {schema_id}:");
                for error in errors {
                    let location = if error.pointer.is_empty() { "/" } else { &error.pointer };
                    let _ = writeln!(out, "  at {location}: {}", error.message);
                    let _ = writeln!(out, "    schema: {}", error.keyword);
                    if let Some(actual) = payload.and_then(|p| p.pointer(&error.pointer)) {
                        let _ = writeln!(out, "    actual: {}", actual);
                    }
                }
            }
        }
        match payload {
            Some(value) => {
                let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
                let _ = writeln!(out, "payload:\n{pretty}");
            }
            None => {
                let _ = writeln!(out, "payload: <empty>");
            }
        }
        out
    }
}

/// A compiled matcher for one schema definition.
///
/// Holds no per-call state, so a single instance is shared by every check.
pub struct Validator {
    id: String,
    compiled: JSONSchema,
}

impl Validator {
    fn compile(id: &str, document: &Value) -> RegistryResult<Self> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft202012)
            .should_validate_formats(true)
            .compile(document)
            .map_err(|err| RegistryError::Compile {
                id: id.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            id: id.to_string(),
            compiled,
        })
    }

    /// Schema ID this validator was resolved from.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Check a value. Never fails: mismatches are reported as `Invalid`.
    pub fn validate(&self, value: &Value) -> ValidationResult {
        match self.compiled.validate(value) {
            Ok(()) => ValidationResult::Valid,
            Err(errors) => ValidationResult::Invalid(
                errors
                    .map(|err| FieldError {
                        pointer: err.instance_path.to_string(),
                        keyword: err.schema_path.to_string(),
                        message: err.to_string(),
                    })
                    .collect(),
            ),
        }
    }

    /// Check a value that may be absent (an empty response body).
    pub fn check(&self, value: Option<&Value>) -> ValidationResult {
        match value {
            Some(value) => self.validate(value),
            None => ValidationResult::Invalid(vec![FieldError {
                pointer: String::new(),
                keyword: String::new(),
                message: "value is undefined".to_string(),
            }]),
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Resolves schema IDs against a bundle, compiling each at most once.
pub struct ValidatorRegistry {
    bundle: SchemaBundle,
    cache: RwLock<HashMap<String, Arc<Validator>>>,
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("schemas", &self.bundle.len())
            .field("cached", &self.cached())
            .finish_non_exhaustive()
    }
}

impl ValidatorRegistry {
    pub fn new(bundle: SchemaBundle) -> Self {
        Self {
            bundle,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Load a bundle file and wrap it in a registry.
    pub fn load(path: impl AsRef<Path>) -> BundleResult<Self> {
        Ok(Self::new(SchemaBundle::load(path)?))
    }

    pub fn bundle(&self) -> &SchemaBundle {
        &self.bundle
    }

    /// Resolve a schema ID (or `$id` alias) to its validator.
    ///
    /// Repeated resolution of the same definition returns the cached instance.
    pub fn resolve(&self, schema_id: &str) -> RegistryResult<Arc<Validator>> {
        let key = self
            .bundle
            .canonical_id(schema_id)
            .ok_or_else(|| RegistryError::SchemaNotFound(schema_id.to_string()))?;

        if let Some(validator) = self.cache.read().get(key) {
            return Ok(Arc::clone(validator));
        }

        let document = self
            .bundle
            .standalone(key)
            .ok_or_else(|| RegistryError::SchemaNotFound(schema_id.to_string()))?;
        let validator = Arc::new(Validator::compile(key, &document)?);
        tracing::debug!(schema = %key, "Compiled validator");

        let mut cache = self.cache.write();
        Ok(Arc::clone(cache.entry(key.to_string()).or_insert(validator)))
    }

    /// Resolve and check in one call.
    pub fn check(&self, schema_id: &str, value: Option<&Value>) -> RegistryResult<ValidationResult> {
        Ok(self.resolve(schema_id)?.check(value))
    }

    /// Resolve every ID up front so a missing or broken definition surfaces
    /// before any scenario runs.
    pub fn preflight<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> RegistryResult<usize> {
        let mut count = 0;
        for id in ids {
            self.resolve(id)?;
            count += 1;
        }
        Ok(count)
    }

    /// Number of compiled validators currently cached.
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}
