//! Core building blocks for API conformance testing.
//!
//! This crate knows how to load a bundle of JSON Schema definitions, resolve
//! and cache validators for them, decide version gates and issue typed calls
//! against the API under test. Scenario sequencing lives in
//! `ztconform-scenarios`.

pub mod bundle;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod registry;
pub mod version;

pub use bundle::SchemaBundle;
pub use client::{
    ApiRequest, ApiResponse, ApiTransport, HttpClient, Method, PathTemplate, ResolvedPath,
    TargetEndpoint,
};
pub use config::{ContainerSettings, HarnessConfig, NotFoundPolicy, TargetMode};
pub use error::{
    BundleError, BundleResult, CallError, ConfigError, HarnessError, HarnessResult,
    ProvisionError, RegistryError, RegistryResult, TemplateError,
};
pub use registry::{FieldError, ValidationResult, Validator, ValidatorRegistry};
pub use version::{parse_version, GateDecision, VersionGate};
