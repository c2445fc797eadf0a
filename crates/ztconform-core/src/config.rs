//! Harness configuration, read from the environment and overridden by CLI flags.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::version::parse_version;

pub const DEFAULT_VERSION: &str = "1.14.0";
pub const DEFAULT_IMAGE: &str = "zerotier/zerotier";
pub const DEFAULT_SCHEMA_BUNDLE: &str = "./tsp-output/@typespec/json-schema/json-schema.json";
pub const DEFAULT_NODE_ID: &str = "1122334455";

/// Port the service API listens on inside the container.
pub const API_PORT: u16 = 9993;
/// Container env var that sets the API secret.
pub const SECRET_ENV: &str = "ZEROTIER_API_SECRET";
pub const LOCAL_CONF_PATH: &str = "/var/lib/zerotier-one/local.conf";
/// Allows management calls from the host through the published port.
pub const LOCAL_CONF: &str = r#"{ "settings": { "allowManagementFrom": ["0.0.0.0/0"] } }"#;

pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_VERSION: &str = "ZT_VERSION";
pub const ENV_TOKEN: &str = "AUTH_TOKEN";
pub const ENV_TARGET: &str = "ZTCONFORM_TARGET";
pub const ENV_SCHEMA_BUNDLE: &str = "ZTCONFORM_SCHEMA_BUNDLE";
pub const ENV_IMAGE: &str = "ZTCONFORM_IMAGE";
pub const ENV_NOT_FOUND: &str = "ZTCONFORM_UNSTABLE_NOT_FOUND";
pub const ENV_LOGS_DIR: &str = "ZTCONFORM_LOGS_DIR";

/// How a 404 from an endpoint in a degradable group is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotFoundPolicy {
    /// The step fails like any other unexpected status.
    #[default]
    Fail,
    /// The enclosing group is reported as skipped.
    Skip,
}

impl FromStr for NotFoundPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(NotFoundPolicy::Fail),
            "skip" => Ok(NotFoundPolicy::Skip),
            _ => Err(ConfigError::InvalidPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for NotFoundPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundPolicy::Fail => write!(f, "fail"),
            NotFoundPolicy::Skip => write!(f, "skip"),
        }
    }
}

/// Container to provision when no external target is given.
#[derive(Clone, PartialEq, Eq)]
pub struct ContainerSettings {
    pub image: String,
    pub tag: String,
    /// API secret; generated when not supplied
    pub token: Option<String>,
    pub startup_timeout: Duration,
}

impl ContainerSettings {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
            token: None,
            startup_timeout: STARTUP_TIMEOUT,
        }
    }

    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

impl fmt::Debug for ContainerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerSettings")
            .field("image", &self.image_ref())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("startup_timeout", &self.startup_timeout)
            .finish()
    }
}

/// Where the API under test comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum TargetMode {
    /// Start a fresh container for the session.
    Provision(ContainerSettings),
    /// Use an instance that is already running.
    External { host: String, port: u16, token: String },
}

impl TargetMode {
    pub fn describe(&self) -> String {
        match self {
            TargetMode::Provision(settings) => format!("container {}", settings.image_ref()),
            TargetMode::External { host, port, .. } => format!("external {host}:{port}"),
        }
    }
}

impl fmt::Debug for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetMode::Provision(settings) => f.debug_tuple("Provision").field(settings).finish(),
            TargetMode::External { host, port, .. } => f
                .debug_struct("External")
                .field("host", host)
                .field("port", port)
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// Everything a conformance session needs to know before it starts.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub target_version: Version,
    pub target: TargetMode,
    pub schema_bundle: PathBuf,
    pub not_found: NotFoundPolicy,
    pub request_timeout: Duration,
    /// Member node ID used by the member endpoints
    pub node_id: String,
    pub logs_dir: Option<PathBuf>,
}

impl HarnessConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let version_text = get(ENV_VERSION).unwrap_or_else(|| DEFAULT_VERSION.to_string());
        let target_version = parse_version(&version_text)?;

        let target = match get(ENV_TARGET) {
            Some(addr) => {
                let (host, port) = parse_target(&addr)?;
                let token = get(ENV_TOKEN).ok_or(ConfigError::MissingToken)?;
                TargetMode::External { host, port, token }
            }
            None => {
                let image = get(ENV_IMAGE).unwrap_or_else(|| DEFAULT_IMAGE.to_string());
                let mut settings = ContainerSettings::new(image, version_text.trim());
                settings.token = get(ENV_TOKEN);
                TargetMode::Provision(settings)
            }
        };

        let not_found = match get(ENV_NOT_FOUND) {
            Some(text) => text.parse()?,
            None => NotFoundPolicy::default(),
        };

        Ok(Self {
            target_version,
            target,
            schema_bundle: get(ENV_SCHEMA_BUNDLE)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCHEMA_BUNDLE)),
            not_found,
            request_timeout: REQUEST_TIMEOUT,
            node_id: DEFAULT_NODE_ID.to_string(),
            logs_dir: get(ENV_LOGS_DIR).map(PathBuf::from),
        })
    }

    /// Override the target version. The container tag follows it.
    pub fn set_version(&mut self, text: &str) -> Result<(), ConfigError> {
        self.target_version = parse_version(text)?;
        if let TargetMode::Provision(settings) = &mut self.target {
            settings.tag = text.trim().to_string();
        }
        Ok(())
    }

    /// Switch to an external target, taking the token already configured.
    pub fn set_external(&mut self, addr: &str, token: Option<String>) -> Result<(), ConfigError> {
        let (host, port) = parse_target(addr)?;
        let token = token
            .or_else(|| match &self.target {
                TargetMode::Provision(settings) => settings.token.clone(),
                TargetMode::External { token, .. } => Some(token.clone()),
            })
            .ok_or(ConfigError::MissingToken)?;
        self.target = TargetMode::External { host, port, token };
        Ok(())
    }
}

/// Split `host:port`.
pub fn parse_target(addr: &str) -> Result<(String, u16), ConfigError> {
    let invalid = || ConfigError::InvalidTarget(addr.to_string());
    let (host, port) = addr.trim().rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}
