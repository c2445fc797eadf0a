//! Version gate for minimum-version scenario groups.
//!
//! Comparison follows semantic-version precedence: `major.minor.patch`
//! numerically, then a pre-release sorts below the same release
//! (`1.12.3-beta.1 < 1.12.3`), and build metadata never affects the outcome.

use std::cmp::Ordering;
use std::fmt;

use semver::Version;

use crate::error::ConfigError;

/// Parse a version string, tolerating a leading `v` and surrounding space.
pub fn parse_version(text: &str) -> Result<Version, ConfigError> {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).map_err(|err| ConfigError::InvalidVersion {
        value: text.to_string(),
        reason: err.to_string(),
    })
}

/// Precedence order between two versions, ignoring build metadata.
pub fn precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

/// Outcome of evaluating a requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Include,
    Exclude { minimum: Version, target: Version },
}

impl GateDecision {
    pub fn is_included(&self) -> bool {
        matches!(self, GateDecision::Include)
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateDecision::Include => write!(f, "included"),
            GateDecision::Exclude { minimum, target } => {
                write!(f, "requires >= {minimum}, target is {target}")
            }
        }
    }
}

/// Decides whether a group's minimum version is met by the target version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionGate {
    target: Version,
}

impl VersionGate {
    pub fn new(target: Version) -> Self {
        Self { target }
    }

    pub fn parse(target: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(parse_version(target)?))
    }

    pub fn target(&self) -> &Version {
        &self.target
    }

    /// True if the target satisfies `minimum`; no requirement always passes.
    pub fn includes(&self, minimum: Option<&Version>) -> bool {
        self.decide(minimum).is_included()
    }

    pub fn decide(&self, minimum: Option<&Version>) -> GateDecision {
        match minimum {
            None => GateDecision::Include,
            Some(min) if precedence(&self.target, min) != Ordering::Less => GateDecision::Include,
            Some(min) => GateDecision::Exclude {
                minimum: min.clone(),
                target: self.target.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> Version {
        parse_version(text).unwrap()
    }

    #[test]
    fn test_unstable_threshold() {
        let min = v("1.12.3");
        assert!(!VersionGate::new(v("1.12.2")).includes(Some(&min)));
        assert!(VersionGate::new(v("1.12.3")).includes(Some(&min)));
        assert!(VersionGate::new(v("1.14.0")).includes(Some(&min)));
    }

    #[test]
    fn test_no_requirement_always_runs() {
        assert!(VersionGate::new(v("0.0.1")).includes(None));
    }

    #[test]
    fn test_prerelease_is_below_release() {
        let min = v("1.12.3");
        assert!(!VersionGate::new(v("1.12.3-beta.1")).includes(Some(&min)));
        assert!(VersionGate::new(v("1.12.4-beta.1")).includes(Some(&min)));
    }

    #[test]
    fn test_build_metadata_is_ignored() {
        let min = v("1.12.3+build.9");
        assert!(VersionGate::new(v("1.12.3+build.1")).includes(Some(&min)));
    }

    #[test]
    fn test_leading_v_and_whitespace() {
        assert_eq!(v(" v1.14.0 "), Version::new(1, 14, 0));
    }

    #[test]
    fn test_invalid_version() {
        assert!(matches!(
            parse_version("latest"),
            Err(ConfigError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn test_decision_display() {
        let decision = VersionGate::new(v("1.12.2")).decide(Some(&v("1.12.3")));
        assert_eq!(decision.to_string(), "requires >= 1.12.3, target is 1.12.2");
    }
}
