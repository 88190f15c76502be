//! Version selectors: the predicate a dependency places on acceptable versions.
//!
//! Notation:
//! - `1.2.3` exact
//! - `[1.0,2.0)` range (see [`VersionRange`])
//! - `1.+` prefix, `+` latest integration version
//! - `latest.release`, `latest.milestone`, `latest.integration`
//! - `!<notation>` negation
//!
//! Rejections are built from a requirement's `reject` list rather than parsed
//! from a single notation.

use std::fmt;

use modgraph_util::errors::ModgraphError;

use crate::metadata::{ComponentMetadata, Status};
use crate::version::{Version, VersionRange};

#[derive(Debug, Clone, PartialEq)]
pub enum VersionSelector {
    Exact(Version),
    Range(VersionRange),
    /// Any version starting with the prefix (`1.+` keeps `1.`).
    Prefix(String),
    /// The newest version whose status is at least this one.
    LatestStatus(Status),
    /// Accepts every version none of the listed selectors accept.
    Rejection(Vec<VersionSelector>),
    Not(Box<VersionSelector>),
}

impl VersionSelector {
    /// Parse a version notation.
    pub fn parse(notation: &str) -> Result<Self, ModgraphError> {
        let s = notation.trim();
        let invalid = |reason: &str| ModgraphError::Notation {
            notation: notation.to_string(),
            reason: reason.to_string(),
        };

        if s.is_empty() {
            return Err(invalid("empty version"));
        }
        if let Some(inner) = s.strip_prefix('!') {
            return Ok(Self::Not(Box::new(Self::parse(inner)?)));
        }
        if VersionRange::is_range_notation(s) {
            return Ok(Self::Range(VersionRange::parse(s)?));
        }
        if let Some(status) = s.strip_prefix("latest.") {
            return Status::parse(status)
                .map(Self::LatestStatus)
                .ok_or_else(|| invalid("unknown status; expected integration, milestone or release"));
        }
        if s == "+" {
            return Ok(Self::LatestStatus(Status::Integration));
        }
        if s.chars().any(|c| c.is_whitespace() || "[](),:@!".contains(c)) {
            return Err(invalid("unexpected character"));
        }
        if let Some(prefix) = s.strip_suffix('+') {
            if prefix.contains('+') {
                return Err(invalid("'+' may only appear at the end"));
            }
            return Ok(Self::Prefix(prefix.to_string()));
        }
        if s.contains('+') {
            return Err(invalid("'+' may only appear at the end"));
        }
        Ok(Self::Exact(Version::parse(s)))
    }

    pub fn exact(version: &str) -> Self {
        Self::Exact(Version::parse(version))
    }

    /// Build a rejection from a list of notations.
    pub fn rejecting<S: AsRef<str>>(notations: &[S]) -> Result<Self, ModgraphError> {
        let rejected = notations
            .iter()
            .map(|n| Self::parse(n.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Rejection(rejected))
    }

    pub fn accept_str(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(v) => v.as_str() == candidate,
            _ => self.accept(&Version::parse(candidate)),
        }
    }

    pub fn accept(&self, candidate: &Version) -> bool {
        match self {
            Self::Exact(v) => v.as_str() == candidate.as_str(),
            Self::Range(range) => range.contains(candidate),
            Self::Prefix(prefix) => candidate.as_str().starts_with(prefix.as_str()),
            // Status is unknown without metadata; every version is a candidate.
            Self::LatestStatus(_) => true,
            Self::Rejection(rejected) => !rejected.iter().any(|r| r.accept(candidate)),
            Self::Not(inner) => !inner.accept(candidate),
        }
    }

    pub fn accept_metadata(&self, metadata: &ComponentMetadata) -> bool {
        match self {
            Self::LatestStatus(status) => metadata.status >= *status,
            Self::Rejection(rejected) => !rejected.iter().any(|r| r.accept_metadata(metadata)),
            Self::Not(inner) => !inner.accept_metadata(metadata),
            _ => self.accept(&metadata.version),
        }
    }

    /// True if the selector needs the list of available versions to pick one.
    pub fn is_dynamic(&self) -> bool {
        match self {
            Self::Exact(_) | Self::Rejection(_) => false,
            Self::Range(_) | Self::Prefix(_) | Self::LatestStatus(_) => true,
            Self::Not(inner) => inner.is_dynamic(),
        }
    }

    /// True if candidates must be checked against metadata, not just the
    /// version string.
    pub fn requires_metadata(&self) -> bool {
        match self {
            Self::Exact(_) => false,
            Self::Range(_) | Self::Prefix(_) | Self::LatestStatus(_) => true,
            Self::Rejection(rejected) => rejected.iter().any(|r| r.requires_metadata()),
            Self::Not(inner) => inner.requires_metadata(),
        }
    }

    pub fn matches_unique_version(&self) -> bool {
        matches!(self, Self::Exact(_))
    }

    /// True if a version already selected for the module may be reused
    /// without re-checking it against this selector.
    pub fn can_short_circuit_when_already_preselected(&self) -> bool {
        match self {
            Self::Exact(_) | Self::Range(_) | Self::Prefix(_) => true,
            Self::LatestStatus(_) | Self::Rejection(_) | Self::Not(_) => false,
        }
    }

    /// Filters restrict whatever version is chosen but never propose one.
    pub fn is_filter(&self) -> bool {
        matches!(self, Self::Rejection(_) | Self::Not(_))
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "{v}"),
            Self::Range(r) => write!(f, "{r}"),
            Self::Prefix(p) => write!(f, "{p}+"),
            Self::LatestStatus(s) => write!(f, "latest.{s}"),
            Self::Rejection(rejected) => {
                f.write_str("reject(")?;
                for (i, r) in rejected.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{r}")?;
                }
                f.write_str(")")
            }
            Self::Not(inner) => write!(f, "!{inner}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modgraph_core::module::ComponentId;

    fn sel(s: &str) -> VersionSelector {
        VersionSelector::parse(s).unwrap()
    }

    fn metadata(version: &str, status: Status) -> ComponentMetadata {
        ComponentMetadata::new(ComponentId::parse(&format!("org:lib:{version}")).unwrap())
            .with_status(status)
    }

    #[test]
    fn parses_each_notation() {
        assert!(matches!(sel("1.0"), VersionSelector::Exact(_)));
        assert!(matches!(sel("[1.0,2.0)"), VersionSelector::Range(_)));
        assert_eq!(sel("1.+"), VersionSelector::Prefix("1.".to_string()));
        assert_eq!(sel("+"), VersionSelector::LatestStatus(Status::Integration));
        assert_eq!(sel("latest.release"), VersionSelector::LatestStatus(Status::Release));
        assert!(matches!(sel("!1.0"), VersionSelector::Not(_)));
        assert!(matches!(sel("!!1.0"), VersionSelector::Not(ref inner) if matches!(**inner, VersionSelector::Not(_))));
    }

    #[test]
    fn malformed_notations_rejected() {
        for bad in ["", "  ", "[1.0", "latest.gold", "1.+.2", "1 .0", "a:b", "!", "1.0)"] {
            assert!(VersionSelector::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn exact_uses_string_equality() {
        let s = sel("1.0");
        assert!(s.accept_str("1.0"));
        assert!(!s.accept_str("1.0.0"));
        assert!(s.matches_unique_version());
        assert!(!s.is_dynamic());
        assert!(!s.requires_metadata());
    }

    #[test]
    fn range_and_latest_are_dynamic() {
        for s in ["[1.0,2.0)", "latest.release", "1.+"] {
            let s = sel(s);
            assert!(s.is_dynamic());
            assert!(s.requires_metadata());
            assert!(!s.matches_unique_version());
        }
    }

    #[test]
    fn latest_status_checks_metadata() {
        let s = sel("latest.milestone");
        assert!(s.accept_metadata(&metadata("2.0", Status::Release)));
        assert!(s.accept_metadata(&metadata("2.0", Status::Milestone)));
        assert!(!s.accept_metadata(&metadata("2.0", Status::Integration)));
        assert!(!s.can_short_circuit_when_already_preselected());
    }

    #[test]
    fn not_negates_and_is_conservative() {
        let inner = sel("[1.0,2.0)");
        let not = VersionSelector::Not(Box::new(inner.clone()));
        assert!(!not.accept_str("1.5"));
        assert!(not.accept_str("2.0"));
        assert_eq!(not.is_dynamic(), inner.is_dynamic());
        assert!(!not.matches_unique_version());
        assert!(!not.can_short_circuit_when_already_preselected());
        assert!(!sel("!1.0").matches_unique_version());
        assert!(not.is_filter());
    }

    #[test]
    fn double_negation_matches_original() {
        let candidates = ["0.9", "1.0", "1.0.0", "1.5", "2.0", "2.0-rc", "3.1"];
        for notation in ["1.0", "[1.0,2.0)", "1.+", "latest.release", "(,1.5]"] {
            let s = sel(notation);
            let double = VersionSelector::Not(Box::new(VersionSelector::Not(Box::new(s.clone()))));
            for c in candidates {
                assert_eq!(double.accept_str(c), s.accept_str(c), "{notation} vs {c}");
                let meta = metadata(c, Status::Milestone);
                assert_eq!(double.accept_metadata(&meta), s.accept_metadata(&meta));
            }
        }
    }

    #[test]
    fn rejection_filters_listed_versions() {
        let r = VersionSelector::rejecting(&["1.3", "[2.0,)"]).unwrap();
        assert!(r.accept_str("1.2"));
        assert!(!r.accept_str("1.3"));
        assert!(!r.accept_str("2.5"));
        assert!(r.is_filter());
        assert!(!r.is_dynamic());
        assert_eq!(r.to_string(), "reject(1.3, [2.0,))");
    }

    #[test]
    fn display_round_trips_notation() {
        for n in ["1.0", "[1.0,2.0)", "1.+", "latest.release", "!1.0", "!!1.0"] {
            assert_eq!(sel(n).to_string(), n);
        }
    }
}
