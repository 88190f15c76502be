//! Version parsing, ordering, and range matching.
//!
//! Versions use a Maven-like ordering rather than semver:
//! - Segments are split on `.`, `-` and `_`
//! - Numeric segments compare as numbers
//! - Well-known qualifiers have a fixed order:
//!   `dev` < `alpha` < `beta` < `milestone` < `rc` < `snapshot` < `""` (release) < `sp`
//! - Trailing zero and release segments are insignificant: `1.0 == 1.0.0`

use std::cmp::Ordering;
use std::fmt;

use modgraph_util::errors::ModgraphError;

/// A parsed version with comparable segments.
#[derive(Debug, Clone)]
pub struct Version {
    original: String,
    segments: Vec<Segment>,
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

#[derive(Debug, Clone, Eq, PartialEq)]
enum Segment {
    Numeric(u64),
    Qualifier(QualifierKind),
    Text(String),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
enum QualifierKind {
    Dev,
    Alpha,
    Beta,
    Milestone,
    Rc,
    Snapshot,
    Release,
    Sp,
}

impl Version {
    pub fn parse(version: &str) -> Self {
        Self {
            original: version.to_string(),
            segments: parse_segments(version),
        }
    }

    /// The version exactly as written.
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// True when the version carries a pre-release qualifier.
    pub fn is_qualified(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Qualifier(q) if *q < QualifierKind::Release))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let max_len = self.segments.len().max(other.segments.len());
        for i in 0..max_len {
            let ord = compare_segments(self.segments.get(i), other.segments.get(i));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn compare_segments(a: Option<&Segment>, b: Option<&Segment>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(s), None) => compare_segment_to_empty(s),
        (None, Some(s)) => compare_segment_to_empty(s).reverse(),
        (Some(a), Some(b)) => compare_two_segments(a, b),
    }
}

fn compare_segment_to_empty(seg: &Segment) -> Ordering {
    match seg {
        Segment::Numeric(0) => Ordering::Equal,
        Segment::Numeric(_) => Ordering::Greater,
        Segment::Qualifier(q) => q.cmp(&QualifierKind::Release),
        Segment::Text(_) => Ordering::Less,
    }
}

fn compare_two_segments(a: &Segment, b: &Segment) -> Ordering {
    match (a, b) {
        (Segment::Numeric(a), Segment::Numeric(b)) => a.cmp(b),
        (Segment::Qualifier(a), Segment::Qualifier(b)) => a.cmp(b),
        (Segment::Numeric(_), _) => Ordering::Greater,
        (_, Segment::Numeric(_)) => Ordering::Less,
        (Segment::Text(a), Segment::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Segment::Qualifier(q), Segment::Text(_)) => {
            if *q >= QualifierKind::Release {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (Segment::Text(_), Segment::Qualifier(q)) => {
            if *q >= QualifierKind::Release {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
    }
}

fn parse_segments(version: &str) -> Vec<Segment> {
    version
        .split(['.', '-', '_'])
        .filter(|token| !token.is_empty())
        .map(classify)
        .collect()
}

fn classify(token: &str) -> Segment {
    if let Ok(n) = token.parse::<u64>() {
        return Segment::Numeric(n);
    }
    match token.to_lowercase().as_str() {
        "dev" => Segment::Qualifier(QualifierKind::Dev),
        "alpha" | "a" => Segment::Qualifier(QualifierKind::Alpha),
        "beta" | "b" => Segment::Qualifier(QualifierKind::Beta),
        "milestone" | "m" => Segment::Qualifier(QualifierKind::Milestone),
        "rc" | "cr" => Segment::Qualifier(QualifierKind::Rc),
        "snapshot" => Segment::Qualifier(QualifierKind::Snapshot),
        "ga" | "final" | "release" => Segment::Qualifier(QualifierKind::Release),
        "sp" => Segment::Qualifier(QualifierKind::Sp),
        _ => Segment::Text(token.to_string()),
    }
}

/// A version range: `[1.0,2.0)`, `[1.0,)`, `(,2.0]`, `]1.0,2.0[`, `[1.5]`.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionRange {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
    notation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

impl VersionRange {
    /// True if `spec` is written in range notation.
    pub fn is_range_notation(spec: &str) -> bool {
        spec.starts_with(['[', '(', ']'])
    }

    /// Parse a range. `]` as an opening bracket and `[` as a closing one
    /// denote exclusive bounds.
    pub fn parse(spec: &str) -> Result<Self, ModgraphError> {
        let s = spec.trim();
        let invalid = |reason: &str| ModgraphError::Notation {
            notation: spec.to_string(),
            reason: reason.to_string(),
        };

        let open_inclusive = match s.chars().next() {
            Some('[') => true,
            Some('(') | Some(']') => false,
            _ => return Err(invalid("a range must start with '[', '(' or ']'")),
        };
        let close_inclusive = match s.chars().last() {
            Some(']') if s.len() > 1 => true,
            Some(')') | Some('[') if s.len() > 1 => false,
            _ => return Err(invalid("unterminated range")),
        };
        let inner = &s[1..s.len() - 1];
        if inner.contains(['[', ']', '(', ')']) {
            return Err(invalid("nested brackets"));
        }

        let Some((lower, upper)) = inner.split_once(',') else {
            // [1.0] means exactly 1.0
            let v = inner.trim();
            if v.is_empty() || !open_inclusive || !close_inclusive {
                return Err(invalid("a single-version range must be written [x]"));
            }
            let version = Version::parse(v);
            return Ok(Self {
                lower: Some(Bound {
                    version: version.clone(),
                    inclusive: true,
                }),
                upper: Some(Bound {
                    version,
                    inclusive: true,
                }),
                notation: s.to_string(),
            });
        };

        if upper.contains(',') {
            return Err(invalid("too many bounds"));
        }
        let (lower, upper) = (lower.trim(), upper.trim());
        if lower.is_empty() && upper.is_empty() {
            return Err(invalid("at least one bound is required"));
        }
        let bound = |v: &str, inclusive: bool| {
            (!v.is_empty()).then(|| Bound {
                version: Version::parse(v),
                inclusive,
            })
        };
        let range = Self {
            lower: bound(lower, open_inclusive),
            upper: bound(upper, close_inclusive),
            notation: s.to_string(),
        };
        if let (Some(lo), Some(hi)) = (&range.lower, &range.upper) {
            if lo.version > hi.version {
                return Err(invalid("lower bound is greater than upper bound"));
            }
        }
        Ok(range)
    }

    /// Check if a version satisfies this range.
    pub fn contains(&self, version: &Version) -> bool {
        if let Some(ref lower) = self.lower {
            match version.cmp(&lower.version) {
                Ordering::Less => return false,
                Ordering::Equal if !lower.inclusive => return false,
                _ => {}
            }
        }
        if let Some(ref upper) = self.upper {
            match version.cmp(&upper.version) {
                Ordering::Greater => return false,
                Ordering::Equal if !upper.inclusive => return false,
                _ => {}
            }
        }
        true
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.notation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_ordering() {
        assert!(Version::parse("1.0") < Version::parse("2.0"));
        assert!(Version::parse("1.9") < Version::parse("1.10"));
    }

    #[test]
    fn three_part_ordering() {
        let v1 = Version::parse("1.0.0");
        let v2 = Version::parse("1.0.1");
        let v3 = Version::parse("1.1.0");
        assert!(v1 < v2);
        assert!(v2 < v3);
    }

    #[test]
    fn qualifier_ordering() {
        let dev = Version::parse("1.0-dev");
        let alpha = Version::parse("1.0-alpha");
        let beta = Version::parse("1.0-beta");
        let rc = Version::parse("1.0-rc");
        let release = Version::parse("1.0");
        let sp = Version::parse("1.0-sp");

        assert!(dev < alpha);
        assert!(alpha < beta);
        assert!(beta < rc);
        assert!(rc < release);
        assert!(release < sp);
        assert!(rc.is_qualified());
        assert!(!release.is_qualified());
    }

    #[test]
    fn trailing_zeros_equal() {
        assert_eq!(Version::parse("1.0"), Version::parse("1.0.0"));
        assert_eq!(Version::parse("1.0-final"), Version::parse("1"));
    }

    #[test]
    fn numeric_beats_text() {
        assert!(Version::parse("1.0.0") > Version::parse("1.0.0-jre"));
        assert!(Version::parse("31.0-jre") < Version::parse("32.0-jre"));
    }

    #[test]
    fn display_keeps_original() {
        assert_eq!(Version::parse("1.8.0_292").to_string(), "1.8.0_292");
    }

    #[test]
    fn range_inclusive() {
        let range = VersionRange::parse("[1.0,2.0]").unwrap();
        assert!(range.contains(&Version::parse("1.0")));
        assert!(range.contains(&Version::parse("1.5")));
        assert!(range.contains(&Version::parse("2.0")));
        assert!(!range.contains(&Version::parse("0.9")));
        assert!(!range.contains(&Version::parse("2.1")));
    }

    #[test]
    fn range_exclusive_upper() {
        let range = VersionRange::parse("[1.0,2.0)").unwrap();
        assert!(range.contains(&Version::parse("1.9.9")));
        assert!(!range.contains(&Version::parse("2.0")));
    }

    #[test]
    fn range_reversed_bracket_notation() {
        let range = VersionRange::parse("]1.0,2.0[").unwrap();
        assert!(!range.contains(&Version::parse("1.0")));
        assert!(range.contains(&Version::parse("1.5")));
        assert!(!range.contains(&Version::parse("2.0")));
    }

    #[test]
    fn range_open_bounds() {
        let below = VersionRange::parse("(,2.0)").unwrap();
        assert!(below.contains(&Version::parse("0.1")));
        assert!(!below.contains(&Version::parse("2.0")));
        let above = VersionRange::parse("[3.0,)").unwrap();
        assert!(above.contains(&Version::parse("99")));
        assert!(!above.contains(&Version::parse("2.9")));
    }

    #[test]
    fn range_single_version() {
        let range = VersionRange::parse("[1.5]").unwrap();
        assert!(range.contains(&Version::parse("1.5")));
        assert!(!range.contains(&Version::parse("1.4")));
    }

    #[test]
    fn malformed_ranges_rejected() {
        for bad in ["[1.0", "[1.0,2.0", "1.0]", "[,]", "[2.0,1.0]", "[1,2,3]", "(1.5)", "[[1]]"] {
            assert!(VersionRange::parse(bad).is_err(), "{bad} should be rejected");
        }
    }
}
