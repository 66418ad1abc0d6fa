//! Tag classification into semantic versions and opaque identifiers

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// `major.minor[.patch]` with an optional leading "v" and an optional qualifier
/// ("-alpine", "+build.7", ".1" after a patch) that does not take part in
/// ordering. A missing patch is 0, so release tags like "16.2" are semantic.
static SEMANTIC_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(\d+)\.(\d+)(?:\.(\d+)(?:[-+._].*)?|(?:[-+_].*)?)$")
        .expect("semantic tag pattern is valid")
});

/// A semantic version parsed from a tag.
///
/// Equality and ordering look only at `(major, minor, patch)`; `raw` keeps the
/// original tag so "v1.2.3" and "1.2.3-alpine" stay distinguishable for display
/// and tie-breaking.
#[derive(Debug, Clone, Serialize)]
pub struct SemanticVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub raw: String,
}

impl SemanticVersion {
    pub fn triple(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }
}

impl PartialEq for SemanticVersion {
    fn eq(&self, other: &Self) -> bool {
        self.triple() == other.triple()
    }
}

impl Eq for SemanticVersion {}

impl Hash for SemanticVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.triple().hash(state);
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.triple().cmp(&other.triple())
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A tag classified by its structure.
///
/// There is deliberately no ordering across variants: opaque tags can only be
/// ordered by creation time, which lives on the tag record, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedVersion {
    Semantic(SemanticVersion),
    Opaque { raw: String },
}

impl ParsedVersion {
    pub fn is_semantic(&self) -> bool {
        matches!(self, ParsedVersion::Semantic(_))
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, ParsedVersion::Opaque { .. })
    }

    pub fn as_semantic(&self) -> Option<&SemanticVersion> {
        match self {
            ParsedVersion::Semantic(v) => Some(v),
            ParsedVersion::Opaque { .. } => None,
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            ParsedVersion::Semantic(v) => &v.raw,
            ParsedVersion::Opaque { raw } => raw,
        }
    }

    /// Whether two versions belong to the same tag space
    pub fn same_kind(&self, other: &ParsedVersion) -> bool {
        self.is_semantic() == other.is_semantic()
    }
}

/// Classify a tag. Never fails: anything that is not a semantic version,
/// including components too large for `u64`, becomes `Opaque`.
pub fn parse(tag: &str) -> ParsedVersion {
    let semantic = SEMANTIC_TAG.captures(tag).and_then(|caps| {
        let major = caps[1].parse().ok()?;
        let minor = caps[2].parse().ok()?;
        let patch = match caps.get(3) {
            Some(patch) => patch.as_str().parse().ok()?,
            None => 0,
        };
        Some(SemanticVersion {
            major,
            minor,
            patch,
            raw: tag.to_string(),
        })
    });

    match semantic {
        Some(version) => ParsedVersion::Semantic(version),
        None => ParsedVersion::Opaque {
            raw: tag.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("1.2.3", (1, 2, 3))]
    #[case("v1.2.3", (1, 2, 3))]
    #[case("1.2.3-alpine", (1, 2, 3))]
    #[case("v10.0.1+build.7", (10, 0, 1))]
    #[case("2.0.0.1", (2, 0, 0))]
    #[case("0.0.0", (0, 0, 0))]
    #[case("16.2", (16, 2, 0))]
    #[case("v3.4-alpine", (3, 4, 0))]
    fn parse_recognizes_semantic_tags(#[case] tag: &str, #[case] expected: (u64, u64, u64)) {
        let parsed = parse(tag);
        assert_eq!(parsed.as_semantic().map(|v| v.triple()), Some(expected));
        assert_eq!(parsed.raw(), tag);
    }

    #[rstest]
    #[case("abc1234")]
    #[case("latest")]
    #[case("v1")]
    #[case("1")]
    #[case("1.2.")]
    #[case("")]
    #[case("1.2.x")]
    #[case("release-1.2.3")]
    #[case("99999999999999999999999.0.0")]
    fn parse_treats_everything_else_as_opaque(#[case] tag: &str) {
        assert_eq!(
            parse(tag),
            ParsedVersion::Opaque {
                raw: tag.to_string()
            }
        );
    }

    #[test]
    fn missing_patch_equals_zero_patch() {
        assert_eq!(parse("16.2"), parse("16.2.0"));
        assert!(parse("16.10").as_semantic().unwrap() > parse("16.2.9").as_semantic().unwrap());
    }

    #[test]
    fn v_prefix_and_qualifier_normalize_to_same_value() {
        assert_eq!(parse("v1.2.3"), parse("1.2.3"));
        assert_eq!(parse("1.2.3-slim"), parse("1.2.3"));
    }

    #[test]
    fn semantic_ordering_follows_numeric_components() {
        let v200 = parse("2.0.0");
        let v199 = parse("1.9.9");
        let v190 = parse("1.9.0");
        let (a, b, c) = (
            v200.as_semantic().unwrap(),
            v199.as_semantic().unwrap(),
            v190.as_semantic().unwrap(),
        );
        assert!(a > b);
        assert!(b > c);
        assert!(parse("1.10.0").as_semantic().unwrap() > b);
    }

    proptest! {
        #[test]
        fn parse_is_total_and_deterministic(tag in ".*") {
            prop_assert_eq!(parse(&tag), parse(&tag));
            let parsed = parse(&tag);
            prop_assert_eq!(parsed.raw(), tag.as_str());
        }

        #[test]
        fn parse_round_trips_numeric_triples(major in 0u64..10_000, minor in 0u64..10_000, patch in 0u64..10_000) {
            let tag = format!("v{}.{}.{}", major, minor, patch);
            let parsed = parse(&tag);
            prop_assert_eq!(parsed.as_semantic().map(|v| v.triple()), Some((major, minor, patch)));
        }
    }
}
