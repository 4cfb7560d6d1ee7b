//! npm-style version ranges on top of the `semver` crate.
//!
//! Shared-dependency declarations come from JavaScript package manifests, so
//! ranges use npm syntax: a bare version is an exact match, conjunctions are
//! space separated, `||` separates alternatives, and `a - b` is an inclusive
//! hyphen range. Each alternative is translated into a [`semver::VersionReq`].

use crate::error::{FederationError, FederationResult};
use semver::{Version, VersionReq};
use std::fmt;

/// Parse a version leniently: a leading `v` is ignored and missing minor or
/// patch components default to zero.
pub fn parse_version(input: &str) -> FederationResult<Version> {
    let trimmed = input.trim().trim_start_matches(['v', 'V', '=']);
    if let Ok(version) = Version::parse(trimmed) {
        return Ok(version);
    }

    // Pad "1" and "1.2" out to a full triple, keeping any pre-release/build suffix.
    let split = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(FederationError::InvalidVersion(input.to_string()));
    }
    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(suffix);

    Version::parse(&padded).map_err(|_| FederationError::InvalidVersion(input.to_string()))
}

/// A parsed npm-style version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    /// Parse a range such as `^1.2.0`, `>=1.0.0 <2.0.0 || 3.x` or `1.0.0 - 1.4`.
    pub fn parse(input: &str) -> FederationResult<Self> {
        let mut alternatives = Vec::new();
        for alternative in input.split("||") {
            let translated = translate_alternative(alternative)
                .ok_or_else(|| FederationError::InvalidVersion(input.to_string()))?;
            let req = VersionReq::parse(&translated)
                .map_err(|e| FederationError::InvalidVersion(format!("{input}: {e}")))?;
            alternatives.push(req);
        }

        Ok(Self {
            raw: input.trim().to_string(),
            alternatives,
        })
    }

    /// The range matching every version.
    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            alternatives: vec![VersionReq::STAR],
        }
    }

    /// Check whether `version` satisfies any alternative of this range.
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// Parse `version` leniently and test it. Unparsable versions never match.
    pub fn matches_str(&self, version: &str) -> bool {
        parse_version(version)
            .map(|v| self.matches(&v))
            .unwrap_or(false)
    }

    /// The range as originally written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Translate one `||` alternative into `semver` comparator syntax.
fn translate_alternative(alternative: &str) -> Option<String> {
    let tokens = tokenize(alternative);
    if tokens.is_empty() {
        return Some("*".to_string());
    }

    // Hyphen range: `a - b` means `>=a, <=b`.
    if tokens.len() == 3 && tokens[1] == "-" {
        return Some(format!(
            ">={}, <={}",
            normalize_partial(&tokens[0])?,
            normalize_partial(&tokens[2])?
        ));
    }

    let mut comparators = Vec::with_capacity(tokens.len());
    for token in tokens {
        comparators.push(translate_comparator(&token)?);
    }
    Some(comparators.join(", "))
}

/// Split on whitespace, gluing a dangling operator (`>= 1.0.0`) to its operand.
fn tokenize(alternative: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_op: Option<String> = None;

    for word in alternative.split_whitespace() {
        if is_operator(word) {
            pending_op = Some(word.to_string());
            continue;
        }
        match pending_op.take() {
            Some(op) => tokens.push(format!("{op}{word}")),
            None => tokens.push(word.to_string()),
        }
    }

    tokens
}

fn is_operator(word: &str) -> bool {
    matches!(word, ">" | ">=" | "<" | "<=" | "=" | "^" | "~")
}

fn translate_comparator(token: &str) -> Option<String> {
    let op_len = token
        .find(|c: char| !matches!(c, '>' | '<' | '=' | '^' | '~'))
        .unwrap_or(token.len());
    let (op, operand) = token.split_at(op_len);
    let operand = normalize_partial(operand)?;

    if operand == "*" {
        return Some("*".to_string());
    }

    let op = match op {
        // npm treats a bare version as an exact match; `semver` would read it as caret.
        "" | "=" | "==" => "=",
        "~>" => "~",
        ">" | ">=" | "<" | "<=" | "^" | "~" => op,
        _ => return None,
    };
    Some(format!("{op}{operand}"))
}

/// Lowercase wildcards, strip a `v` prefix and cut trailing wildcard parts.
fn normalize_partial(operand: &str) -> Option<String> {
    let operand = operand.trim().trim_start_matches(['v', 'V']);
    if operand.is_empty() || matches!(operand, "*" | "x" | "X" | "latest") {
        return Some("*".to_string());
    }

    let mut parts = Vec::new();
    for part in operand.split('.') {
        if matches!(part, "*" | "x" | "X") {
            break;
        }
        if part.is_empty() {
            return None;
        }
        parts.push(part);
    }

    if parts.is_empty() {
        Some("*".to_string())
    } else {
        Some(parts.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        parse_version(s).unwrap()
    }

    #[test]
    fn test_parse_version_lenient() {
        assert_eq!(v("1.2.3"), Version::new(1, 2, 3));
        assert_eq!(v("v2.0.0"), Version::new(2, 0, 0));
        assert_eq!(v("18"), Version::new(18, 0, 0));
        assert_eq!(v("1.4"), Version::new(1, 4, 0));
        assert!(parse_version("banana").is_err());
        assert!(parse_version("1..2").is_err());
    }

    #[test]
    fn test_bare_version_is_exact() {
        let range = VersionRange::parse("1.2.0").unwrap();
        assert!(range.matches(&v("1.2.0")));
        assert!(!range.matches(&v("1.2.1")));
    }

    #[test]
    fn test_caret_and_tilde() {
        let caret = VersionRange::parse("^1.2.0").unwrap();
        assert!(caret.matches(&v("1.9.0")));
        assert!(!caret.matches(&v("2.0.0")));

        let tilde = VersionRange::parse("~1.2.0").unwrap();
        assert!(tilde.matches(&v("1.2.9")));
        assert!(!tilde.matches(&v("1.3.0")));
    }

    #[test]
    fn test_conjunction_and_disjunction() {
        let range = VersionRange::parse(">=1.0.0 <2.0.0 || >= 3.1").unwrap();
        assert!(range.matches(&v("1.5.0")));
        assert!(!range.matches(&v("2.5.0")));
        assert!(range.matches(&v("3.2.0")));
    }

    #[test]
    fn test_hyphen_range() {
        let range = VersionRange::parse("1.0.0 - 1.4").unwrap();
        assert!(range.matches(&v("1.0.0")));
        assert!(range.matches(&v("1.4.7")));
        assert!(!range.matches(&v("1.5.0")));
    }

    #[test]
    fn test_wildcards() {
        assert!(VersionRange::parse("*").unwrap().matches(&v("0.0.1")));
        assert!(VersionRange::parse("").unwrap().matches(&v("9.9.9")));
        let minor = VersionRange::parse("1.x").unwrap();
        assert!(minor.matches(&v("1.7.2")));
        assert!(!minor.matches(&v("2.0.0")));
    }

    #[test]
    fn test_invalid_range() {
        assert!(VersionRange::parse(">=banana").is_err());
        assert!(VersionRange::parse("!1.0.0").is_err());
    }

    #[test]
    fn test_matches_str_rejects_garbage() {
        let range = VersionRange::any();
        assert!(range.matches_str("1.0.0"));
        assert!(!range.matches_str("not-a-version"));
    }
}
