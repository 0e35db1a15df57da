//! Label sets and the label-block parser.
//!
//! A [`LabelSet`] is ordered by key, so two sets holding the same pairs
//! compare, hash, and print identically no matter which order the pairs
//! were written in on the wire.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::ParseError;

/// One `key="value"` pair followed by its terminator, anchored at the cursor.
static LABEL_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^([a-zA-Z_][a-zA-Z0-9_]*)="([^"]*)"([,}])"#).expect("label pair regex is valid")
});

/// Longest fragment quoted back in a [`ParseError::MalformedLabelSet`].
const FRAGMENT_LEN: usize = 32;

/// A set of label pairs with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    /// Creates an empty label set.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Inserts a pair, rejecting a key that is already present.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::DuplicateLabelKey`] if `key` is already in the set.
    pub fn try_insert(&mut self, key: &str, value: &str) -> Result<(), ParseError> {
        match self.0.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(value.to_string());
                Ok(())
            }
            Entry::Occupied(_) => Err(ParseError::DuplicateLabelKey {
                key: key.to_string(),
            }),
        }
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Number of pairs in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the set has no pairs.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    /// Builds a set from pairs; a repeated key keeps the last value.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}=\"{value}\"")?;
        }
        f.write_str("}")
    }
}

/// Parses a label block, starting just after its opening `{`.
///
/// Consumes pairs up to and including the closing `}` and returns the
/// label set together with whatever text follows the block. `{}` yields an
/// empty set, and a trailing comma before `}` is accepted.
///
/// # Errors
///
/// - [`ParseError::MalformedLabelSet`] if the text stops matching the pair
///   grammar before a closing `}` is found
/// - [`ParseError::DuplicateLabelKey`] if a key repeats
pub fn parse_label_block(text: &str) -> Result<(LabelSet, &str), ParseError> {
    let mut labels = LabelSet::new();
    let mut rest = text;

    loop {
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let caps = LABEL_PAIR
            .captures(rest)
            .ok_or_else(|| malformed(rest))?;
        labels.try_insert(&caps[1], &caps[2])?;

        let consumed = caps.get(0).map_or(rest.len(), |m| m.end());
        let closed = &caps[3] == "}";
        rest = &rest[consumed..];

        if closed {
            return Ok((labels, rest));
        }
    }
}

fn malformed(rest: &str) -> ParseError {
    ParseError::MalformedLabelSet {
        fragment: rest.chars().take(FRAGMENT_LEN).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_pairs() {
        let (labels, rest) = parse_label_block(r#"method="post",code="200"} 1027"#).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get("method"), Some("post"));
        assert_eq!(labels.get("code"), Some("200"));
        assert_eq!(rest, " 1027");
    }

    #[test]
    fn test_parse_empty_block() {
        let (labels, rest) = parse_label_block("} 3").unwrap();
        assert!(labels.is_empty());
        assert_eq!(rest, " 3");
    }

    #[test]
    fn test_trailing_comma_is_accepted() {
        let (labels, _) = parse_label_block(r#"a="1",} 0"#).unwrap();
        assert_eq!(labels.get("a"), Some("1"));
    }

    #[test]
    fn test_values_may_hold_punctuation() {
        let (labels, _) = parse_label_block(r#"path="/api/v1",le="0.5"} 2"#).unwrap();
        assert_eq!(labels.get("path"), Some("/api/v1"));
        assert_eq!(labels.get("le"), Some("0.5"));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = parse_label_block(r#"code="200",code="500"} 1"#).unwrap_err();
        assert_eq!(
            err,
            ParseError::DuplicateLabelKey {
                key: "code".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_blocks_rejected() {
        for block in [
            r#"method=post} 1"#,
            r#"method="post" 1"#,
            r#"1abc="x"} 1"#,
            r#",} 1"#,
            r#"a="1";b="2"} 1"#,
            "",
        ] {
            let err = parse_label_block(block).unwrap_err();
            assert!(
                matches!(err, ParseError::MalformedLabelSet { .. }),
                "expected malformed label set for {block:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_order_independent_equality() {
        let (a, _) = parse_label_block(r#"method="post",code="200"}"#).unwrap();
        let (b, _) = parse_label_block(r#"code="200",method="post"}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_display() {
        let labels: LabelSet = [("method", "post"), ("code", "200")].into_iter().collect();
        assert_eq!(labels.to_string(), r#"{code="200",method="post"}"#);
        assert_eq!(LabelSet::new().to_string(), "{}");
    }
}
