//! Dotted field paths into JSON records
//!
//! Grammar: segments separated by `.`, each optionally followed by bracketed
//! selectors. `name['key']` and `name["key"]` select an object member whose
//! name may contain dots; `name[3]` selects an array element (or a member
//! named `3` on an object). A trailing `[*]` is accepted and ignored, so
//! `transactions[*]` and `transactions` address the same array.

use crate::error::{Error, Result};
use serde_json::Value;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Compiled path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Compile `raw`, rejecting unbalanced brackets and empty segments
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |why: &str| Error::Config {
            message: format!("invalid field path '{raw}': {why}"),
            key: Some("schema".to_string()),
        };

        let mut segments = Vec::new();
        let mut chars = raw.trim().chars().peekable();
        let mut name = String::new();
        // Set once a `[*]` has been read; nothing may follow it
        let mut wildcard = false;

        while let Some(c) = chars.next() {
            if wildcard {
                return Err(invalid("'[*]' is only allowed at the end"));
            }
            match c {
                '.' => {
                    if !name.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut name)));
                    } else if segments.is_empty() {
                        return Err(invalid("empty segment"));
                    }
                    if chars.peek().is_none_or(|n| *n == '.') {
                        return Err(invalid("empty segment"));
                    }
                }
                '[' => {
                    if !name.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut name)));
                    }
                    let mut inner = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        inner.push(c);
                    }
                    if !closed {
                        return Err(invalid("unclosed '['"));
                    }
                    let inner = inner.trim();
                    if inner == "*" {
                        wildcard = true;
                    } else if let Some(key) = strip_quotes(inner) {
                        segments.push(Segment::Key(key.to_string()));
                    } else if let Ok(index) = inner.parse::<usize>() {
                        segments.push(Segment::Index(index));
                    } else {
                        return Err(invalid("bracket selector must be quoted, numeric or '*'"));
                    }
                }
                ']' => return Err(invalid("unexpected ']'")),
                c => name.push(c),
            }
        }
        if !name.is_empty() {
            segments.push(Segment::Key(name));
        }
        if segments.is_empty() {
            return Err(invalid("empty path"));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Resolve against `value`; `None` when any segment is missing
    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |current, segment| match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key),
                (Segment::Key(key), Value::Array(items)) => {
                    key.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                (Segment::Index(i), Value::Array(items)) => items.get(*i),
                (Segment::Index(i), Value::Object(map)) => map.get(&i.to_string()),
                _ => None,
            })
    }

    /// Path as written in the configuration
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn strip_quotes(s: &str) -> Option<&str> {
    s.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Value {
        json!({
            "isin": "XS0000000001",
            "aggregatedHoldingData": {
                "concentration": 0.5,
                "simpleMovingAverage": {
                    "30": { "concentration": 0.25 },
                    "a.b": "dotted"
                }
            },
            "transactions": [
                { "transactionId": "T1" },
                { "transactionId": "T2" }
            ]
        })
    }

    #[test]
    fn resolves_plain_and_nested_members() {
        let r = record();
        assert_eq!(
            FieldPath::parse("isin").unwrap().get(&r),
            Some(&json!("XS0000000001"))
        );
        assert_eq!(
            FieldPath::parse("aggregatedHoldingData.concentration")
                .unwrap()
                .get(&r),
            Some(&json!(0.5))
        );
    }

    #[test]
    fn resolves_bracketed_keys() {
        let r = record();
        let sma = FieldPath::parse("aggregatedHoldingData.simpleMovingAverage['30'].concentration")
            .unwrap();
        assert_eq!(sma.get(&r), Some(&json!(0.25)));

        let dotted =
            FieldPath::parse(r#"aggregatedHoldingData.simpleMovingAverage["a.b"]"#).unwrap();
        assert_eq!(dotted.get(&r), Some(&json!("dotted")));
    }

    #[test]
    fn resolves_array_indices() {
        let r = record();
        assert_eq!(
            FieldPath::parse("transactions[1].transactionId")
                .unwrap()
                .get(&r),
            Some(&json!("T2"))
        );
        assert_eq!(
            FieldPath::parse("transactions.0.transactionId")
                .unwrap()
                .get(&r),
            Some(&json!("T1"))
        );
        assert_eq!(FieldPath::parse("transactions[5]").unwrap().get(&r), None);
    }

    #[test]
    fn trailing_wildcard_is_ignored() {
        let r = record();
        let with = FieldPath::parse("transactions[*]").unwrap();
        let without = FieldPath::parse("transactions").unwrap();
        assert_eq!(with.get(&r), without.get(&r));
        assert_eq!(with.as_str(), "transactions[*]");
    }

    #[test]
    fn missing_members_resolve_to_none() {
        let r = record();
        assert_eq!(FieldPath::parse("nope").unwrap().get(&r), None);
        assert_eq!(FieldPath::parse("isin.deeper").unwrap().get(&r), None);
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for bad in ["", "a..b", ".a", "a.", "a['x'", "a]", "a[x]", "a[*].b"] {
            assert!(FieldPath::parse(bad).is_err(), "accepted {bad:?}");
        }
    }
}
