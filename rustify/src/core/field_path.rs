//! Typed paths into JSON responses, e.g. `choices[0].message.content`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "[{index}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldPathError {
    #[error("invalid field path `{path}`: {reason}")]
    Invalid { path: String, reason: String },
    #[error("field `{path}` missing: no `{segment}` after `{resolved}`")]
    Missing {
        path: String,
        segment: String,
        resolved: String,
    },
    #[error("field `{path}` is not a string")]
    NotText { path: String },
}

/// Dotted key path with `[n]` array indexes, parsed once at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Walk `value` along the path, failing on the first absent segment.
    pub fn lookup<'v>(&self, value: &'v Value) -> Result<&'v Value, FieldPathError> {
        let mut current = value;
        for (depth, segment) in self.segments.iter().enumerate() {
            let next = match segment {
                Segment::Key(key) => current.get(key.as_str()),
                Segment::Index(index) => current.get(*index),
            };
            current = next.ok_or_else(|| FieldPathError::Missing {
                path: self.raw.clone(),
                segment: segment.to_string(),
                resolved: render(&self.segments[..depth]),
            })?;
        }
        Ok(current)
    }

    pub fn lookup_str<'v>(&self, value: &'v Value) -> Result<&'v str, FieldPathError> {
        self.lookup(value)?
            .as_str()
            .ok_or_else(|| FieldPathError::NotText {
                path: self.raw.clone(),
            })
    }
}

fn render(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return "<root>".to_string();
    }
    let mut out = String::new();
    for segment in segments {
        if matches!(segment, Segment::Key(_)) && !out.is_empty() {
            out.push('.');
        }
        out.push_str(&segment.to_string());
    }
    out
}

impl FromStr for FieldPath {
    type Err = FieldPathError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| FieldPathError::Invalid {
            path: raw.to_string(),
            reason: reason.to_string(),
        };
        if raw.trim().is_empty() {
            return Err(invalid("path is empty"));
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            let (key, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if key.is_empty() && (rest.is_empty() || !segments.is_empty()) {
                return Err(invalid("empty key segment"));
            }
            if !key.is_empty() {
                if key.contains(']') {
                    return Err(invalid("unbalanced `]`"));
                }
                segments.push(Segment::Key(key.to_string()));
            }
            while !rest.is_empty() {
                let Some(inner) = rest.strip_prefix('[') else {
                    return Err(invalid("unexpected text after index"));
                };
                let Some(close) = inner.find(']') else {
                    return Err(invalid("unclosed `[`"));
                };
                let index = inner[..close]
                    .parse::<usize>()
                    .map_err(|_| invalid("index must be a non-negative integer"))?;
                segments.push(Segment::Index(index));
                rest = &inner[close + 1..];
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }
}

impl TryFrom<String> for FieldPath {
    type Error = FieldPathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.raw
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> FieldPath {
        raw.parse().expect("valid path")
    }

    #[test]
    fn parses_keys_and_indexes() {
        assert_eq!(
            path("choices[0].message.content").segments(),
            &[
                Segment::Key("choices".to_string()),
                Segment::Index(0),
                Segment::Key("message".to_string()),
                Segment::Key("content".to_string()),
            ]
        );
        assert_eq!(
            path("[1][2]").segments(),
            &[Segment::Index(1), Segment::Index(2)]
        );
    }

    #[test]
    fn rejects_malformed_paths() {
        for raw in ["", "a..b", "a[", "a[x]", "a[0]b", "a.[0]", "a]"] {
            assert!(raw.parse::<FieldPath>().is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn lookup_resolves_chat_completion_content() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "hi"}}]});
        assert_eq!(
            path("choices[0].message.content").lookup_str(&body),
            Ok("hi")
        );
    }

    #[test]
    fn lookup_reports_first_missing_segment() {
        let body = json!({"choices": []});
        let err = path("choices[0].message.content")
            .lookup(&body)
            .expect_err("missing index");
        assert_eq!(
            err,
            FieldPathError::Missing {
                path: "choices[0].message.content".to_string(),
                segment: "[0]".to_string(),
                resolved: "choices".to_string(),
            }
        );
    }

    #[test]
    fn lookup_str_rejects_non_strings() {
        let body = json!({"response": 3});
        assert!(matches!(
            path("response").lookup_str(&body),
            Err(FieldPathError::NotText { .. })
        ));
    }

    #[test]
    fn round_trips_through_serde_as_string() {
        let parsed: FieldPath = serde_json::from_value(json!("a.b[2]")).expect("deserialize");
        assert_eq!(parsed.as_str(), "a.b[2]");
        assert!(serde_json::from_value::<FieldPath>(json!("a[")).is_err());
    }
}
