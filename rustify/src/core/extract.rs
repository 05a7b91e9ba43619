//! Pull source-code blocks out of model completions.
//!
//! Two encodings are understood. Marker encoding puts a fenced block after a
//! bracketed section marker:
//!
//! ````text
//! [MODIFIED_CODE]
//! ```rust
//! fn main() {}
//! ```
//! ````
//!
//! Structured encoding is a JSON object (bare or inside a ```` ```json ```` fence)
//! with a `code` field, either a string or `{"type": "...", "content": [lines]}`.
//! Structured payloads are validated against
//! `schemas/structured_completion.schema.json` before any field is read.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

const STRUCTURED_SCHEMA: &str =
    include_str!("../../schemas/structured_completion.schema.json");

/// A fenced block: info string in group 1, body in group 2.
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([^\n]*)\n(.*?)```").expect("fenced block regex should be valid")
});
static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```json[^\n]*\n(.*?)```").expect("json fence regex should be valid")
});
static STRUCTURED_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(STRUCTURED_SCHEMA).expect("structured schema should be valid JSON");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("structured schema should compile")
});

/// Where one artifact lives in either encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpec {
    /// Section marker without brackets, e.g. `MODIFIED_CODE`.
    pub marker: &'static str,
    /// Fence info string, e.g. `rust`.
    pub fence: &'static str,
    /// Field name in structured payloads.
    pub json_field: &'static str,
}

/// Primary code block plus an optional secondary artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSpec {
    pub code: BlockSpec,
    pub auxiliary: Option<BlockSpec>,
}

impl ExtractSpec {
    /// Replies to repair prompts.
    pub const REPAIR: Self = Self {
        code: BlockSpec {
            marker: "MODIFIED_CODE",
            fence: "rust",
            json_field: "code",
        },
        auxiliary: None,
    };

    /// Replies to translation prompts: Rust source plus a Cargo manifest.
    pub const CONVERSION: Self = Self {
        code: BlockSpec {
            marker: "RUST_CODE",
            fence: "rust",
            json_field: "code",
        },
        auxiliary: Some(BlockSpec {
            marker: "TOML",
            fence: "toml",
            json_field: "manifest",
        }),
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Markers,
    Structured,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub code: String,
    pub auxiliary: Option<String>,
    /// Non-fatal problems, such as a missing auxiliary artifact.
    pub warnings: Vec<String>,
    pub encoding: Encoding,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no `[{marker}]` block fenced as ```{fence} found in completion")]
    MissingCode {
        marker: &'static str,
        fence: &'static str,
    },
    #[error("structured completion rejected:\n- {}", .0.join("\n- "))]
    InvalidPayload(Vec<String>),
}

/// Extract the artifacts described by `spec` from `completion`.
pub fn extract(completion: &str, spec: &ExtractSpec) -> Result<Extracted, ParseError> {
    if let Some(code) = marker_block(completion, &spec.code) {
        let mut warnings = Vec::new();
        let auxiliary = spec.auxiliary.and_then(|aux| {
            let found = marker_block(completion, &aux);
            if found.is_none() {
                warnings.push(format!("no `[{}]` block found in completion", aux.marker));
            }
            found
        });
        return Ok(Extracted {
            code,
            auxiliary,
            warnings,
            encoding: Encoding::Markers,
        });
    }

    if let Some(payload) = structured_payload(completion) {
        return from_structured(&payload, spec);
    }

    Err(ParseError::MissingCode {
        marker: spec.code.marker,
        fence: spec.code.fence,
    })
}

/// First block fenced as `block.fence` after the first `[marker]`.
fn marker_block(completion: &str, block: &BlockSpec) -> Option<String> {
    let marker = format!("[{}]", block.marker);
    let start = completion.find(&marker)? + marker.len();
    let caps = FENCED_BLOCK
        .captures_iter(&completion[start..])
        .find(|caps| caps[1].starts_with(block.fence))?;
    let body = caps.get(2)?.as_str().trim();
    (!body.is_empty()).then(|| body.to_string())
}

fn structured_payload(completion: &str) -> Option<Value> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return Some(value);
        }
    }
    JSON_FENCE
        .captures_iter(completion)
        .filter_map(|caps| caps.get(1))
        .find_map(|body| serde_json::from_str::<Value>(body.as_str().trim()).ok())
}

fn from_structured(payload: &Value, spec: &ExtractSpec) -> Result<Extracted, ParseError> {
    validate_payload(payload)?;

    let code = match payload.get(spec.code.json_field) {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Object(block)) => match block.get("content") {
            Some(Value::String(text)) => text.trim().to_string(),
            Some(Value::Array(lines)) => lines
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string(),
            _ => String::new(),
        },
        _ => String::new(),
    };
    if code.is_empty() {
        return Err(ParseError::MissingCode {
            marker: spec.code.marker,
            fence: spec.code.fence,
        });
    }

    let mut warnings = Vec::new();
    let auxiliary = spec.auxiliary.and_then(|aux| {
        let found = payload
            .get(aux.json_field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string);
        if found.is_none() {
            warnings.push(format!("structured completion has no `{}` field", aux.json_field));
        }
        found
    });

    Ok(Extracted {
        code,
        auxiliary,
        warnings,
        encoding: Encoding::Structured,
    })
}

fn validate_payload(payload: &Value) -> Result<(), ParseError> {
    let messages: Vec<String> = STRUCTURED_VALIDATOR
        .iter_errors(payload)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(ParseError::InvalidPayload(messages));
    }
    Ok(())
}
