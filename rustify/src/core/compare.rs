//! Output comparison policies for candidate vs. reference stdout.

use serde::{Deserialize, Serialize};

/// How candidate and reference stdout are compared.
///
/// `Exact` compares whitespace-trimmed text. `NormalizedWhitespace` also
/// collapses every internal whitespace run. `NumericTolerance` compares
/// whitespace-separated tokens, accepting numeric tokens within `epsilon`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ComparisonPolicy {
    #[default]
    Exact,
    NormalizedWhitespace,
    NumericTolerance { epsilon: f64 },
}

impl ComparisonPolicy {
    pub fn outputs_match(&self, candidate: &str, reference: &str) -> bool {
        match self {
            Self::Exact => candidate.trim() == reference.trim(),
            Self::NormalizedWhitespace => {
                candidate.split_whitespace().eq(reference.split_whitespace())
            }
            Self::NumericTolerance { epsilon } => {
                let left: Vec<&str> = candidate.split_whitespace().collect();
                let right: Vec<&str> = reference.split_whitespace().collect();
                left.len() == right.len()
                    && left
                        .iter()
                        .zip(&right)
                        .all(|(a, b)| tokens_match(a, b, *epsilon))
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::NumericTolerance { epsilon } if !(epsilon.is_finite() && *epsilon >= 0.0) => {
                Err(format!(
                    "comparison epsilon must be a finite non-negative number, got {epsilon}"
                ))
            }
            _ => Ok(()),
        }
    }
}

fn tokens_match(a: &str, b: &str, epsilon: f64) -> bool {
    if a == b {
        return true;
    }
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => (x - y).abs() <= epsilon,
        _ => false,
    }
}
