//! Shared deterministic types for the verify/repair cycle.
//!
//! These types are the contract between the toolchain oracle, the repair loop and
//! the session log. They carry no I/O and serialize to stable JSON.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source language of a program under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Cpp,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Cpp => "cpp",
        }
    }

    /// Human-readable name used in prompts and diagnostics.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Rust => "Rust",
            Self::Cpp => "C++",
        }
    }

    pub fn source_extension(self) -> &'static str {
        match self {
            Self::Rust => "rs",
            Self::Cpp => "cpp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Stage of a verification cycle that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Compile,
    Run,
    Compare,
}

/// Failure classes that drive repair-prompt construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    CompileError,
    RuntimeError,
    OutputMismatch,
}

impl FailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CompileError => "compile_error",
            Self::RuntimeError => "runtime_error",
            Self::OutputMismatch => "output_mismatch",
        }
    }

    /// Stage at which this class of failure is detected.
    pub fn stage(self) -> Stage {
        match self {
            Self::CompileError => Stage::Compile,
            Self::RuntimeError => Stage::Run,
            Self::OutputMismatch => Stage::Compare,
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one compile/run/compare cycle.
///
/// `diagnostic` is present iff the outcome failed, and holds the tool output
/// verbatim (or, for `compare`, a report embedding both outputs verbatim).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub stage: Stage,
    pub passed: bool,
    pub captured_output: String,
    pub diagnostic: Option<String>,
}

impl VerificationOutcome {
    pub fn pass(stage: Stage, captured_output: impl Into<String>) -> Self {
        Self {
            stage,
            passed: true,
            captured_output: captured_output.into(),
            diagnostic: None,
        }
    }

    pub fn fail(
        stage: Stage,
        captured_output: impl Into<String>,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            passed: false,
            captured_output: captured_output.into(),
            diagnostic: Some(diagnostic.into()),
        }
    }

    /// Failure class implied by a failed outcome's stage.
    pub fn failure_class(&self) -> Option<FailureClass> {
        if self.passed {
            return None;
        }
        Some(match self.stage {
            Stage::Compile => FailureClass::CompileError,
            Stage::Run => FailureClass::RuntimeError,
            Stage::Compare => FailureClass::OutputMismatch,
        })
    }

    pub fn diagnostic_text(&self) -> &str {
        self.diagnostic.as_deref().unwrap_or_default()
    }
}

/// One repair iteration: the failure that triggered it and the code it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairAttempt {
    /// Attempt number (1-indexed, bounded by `max_retry`).
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub failure_class: FailureClass,
    pub outcome: VerificationOutcome,
    /// Prompt sent to the model for this attempt.
    pub prompt: String,
    /// Candidate source accepted from the model.
    pub new_code: String,
}

/// Why a repair session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Candidate output matched the reference.
    Converged,
    /// `max_retry` attempts were consumed without convergence.
    Exhausted,
    /// The reference program failed to build or run.
    ReferenceBroken,
    /// The model reply had no extractable code block.
    ResponseParse,
    /// The model backend was unreachable after client retries.
    Transport,
    /// The model backend rejected the call (configuration or HTTP error).
    Backend,
    /// Cancellation was requested between attempts.
    Cancelled,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::Exhausted => "exhausted",
            Self::ReferenceBroken => "reference_broken",
            Self::ResponseParse => "response_parse_error",
            Self::Transport => "transport_error",
            Self::Backend => "backend_error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of `diagnose_and_fix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub success: bool,
    pub stop: StopReason,
    /// Candidate output on success, otherwise a description of the failure.
    pub detail: String,
    /// Diagnostic of the last failed verification, if any.
    pub last_diagnostic: Option<String>,
    /// Number of verification cycles run (the converging one included).
    pub verifications: u32,
    pub attempts: Vec<RepairAttempt>,
    pub duration_ms: u64,
}

impl RepairReport {
    /// Number of repair attempts that produced a new candidate.
    pub fn attempts_used(&self) -> u32 {
        self.attempts.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_class_follows_stage() {
        let compile = VerificationOutcome::fail(Stage::Compile, "", "error[E0425]");
        let run = VerificationOutcome::fail(Stage::Run, "", "panicked");
        let compare = VerificationOutcome::fail(Stage::Compare, "2", "mismatch");
        let pass = VerificationOutcome::pass(Stage::Compare, "6");

        assert_eq!(compile.failure_class(), Some(FailureClass::CompileError));
        assert_eq!(run.failure_class(), Some(FailureClass::RuntimeError));
        assert_eq!(compare.failure_class(), Some(FailureClass::OutputMismatch));
        assert_eq!(pass.failure_class(), None);
        assert_eq!(pass.diagnostic_text(), "");
    }

    #[test]
    fn failure_class_serializes_snake_case() {
        let json = serde_json::to_string(&FailureClass::OutputMismatch).expect("serialize");
        assert_eq!(json, "\"output_mismatch\"");
        assert_eq!(FailureClass::CompileError.stage(), Stage::Compile);
    }
}
