//! Compile-verify-repair loop.
//!
//! One verification compiles and runs the candidate, then compares its stdout
//! with the reference program's. Every failed verification becomes a repair
//! prompt carrying the verbatim diagnostic; the model's `[MODIFIED_CODE]` block
//! atomically replaces the candidate and the cycle repeats. The loop gives up
//! as soon as the `max_retry`-th fix is written, without verifying it.
//!
//! The reference is built and run only after the candidate has run, so a
//! candidate that fails to compile gets its repair even when the reference is
//! broken. Its output is cached for the rest of the call.
//!
//! Stops that are not convergence are reported, never raised: a broken
//! reference, an unparseable reply, a backend failure, cancellation and
//! exhaustion all end in a [`RepairReport`]. `Err` is reserved for local I/O
//! failures (unreadable candidate, unwritable log).

use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::agent::{Agent, preview};
use crate::cancel::CancelToken;
use crate::core::compare::ComparisonPolicy;
use crate::core::extract::{ExtractSpec, extract};
use crate::core::types::{
    FailureClass, RepairAttempt, RepairReport, Stage, StopReason, VerificationOutcome,
};
use crate::io::artifacts::{source_text, write_atomic};
use crate::io::client::CompletionOptions;
use crate::io::config::RepairConfig;
use crate::io::prompt::{PromptEngine, RepairPromptInput};
use crate::io::run_log::SessionLog;
use crate::io::toolchain::Toolchain;

/// Characters of new code echoed back into the conversation after each attempt.
const ANNOTATION_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct RepairSettings {
    pub max_retry: u32,
    pub comparison: ComparisonPolicy,
    pub options: CompletionOptions,
}

impl RepairSettings {
    pub fn from_config(cfg: &RepairConfig) -> Self {
        Self {
            max_retry: cfg.max_retry,
            comparison: cfg.comparison.clone(),
            ..Self::default()
        }
    }
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            max_retry: 5,
            comparison: ComparisonPolicy::Exact,
            options: CompletionOptions::new(2000, 0.3),
        }
    }
}

/// Inputs to one `diagnose_and_fix` call.
#[derive(Debug, Clone, Copy)]
pub struct RepairRequest<'p> {
    pub candidate_path: &'p Path,
    pub reference_path: &'p Path,
    /// Human guidance appended to every repair prompt.
    pub instruction: Option<&'p str>,
    /// File whose bytes are piped to both programs.
    pub stdin_path: Option<&'p Path>,
}

enum Verdict {
    Converged(String),
    Failed(FailureClass, VerificationOutcome),
    /// The candidate ran but the reference could not be built or run.
    ReferenceBroken(String),
}

struct Stop {
    reason: StopReason,
    detail: String,
}

impl Stop {
    fn new(reason: StopReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Drives candidate verification and model-proposed repairs.
pub struct RepairLoop<'a> {
    agent: Agent<'a>,
    candidate_toolchain: &'a dyn Toolchain,
    reference_toolchain: &'a dyn Toolchain,
    prompts: PromptEngine,
    settings: RepairSettings,
    cancel: CancelToken,
    log: Option<&'a SessionLog>,
}

impl<'a> RepairLoop<'a> {
    pub fn new(
        agent: Agent<'a>,
        candidate_toolchain: &'a dyn Toolchain,
        reference_toolchain: &'a dyn Toolchain,
        settings: RepairSettings,
        cancel: CancelToken,
    ) -> Self {
        Self {
            agent,
            candidate_toolchain,
            reference_toolchain,
            prompts: PromptEngine::new(),
            settings,
            cancel,
            log: None,
        }
    }

    /// Record events and attempts in `log`.
    pub fn with_log(mut self, log: &'a SessionLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn agent(&self) -> &Agent<'a> {
        &self.agent
    }

    /// Verify the candidate and repair it until it matches the reference.
    #[instrument(skip_all, fields(candidate = %request.candidate_path.display(), max_retry = self.settings.max_retry))]
    pub fn diagnose_and_fix(&mut self, request: &RepairRequest<'_>) -> Result<RepairReport> {
        let started = Instant::now();
        let max_retry = self.settings.max_retry;
        let mut attempts: Vec<RepairAttempt> = Vec::new();
        let mut last_diagnostic: Option<String> = None;
        let mut verifications = 0u32;

        self.event(&format!(
            "repair started: candidate={} reference={} max_retry={max_retry}",
            request.candidate_path.display(),
            request.reference_path.display()
        ))?;

        let stop = 'session: {
            let mut reference_output: Option<String> = None;
            loop {
                if self.cancel.is_cancelled() {
                    break 'session Stop::new(
                        StopReason::Cancelled,
                        format!("cancelled after {} attempts", attempts.len()),
                    );
                }

                verifications += 1;
                let attempt_started = Instant::now();
                let started_at = Utc::now();
                let (failure_class, outcome) = match self.verify(request, &mut reference_output)? {
                    Verdict::Converged(output) => {
                        self.event(&format!("verification {verifications}: converged"))?;
                        break 'session Stop::new(StopReason::Converged, output);
                    }
                    Verdict::ReferenceBroken(diagnostic) => {
                        self.event(&format!("verification {verifications}: {diagnostic}"))?;
                        last_diagnostic = Some(diagnostic.clone());
                        break 'session Stop::new(StopReason::ReferenceBroken, diagnostic);
                    }
                    Verdict::Failed(class, outcome) => (class, outcome),
                };
                last_diagnostic = Some(outcome.diagnostic_text().to_string());
                self.event(&format!(
                    "verification {verifications}: {failure_class}\n{}",
                    outcome.diagnostic_text()
                ))?;

                // Ctrl-C also interrupts the candidate, which surfaces as a runtime error.
                if self.cancel.is_cancelled() {
                    break 'session Stop::new(
                        StopReason::Cancelled,
                        format!("cancelled after {} attempts", attempts.len()),
                    );
                }

                let attempt = attempts.len() as u32 + 1;
                info!(attempt, max_retry, %failure_class, "requesting repair");

                let prompt = self.repair_prompt(request, failure_class, &outcome)?;
                let reply = match self.agent.chat(&prompt, &self.settings.options) {
                    Ok(reply) => reply,
                    Err(err) => {
                        warn!(err = %err, attempt, "backend call failed");
                        let reason = if err.is_transient() {
                            StopReason::Transport
                        } else {
                            StopReason::Backend
                        };
                        break 'session Stop::new(reason, err.to_string());
                    }
                };
                let extracted = match extract(&reply, &ExtractSpec::REPAIR) {
                    Ok(extracted) => extracted,
                    Err(err) => {
                        warn!(err = %err, attempt, "reply has no usable code block");
                        break 'session Stop::new(StopReason::ResponseParse, err.to_string());
                    }
                };

                write_atomic(request.candidate_path, &source_text(&extracted.code))
                    .with_context(|| {
                        format!("write candidate {}", request.candidate_path.display())
                    })?;
                self.agent.annotate(format!(
                    "Code produced by repair attempt {attempt}:\n{}",
                    preview(&extracted.code, ANNOTATION_PREVIEW_CHARS)
                ));

                let record = RepairAttempt {
                    attempt,
                    started_at,
                    duration_ms: attempt_started.elapsed().as_millis() as u64,
                    failure_class,
                    outcome,
                    prompt,
                    new_code: extracted.code,
                };
                if let Some(log) = self.log {
                    log.write_attempt(&record)?;
                }
                attempts.push(record);

                // The last fix is written but never verified.
                if attempt >= max_retry {
                    break 'session Stop::new(
                        StopReason::Exhausted,
                        format!("exhausted after {max_retry} attempts"),
                    );
                }
            }
        };

        let report = RepairReport {
            success: stop.reason == StopReason::Converged,
            stop: stop.reason,
            detail: stop.detail,
            last_diagnostic,
            verifications,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            stop = %report.stop,
            attempts = report.attempts.len(),
            verifications = report.verifications,
            "repair finished"
        );
        self.event(&format!(
            "repair finished: {} after {} attempts",
            report.stop,
            report.attempts.len()
        ))?;
        if let Some(log) = self.log {
            log.write_report(&report)?;
        }
        Ok(report)
    }

    /// Build and run the reference; `Err` carries the failure text.
    fn reference_output(&self, request: &RepairRequest<'_>) -> Result<Result<String, String>> {
        let toolchain = self.reference_toolchain;
        let compiled = toolchain.compile(request.reference_path)?;
        if !compiled.ok {
            return Ok(Err(format!(
                "reference program failed to compile:\n{}",
                compiled.text
            )));
        }
        let executable = toolchain.executable_for(request.reference_path);
        let ran = toolchain.run(&executable, request.stdin_path)?;
        if !ran.ok {
            return Ok(Err(format!("reference program failed to run:\n{}", ran.text)));
        }
        Ok(Ok(ran.text))
    }

    /// Compile, run and compare the candidate. The reference is built only once
    /// the candidate has run, and its output is cached in `reference_output`.
    fn verify(
        &self,
        request: &RepairRequest<'_>,
        reference_output: &mut Option<String>,
    ) -> Result<Verdict> {
        let toolchain = self.candidate_toolchain;
        let compiled = toolchain.compile(request.candidate_path)?;
        if !compiled.ok {
            return Ok(Verdict::Failed(
                FailureClass::CompileError,
                VerificationOutcome::fail(Stage::Compile, "", compiled.text),
            ));
        }

        let executable = toolchain.executable_for(request.candidate_path);
        let ran = toolchain.run(&executable, request.stdin_path)?;
        if !ran.ok {
            return Ok(Verdict::Failed(
                FailureClass::RuntimeError,
                VerificationOutcome::fail(Stage::Run, "", ran.text),
            ));
        }

        if reference_output.is_none() {
            match self.reference_output(request)? {
                Ok(output) => *reference_output = Some(output),
                Err(diagnostic) => return Ok(Verdict::ReferenceBroken(diagnostic)),
            }
        }
        let expected = reference_output.as_deref().unwrap_or_default();
        if self.settings.comparison.outputs_match(&ran.text, expected) {
            return Ok(Verdict::Converged(ran.text));
        }
        let diagnostic = mismatch_report(
            self.candidate_toolchain.language().display_name(),
            &ran.text,
            self.reference_toolchain.language().display_name(),
            expected,
        );
        Ok(Verdict::Failed(
            FailureClass::OutputMismatch,
            VerificationOutcome::fail(Stage::Compare, ran.text, diagnostic),
        ))
    }

    fn repair_prompt(
        &self,
        request: &RepairRequest<'_>,
        failure_class: FailureClass,
        outcome: &VerificationOutcome,
    ) -> Result<String> {
        let candidate = fs::read_to_string(request.candidate_path)
            .with_context(|| format!("read candidate {}", request.candidate_path.display()))?;
        let reference = match failure_class {
            FailureClass::OutputMismatch => Some(
                fs::read_to_string(request.reference_path).with_context(|| {
                    format!("read reference {}", request.reference_path.display())
                })?,
            ),
            _ => None,
        };
        let prompt = self
            .prompts
            .render_repair(&RepairPromptInput {
                failure_class,
                candidate_path: request.candidate_path,
                candidate: &candidate,
                diagnostic: outcome.diagnostic_text(),
                reference: reference
                    .as_deref()
                    .map(|source| (request.reference_path, source)),
                instruction: request.instruction,
            })
            .context("render repair prompt")?;
        Ok(prompt)
    }

    fn event(&self, message: &str) -> Result<()> {
        match self.log {
            Some(log) => log.event(message),
            None => Ok(()),
        }
    }
}

/// Comparison diagnostic embedding both outputs verbatim.
pub fn mismatch_report(
    candidate_label: &str,
    candidate_output: &str,
    reference_label: &str,
    reference_output: &str,
) -> String {
    format!(
        "Output mismatch.\n--- {candidate_label} output ---\n{candidate_output}\n--- {reference_label} output ---\n{reference_output}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Language;
    use crate::test_support::{ScriptedClient, ScriptedToolchain, modified_code_reply};

    struct Fixture {
        _dir: tempfile::TempDir,
        candidate: std::path::PathBuf,
        reference: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let candidate = dir.path().join("main.rs");
        let reference = dir.path().join("main.cpp");
        fs::write(&candidate, "fn main() {}\n").expect("write candidate");
        fs::write(&reference, "int main() {}\n").expect("write reference");
        Fixture {
            _dir: dir,
            candidate,
            reference,
        }
    }

    #[test]
    fn mismatch_report_contains_both_outputs() {
        let report = mismatch_report("Rust", "2\n", "C++", "6\n");
        assert!(report.contains("--- Rust output ---\n2\n"));
        assert!(report.contains("--- C++ output ---\n6\n"));
    }

    #[test]
    fn cancelled_token_stops_before_any_work() {
        let fx = fixture();
        let client = ScriptedClient::messages(Vec::<String>::new());
        let rust = ScriptedToolchain::new(Language::Rust);
        let cpp = ScriptedToolchain::new(Language::Cpp);
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut repair = RepairLoop::new(
            Agent::new(&client, "scripted", "sys", 4),
            &rust,
            &cpp,
            RepairSettings::default(),
            cancel,
        );
        let report = repair
            .diagnose_and_fix(&RepairRequest {
                candidate_path: &fx.candidate,
                reference_path: &fx.reference,
                instruction: None,
                stdin_path: None,
            })
            .expect("report");

        assert_eq!(report.stop, StopReason::Cancelled);
        assert_eq!(rust.compile_calls() + cpp.compile_calls(), 0);
    }

    #[test]
    fn runtime_error_prompt_carries_stderr() {
        let fx = fixture();
        let client = ScriptedClient::messages([modified_code_reply("fn main() { println!(\"6\"); }")]);
        let rust = ScriptedToolchain::new(Language::Rust)
            .compile_ok()
            .run_err("thread 'main' panicked at src/main.rs:2:5:\nindex out of bounds")
            .compile_ok()
            .run_ok("6\n");
        let cpp = ScriptedToolchain::new(Language::Cpp).compile_ok().run_ok("6\n");

        let mut repair = RepairLoop::new(
            Agent::new(&client, "scripted", "sys", 4),
            &rust,
            &cpp,
            RepairSettings::default(),
            CancelToken::new(),
        );
        let report = repair
            .diagnose_and_fix(&RepairRequest {
                candidate_path: &fx.candidate,
                reference_path: &fx.reference,
                instruction: None,
                stdin_path: None,
            })
            .expect("report");

        assert!(report.success);
        assert_eq!(report.attempts[0].failure_class, FailureClass::RuntimeError);
        let prompt = client.last_user_message().expect("prompt");
        assert!(prompt.contains("thread 'main' panicked at src/main.rs:2:5:\nindex out of bounds"));
        assert!(!prompt.contains("int main()"));
    }

    #[test]
    fn transport_failure_stops_with_structured_report() {
        let fx = fixture();
        let client = ScriptedClient::messages(Vec::<String>::new());
        let rust = ScriptedToolchain::new(Language::Rust).compile_err("error: expected `;`");
        let cpp = ScriptedToolchain::new(Language::Cpp).compile_ok().run_ok("6\n");

        let mut repair = RepairLoop::new(
            Agent::new(&client, "scripted", "sys", 4),
            &rust,
            &cpp,
            RepairSettings::default(),
            CancelToken::new(),
        );
        let report = repair
            .diagnose_and_fix(&RepairRequest {
                candidate_path: &fx.candidate,
                reference_path: &fx.reference,
                instruction: None,
                stdin_path: None,
            })
            .expect("report");

        assert!(!report.success);
        assert_eq!(report.stop, StopReason::Transport);
        assert_eq!(report.last_diagnostic.as_deref(), Some("error: expected `;`"));
        assert!(report.attempts.is_empty());
    }

    #[test]
    fn permanent_backend_error_is_not_a_transport_stop() {
        let fx = fixture();
        let client = ScriptedClient::messages(Vec::<String>::new());
        client.push_error(crate::io::client::ClientError::HttpStatus {
            backend: "scripted".to_string(),
            status: 401,
            body: "invalid api key".to_string(),
        });
        let rust = ScriptedToolchain::new(Language::Rust).compile_err("error: expected `;`");
        let cpp = ScriptedToolchain::new(Language::Cpp).compile_ok().run_ok("6\n");

        let mut repair = RepairLoop::new(
            Agent::new(&client, "scripted", "sys", 4),
            &rust,
            &cpp,
            RepairSettings::default(),
            CancelToken::new(),
        );
        let report = repair
            .diagnose_and_fix(&RepairRequest {
                candidate_path: &fx.candidate,
                reference_path: &fx.reference,
                instruction: None,
                stdin_path: None,
            })
            .expect("report");

        assert_eq!(report.stop, StopReason::Backend);
        assert!(report.detail.contains("401"));
        assert_eq!(client.calls(), 1);
    }

    /// Cancels the token while the candidate is running, as Ctrl-C does.
    struct InterruptedRun<'t> {
        inner: &'t ScriptedToolchain,
        cancel: CancelToken,
    }

    impl Toolchain for InterruptedRun<'_> {
        fn language(&self) -> Language {
            self.inner.language()
        }

        fn compile(&self, source: &Path) -> Result<crate::io::toolchain::StepResult> {
            self.inner.compile(source)
        }

        fn run(
            &self,
            executable: &Path,
            stdin_path: Option<&Path>,
        ) -> Result<crate::io::toolchain::StepResult> {
            self.cancel.cancel();
            self.inner.run(executable, stdin_path)
        }
    }

    #[test]
    fn interrupt_during_run_stops_before_the_model_call() {
        let fx = fixture();
        let client = ScriptedClient::messages([modified_code_reply("fn main() { println!(\"6\"); }")]);
        let rust = ScriptedToolchain::new(Language::Rust)
            .compile_ok()
            .run_err("terminated by signal 2");
        let cpp = ScriptedToolchain::new(Language::Cpp).compile_ok().run_ok("6\n");
        let cancel = CancelToken::new();
        let interrupted = InterruptedRun {
            inner: &rust,
            cancel: cancel.clone(),
        };

        let mut repair = RepairLoop::new(
            Agent::new(&client, "scripted", "sys", 4),
            &interrupted,
            &cpp,
            RepairSettings::default(),
            cancel,
        );
        let report = repair
            .diagnose_and_fix(&RepairRequest {
                candidate_path: &fx.candidate,
                reference_path: &fx.reference,
                instruction: None,
                stdin_path: None,
            })
            .expect("report");

        assert_eq!(report.stop, StopReason::Cancelled);
        assert_eq!(report.verifications, 1);
        assert!(report.attempts.is_empty());
        assert_eq!(client.calls(), 0);
        assert_eq!(fs::read_to_string(&fx.candidate).expect("candidate"), "fn main() {}\n");
    }
}
