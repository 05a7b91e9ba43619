//! Compile-and-run oracle for candidate and reference programs.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument};

use crate::core::types::Language;
use crate::io::config::ToolchainConfig;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Outcome of one compile or run step.
///
/// On success `text` is the captured stdout. On failure it is the captured stderr
/// (or a description of why the step could not complete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub ok: bool,
    pub text: String,
    pub timed_out: bool,
}

impl StepResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            ok: true,
            text: text.into(),
            timed_out: false,
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            ok: false,
            text: text.into(),
            timed_out: false,
        }
    }
}

/// A compiler plus a way to run what it produces.
pub trait Toolchain {
    fn language(&self) -> Language;

    /// Compile `source` into [`Toolchain::executable_for`]`(source)`.
    fn compile(&self, source: &Path) -> Result<StepResult>;

    /// Run `executable`, feeding the bytes of `stdin_path` verbatim when given.
    fn run(&self, executable: &Path, stdin_path: Option<&Path>) -> Result<StepResult>;

    /// Executable path for a source file: the source path without its extension.
    fn executable_for(&self, source: &Path) -> PathBuf {
        source.with_extension("")
    }
}

/// Toolchain backed by a real compiler process.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    language: Language,
    settings: ToolchainConfig,
}

impl CommandToolchain {
    pub fn new(language: Language, settings: ToolchainConfig) -> Self {
        Self { language, settings }
    }

    fn failure_text(output: &CommandOutput, timeout: Duration) -> String {
        let stderr = output.stderr_text();
        if output.timed_out {
            return format!("timed out after {}s\n{stderr}", timeout.as_secs());
        }
        if stderr.trim().is_empty() {
            return match output.status.code() {
                Some(code) => format!("process exited with status {code}"),
                None => "process terminated by signal".to_string(),
            };
        }
        stderr
    }
}

impl Toolchain for CommandToolchain {
    fn language(&self) -> Language {
        self.language
    }

    #[instrument(skip_all, fields(language = self.language.as_str(), source = %source.display()))]
    fn compile(&self, source: &Path) -> Result<StepResult> {
        let executable = self.executable_for(source);
        let mut cmd = Command::new(&self.settings.compiler);
        cmd.args(&self.settings.args)
            .arg(source)
            .arg("-o")
            .arg(&executable);

        let timeout = Duration::from_secs(self.settings.compile_timeout_secs);
        let output = match run_command_with_timeout(
            cmd,
            None,
            timeout,
            self.settings.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => {
                return Ok(StepResult::failure(format!(
                    "failed to run compiler `{}`: {err:#}",
                    self.settings.compiler
                )));
            }
        };

        debug!(ok = output.success(), "compile finished");
        if output.success() {
            return Ok(StepResult::success(output.stdout_text()));
        }
        Ok(StepResult {
            ok: false,
            text: Self::failure_text(&output, timeout),
            timed_out: output.timed_out,
        })
    }

    #[instrument(skip_all, fields(language = self.language.as_str(), executable = %executable.display()))]
    fn run(&self, executable: &Path, stdin_path: Option<&Path>) -> Result<StepResult> {
        let input = match stdin_path {
            Some(path) => match fs::read(path) {
                Ok(bytes) => Some(bytes),
                Err(_) => {
                    return Ok(StepResult::failure(format!(
                        "Input file not found: {}",
                        path.display()
                    )));
                }
            },
            None => None,
        };

        let timeout = Duration::from_secs(self.settings.run_timeout_secs);
        let output = match run_command_with_timeout(
            Command::new(executable),
            input.as_deref(),
            timeout,
            self.settings.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => {
                return Ok(StepResult::failure(format!(
                    "failed to start {}: {err:#}",
                    executable.display()
                )));
            }
        };

        debug!(ok = output.success(), "run finished");
        if output.success() {
            return Ok(StepResult::success(output.stdout_text()));
        }
        Ok(StepResult {
            ok: false,
            text: Self::failure_text(&output, timeout),
            timed_out: output.timed_out,
        })
    }
}
