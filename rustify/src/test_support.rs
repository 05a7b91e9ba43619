//! Scripted doubles for the completion client and the toolchain.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::history::Role;
use crate::core::types::Language;
use crate::io::client::{ClientError, CompletionClient, CompletionOptions, Prompt, PromptShape};
use crate::io::toolchain::{StepResult, Toolchain};

/// Completion client that replays queued replies and records every prompt.
pub struct ScriptedClient {
    shape: PromptShape,
    replies: RefCell<VecDeque<Result<String, ClientError>>>,
    prompts: RefCell<Vec<Prompt>>,
}

impl ScriptedClient {
    pub fn new(shape: PromptShape) -> Self {
        Self {
            shape,
            replies: RefCell::new(VecDeque::new()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Chat-style backend replying with `replies` in order.
    pub fn messages<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::new(PromptShape::Messages);
        for reply in replies {
            client.push_reply(reply);
        }
        client
    }

    /// Single-prompt backend replying with `replies` in order.
    pub fn text<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::new(PromptShape::Text);
        for reply in replies {
            client.push_reply(reply);
        }
        client
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.borrow_mut().push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, err: ClientError) {
        self.replies.borrow_mut().push_back(Err(err));
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }

    /// Text of the newest user message in the newest prompt.
    pub fn last_user_message(&self) -> Option<String> {
        match self.prompts.borrow().last()? {
            Prompt::Text(text) => Some(text.clone()),
            Prompt::Messages(messages) => messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone()),
        }
    }
}

impl CompletionClient for ScriptedClient {
    fn shape(&self, _backend: &str) -> Result<PromptShape, ClientError> {
        Ok(self.shape)
    }

    fn complete(
        &self,
        backend: &str,
        prompt: &Prompt,
        _options: &CompletionOptions,
    ) -> Result<String, ClientError> {
        self.prompts.borrow_mut().push(prompt.clone());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ClientError::Transport {
                    backend: backend.to_string(),
                    message: "scripted client has no replies left".to_string(),
                })
            })
    }
}

/// Toolchain that replays queued compile and run results.
pub struct ScriptedToolchain {
    language: Language,
    compiles: RefCell<VecDeque<StepResult>>,
    runs: RefCell<VecDeque<StepResult>>,
    compile_calls: Cell<usize>,
    run_calls: Cell<usize>,
    stdin_paths: RefCell<Vec<Option<PathBuf>>>,
}

impl ScriptedToolchain {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            compiles: RefCell::new(VecDeque::new()),
            runs: RefCell::new(VecDeque::new()),
            compile_calls: Cell::new(0),
            run_calls: Cell::new(0),
            stdin_paths: RefCell::new(Vec::new()),
        }
    }

    pub fn compile_ok(self) -> Self {
        self.compiles.borrow_mut().push_back(StepResult::success(""));
        self
    }

    pub fn compile_err(self, stderr: &str) -> Self {
        self.compiles
            .borrow_mut()
            .push_back(StepResult::failure(stderr));
        self
    }

    pub fn run_ok(self, stdout: &str) -> Self {
        self.runs.borrow_mut().push_back(StepResult::success(stdout));
        self
    }

    pub fn run_err(self, stderr: &str) -> Self {
        self.runs.borrow_mut().push_back(StepResult::failure(stderr));
        self
    }

    pub fn compile_calls(&self) -> usize {
        self.compile_calls.get()
    }

    pub fn run_calls(&self) -> usize {
        self.run_calls.get()
    }

    pub fn stdin_paths(&self) -> Vec<Option<PathBuf>> {
        self.stdin_paths.borrow().clone()
    }
}

impl Toolchain for ScriptedToolchain {
    fn language(&self) -> Language {
        self.language
    }

    fn compile(&self, source: &Path) -> Result<StepResult> {
        self.compile_calls.set(self.compile_calls.get() + 1);
        self.compiles
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted compile result for {}", source.display()))
    }

    fn run(&self, executable: &Path, stdin_path: Option<&Path>) -> Result<StepResult> {
        self.run_calls.set(self.run_calls.get() + 1);
        self.stdin_paths
            .borrow_mut()
            .push(stdin_path.map(Path::to_path_buf));
        self.runs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted run result for {}", executable.display()))
    }
}

/// Reply carrying a `[MODIFIED_CODE]` block.
pub fn modified_code_reply(code: &str) -> String {
    format!("[ANALYSIS]\nscripted fix\n\n[MODIFIED_CODE]\n```rust\n{code}\n```\n")
}

/// Reply carrying `[RUST_CODE]` and, optionally, `[TOML]` blocks.
pub fn conversion_reply(code: &str, manifest: Option<&str>) -> String {
    let mut reply = format!("[RUST_CODE]\n```rust\n{code}\n```\n");
    if let Some(manifest) = manifest {
        reply.push_str(&format!("\n[TOML]\n```toml\n{manifest}\n```\n"));
    }
    reply
}

/// Scratch directory holding a C++ reference and a Rust candidate.
pub struct Workspace {
    dir: TempDir,
    pub reference: PathBuf,
    pub candidate: PathBuf,
}

impl Workspace {
    pub fn new(reference_source: &str, candidate_source: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let reference = dir.path().join("example.cpp");
        let candidate = dir.path().join("output").join("example.rs");
        fs::create_dir_all(dir.path().join("output")).expect("create output dir");
        fs::write(&reference, reference_source).expect("write reference");
        fs::write(&candidate, candidate_source).expect("write candidate");
        Self {
            dir,
            reference,
            candidate,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `name` under the workspace.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).expect("write workspace file");
        path
    }

    pub fn candidate_source(&self) -> String {
        fs::read_to_string(&self.candidate).expect("read candidate")
    }
}
