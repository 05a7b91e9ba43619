//! Questions about the reference program and its translation.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::agent::Agent;
use crate::io::artifacts::read_optional;
use crate::io::client::{ClientError, CompletionOptions};
use crate::io::prompt::PromptEngine;

#[derive(Debug, Error)]
pub enum ExplainError {
    #[error(
        "nothing to explain: neither {} nor {} exists",
        reference.display(),
        candidate.display()
    )]
    NoSources { reference: PathBuf, candidate: PathBuf },
    #[error("read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("render explain prompt")]
    Prompt(#[from] minijinja::Error),
    #[error(transparent)]
    Backend(#[from] ClientError),
}

/// Answers questions with whichever of the two sources exist on disk.
pub struct Explainer<'a> {
    agent: Agent<'a>,
    prompts: PromptEngine,
    reference_path: PathBuf,
    candidate_path: PathBuf,
    options: CompletionOptions,
}

impl<'a> Explainer<'a> {
    pub fn new(agent: Agent<'a>, reference_path: PathBuf, candidate_path: PathBuf) -> Self {
        Self {
            agent,
            prompts: PromptEngine::new(),
            reference_path,
            candidate_path,
            options: CompletionOptions::new(1000, 0.3),
        }
    }

    /// Both sources are re-read on every question so edits between
    /// questions are visible.
    #[instrument(skip_all)]
    pub fn explain(&mut self, question: &str) -> Result<String, ExplainError> {
        let reference = read_source(&self.reference_path)?;
        let candidate = read_source(&self.candidate_path)?;
        if reference.is_none() && candidate.is_none() {
            return Err(ExplainError::NoSources {
                reference: self.reference_path.clone(),
                candidate: self.candidate_path.clone(),
            });
        }
        debug!(
            reference = reference.is_some(),
            candidate = candidate.is_some(),
            "explaining"
        );

        let prompt = self.prompts.render_explain(
            reference
                .as_deref()
                .map(|src| (self.reference_path.as_path(), src)),
            candidate
                .as_deref()
                .map(|src| (self.candidate_path.as_path(), src)),
            question,
        )?;
        Ok(self.agent.chat(&prompt, &self.options)?)
    }
}

fn read_source(path: &Path) -> Result<Option<String>, ExplainError> {
    read_optional(path).map_err(|source| ExplainError::Read {
        path: path.to_path_buf(),
        source,
    })
}
