//! One-shot (or instruction-guided) C++ to Rust translation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::agent::{Agent, preview};
use crate::core::extract::{ExtractSpec, ParseError, extract};
use crate::io::artifacts::{source_text, write_atomic};
use crate::io::client::{ClientError, CompletionOptions};
use crate::io::prompt::PromptEngine;

const ANNOTATION_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("read reference {}", path.display())]
    ReadReference {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("render conversion prompt")]
    Prompt(#[from] minijinja::Error),
    #[error(transparent)]
    Backend(#[from] ClientError),
    #[error("completion has no Rust code")]
    NoCode(#[from] ParseError),
    #[error("write {}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Artifacts produced by a conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converted {
    pub code: String,
    pub manifest: Option<String>,
    pub code_path: PathBuf,
    /// Set only when the reply carried a manifest.
    pub manifest_path: Option<PathBuf>,
    pub warnings: Vec<String>,
}

/// Paths a conversion reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionTarget {
    pub reference_path: PathBuf,
    pub code_path: PathBuf,
    pub manifest_path: PathBuf,
}

pub struct Converter<'a> {
    agent: Agent<'a>,
    prompts: PromptEngine,
    target: ConversionTarget,
    options: CompletionOptions,
}

impl<'a> Converter<'a> {
    pub fn new(agent: Agent<'a>, target: ConversionTarget) -> Self {
        Self {
            agent,
            prompts: PromptEngine::new(),
            target,
            options: CompletionOptions::new(2000, 0.2),
        }
    }

    pub fn target(&self) -> &ConversionTarget {
        &self.target
    }

    /// Translate the reference program and persist the Rust source and manifest.
    #[instrument(skip_all, fields(reference = %self.target.reference_path.display()))]
    pub fn convert(&mut self, instruction: Option<&str>) -> Result<Converted, ConversionError> {
        let reference_path = &self.target.reference_path;
        let reference = fs::read_to_string(reference_path).map_err(|source| {
            ConversionError::ReadReference {
                path: reference_path.clone(),
                source,
            }
        })?;

        let prompt = self
            .prompts
            .render_convert(reference_path, &reference, instruction)?;
        let reply = self.agent.chat(&prompt, &self.options)?;
        let extracted = extract(&reply, &ExtractSpec::CONVERSION)?;
        for warning in &extracted.warnings {
            warn!(warning = %warning, "conversion reply incomplete");
        }

        persist(&self.target.code_path, &extracted.code)?;
        let manifest_path = match &extracted.auxiliary {
            Some(manifest) => {
                persist(&self.target.manifest_path, manifest)?;
                Some(self.target.manifest_path.clone())
            }
            None => None,
        };

        self.agent.annotate(format!(
            "Previously generated Rust code:\n{}",
            preview(&extracted.code, ANNOTATION_PREVIEW_CHARS)
        ));
        info!(
            code_path = %self.target.code_path.display(),
            manifest = manifest_path.is_some(),
            "conversion saved"
        );

        Ok(Converted {
            code: extracted.code,
            manifest: extracted.auxiliary,
            code_path: self.target.code_path.clone(),
            manifest_path,
            warnings: extracted.warnings,
        })
    }
}

fn persist(path: &Path, contents: &str) -> Result<(), ConversionError> {
    write_atomic(path, &source_text(contents)).map_err(|source| ConversionError::Persist {
        path: path.to_path_buf(),
        source,
    })
}
