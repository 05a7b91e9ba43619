//! Prompt templates for every agent.
//!
//! Templates are compiled into the binary and rendered with minijinja. Values are
//! inserted verbatim (no escaping), so compiler diagnostics reach the model
//! unmodified.

use std::path::Path;

use minijinja::{Environment, context};

use crate::core::types::FailureClass;

const CONVERT_TEMPLATE: &str = include_str!("prompts/convert.md");
const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");
const EXPLAIN_TEMPLATE: &str = include_str!("prompts/explain.md");
const ROUTE_TEMPLATE: &str = include_str!("prompts/route.md");

pub const CONVERTER_SYSTEM_PROMPT: &str = include_str!("prompts/system_converter.md");
pub const REPAIR_SYSTEM_PROMPT: &str = include_str!("prompts/system_repair.md");
pub const EXPLAINER_SYSTEM_PROMPT: &str = include_str!("prompts/system_explainer.md");
pub const ROUTER_SYSTEM_PROMPT: &str = include_str!("prompts/system_router.md");

/// Inputs for a repair prompt.
#[derive(Debug, Clone, Copy)]
pub struct RepairPromptInput<'a> {
    pub failure_class: FailureClass,
    pub candidate_path: &'a Path,
    pub candidate: &'a str,
    pub diagnostic: &'a str,
    /// Reference source, included for output mismatches.
    pub reference: Option<(&'a Path, &'a str)>,
    pub instruction: Option<&'a str>,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("convert", CONVERT_TEMPLATE)
            .expect("convert template should be valid");
        env.add_template("repair", REPAIR_TEMPLATE)
            .expect("repair template should be valid");
        env.add_template("explain", EXPLAIN_TEMPLATE)
            .expect("explain template should be valid");
        env.add_template("route", ROUTE_TEMPLATE)
            .expect("route template should be valid");
        Self { env }
    }

    pub fn render_convert(
        &self,
        reference_path: &Path,
        reference_source: &str,
        instruction: Option<&str>,
    ) -> Result<String, minijinja::Error> {
        self.env.get_template("convert")?.render(context! {
            reference_path => reference_path.display().to_string(),
            reference_source => reference_source.trim_end(),
            instruction => non_empty(instruction),
        })
    }

    pub fn render_repair(&self, input: &RepairPromptInput<'_>) -> Result<String, minijinja::Error> {
        let (reference_path, reference) = match input.reference {
            Some((path, source)) => (Some(path.display().to_string()), Some(source.trim_end())),
            None => (None, None),
        };
        self.env.get_template("repair")?.render(context! {
            failure_class => input.failure_class.as_str(),
            candidate_path => input.candidate_path.display().to_string(),
            candidate => input.candidate.trim_end(),
            diagnostic => input.diagnostic,
            reference_path => reference_path,
            reference => reference,
            instruction => non_empty(input.instruction),
        })
    }

    pub fn render_explain(
        &self,
        reference: Option<(&Path, &str)>,
        candidate: Option<(&Path, &str)>,
        question: &str,
    ) -> Result<String, minijinja::Error> {
        self.env.get_template("explain")?.render(context! {
            reference_path => reference.map(|(p, _)| p.display().to_string()),
            reference => reference.map(|(_, s)| s.trim_end()),
            candidate_path => candidate.map(|(p, _)| p.display().to_string()),
            candidate => candidate.map(|(_, s)| s.trim_end()),
            question => question.trim(),
        })
    }

    pub fn render_route(&self, instruction: &str) -> Result<String, minijinja::Error> {
        self.env.get_template("route")?.render(context! {
            instruction => instruction.trim(),
        })
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Drops blank text but passes anything else through untouched.
fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}
