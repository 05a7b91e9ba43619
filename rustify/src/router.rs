//! Free-text requests dispatched to the converter, the repair loop or the explainer.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use thiserror::Error;
use tracing::{info, instrument};

use crate::agent::Agent;
use crate::convert::{Converted, Converter};
use crate::core::types::RepairReport;
use crate::explain::Explainer;
use crate::io::client::{ClientError, CompletionOptions};
use crate::io::prompt::PromptEngine;
use crate::repair::{RepairLoop, RepairRequest};

static TOOL_CHOICE_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\[TOOL_CHOICE\](.*?)(?:\[ACTION\]|$)").expect("tool choice regex")
});
static TOOL_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)tool\s*:\s*([A-Za-z_-]+)").expect("tool label regex"));
static ACTION_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[ACTION\](.*)").expect("action regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Converter,
    Modifier,
    Explainer,
}

impl Tool {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Converter => "converter",
            Self::Modifier => "modifier",
            Self::Explainer => "explainer",
        }
    }
}

impl FromStr for Tool {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "convert" | "converter" => Ok(Self::Converter),
            "repair" | "modifier" | "fix" => Ok(Self::Modifier),
            "explain" | "explainer" => Ok(Self::Explainer),
            other => Err(RoutingError::UnknownLabel(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("router reply has no `[{0}]` section")]
    MissingSection(&'static str),
    #[error("router chose unknown tool `{0}`")]
    UnknownLabel(String),
    #[error("router reply names no tool")]
    MissingLabel,
    #[error("render route prompt")]
    Prompt(#[from] minijinja::Error),
    #[error(transparent)]
    Backend(#[from] ClientError),
}

/// Tool selected by the router and the text to hand it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolChoice {
    pub tool: Tool,
    /// Empty when the reply left `[ACTION]` blank.
    pub action: String,
}

/// Parse `[TOOL_CHOICE]` / `[ACTION]` sections from a router reply.
pub fn parse_tool_choice(reply: &str) -> Result<ToolChoice, RoutingError> {
    let section = TOOL_CHOICE_SECTION
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .ok_or(RoutingError::MissingSection("TOOL_CHOICE"))?;
    let label = TOOL_LABEL
        .captures(section.as_str())
        .and_then(|caps| caps.get(1))
        .ok_or(RoutingError::MissingLabel)?;
    let tool = label.as_str().parse()?;
    let action = ACTION_SECTION
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .ok_or(RoutingError::MissingSection("ACTION"))?;
    Ok(ToolChoice { tool, action })
}

/// Agent that picks a tool for a free-text instruction.
pub struct SessionRouter<'a> {
    agent: Agent<'a>,
    prompts: PromptEngine,
    options: CompletionOptions,
}

impl<'a> SessionRouter<'a> {
    pub fn new(agent: Agent<'a>) -> Self {
        Self {
            agent,
            prompts: PromptEngine::new(),
            options: CompletionOptions::new(500, 0.3),
        }
    }

    #[instrument(skip_all)]
    pub fn choose(&mut self, instruction: &str) -> Result<ToolChoice, RoutingError> {
        let prompt = self.prompts.render_route(instruction)?;
        let reply = self.agent.chat(&prompt, &self.options)?;
        let choice = parse_tool_choice(&reply)?;
        info!(tool = choice.tool.as_str(), "routed request");
        Ok(choice)
    }
}

/// Result of a routed request.
#[derive(Debug)]
pub enum Routed {
    Converted(Converted),
    Repaired(RepairReport),
    Explained(String),
}

/// Everything a session can dispatch to.
pub struct Toolbox<'a> {
    pub router: SessionRouter<'a>,
    pub converter: Converter<'a>,
    pub repair: RepairLoop<'a>,
    pub explainer: Explainer<'a>,
    /// Piped to both programs during repair.
    pub stdin_path: Option<PathBuf>,
}

impl<'a> Toolbox<'a> {
    /// Let the router pick a tool for `instruction` and run it.
    pub fn route(&mut self, instruction: &str) -> Result<Routed> {
        let choice = self.router.choose(instruction)?;
        let action = if choice.action.is_empty() {
            instruction
        } else {
            choice.action.as_str()
        };
        self.run(choice.tool, action)
    }

    /// Run `tool` directly with `input` as instruction or question.
    pub fn run(&mut self, tool: Tool, input: &str) -> Result<Routed> {
        let input = Some(input).filter(|s| !s.trim().is_empty());
        match tool {
            Tool::Converter => Ok(Routed::Converted(self.converter.convert(input)?)),
            Tool::Modifier => {
                let target = self.converter.target();
                let request = RepairRequest {
                    candidate_path: &target.code_path,
                    reference_path: &target.reference_path,
                    instruction: input,
                    stdin_path: self.stdin_path.as_deref(),
                };
                Ok(Routed::Repaired(self.repair.diagnose_and_fix(&request)?))
            }
            Tool::Explainer => Ok(Routed::Explained(
                self.explainer.explain(input.unwrap_or("Explain the code."))?,
            )),
        }
    }
}
