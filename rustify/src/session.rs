//! Line-oriented interactive session over a [`Toolbox`].
//!
//! Commands:
//!
//! - `exit` / `quit` ends the session.
//! - `switch to converter|modifier|explainer` sends every following line
//!   straight to that tool until `back` (or `exit`).
//! - `show` prints the current Rust candidate.
//! - `retry` runs the repair loop again without an instruction.
//! - anything else is routed by the model.
//!
//! Failures of a single request are printed and the session continues.

use std::fs;
use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use tracing::warn;

use crate::cancel::CancelToken;
use crate::router::{Routed, Tool, Toolbox};

const PROMPT: &str = "> ";

enum Command<'l> {
    Exit,
    Back,
    Show,
    Retry,
    Switch(&'l str),
    Request(&'l str),
}

fn parse_command(line: &str) -> Command<'_> {
    let lower = line.to_ascii_lowercase();
    if lower == "exit" || lower == "quit" {
        return Command::Exit;
    }
    match lower.as_str() {
        "back" => return Command::Back,
        "show" => return Command::Show,
        "retry" => return Command::Retry,
        _ => {}
    }
    match lower.strip_prefix("switch to ") {
        Some(rest) => Command::Switch(line[line.len() - rest.len()..].trim()),
        None => Command::Request(line),
    }
}

fn tool_for_switch(name: &str) -> Option<Tool> {
    match name.to_ascii_lowercase().as_str() {
        "converter" => Some(Tool::Converter),
        "modifier" => Some(Tool::Modifier),
        "explainer" => Some(Tool::Explainer),
        _ => None,
    }
}

/// Read commands from `input` until `exit`, EOF or cancellation.
pub fn run_session<R: BufRead, W: Write>(
    toolbox: &mut Toolbox<'_>,
    input: R,
    out: &mut W,
    cancel: &CancelToken,
) -> Result<()> {
    writeln!(
        out,
        "Describe what you need, `switch to converter|modifier|explainer`, `show`, `retry`, or `exit`."
    )?;
    let mut mode: Option<Tool> = None;
    let mut lines = input.lines();

    loop {
        if cancel.is_cancelled() {
            writeln!(out, "cancelled")?;
            break;
        }
        match mode {
            Some(tool) => write!(out, "[{}] {PROMPT}", tool.as_str())?,
            None => write!(out, "{PROMPT}")?,
        }
        out.flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("read session input")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let outcome = match (parse_command(line), mode) {
            (Command::Exit, _) => break,
            (Command::Back, Some(_)) => {
                mode = None;
                writeln!(out, "back to routed mode")?;
                continue;
            }
            (Command::Back, None) => {
                writeln!(out, "not in a tool mode")?;
                continue;
            }
            (Command::Show, _) => {
                show_candidate(toolbox, out)?;
                continue;
            }
            (Command::Retry, _) => toolbox.run(Tool::Modifier, ""),
            (Command::Switch(name), _) => {
                match tool_for_switch(name) {
                    Some(tool) => {
                        mode = Some(tool);
                        writeln!(out, "switched to {}; `back` to leave", tool.as_str())?;
                    }
                    None => writeln!(out, "unknown tool `{name}`")?,
                }
                continue;
            }
            (_, Some(tool)) => toolbox.run(tool, line),
            (_, None) => toolbox.route(line),
        };

        match outcome {
            Ok(routed) => print_routed(out, &routed)?,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "request failed");
                writeln!(out, "error: {err:#}")?;
            }
        }
    }
    Ok(())
}

fn show_candidate<W: Write>(toolbox: &Toolbox<'_>, out: &mut W) -> Result<()> {
    let path = &toolbox.converter.target().code_path;
    match fs::read_to_string(path) {
        Ok(source) => writeln!(out, "--- {} ---\n{}", path.display(), source.trim_end())?,
        Err(_) => writeln!(out, "no candidate at {}", path.display())?,
    }
    Ok(())
}

fn print_routed<W: Write>(out: &mut W, routed: &Routed) -> Result<()> {
    match routed {
        Routed::Converted(converted) => {
            writeln!(out, "converted: {}", converted.code_path.display())?;
            if let Some(manifest) = &converted.manifest_path {
                writeln!(out, "manifest: {}", manifest.display())?;
            }
        }
        Routed::Repaired(report) => {
            let status = if report.success { "succeeded" } else { "failed" };
            writeln!(
                out,
                "repair {status} ({}): {}",
                report.stop.as_str(),
                report.detail
            )?;
        }
        Routed::Explained(answer) => writeln!(out, "{}", answer.trim_end())?,
    }
    Ok(())
}
