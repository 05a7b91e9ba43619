//! End-to-end repair loop scenarios with scripted toolchains and model replies.

use rustify::agent::Agent;
use rustify::cancel::CancelToken;
use rustify::core::types::{FailureClass, Language, StopReason};
use rustify::io::run_log::SessionLog;
use rustify::repair::{RepairLoop, RepairRequest, RepairSettings};
use rustify::test_support::{ScriptedClient, ScriptedToolchain, Workspace, modified_code_reply};

const FACTORIAL_CPP: &str = r#"#include <iostream>
int main() {
    int n;
    std::cin >> n;
    int acc = 1;
    for (int i = 2; i <= n; ++i) acc *= i;
    std::cout << acc << std::endl;
}
"#;

const FACTORIAL_RS_WRONG: &str = r#"use std::io::Read;
fn main() {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input).unwrap();
    let n: u32 = input.trim().parse().unwrap();
    println!("{}", (2..n).product::<u32>());
}
"#;

const FACTORIAL_RS_FIXED: &str = r#"use std::io::Read;
fn main() {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input).unwrap();
    let n: u32 = input.trim().parse().unwrap();
    println!("{}", (2..=n).product::<u32>());
}"#;

const SYNTAX_DIAGNOSTIC: &str = "error: expected `;`, found `}`\n --> output/example.rs:2:21\n  |\n2 |     println!(\"6\")\n  |                   ^ help: add `;` here";

fn settings(max_retry: u32) -> RepairSettings {
    RepairSettings {
        max_retry,
        ..RepairSettings::default()
    }
}

fn request<'p>(ws: &'p Workspace, stdin_path: Option<&'p std::path::Path>) -> RepairRequest<'p> {
    RepairRequest {
        candidate_path: &ws.candidate,
        reference_path: &ws.reference,
        instruction: None,
        stdin_path,
    }
}

#[test]
fn passing_candidate_converges_without_model_calls() {
    let ws = Workspace::new(FACTORIAL_CPP, FACTORIAL_RS_FIXED);
    let client = ScriptedClient::messages(Vec::<String>::new());
    let rust = ScriptedToolchain::new(Language::Rust).compile_ok().run_ok("6\n");
    let cpp = ScriptedToolchain::new(Language::Cpp).compile_ok().run_ok("6\n");

    let mut repair = RepairLoop::new(
        Agent::new(&client, "scripted", "sys", 10),
        &rust,
        &cpp,
        settings(5),
        CancelToken::new(),
    );
    let report = repair.diagnose_and_fix(&request(&ws, None)).expect("report");

    assert!(report.success);
    assert_eq!(report.stop, StopReason::Converged);
    assert_eq!(report.detail, "6\n");
    assert_eq!(report.verifications, 1);
    assert!(report.attempts.is_empty());
    assert_eq!(client.calls(), 0);
}

#[test]
fn compile_error_is_sent_verbatim_and_run_is_skipped() {
    let ws = Workspace::new(FACTORIAL_CPP, "fn main() {\n    println!(\"6\")\n}\n");
    let client = ScriptedClient::messages([modified_code_reply(
        "fn main() {\n    println!(\"6\");\n}",
    )]);
    let rust = ScriptedToolchain::new(Language::Rust)
        .compile_err(SYNTAX_DIAGNOSTIC)
        .compile_ok()
        .run_ok("6\n");
    let cpp = ScriptedToolchain::new(Language::Cpp).compile_ok().run_ok("6\n");

    let mut repair = RepairLoop::new(
        Agent::new(&client, "scripted", "sys", 10),
        &rust,
        &cpp,
        settings(5),
        CancelToken::new(),
    );
    let report = repair.diagnose_and_fix(&request(&ws, None)).expect("report");

    assert!(report.success);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].failure_class, FailureClass::CompileError);
    let prompt = client.last_user_message().expect("repair prompt");
    assert!(prompt.contains(SYNTAX_DIAGNOSTIC));
    // Only the converging verification reached the run stage.
    assert_eq!(rust.run_calls(), 1);
    assert_eq!(ws.candidate_source(), "fn main() {\n    println!(\"6\");\n}\n");
}

#[test]
fn fixes_that_never_compile_exhaust_the_budget() {
    let ws = Workspace::new(FACTORIAL_CPP, "fn main() {\n");
    let client = ScriptedClient::messages([
        modified_code_reply("fn main() { let x = ; }"),
        modified_code_reply("fn main() { let x: i32 = \"a\"; }"),
        modified_code_reply("fn main() { undefined(); }"),
    ]);
    let rust = ScriptedToolchain::new(Language::Rust)
        .compile_err("error: this file contains an unclosed delimiter")
        .compile_err("error: expected expression, found `;`")
        .compile_err("error[E0308]: mismatched types");
    let cpp = ScriptedToolchain::new(Language::Cpp).compile_ok().run_ok("6\n");

    let mut repair = RepairLoop::new(
        Agent::new(&client, "scripted", "sys", 10),
        &rust,
        &cpp,
        settings(3),
        CancelToken::new(),
    );
    let report = repair.diagnose_and_fix(&request(&ws, None)).expect("report");

    assert!(!report.success);
    assert_eq!(report.stop, StopReason::Exhausted);
    assert_eq!(report.detail, "exhausted after 3 attempts");
    assert_eq!(client.calls(), 3);
    assert_eq!(report.attempts.len(), 3);
    assert_eq!(report.verifications, 3);
    assert_eq!(rust.compile_calls(), 3);
    assert_eq!(
        report.last_diagnostic.as_deref(),
        Some("error[E0308]: mismatched types")
    );
    assert_eq!(rust.run_calls(), 0);
    assert_eq!(cpp.compile_calls(), 0);
    // The third fix is on disk even though it was never compiled.
    assert_eq!(ws.candidate_source(), "fn main() { undefined(); }\n");
}

#[test]
fn last_fix_is_not_verified_when_the_budget_is_spent() {
    let ws = Workspace::new(FACTORIAL_CPP, "fn main() {\n");
    let client = ScriptedClient::messages([modified_code_reply(FACTORIAL_RS_FIXED)]);
    let rust = ScriptedToolchain::new(Language::Rust)
        .compile_err("error: this file contains an unclosed delimiter")
        .compile_ok()
        .run_ok("6\n");
    let cpp = ScriptedToolchain::new(Language::Cpp).compile_ok().run_ok("6\n");

    let mut repair = RepairLoop::new(
        Agent::new(&client, "scripted", "sys", 10),
        &rust,
        &cpp,
        settings(1),
        CancelToken::new(),
    );
    let report = repair.diagnose_and_fix(&request(&ws, None)).expect("report");

    assert!(!report.success);
    assert_eq!(report.stop, StopReason::Exhausted);
    assert_eq!(report.detail, "exhausted after 1 attempts");
    assert_eq!(report.verifications, 1);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(rust.compile_calls(), 1);
    assert_eq!(ws.candidate_source(), format!("{FACTORIAL_RS_FIXED}\n"));
}

#[test]
fn broken_reference_stops_once_the_candidate_runs() {
    let ws = Workspace::new("int main( {", FACTORIAL_RS_FIXED);
    let client = ScriptedClient::messages([modified_code_reply("fn main() {}")]);
    let rust = ScriptedToolchain::new(Language::Rust).compile_ok().run_ok("6\n");
    let cpp = ScriptedToolchain::new(Language::Cpp)
        .compile_err("example.cpp:1:10: error: expected parameter declarator");

    let mut repair = RepairLoop::new(
        Agent::new(&client, "scripted", "sys", 10),
        &rust,
        &cpp,
        settings(5),
        CancelToken::new(),
    );
    let report = repair.diagnose_and_fix(&request(&ws, None)).expect("report");

    assert!(!report.success);
    assert_eq!(report.stop, StopReason::ReferenceBroken);
    assert!(report.detail.contains("expected parameter declarator"));
    assert_eq!(client.calls(), 0);
    assert_eq!(rust.compile_calls(), 1);
    assert_eq!(rust.run_calls(), 1);
}

#[test]
fn compile_error_is_repaired_before_a_broken_reference_is_seen() {
    let ws = Workspace::new("int main( {", "fn main() {\n");
    let client = ScriptedClient::messages([modified_code_reply("fn main() {}")]);
    let rust = ScriptedToolchain::new(Language::Rust)
        .compile_err("error: this file contains an unclosed delimiter")
        .compile_ok()
        .run_ok("");
    let cpp = ScriptedToolchain::new(Language::Cpp)
        .compile_err("example.cpp:1:10: error: expected parameter declarator");

    let mut repair = RepairLoop::new(
        Agent::new(&client, "scripted", "sys", 10),
        &rust,
        &cpp,
        settings(5),
        CancelToken::new(),
    );
    let report = repair.diagnose_and_fix(&request(&ws, None)).expect("report");

    assert_eq!(report.stop, StopReason::ReferenceBroken);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].failure_class, FailureClass::CompileError);
    assert_eq!(client.calls(), 1);
    assert_eq!(rust.compile_calls(), 2);
    assert_eq!(cpp.compile_calls(), 1);
    let prompt = client.last_user_message().expect("repair prompt");
    assert!(prompt.contains("unclosed delimiter"));
}

#[test]
fn missing_stdin_file_is_a_runtime_error_sent_for_repair() {
    let ws = Workspace::new(FACTORIAL_CPP, FACTORIAL_RS_FIXED);
    let missing = ws.path().join("absent.txt");
    let not_found = format!("Input file not found: {}", missing.display());
    let client = ScriptedClient::messages([modified_code_reply(FACTORIAL_RS_FIXED)]);
    let rust = ScriptedToolchain::new(Language::Rust)
        .compile_ok()
        .run_err(&not_found);
    let cpp = ScriptedToolchain::new(Language::Cpp);

    let mut repair = RepairLoop::new(
        Agent::new(&client, "scripted", "sys", 10),
        &rust,
        &cpp,
        settings(1),
        CancelToken::new(),
    );
    let report = repair
        .diagnose_and_fix(&request(&ws, Some(missing.as_path())))
        .expect("report");

    assert_eq!(report.stop, StopReason::Exhausted);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].failure_class, FailureClass::RuntimeError);
    assert_eq!(client.calls(), 1);
    assert!(client.last_user_message().expect("prompt").contains(&not_found));
    assert_eq!(cpp.compile_calls(), 0);
}

#[test]
fn reply_without_modified_code_aborts() {
    let ws = Workspace::new(FACTORIAL_CPP, "fn main() {\n");
    let client = ScriptedClient::messages([
        "[ANALYSIS]\nThe closing brace is missing. Add it at the end of the file.",
    ]);
    let rust = ScriptedToolchain::new(Language::Rust)
        .compile_err("error: this file contains an unclosed delimiter");
    let cpp = ScriptedToolchain::new(Language::Cpp).compile_ok().run_ok("6\n");

    let mut repair = RepairLoop::new(
        Agent::new(&client, "scripted", "sys", 10),
        &rust,
        &cpp,
        settings(5),
        CancelToken::new(),
    );
    let report = repair.diagnose_and_fix(&request(&ws, None)).expect("report");

    assert!(!report.success);
    assert_eq!(report.stop, StopReason::ResponseParse);
    assert_eq!(client.calls(), 1);
    assert!(report.attempts.is_empty());
    assert_eq!(ws.candidate_source(), "fn main() {\n");
}

#[test]
fn factorial_mismatch_is_repaired_on_second_verification() {
    let ws = Workspace::new(FACTORIAL_CPP, FACTORIAL_RS_WRONG);
    let input = ws.write("input.txt", "3\n");
    let client = ScriptedClient::messages([modified_code_reply(FACTORIAL_RS_FIXED)]);
    let rust = ScriptedToolchain::new(Language::Rust)
        .compile_ok()
        .run_ok("2\n")
        .compile_ok()
        .run_ok("6\n");
    let cpp = ScriptedToolchain::new(Language::Cpp).compile_ok().run_ok("6\n");
    let log = SessionLog::create(ws.path(), "factorial").expect("session log");

    let mut repair = RepairLoop::new(
        Agent::new(&client, "scripted", "sys", 10),
        &rust,
        &cpp,
        settings(5),
        CancelToken::new(),
    )
    .with_log(&log);
    let report = repair
        .diagnose_and_fix(&request(&ws, Some(input.as_path())))
        .expect("report");

    assert!(report.success);
    assert_eq!(report.verifications, 2);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].failure_class, FailureClass::OutputMismatch);

    let prompt = client.last_user_message().expect("repair prompt");
    assert!(prompt.contains("--- Rust output ---\n2\n"));
    assert!(prompt.contains("--- C++ output ---\n6\n"));
    assert!(prompt.contains("std::cin >> n;"));

    assert_eq!(ws.candidate_source(), format!("{FACTORIAL_RS_FIXED}\n"));
    assert!(rust.stdin_paths().iter().all(|p| p.as_deref() == Some(input.as_path())));
    assert_eq!(cpp.stdin_paths(), vec![Some(input.clone())]);

    let paths = log.paths();
    assert!(paths.attempt_path(1).is_file());
    assert!(paths.report_path.is_file());
    let session_log = std::fs::read_to_string(&paths.log_path).expect("session.log");
    assert!(session_log.contains("output_mismatch"));
}

#[test]
fn history_records_prior_attempts() {
    let ws = Workspace::new(FACTORIAL_CPP, FACTORIAL_RS_WRONG);
    let client = ScriptedClient::messages([
        modified_code_reply("fn main() { println!(\"5\"); }"),
        modified_code_reply("fn main() { println!(\"6\"); }"),
    ]);
    let rust = ScriptedToolchain::new(Language::Rust)
        .compile_ok()
        .run_ok("2\n")
        .compile_ok()
        .run_ok("5\n")
        .compile_ok()
        .run_ok("6\n");
    let cpp = ScriptedToolchain::new(Language::Cpp).compile_ok().run_ok("6\n");

    let mut repair = RepairLoop::new(
        Agent::new(&client, "scripted", "sys", 10),
        &rust,
        &cpp,
        settings(5),
        CancelToken::new(),
    );
    let report = repair.diagnose_and_fix(&request(&ws, None)).expect("report");

    assert!(report.success);
    assert_eq!(report.attempts.len(), 2);
    assert_eq!(repair.agent().history().exchange_count(), 2);
    match &client.prompts()[1] {
        rustify::io::client::Prompt::Messages(messages) => {
            assert!(messages.iter().any(|m| m
                .content
                .starts_with("Code produced by repair attempt 1:")));
        }
        other => panic!("expected chat prompt, got {other:?}"),
    }
}
