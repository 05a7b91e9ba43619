//! `rustify`: translate a C++ program to Rust, then compile, run and repair the
//! translation until its output matches the original's.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use rustify::agent::Agent;
use rustify::cancel::CancelToken;
use rustify::convert::{ConversionTarget, Converter};
use rustify::core::types::{Language, RepairReport, StopReason};
use rustify::exit_codes;
use rustify::explain::Explainer;
use rustify::io::client::HttpCompletionClient;
use rustify::io::config::{AppConfig, DEFAULT_CONFIG_FILE, load_config, write_config};
use rustify::io::prompt::{
    CONVERTER_SYSTEM_PROMPT, EXPLAINER_SYSTEM_PROMPT, REPAIR_SYSTEM_PROMPT, ROUTER_SYSTEM_PROMPT,
};
use rustify::io::run_log::SessionLog;
use rustify::io::toolchain::CommandToolchain;
use rustify::logging;
use rustify::repair::{RepairLoop, RepairRequest, RepairSettings};
use rustify::router::{Routed, SessionRouter, Toolbox};
use rustify::session::run_session;

#[derive(Parser)]
#[command(
    name = "rustify",
    version,
    about = "Translate C++ programs to Rust and repair them until outputs match"
)]
struct Cli {
    /// Config file (missing file means defaults).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Backend name, overriding `client.backend`.
    #[arg(long, global = true)]
    backend: Option<String>,
    /// Model name, overriding the configured model.
    #[arg(long, global = true)]
    model: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Translate the reference program into Rust.
    Convert {
        #[arg(long)]
        instruction: Option<String>,
    },
    /// Compile, run and repair the Rust candidate until it matches the reference.
    Repair {
        #[arg(long)]
        instruction: Option<String>,
        /// File piped to both programs' stdin.
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Convert, then repair.
    Pipeline {
        #[arg(long)]
        instruction: Option<String>,
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Ask a question about the reference or the translation.
    Explain { question: String },
    /// Let the model pick a tool for a free-text instruction.
    Route {
        instruction: String,
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Interactive session reading commands from stdin.
    Session {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Write a default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let open = || Runtime::open(&cli.config, cli.backend.as_deref(), cli.model.as_deref());

    match cli.command {
        Command::InitConfig { force } => {
            cmd_init_config(&cli.config, force)?;
            Ok(exit_codes::OK)
        }
        Command::Convert { instruction } => {
            open()?.convert(instruction.as_deref())?;
            Ok(exit_codes::OK)
        }
        Command::Repair { instruction, input } => {
            let report = open()?.repair(instruction.as_deref(), input.as_deref())?;
            Ok(report_exit_code(&report))
        }
        Command::Pipeline { instruction, input } => {
            let runtime = open()?;
            runtime.convert(instruction.as_deref())?;
            let report = runtime.repair(instruction.as_deref(), input.as_deref())?;
            Ok(report_exit_code(&report))
        }
        Command::Explain { question } => {
            let runtime = open()?;
            let answer = runtime.explainer().explain(&question)?;
            println!("{}", answer.trim_end());
            Ok(exit_codes::OK)
        }
        Command::Route { instruction, input } => {
            let runtime = open()?;
            let mut toolbox = runtime.toolbox(input);
            match toolbox.route(&instruction)? {
                Routed::Converted(converted) => {
                    println!("{}", converted.code_path.display());
                    Ok(exit_codes::OK)
                }
                Routed::Repaired(report) => {
                    print_report(&report);
                    Ok(report_exit_code(&report))
                }
                Routed::Explained(answer) => {
                    println!("{}", answer.trim_end());
                    Ok(exit_codes::OK)
                }
            }
        }
        Command::Session { input } => {
            let runtime = open()?;
            let mut toolbox = runtime.toolbox(input);
            let stdin = io::stdin();
            let mut stdout = io::stdout();
            run_session(&mut toolbox, stdin.lock(), &mut stdout, &runtime.cancel)?;
            if runtime.cancel.is_cancelled() {
                return Ok(exit_codes::CANCELLED);
            }
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    write_config(path, &AppConfig::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

fn apply_overrides(cfg: &mut AppConfig, backend: Option<&str>, model: Option<&str>) {
    if let Some(backend) = backend {
        cfg.client.backend = backend.to_string();
    }
    if let Some(model) = model {
        cfg.client.model = model.to_string();
        if let Some(descriptor) = cfg.backends.get_mut(&cfg.client.backend) {
            descriptor.model = Some(model.to_string());
        }
    }
}

fn report_exit_code(report: &RepairReport) -> i32 {
    match report.stop {
        StopReason::Converged => exit_codes::OK,
        StopReason::Cancelled => exit_codes::CANCELLED,
        _ => exit_codes::FAILED,
    }
}

fn print_report(report: &RepairReport) {
    let status = if report.success { "converged" } else { "failed" };
    println!(
        "{status} after {} verification(s), {} repair attempt(s): {}",
        report.verifications,
        report.attempts_used(),
        report.detail
    );
    if report.success {
        return;
    }
    if let Some(diagnostic) = &report.last_diagnostic {
        eprintln!("{}", diagnostic.trim_end());
    }
}

/// Shared dependencies for one command.
struct Runtime {
    cfg: AppConfig,
    client: HttpCompletionClient,
    rust: CommandToolchain,
    cpp: CommandToolchain,
    log: SessionLog,
    cancel: CancelToken,
}

impl Runtime {
    /// Load config, apply CLI overrides and build the client, toolchains and run log.
    fn open(config_path: &Path, backend: Option<&str>, model: Option<&str>) -> Result<Self> {
        let mut cfg = load_config(config_path)?;
        apply_overrides(&mut cfg, backend, model);
        let cancel = CancelToken::new();
        cancel.install_ctrlc_handler()?;

        let client = HttpCompletionClient::from_config(&cfg, |var| std::env::var(var).ok())?;
        let log = SessionLog::create(&cfg.output_dir, &SessionLog::new_session_id())?;
        info!(session = log.session_id(), backend = %cfg.client.backend, "session started");
        Ok(Self {
            rust: CommandToolchain::new(Language::Rust, cfg.toolchains.rust.clone()),
            cpp: CommandToolchain::new(Language::Cpp, cfg.toolchains.cpp.clone()),
            client,
            log,
            cancel,
            cfg,
        })
    }

    fn agent(&self, system_prompt: &str) -> Agent<'_> {
        Agent::new(
            &self.client,
            self.cfg.client.backend.as_str(),
            system_prompt,
            self.cfg.repair.max_history,
        )
    }

    fn converter(&self) -> Converter<'_> {
        Converter::new(
            self.agent(CONVERTER_SYSTEM_PROMPT),
            ConversionTarget {
                reference_path: self.cfg.reference_path.clone(),
                code_path: self.cfg.candidate_path(),
                manifest_path: self.cfg.manifest_path(),
            },
        )
    }

    fn repair_loop(&self) -> RepairLoop<'_> {
        RepairLoop::new(
            self.agent(REPAIR_SYSTEM_PROMPT),
            &self.rust,
            &self.cpp,
            RepairSettings::from_config(&self.cfg.repair),
            self.cancel.clone(),
        )
        .with_log(&self.log)
    }

    fn explainer(&self) -> Explainer<'_> {
        Explainer::new(
            self.agent(EXPLAINER_SYSTEM_PROMPT),
            self.cfg.reference_path.clone(),
            self.cfg.candidate_path(),
        )
    }

    fn toolbox(&self, stdin_path: Option<PathBuf>) -> Toolbox<'_> {
        Toolbox {
            router: SessionRouter::new(self.agent(ROUTER_SYSTEM_PROMPT)),
            converter: self.converter(),
            repair: self.repair_loop(),
            explainer: self.explainer(),
            stdin_path,
        }
    }

    fn convert(&self, instruction: Option<&str>) -> Result<()> {
        let converted = self
            .converter()
            .convert(instruction)
            .context("convert reference program")?;
        self.log.event(&format!(
            "converted {} -> {}",
            self.cfg.reference_path.display(),
            converted.code_path.display()
        ))?;
        println!("{}", converted.code_path.display());
        if let Some(manifest) = &converted.manifest_path {
            println!("{}", manifest.display());
        }
        Ok(())
    }

    fn repair(&self, instruction: Option<&str>, stdin_path: Option<&Path>) -> Result<RepairReport> {
        let candidate_path = self.cfg.candidate_path();
        let request = RepairRequest {
            candidate_path: &candidate_path,
            reference_path: &self.cfg.reference_path,
            instruction,
            stdin_path,
        };
        let report = self.repair_loop().diagnose_and_fix(&request)?;
        print_report(&report);
        Ok(report)
    }
}
