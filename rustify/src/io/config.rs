//! Tool configuration stored in `rustify.toml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::compare::ComparisonPolicy;
use crate::core::types::Language;
use crate::io::artifacts::write_atomic;
use crate::io::client::BackendDescriptor;

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "rustify.toml";

/// Tool configuration (TOML).
///
/// Intended to be edited by humans. Missing fields take defaults, so an empty
/// file is a valid config. API keys are never stored here; descriptors name the
/// environment variable that holds them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// C++ program whose behavior the translation must reproduce.
    pub reference_path: PathBuf,
    /// Directory receiving the candidate, the manifest and session logs.
    pub output_dir: PathBuf,
    pub repair: RepairConfig,
    pub toolchains: ToolchainsConfig,
    pub client: ClientConfig,
    /// Backend descriptors added to (or replacing) the built-in presets.
    pub backends: BTreeMap<String, BackendDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepairConfig {
    /// Repair attempts before the loop gives up.
    pub max_retry: u32,
    /// Exchanges kept in each agent's conversation history.
    pub max_history: usize,
    pub comparison: ComparisonPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainsConfig {
    pub rust: ToolchainConfig,
    pub cpp: ToolchainConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler executable, e.g. `rustc` or `g++`.
    pub compiler: String,
    /// Extra arguments placed before the source path.
    pub args: Vec<String>,
    pub compile_timeout_secs: u64,
    pub run_timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend used by every agent.
    pub backend: String,
    pub model: String,
    pub request_timeout_secs: u64,
    /// Retries for transient failures (network, HTTP 429/5xx).
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            reference_path: PathBuf::from("example.cpp"),
            output_dir: PathBuf::from("output"),
            repair: RepairConfig::default(),
            toolchains: ToolchainsConfig::default(),
            client: ClientConfig::default(),
            backends: BTreeMap::new(),
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_retry: 5,
            max_history: 10,
            comparison: ComparisonPolicy::Exact,
        }
    }
}

impl Default for ToolchainsConfig {
    fn default() -> Self {
        Self {
            rust: ToolchainConfig::for_language(Language::Rust),
            cpp: ToolchainConfig::for_language(Language::Cpp),
        }
    }
}

impl ToolchainConfig {
    pub fn for_language(language: Language) -> Self {
        let compiler = match language {
            Language::Rust => "rustc",
            Language::Cpp => "g++",
        };
        Self {
            compiler: compiler.to_string(),
            args: Vec::new(),
            compile_timeout_secs: 120,
            run_timeout_secs: 10,
            output_limit_bytes: 100_000,
        }
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.compiler.trim().is_empty() {
            return Err(anyhow!("{section}.compiler must be non-empty"));
        }
        if self.compile_timeout_secs == 0 {
            return Err(anyhow!("{section}.compile_timeout_secs must be > 0"));
        }
        if self.run_timeout_secs == 0 {
            return Err(anyhow!("{section}.run_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("{section}.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self::for_language(Language::Rust)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: "ollama".to_string(),
            model: "llama3.1".to_string(),
            request_timeout_secs: 300,
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.repair.max_retry == 0 {
            return Err(anyhow!("repair.max_retry must be > 0"));
        }
        if self.repair.max_history == 0 {
            return Err(anyhow!("repair.max_history must be > 0"));
        }
        self.repair
            .comparison
            .validate()
            .map_err(|msg| anyhow!("repair.comparison: {msg}"))?;
        self.toolchains.rust.validate("toolchains.rust")?;
        self.toolchains.cpp.validate("toolchains.cpp")?;
        if self.client.backend.trim().is_empty() {
            return Err(anyhow!("client.backend must be non-empty"));
        }
        if self.client.request_timeout_secs == 0 {
            return Err(anyhow!("client.request_timeout_secs must be > 0"));
        }
        if self.client.max_backoff_ms < self.client.initial_backoff_ms {
            return Err(anyhow!(
                "client.max_backoff_ms must be >= client.initial_backoff_ms"
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(anyhow!("output_dir must be non-empty"));
        }
        Ok(())
    }

    /// Candidate path: `<output_dir>/<reference stem>.rs`.
    pub fn candidate_path(&self) -> PathBuf {
        let stem = self
            .reference_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string());
        self.output_dir
            .join(format!("{stem}.{}", Language::Rust.source_extension()))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join("Cargo.toml")
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AppConfig::default()`.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let cfg = AppConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf).with_context(|| format!("write config {}", path.display()))
}
