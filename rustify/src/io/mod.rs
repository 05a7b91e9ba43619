//! I/O helpers: processes, model backends, config, artifacts and logs.

pub mod artifacts;
pub mod client;
pub mod config;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod toolchain;
