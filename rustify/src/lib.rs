//! C++ to Rust translation with a compile-verify-repair loop.
//!
//! A language model translates a C++ reference program into Rust; the
//! translation is then compiled, run and compared with the reference's output,
//! and every failure is fed back to the model until the outputs match or the
//! retry budget runs out. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (extraction, comparison, history,
//!   report types). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (HTTP backends, compiler processes,
//!   filesystem, config, run log). Behind traits where tests need doubles.
//!
//! Controllers ([`convert`], [`repair`], [`explain`], [`router`], [`session`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod agent;
pub mod cancel;
pub mod convert;
pub mod core;
pub mod exit_codes;
pub mod explain;
pub mod io;
pub mod logging;
pub mod repair;
pub mod router;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
