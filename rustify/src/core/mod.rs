//! Deterministic, pure logic shared by the controllers.
//!
//! Core modules are free of I/O side effects. They operate on in-memory data
//! (completions, outputs, histories) and return deterministic results suitable
//! for tests.

pub mod compare;
pub mod extract;
pub mod field_path;
pub mod history;
pub mod types;
