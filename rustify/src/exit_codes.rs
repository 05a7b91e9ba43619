//! Stable exit codes for `rustify` commands.

/// The command succeeded; for repair, the candidate converged.
pub const OK: i32 = 0;
/// Repair stopped without convergence, or the command failed (config, I/O, backend).
pub const FAILED: i32 = 1;
/// The session was cancelled with Ctrl-C.
pub const CANCELLED: i32 = 130;
