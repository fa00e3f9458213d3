//! Normalized outcome of one remote invocation.

use serde::Serialize;

use crate::render::ArgumentVector;

/// Complete record of a finished remote invocation.
///
/// Immutable once produced and never partially filled: either every
/// field is populated or an error was raised instead. A non-zero
/// `exit_code` is faithfully reported data, not an error of this core;
/// `timed_out` and `truncated` are likewise flags, because the call
/// itself completed.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Allowlist name of the command that ran.
    pub command_name: String,
    /// The exact argument vector that was executed, for audit.
    pub argv: ArgumentVector,
    /// Remote exit code; `-1` when the process was killed on timeout.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock duration of the remote invocation, in milliseconds.
    pub duration_ms: u64,
    /// The deadline expired and the remote process was terminated.
    pub timed_out: bool,
    /// At least one output stream exceeded the capture bound and was cut.
    pub truncated: bool,
}

impl ExecutionResult {
    /// Clean completion: exited zero within the deadline.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}
