//! remex-core — allowlisted remote command execution.
//!
//! Turns a declarative allowlist plus untrusted parameter values into
//! a safe single remote invocation: registry lookup → parameter
//! sanitization → argument-vector rendering → serialized execution
//! over an authenticated SSH session. Nothing outside the allowlist
//! ever runs; no shell string is ever built from caller input.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod error;
pub mod exec;
pub mod registry;
pub mod render;
pub mod result;
pub mod sanitize;
pub mod session;

pub use config::{SshTarget, DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT};
pub use error::{ExecError, ParameterError, RegistryError, RenderError, SessionError};
pub use exec::Executor;
pub use registry::{CommandCategory, CommandDefinition, ParameterSpec, Registry, TemplateToken};
pub use render::{render, ArgumentVector};
pub use result::ExecutionResult;
pub use sanitize::{validate, ValidatedValue, ValidationRule, MAX_PARAMETER_LEN};
pub use session::{
    CommandRunner, ProbeReport, RawOutput, SessionState, SshSession, TokioProcessRunner,
    MAX_CAPTURE_BYTES,
};
