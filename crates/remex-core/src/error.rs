//! Typed error enums for the execution core.
//!
//! The taxonomy separates configuration problems (fatal at startup),
//! user-input problems (always recoverable, echoed back to the caller),
//! and transport problems (transient vs. terminal). Non-zero remote
//! exit codes are never errors — they are data on the result.

use std::path::PathBuf;

use thiserror::Error;

// ── Registry errors ──────────────────────────────────────────────────────────

/// Errors raised while loading the allowlist or resolving a command.
///
/// Every variant except [`RegistryError::UnknownCommand`] is a
/// configuration error: the process must not serve with an invalid
/// registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("command '{0}' is not in the allowlist")]
    UnknownCommand(String),

    #[error("duplicate command name '{0}'")]
    DuplicateName(String),

    #[error("invalid command name '{0}': names must be non-empty and contain no whitespace")]
    InvalidName(String),

    #[error("command '{name}': template must contain at least one token")]
    EmptyTemplate { name: String },

    #[error("command '{name}': first template token must be a literal program name")]
    PlaceholderProgram { name: String },

    #[error("command '{name}': placeholder '{{{placeholder}}}' has no parameter spec")]
    UnboundPlaceholder { name: String, placeholder: String },

    #[error("command '{name}': parameter '{parameter}' is never referenced by the template")]
    UnusedParameter { name: String, parameter: String },

    #[error("command '{name}': parameter '{parameter}': {reason}")]
    InvalidRule {
        name: String,
        parameter: String,
        reason: String,
    },

    #[error("cannot parse allowlist: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("cannot read allowlist {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ── Parameter errors ─────────────────────────────────────────────────────────

/// Sanitizer rejections. Always recoverable: the caller supplied a bad
/// value and can correct itself. The offending parameter is named, and
/// the reason never echoes more of the value than the caller sent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParameterError {
    #[error("parameter '{0}' is required but was not supplied")]
    Missing(String),

    #[error("parameter '{parameter}' exceeds the {limit}-character limit")]
    TooLong { parameter: String, limit: usize },

    #[error("parameter '{parameter}' contains forbidden character {found:?}")]
    ForbiddenCharacter { parameter: String, found: char },

    #[error("parameter '{parameter}' contains a path traversal sequence ('..')")]
    PathTraversal { parameter: String },

    #[error("parameter '{parameter}' does not satisfy its validation rule: {reason}")]
    RuleMismatch { parameter: String, reason: String },

    #[error("parameter '{parameter}' is not declared for this command")]
    Undeclared { parameter: String },
}

impl ParameterError {
    /// Name of the parameter the rejection refers to.
    #[must_use]
    pub fn parameter(&self) -> &str {
        match self {
            Self::Missing(p) => p,
            Self::TooLong { parameter, .. }
            | Self::ForbiddenCharacter { parameter, .. }
            | Self::PathTraversal { parameter }
            | Self::RuleMismatch { parameter, .. }
            | Self::Undeclared { parameter } => parameter,
        }
    }
}

// ── Render errors ────────────────────────────────────────────────────────────

/// Renderer failures. Reaching this after the sanitizer ran is a
/// programming-contract violation, not a user-facing retry case.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("command '{command}': no validated value for required placeholder '{{{placeholder}}}'")]
    MissingParameter { command: String, placeholder: String },
}

// ── Session errors ───────────────────────────────────────────────────────────

/// Transport failures. `Connection` is transient (bounded retry inside
/// `ensure_ready`, then surfaced); `Authentication` is terminal — the
/// session moves to `Failed` and never retries with the same credential.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection to {target} failed: {reason}")]
    Connection { target: String, reason: String },

    #[error("authentication rejected for {target}; fix the key material and restart")]
    Authentication { target: String },

    #[error("session to {target} is in the failed state (earlier authentication rejection)")]
    Failed { target: String },

    #[error("failed to spawn ssh client: {0}")]
    Spawn(#[source] std::io::Error),
}

// ── Umbrella ─────────────────────────────────────────────────────────────────

/// Everything `Executor::run` can fail with.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ExecError {
    /// `true` for user-input failures the caller can correct and retry;
    /// `false` for configuration, contract, and terminal transport
    /// failures.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Registry(RegistryError::UnknownCommand(_)) | Self::Parameter(_) => true,
            Self::Session(SessionError::Connection { .. }) => true,
            Self::Registry(_) | Self::Render(_) | Self::Session(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_command_is_recoverable() {
        let err = ExecError::from(RegistryError::UnknownCommand("nope".into()));
        assert!(err.is_recoverable());
    }

    #[test]
    fn parameter_errors_are_recoverable() {
        let err = ExecError::from(ParameterError::Missing("path".into()));
        assert!(err.is_recoverable());
    }

    #[test]
    fn authentication_is_terminal() {
        let err = ExecError::from(SessionError::Authentication {
            target: "ops@example:22".into(),
        });
        assert!(!err.is_recoverable());
    }

    #[test]
    fn render_contract_violation_is_not_recoverable() {
        let err = ExecError::from(RenderError::MissingParameter {
            command: "disk_usage_path".into(),
            placeholder: "path".into(),
        });
        assert!(!err.is_recoverable());
    }

    #[test]
    fn parameter_error_names_the_parameter() {
        let err = ParameterError::TooLong {
            parameter: "path".into(),
            limit: 256,
        };
        assert_eq!(err.parameter(), "path");
    }
}
