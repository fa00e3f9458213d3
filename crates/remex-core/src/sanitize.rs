//! Parameter sanitizer — the sole trust boundary for inbound values.
//!
//! Every parameter value is untrusted free-form text regardless of who
//! supplied it; there is no trusted-caller bypass. Validation never
//! transforms content: a value either passes all gates unchanged or is
//! rejected. Injection is ultimately prevented structurally by the
//! renderer (values become discrete argv tokens, never a shell string),
//! so the gates here are the first line of defense, not the last.

use serde::{Deserialize, Serialize};

use crate::error::ParameterError;
use crate::registry::ParameterSpec;

/// Upper bound on any single parameter value. Keeps audit logs and
/// rendered vectors sane; nothing legitimate comes close.
pub const MAX_PARAMETER_LEN: usize = 256;

/// Characters rejected in every value, regardless of the declared rule.
/// Shell metacharacters, quoting, and escapes; whitespace and control
/// characters are rejected separately in [`validate`].
const FORBIDDEN_CHARS: &[char] = &[
    ';', '|', '&', '$', '(', ')', '`', '<', '>', '\\', '\'', '"',
];

// ── Validation rules ─────────────────────────────────────────────────────────

/// Closed set of per-parameter value contracts.
///
/// Rules are declarative data in the allowlist document; parsing is
/// tagged, and an unrecognized tag is a load-time configuration error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationRule {
    /// Absolute or relative POSIX path: `[A-Za-z0-9._/-]+`, no `..`.
    PosixPath,
    /// systemd unit name: `[A-Za-z0-9_.@-]+`.
    ServiceName,
    /// Generic identifier: `[A-Za-z0-9._-]+`.
    Identifier,
    /// Decimal integer, optionally bounded inclusively.
    Integer {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    /// Exactly one of an enumerated set of values.
    OneOf { values: Vec<String> },
    /// Anchored regular expression; the entire value must match.
    Pattern { regex: String },
}

impl ValidationRule {
    /// Load-time sanity check: a `Pattern` must compile and must not
    /// itself whitelist a forbidden literal character; a `OneOf` set
    /// must be non-empty and each member must pass the universal gates.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the rule is not acceptable.
    pub fn check_declaration(&self) -> Result<(), String> {
        match self {
            Self::Pattern { regex } => {
                regex::Regex::new(&anchored(regex))
                    .map_err(|e| format!("invalid pattern: {e}"))?;
                // Characters with regex syntax meaning ((, ), |, $) are
                // fine bare — they cannot match their literal form — but
                // escaped (`\|`, `\$`) they would whitelist a forbidden
                // character, as would the bare non-syntax ones.
                let mut chars = regex.chars();
                while let Some(c) = chars.next() {
                    let literal = match c {
                        ';' | '`' | '<' | '>' | '\'' | '"' => Some(c),
                        '\\' => chars.next().filter(|next| FORBIDDEN_CHARS.contains(next)),
                        _ => None,
                    };
                    if let Some(c) = literal {
                        return Err(format!("pattern whitelists forbidden character {c:?}"));
                    }
                }
                Ok(())
            }
            Self::OneOf { values } => {
                if values.is_empty() {
                    return Err("one_of rule has an empty value set".to_string());
                }
                for v in values {
                    if let Err(e) = universal_gates("value", v) {
                        return Err(format!("enumerated value {v:?} is not allowed: {e}"));
                    }
                }
                Ok(())
            }
            Self::Integer { min, max } => {
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi {
                        return Err(format!("integer bounds are inverted ({lo} > {hi})"));
                    }
                }
                Ok(())
            }
            Self::PosixPath | Self::ServiceName | Self::Identifier => Ok(()),
        }
    }

    /// Full-match evaluation of the rule against an already-gated value.
    fn matches(&self, value: &str) -> Result<(), String> {
        match self {
            Self::PosixPath => char_class(value, |c| {
                c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-')
            })
            .map_err(|c| format!("character {c:?} is not valid in a path")),
            Self::ServiceName => char_class(value, |c| {
                c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-')
            })
            .map_err(|c| format!("character {c:?} is not valid in a service name")),
            Self::Identifier => char_class(value, |c| {
                c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
            })
            .map_err(|c| format!("character {c:?} is not valid in an identifier")),
            Self::Integer { min, max } => {
                let n: i64 = value
                    .parse()
                    .map_err(|_| format!("{value:?} is not an integer"))?;
                if let Some(lo) = min {
                    if n < *lo {
                        return Err(format!("{n} is below the minimum {lo}"));
                    }
                }
                if let Some(hi) = max {
                    if n > *hi {
                        return Err(format!("{n} is above the maximum {hi}"));
                    }
                }
                Ok(())
            }
            Self::OneOf { values } => {
                if values.iter().any(|v| v == value) {
                    Ok(())
                } else {
                    Err(format!("expected one of: {}", values.join(", ")))
                }
            }
            Self::Pattern { regex } => {
                // Compiled successfully at registry load; a failure here
                // means the registry invariant was bypassed.
                let re = regex::Regex::new(&anchored(regex))
                    .map_err(|e| format!("invalid pattern: {e}"))?;
                if re.is_match(value) {
                    Ok(())
                } else {
                    Err("value does not match the declared pattern".to_string())
                }
            }
        }
    }
}

/// Anchor a pattern so the entire value must conform (never a search).
fn anchored(regex: &str) -> String {
    format!("^(?:{regex})$")
}

/// All characters satisfy `allowed`, or the first offender is returned.
fn char_class(value: &str, allowed: impl Fn(char) -> bool) -> Result<(), char> {
    match value.chars().find(|&c| !allowed(c)) {
        None => Ok(()),
        Some(c) => Err(c),
    }
}

// ── Validated value ──────────────────────────────────────────────────────────

/// A parameter value that has passed the full gate set for its spec.
///
/// Only [`validate`] can construct one; downstream components accept
/// this type rather than raw strings so an unvalidated value cannot
/// reach the renderer by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedValue(String);

impl ValidatedValue {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ValidatedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Gates ────────────────────────────────────────────────────────────────────

/// Universal rejections applied before any declared rule: length bound,
/// shell metacharacters, whitespace, control characters, traversal.
/// The declared rule is never the only gate.
fn universal_gates(parameter: &str, value: &str) -> Result<(), ParameterError> {
    if value.len() > MAX_PARAMETER_LEN {
        return Err(ParameterError::TooLong {
            parameter: parameter.to_string(),
            limit: MAX_PARAMETER_LEN,
        });
    }
    if let Some(found) = value
        .chars()
        .find(|c| FORBIDDEN_CHARS.contains(c) || c.is_whitespace() || c.is_control())
    {
        return Err(ParameterError::ForbiddenCharacter {
            parameter: parameter.to_string(),
            found,
        });
    }
    if value.contains("..") {
        return Err(ParameterError::PathTraversal {
            parameter: parameter.to_string(),
        });
    }
    Ok(())
}

/// Validate one supplied value against its spec.
///
/// Returns `Ok(Some(_))` with the value unchanged on success,
/// `Ok(None)` when an optional parameter was not supplied, and an
/// error naming the parameter and the reason otherwise.
///
/// # Errors
///
/// [`ParameterError::Missing`] when a required value is absent or
/// empty; the other variants per gate.
pub fn validate(
    parameter: &str,
    spec: &ParameterSpec,
    raw: Option<&str>,
) -> Result<Option<ValidatedValue>, ParameterError> {
    let value = match raw {
        None | Some("") => {
            if spec.required {
                return Err(ParameterError::Missing(parameter.to_string()));
            }
            return Ok(None);
        }
        Some(v) => v,
    };

    universal_gates(parameter, value)?;

    spec.rule
        .matches(value)
        .map_err(|reason| ParameterError::RuleMismatch {
            parameter: parameter.to_string(),
            reason,
        })?;

    Ok(Some(ValidatedValue(value.to_string())))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any value containing a shell metacharacter is rejected under
        /// the most permissive rule available.
        #[test]
        fn prop_metacharacters_never_pass(
            prefix in "[a-z0-9]{0,20}",
            meta in proptest::sample::select(
                &[';', '|', '&', '$', '(', ')', '`', '<', '>', '\n', '\''][..],
            ),
            suffix in "[a-z0-9]{0,20}",
        ) {
            let value = format!("{prefix}{meta}{suffix}");
            let spec = ParameterSpec {
                description: String::new(),
                rule: ValidationRule::Pattern { regex: ".*".to_string() },
                required: true,
            };
            prop_assert!(validate("p", &spec, Some(&value)).is_err());
        }

        /// Conforming values pass unchanged — sanitization never rewrites.
        #[test]
        fn prop_valid_paths_round_trip(value in "/[a-z0-9][a-z0-9/_-]{0,40}") {
            prop_assume!(!value.contains(".."));
            let spec = ParameterSpec {
                description: String::new(),
                rule: ValidationRule::PosixPath,
                required: true,
            };
            let v = validate("path", &spec, Some(&value));
            prop_assert!(v.is_ok());
            if let Ok(Some(v)) = v {
                prop_assert_eq!(v.as_str(), value.as_str());
            }
        }

        /// The length bound holds for every rule.
        #[test]
        fn prop_length_bound_holds(extra in 1usize..64) {
            let value = "a".repeat(MAX_PARAMETER_LEN + extra);
            let spec = ParameterSpec {
                description: String::new(),
                rule: ValidationRule::Identifier,
                required: true,
            };
            prop_assert!(validate("p", &spec, Some(&value)).is_err());
        }
    }
}
