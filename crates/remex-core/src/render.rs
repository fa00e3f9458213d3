//! Command renderer — templates plus validated values in, argument
//! vectors out.
//!
//! The output is an ordered sequence of discrete argv tokens, never a
//! concatenated shell string. This is the structural defense against
//! injection: even a metacharacter that somehow survived the sanitizer
//! could only ever be *data inside one argument*, because no shell
//! tokenizer re-parses the combined command on our side, and the
//! transport quotes each token before the remote side sees it.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::RenderError;
use crate::registry::{CommandDefinition, TemplateToken};
use crate::sanitize::ValidatedValue;

/// Ordered, discrete program arguments ready for execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ArgumentVector(Vec<String>);

impl ArgumentVector {
    /// The program to invoke — always a literal from the allowlist.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.0[0]
    }

    /// Arguments after the program.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.0[1..]
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ArgumentVector {
    /// Audit form: tokens joined with shell quoting so the displayed
    /// line is unambiguous about token boundaries.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&shell_words::join(&self.0))
    }
}

/// Substitutes validated values into the definition's template.
///
/// Each placeholder becomes exactly one token; a placeholder that
/// appears more than once receives the same validated value at every
/// occurrence. A placeholder whose parameter is optional and absent is
/// omitted from the vector. Deterministic: the same inputs always
/// produce the same vector.
///
/// # Errors
///
/// [`RenderError::MissingParameter`] when a required placeholder has
/// no validated value. The sanitizer rejects that case first, so
/// hitting it here is a programming-contract violation.
pub fn render(
    def: &CommandDefinition,
    validated: &BTreeMap<String, ValidatedValue>,
) -> Result<ArgumentVector, RenderError> {
    let mut argv = Vec::with_capacity(def.template.len());
    for token in &def.template {
        match token {
            TemplateToken::Literal(lit) => argv.push(lit.clone()),
            TemplateToken::Placeholder(name) => match validated.get(name) {
                Some(value) => argv.push(value.as_str().to_string()),
                None => {
                    let required = def.parameters.get(name).map_or(true, |s| s.required);
                    if required {
                        return Err(RenderError::MissingParameter {
                            command: def.name.clone(),
                            placeholder: name.clone(),
                        });
                    }
                    // Optional and absent: the token is dropped.
                }
            },
        }
    }
    Ok(ArgumentVector(argv))
}
