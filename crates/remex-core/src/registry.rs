//! Declarative command allowlist.
//!
//! The registry is data, not code: a YAML document enumerates every
//! command the remote target may ever run, as an argument-vector
//! template plus per-parameter validation rules. All invariants are
//! checked exhaustively at load time — a malformed allowlist is a
//! startup failure, never a runtime surprise. The loaded registry is
//! immutable; callers share it through `Arc` and reloads replace the
//! whole value.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::sanitize::ValidationRule;

/// Default allowlist compiled into the binary. Every entry is a
/// read-only diagnostic; used when no allowlist file is configured.
const BUILTIN_ALLOWLIST: &str = include_str!("builtin_allowlist.yaml");

// ── Template tokens ──────────────────────────────────────────────────────────

/// One slot of a command template: either a literal argv token or a
/// named `{param}` placeholder filled at render time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TemplateToken {
    Literal(String),
    Placeholder(String),
}

impl From<String> for TemplateToken {
    fn from(raw: String) -> Self {
        raw.strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .map_or_else(
                || Self::Literal(raw.clone()),
                |name| Self::Placeholder(name.to_string()),
            )
    }
}

impl From<TemplateToken> for String {
    fn from(token: TemplateToken) -> Self {
        match token {
            TemplateToken::Literal(s) => s,
            TemplateToken::Placeholder(name) => format!("{{{name}}}"),
        }
    }
}

// ── Categories ───────────────────────────────────────────────────────────────

/// Classification label for listing and filtering. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandCategory {
    System,
    Disk,
    Network,
    Process,
    Service,
    Docker,
}

impl CommandCategory {
    pub const ALL: &'static [Self] = &[
        Self::System,
        Self::Disk,
        Self::Network,
        Self::Process,
        Self::Service,
        Self::Docker,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Disk => "disk",
            Self::Network => "network",
            Self::Process => "process",
            Self::Service => "service",
            Self::Docker => "docker",
        }
    }
}

impl std::fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommandCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(|c| c.as_str()).collect();
                format!("unknown category '{s}'; valid categories: {}", valid.join(", "))
            })
    }
}

// ── Definitions ──────────────────────────────────────────────────────────────

/// Per-parameter contract: guidance for the agent plus the closed
/// validation rule enforced by the sanitizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub description: String,
    pub rule: ValidationRule,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// One allowlisted command: a purely declarative template with no
/// embedded executable logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDefinition {
    pub name: String,
    pub description: String,
    pub category: CommandCategory,
    pub template: Vec<TemplateToken>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
}

impl CommandDefinition {
    /// Placeholder names in template order, duplicates included.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.template.iter().filter_map(|t| match t {
            TemplateToken::Placeholder(name) => Some(name.as_str()),
            TemplateToken::Literal(_) => None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AllowlistDocument {
    commands: Vec<CommandDefinition>,
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Immutable, load-time-validated set of command definitions.
#[derive(Debug)]
pub struct Registry {
    commands: BTreeMap<String, CommandDefinition>,
}

impl Registry {
    /// Parses and validates an allowlist document.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] describing the first malformed
    /// definition; a registry is never built from a partially valid
    /// document.
    pub fn load_str(yaml: &str) -> Result<Self, RegistryError> {
        let doc: AllowlistDocument = serde_yaml::from_str(yaml)?;
        let mut commands = BTreeMap::new();
        for def in doc.commands {
            check_definition(&def)?;
            if commands.contains_key(&def.name) {
                return Err(RegistryError::DuplicateName(def.name));
            }
            commands.insert(def.name.clone(), def);
        }
        Ok(Self { commands })
    }

    /// Reads and validates an allowlist file.
    ///
    /// # Errors
    ///
    /// I/O failures and every [`Registry::load_str`] error.
    pub fn load_file(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load_str(&content)
    }

    /// The compiled-in default allowlist.
    ///
    /// # Errors
    ///
    /// Only if the embedded document fails its own invariants, which
    /// the test suite guards against.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::load_str(BUILTIN_ALLOWLIST)
    }

    /// Resolves a command by name.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownCommand`] if the name is not listed.
    pub fn lookup(&self, name: &str) -> Result<&CommandDefinition, RegistryError> {
        self.commands
            .get(name)
            .ok_or_else(|| RegistryError::UnknownCommand(name.to_string()))
    }

    /// Definitions sorted by `(category, name)`, optionally filtered.
    /// Restartable: each call yields a fresh iteration.
    pub fn list(
        &self,
        category: Option<CommandCategory>,
    ) -> impl Iterator<Item = &CommandDefinition> {
        let mut defs: Vec<&CommandDefinition> = self
            .commands
            .values()
            .filter(move |d| category.map_or(true, |c| d.category == c))
            .collect();
        defs.sort_by_key(|d| (d.category, d.name.as_str()));
        defs.into_iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Load-time invariants for a single definition.
fn check_definition(def: &CommandDefinition) -> Result<(), RegistryError> {
    if def.name.is_empty() || def.name.chars().any(char::is_whitespace) {
        return Err(RegistryError::InvalidName(def.name.clone()));
    }
    if def.template.is_empty() {
        return Err(RegistryError::EmptyTemplate {
            name: def.name.clone(),
        });
    }
    if matches!(def.template[0], TemplateToken::Placeholder(_)) {
        // The program itself must be fixed by the allowlist, never
        // chosen by a parameter.
        return Err(RegistryError::PlaceholderProgram {
            name: def.name.clone(),
        });
    }
    for placeholder in def.placeholders() {
        if !def.parameters.contains_key(placeholder) {
            return Err(RegistryError::UnboundPlaceholder {
                name: def.name.clone(),
                placeholder: placeholder.to_string(),
            });
        }
    }
    for (parameter, spec) in &def.parameters {
        if !def.placeholders().any(|p| p == parameter) {
            return Err(RegistryError::UnusedParameter {
                name: def.name.clone(),
                parameter: parameter.clone(),
            });
        }
        spec.rule
            .check_declaration()
            .map_err(|reason| RegistryError::InvalidRule {
                name: def.name.clone(),
                parameter: parameter.clone(),
                reason,
            })?;
    }
    Ok(())
}
