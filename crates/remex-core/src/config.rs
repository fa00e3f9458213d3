//! Remote target configuration.
//!
//! Key-based authentication only — no password path exists anywhere in
//! the crate. The private key never leaves disk: the session passes its
//! path to the OpenSSH client, and no error or log line ever includes
//! key material.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default wall-clock deadline for one remote command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for establishing and authenticating a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One reachable host plus the authenticated principal used on it.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Path to the private key file; the key content is never read here.
    pub key_path: PathBuf,
    /// Optional pinned `known_hosts` file; host key checking falls back
    /// to `accept-new` when unset.
    pub known_hosts: Option<PathBuf>,
}

impl SshTarget {
    /// Loads the target from `REMEX_SSH_*` environment variables:
    /// `REMEX_SSH_HOST`, `REMEX_SSH_USER`, `REMEX_SSH_KEY` (required),
    /// `REMEX_SSH_PORT` (default 22), `REMEX_SSH_KNOWN_HOSTS` (optional).
    ///
    /// # Errors
    ///
    /// Returns an error naming the missing or malformed variable, or
    /// when the key file does not exist.
    pub fn from_env() -> Result<Self> {
        let host = require_var("REMEX_SSH_HOST")?;
        let user = require_var("REMEX_SSH_USER")?;
        let key_path = PathBuf::from(require_var("REMEX_SSH_KEY")?);
        let port = match std::env::var("REMEX_SSH_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("REMEX_SSH_PORT is not a valid port: {raw:?}"))?,
            Err(_) => 22,
        };
        let known_hosts = std::env::var("REMEX_SSH_KNOWN_HOSTS").ok().map(PathBuf::from);

        anyhow::ensure!(
            key_path.exists(),
            "SSH key {} does not exist",
            key_path.display()
        );
        check_key_permissions(&key_path);

        Ok(Self {
            host,
            port,
            user,
            key_path,
            known_hosts,
        })
    }

    /// `user@host` form used by the ssh client.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl std::fmt::Display for SshTarget {
    /// `user@host:port` — safe for logs; the key path is deliberately
    /// not part of the display form.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

fn require_var(name: &str) -> Result<String> {
    let value = std::env::var(name).with_context(|| format!("{name} is not set"))?;
    anyhow::ensure!(!value.trim().is_empty(), "{name} is empty");
    Ok(value)
}

/// Warn (but do not fail) when the key file is group/world readable;
/// the ssh client itself rejects such keys.
#[cfg(unix)]
fn check_key_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            tracing::warn!(
                key = %path.display(),
                mode = format!("{mode:o}"),
                "SSH key is readable by others; ssh will refuse it (chmod 600)",
            );
        }
    }
}

#[cfg(not(unix))]
fn check_key_permissions(_path: &std::path::Path) {}
