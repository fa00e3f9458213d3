//! Shared application state: the loaded registry plus the executor
//! that owns the serialized SSH session.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use remex_core::{Executor, Registry, SshSession, SshTarget, TokioProcessRunner};

pub struct AppState {
    registry: Arc<Registry>,
    executor: Executor<TokioProcessRunner>,
    /// `user@host:port` display form; safe for logs and status output.
    remote: String,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Builds the state from an optional allowlist file (builtin set
    /// when absent) and the configured SSH target. An invalid
    /// allowlist is fatal here — the server never starts with a
    /// registry it could not validate.
    ///
    /// # Errors
    ///
    /// Allowlist load failures, with the offending definition named.
    pub fn new(
        allowlist: Option<&Path>,
        target: SshTarget,
        command_timeout: Duration,
    ) -> Result<Self> {
        let registry = match allowlist {
            Some(path) => Registry::load_file(path)
                .with_context(|| format!("invalid allowlist {}", path.display()))?,
            None => Registry::builtin().context("builtin allowlist failed validation")?,
        };
        let registry = Arc::new(registry);

        tracing::info!(
            commands = registry.len(),
            remote = %target,
            "registry loaded",
        );

        let remote = target.to_string();
        let session = SshSession::new(target, TokioProcessRunner);
        let executor =
            Executor::new(Arc::clone(&registry), session).with_timeout(command_timeout);

        Ok(Self {
            registry,
            executor,
            remote,
            started_at: chrono::Utc::now(),
        })
    }

    #[must_use]
    pub fn remote(&self) -> &str {
        &self.remote
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn executor(&self) -> &Executor<TokioProcessRunner> {
        &self.executor
    }

    #[must_use]
    pub fn started_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.started_at
    }
}
