//! Execution orchestrator — ties registry, sanitizer, renderer, and
//! session together behind a single entry point.
//!
//! Every request walks the full pipeline; there is no trusted-caller
//! fast path that skips validation. The session is held behind a
//! `tokio::sync::Mutex`, so concurrent callers serialize on the actual
//! remote execution while lookups and validation run unsynchronized.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::DEFAULT_COMMAND_TIMEOUT;
use crate::error::{ExecError, ParameterError};
use crate::registry::Registry;
use crate::render::render;
use crate::result::ExecutionResult;
use crate::sanitize::{validate, ValidatedValue};
use crate::session::{CommandRunner, ProbeReport, SessionState, SshSession};

/// Shared executor: one registry, one serialized session.
pub struct Executor<R> {
    registry: Arc<Registry>,
    session: Mutex<SshSession<R>>,
    command_timeout: Duration,
}

impl<R: CommandRunner> Executor<R> {
    pub fn new(registry: Arc<Registry>, session: SshSession<R>) -> Self {
        Self {
            registry,
            session: Mutex::new(session),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current session state, for status reporting.
    pub async fn session_state(&self) -> SessionState {
        self.session.lock().await.state()
    }

    /// Connectivity probe for health-check tooling. Performs a single
    /// attempt; does not change whether later commands retry.
    pub async fn probe(&self) -> ProbeReport {
        self.session.lock().await.probe().await
    }

    /// Resolves, validates, renders, and executes one allowlisted
    /// command. An unknown name or a rejected parameter fails before
    /// any network I/O happens.
    ///
    /// # Errors
    ///
    /// The full [`ExecError`] taxonomy; recoverable variants carry
    /// exactly what the caller needs to correct the request.
    pub async fn run(
        &self,
        command_name: &str,
        raw_parameters: &BTreeMap<String, String>,
    ) -> Result<ExecutionResult, ExecError> {
        let def = self.registry.lookup(command_name)?;

        // A parameter the definition does not declare is rejected, not
        // ignored: silent extras would mask caller bugs.
        for supplied in raw_parameters.keys() {
            if !def.parameters.contains_key(supplied) {
                return Err(ParameterError::Undeclared {
                    parameter: supplied.clone(),
                }
                .into());
            }
        }

        let mut validated: BTreeMap<String, ValidatedValue> = BTreeMap::new();
        for (name, spec) in &def.parameters {
            let raw = raw_parameters.get(name).map(String::as_str);
            if let Some(value) = validate(name, spec, raw)? {
                validated.insert(name.clone(), value);
            }
        }

        let argv = render(def, &validated).map_err(|err| {
            // Unreachable after validation above; a hit means the
            // pipeline contract was broken somewhere.
            tracing::error!(command = command_name, error = %err, "render contract violation");
            err
        })?;

        tracing::info!(command = command_name, argv = %argv, "executing allowlisted command");

        let mut session = self.session.lock().await;
        session.ensure_ready().await?;
        let out = session.execute(&argv, self.command_timeout).await?;
        drop(session);

        tracing::info!(
            command = command_name,
            exit_code = out.exit_code,
            duration_ms = u64::try_from(out.duration.as_millis()).unwrap_or(u64::MAX),
            timed_out = out.timed_out,
            truncated = out.truncated,
            "command completed",
        );

        Ok(ExecutionResult {
            command_name: command_name.to_string(),
            argv,
            exit_code: out.exit_code,
            stdout: out.stdout,
            stderr: out.stderr,
            duration_ms: u64::try_from(out.duration.as_millis()).unwrap_or(u64::MAX),
            timed_out: out.timed_out,
            truncated: out.truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SshTarget;
    use crate::error::{RegistryError, SessionError};
    use crate::session::test_support::FakeRunner;
    use std::path::PathBuf;

    fn target() -> SshTarget {
        SshTarget {
            host: "diag-host".to_string(),
            port: 22,
            user: "ops".to_string(),
            key_path: PathBuf::from("/keys/id_ed25519"),
            known_hosts: None,
        }
    }

    fn executor(runner: &FakeRunner) -> Executor<&FakeRunner> {
        let registry = Arc::new(Registry::builtin().expect("builtin"));
        Executor::new(registry, SshSession::new(target(), runner))
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Full pipeline
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn end_to_end_disk_usage_path() {
        let runner = FakeRunner::new(vec![
            FakeRunner::ok(0, "", ""),
            FakeRunner::ok(0, "Filesystem Size Used Avail\n/dev/sda1 50G 20G 30G\n", ""),
        ]);
        let exec = executor(&runner);
        let result = exec
            .run("disk_usage_path", &params(&[("path", "/var/log")]))
            .await
            .expect("run");
        assert_eq!(result.command_name, "disk_usage_path");
        assert_eq!(result.argv.as_slice(), ["df", "-h", "/var/log"]);
        assert_eq!(result.exit_code, 0);
        assert!(result.success());
        assert!(result.stdout.contains("/dev/sda1"));
    }

    #[tokio::test]
    async fn unknown_command_performs_no_io() {
        let runner = FakeRunner::succeeding();
        let exec = executor(&runner);
        let err = exec.run("does_not_exist", &params(&[])).await.unwrap_err();
        assert!(matches!(
            err,
            ExecError::Registry(RegistryError::UnknownCommand(_))
        ));
        assert_eq!(runner.call_count(), 0, "no network I/O for unknown commands");
    }

    #[tokio::test]
    async fn injection_attempt_is_rejected_before_any_invocation() {
        let runner = FakeRunner::succeeding();
        let exec = executor(&runner);
        let err = exec
            .run("disk_usage_path", &params(&[("path", "/var/log; id")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Parameter(_)));
        assert!(err.is_recoverable());
        assert_eq!(runner.call_count(), 0, "zero remote invocations");
    }

    #[tokio::test]
    async fn missing_required_parameter_is_reported_by_name() {
        let runner = FakeRunner::succeeding();
        let exec = executor(&runner);
        let err = exec.run("disk_usage_path", &params(&[])).await.unwrap_err();
        match err {
            ExecError::Parameter(ParameterError::Missing(name)) => assert_eq!(name, "path"),
            other => panic!("expected Missing, got {other:?}"),
        }
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn undeclared_parameter_is_rejected() {
        let runner = FakeRunner::succeeding();
        let exec = executor(&runner);
        let err = exec
            .run("memory_usage", &params(&[("path", "/etc")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecError::Parameter(ParameterError::Undeclared { .. })
        ));
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn session_errors_surface_through_run() {
        let refused =
            || FakeRunner::ok(255, "", "ssh: connect to host diag-host port 22: Connection refused");
        let runner = FakeRunner::new(vec![refused(), refused(), refused()]);
        let exec = executor(&runner);
        let err = exec.run("hostname", &params(&[])).await.unwrap_err();
        assert!(matches!(
            err,
            ExecError::Session(SessionError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn timed_out_command_is_a_result_not_an_error() {
        let runner = FakeRunner::new(vec![FakeRunner::ok(0, "", ""), FakeRunner::timeout()]);
        let exec = executor(&runner);
        let result = exec.run("uptime", &params(&[])).await.expect("completes");
        assert!(result.timed_out);
        assert!(!result.success());
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn concurrent_calls_serialize_on_the_session() {
        let runner = FakeRunner::succeeding();
        let exec = Arc::new(executor(&runner));

        // Both calls share one session; the mutex must serialize them
        // and each must get its own correctly-attributed result.
        let params_a = params(&[]);
        let params_b = params(&[]);
        let (a, b) = tokio::join!(
            exec.run("hostname", &params_a),
            exec.run("uptime", &params_b),
        );
        let a = a.expect("first call");
        let b = b.expect("second call");
        assert_eq!(a.command_name, "hostname");
        assert_eq!(b.command_name, "uptime");

        // One ready probe plus two executions, never interleaved:
        // every recorded invocation is a complete ssh argv.
        let calls = runner.calls.lock().expect("lock");
        assert_eq!(calls.len(), 3);
        for call in calls.iter() {
            assert_eq!(call[0], "ssh");
        }
    }

    #[tokio::test]
    async fn session_state_is_reported() {
        let runner = FakeRunner::succeeding();
        let exec = executor(&runner);
        assert_eq!(exec.session_state().await, SessionState::Disconnected);
        exec.run("hostname", &params(&[])).await.expect("run");
        assert_eq!(exec.session_state().await, SessionState::Ready);
    }
}
