//! End-to-end pipeline tests against the public API: allowlist file →
//! registry → sanitizer → renderer → executor, with a scripted runner
//! standing in for the ssh client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use remex_core::{
    CommandRunner, ExecError, Executor, ParameterError, RawOutput, Registry, RegistryError,
    SshSession, SshTarget,
};

// ---------------------------------------------------------------------------
// Scripted runner
// ---------------------------------------------------------------------------

/// Minimal stand-in for the ssh client: records calls, answers with a
/// clean exit and canned stdout.
struct ScriptedRunner {
    stdout: &'static str,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    fn new(stdout: &'static str) -> Self {
        Self {
            stdout,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl CommandRunner for &ScriptedRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _timeout: Duration,
    ) -> std::io::Result<RawOutput> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().cloned());
        self.calls.lock().unwrap().push(call);
        Ok(RawOutput {
            exit_code: Some(0),
            stdout: self.stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
            timed_out: false,
        })
    }
}

fn target() -> SshTarget {
    SshTarget {
        host: "lab-host".to_string(),
        port: 22,
        user: "diag".to_string(),
        key_path: PathBuf::from("/keys/id_ed25519"),
        known_hosts: None,
    }
}

fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Allowlist file loading
// ---------------------------------------------------------------------------

const CUSTOM_ALLOWLIST: &str = r#"
commands:
  - name: journal_tail
    description: Tail the journal of a unit.
    category: service
    template: ["journalctl", "-u", "{unit}", "-n", "{lines}", "--no-pager"]
    parameters:
      unit:
        description: Unit name.
        rule:
          type: service_name
      lines:
        description: Line count.
        rule:
          type: integer
          min: 1
          max: 500
"#;

#[test]
fn allowlist_file_loads_and_validates() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("allowlist.yaml");
    std::fs::write(&path, CUSTOM_ALLOWLIST).unwrap();

    let registry = Registry::load_file(&path).expect("custom allowlist loads");
    assert_eq!(registry.len(), 1);
    let def = registry.lookup("journal_tail").expect("listed");
    assert_eq!(def.parameters.len(), 2);
}

#[test]
fn registry_placeholder_spec_bijection_holds_for_builtin() {
    let registry = Registry::builtin().expect("builtin");
    for def in registry.list(None) {
        for placeholder in def.placeholders() {
            assert!(
                def.parameters.contains_key(placeholder),
                "{}: placeholder {placeholder} without spec",
                def.name
            );
        }
        for parameter in def.parameters.keys() {
            assert!(
                def.placeholders().any(|p| p == parameter),
                "{}: parameter {parameter} never referenced",
                def.name
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Full pipeline through the executor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn custom_command_runs_through_the_full_pipeline() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("allowlist.yaml");
    std::fs::write(&path, CUSTOM_ALLOWLIST).unwrap();
    let registry = std::sync::Arc::new(Registry::load_file(&path).unwrap());

    let runner = ScriptedRunner::new("May 01 10:00:00 lab-host nginx[1]: started\n");
    let exec = Executor::new(registry, SshSession::new(target(), &runner));

    let result = exec
        .run("journal_tail", &params(&[("unit", "nginx"), ("lines", "50")]))
        .await
        .expect("run succeeds");

    assert_eq!(
        result.argv.as_slice(),
        ["journalctl", "-u", "nginx", "-n", "50", "--no-pager"]
    );
    assert!(result.success());
    assert!(result.stdout.contains("nginx"));

    // The remote command is the final ssh argument, joined from the
    // exact argv tokens.
    let calls = runner.calls.lock().unwrap();
    let last = calls.last().unwrap();
    assert_eq!(
        last.last().unwrap(),
        "journalctl -u nginx -n 50 --no-pager"
    );
}

#[tokio::test]
async fn hostile_parameters_never_reach_the_transport() {
    let registry = std::sync::Arc::new(Registry::builtin().unwrap());
    let runner = ScriptedRunner::new("");
    let exec = Executor::new(registry, SshSession::new(target(), &runner));

    let hostile = [
        "/var/log; rm -rf /",
        "/var/log && id",
        "$(reboot)",
        "`shutdown now`",
        "/var/log | tee /etc/passwd",
        "../../etc/shadow",
        "/var/log\nid",
    ];
    for value in hostile {
        let err = exec
            .run("disk_usage_path", &params(&[("path", value)]))
            .await
            .unwrap_err();
        assert!(
            matches!(err, ExecError::Parameter(ParameterError::ForbiddenCharacter { .. })
                | ExecError::Parameter(ParameterError::PathTraversal { .. })),
            "{value:?} should have been rejected, got: {err}"
        );
    }
    assert_eq!(runner.call_count(), 0, "no transport activity at all");
}

#[tokio::test]
async fn unknown_command_is_refused_without_io() {
    let registry = std::sync::Arc::new(Registry::builtin().unwrap());
    let runner = ScriptedRunner::new("");
    let exec = Executor::new(registry, SshSession::new(target(), &runner));

    let err = exec.run("reboot", &params(&[])).await.unwrap_err();
    assert!(matches!(
        err,
        ExecError::Registry(RegistryError::UnknownCommand(_))
    ));
    assert_eq!(runner.call_count(), 0);
}
