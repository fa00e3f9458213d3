//! Remote session manager.
//!
//! The transport is the system OpenSSH client driven as a child
//! process: key-based authentication only, `BatchMode` (never
//! interactive), no PTY, one non-interactive invocation per `execute`.
//! The rendered argument vector is re-joined with shell quoting so the
//! remote side receives each validated token as exactly one program
//! argument.
//!
//! State machine: `Disconnected → Connecting → Ready`; `Ready →
//! Disconnected` on close, timeout, or transport loss (re-established
//! lazily); any state `→ Failed` on authentication rejection, which is
//! terminal — retrying a bad credential wastes attempts and can trip
//! remote lockout policies.

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::AsyncReadExt;

use crate::config::{SshTarget, DEFAULT_CONNECT_TIMEOUT};
use crate::error::SessionError;
use crate::render::ArgumentVector;

/// Per-stream capture bound; output beyond this is dropped and the
/// result is flagged `truncated`.
pub const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Transient connection establishment is retried this many times with
/// exponential backoff. Command execution itself is never retried.
const CONNECT_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

// ── State ────────────────────────────────────────────────────────────────────

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ── Runner seam ──────────────────────────────────────────────────────────────

/// Raw outcome of one child process as the runner saw it.
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
    /// `None` when the process was killed before exiting normally.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

/// Child process execution with a hard deadline and guaranteed kill.
///
/// The production implementation spawns through tokio; test doubles
/// return canned results without spawning anything.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run `program` with `args`, killing it when `timeout` expires.
    ///
    /// # Errors
    ///
    /// Only spawn failures; a timeout is reported in-band.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> std::io::Result<RawOutput>;
}

/// Production runner. `tokio::time::timeout` around `.output().await`
/// does not kill the child when the deadline fires, so this uses
/// `tokio::select!` with an explicit `child.kill()`, and drains
/// stdout/stderr concurrently with `wait()` to avoid pipe deadlock
/// when the child writes more than the OS pipe buffer.
pub struct TokioProcessRunner;

impl CommandRunner for TokioProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> std::io::Result<RawOutput> {
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();

        tokio::select! {
            result = async {
                let (status, stdout, stderr) = tokio::join!(
                    child.wait(),
                    drain_capped(stdout_handle),
                    drain_capped(stderr_handle),
                );
                Ok(RawOutput {
                    exit_code: status?.code(),
                    stdout,
                    stderr,
                    timed_out: false,
                })
            } => result,
            () = tokio::time::sleep(timeout) => {
                let _ = child.kill().await;
                Ok(RawOutput {
                    exit_code: None,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    timed_out: true,
                })
            }
        }
    }
}

/// Capture one stream up to the cap, then keep reading to EOF and
/// discard the rest. The pipe must always be drained: a child that
/// writes more than the cap plus the OS pipe buffer would otherwise
/// block on write and never exit, turning a fast command into a
/// spurious deadline kill.
async fn drain_capped<H>(handle: Option<H>) -> Vec<u8>
where
    H: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut reader) = handle {
        // One byte past the cap so the decoder can tell that output
        // was cut.
        let cap = (MAX_CAPTURE_BYTES + 1) as u64;
        let _ = (&mut reader).take(cap).read_to_end(&mut buf).await;
        let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
    }
    buf
}

// ── Remote output ────────────────────────────────────────────────────────────

/// One remote invocation's outcome before the orchestrator attaches
/// the command name.
#[derive(Debug, Clone)]
pub struct RemoteOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
    pub truncated: bool,
}

/// Zero-argument connectivity check result for health tooling.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub reachable: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

// ── Session ──────────────────────────────────────────────────────────────────

/// One authenticated connection to the remote target.
///
/// Not a thread-safe transport: callers must serialize `execute`
/// (the orchestrator holds the session behind a `tokio::sync::Mutex`).
pub struct SshSession<R> {
    target: SshTarget,
    state: SessionState,
    runner: R,
    connect_timeout: Duration,
}

impl<R: CommandRunner> SshSession<R> {
    pub fn new(target: SshTarget, runner: R) -> Self {
        Self {
            target,
            state: SessionState::Disconnected,
            runner,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    /// Connects and authenticates if the session is not already ready.
    ///
    /// Transient failures are retried up to [`CONNECT_ATTEMPTS`] times
    /// with exponential backoff; authentication rejection is terminal.
    ///
    /// # Errors
    ///
    /// [`SessionError::Connection`] after retries are exhausted,
    /// [`SessionError::Authentication`] on rejection, and
    /// [`SessionError::Failed`] when a previous rejection already
    /// poisoned the session.
    pub async fn ensure_ready(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Ready => return Ok(()),
            SessionState::Failed => {
                return Err(SessionError::Failed {
                    target: self.target.to_string(),
                })
            }
            SessionState::Disconnected | SessionState::Connecting => {}
        }

        self.state = SessionState::Connecting;
        let mut last_reason = String::new();
        for attempt in 0..CONNECT_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BASE_DELAY * 2_u32.pow(attempt - 1)).await;
            }
            match self.connect_once().await {
                Ok(()) => {
                    tracing::debug!(remote = %self.target, "session ready");
                    self.state = SessionState::Ready;
                    return Ok(());
                }
                Err(SessionError::Authentication { target }) => {
                    tracing::error!(remote = %target, "authentication rejected; session failed");
                    self.state = SessionState::Failed;
                    return Err(SessionError::Authentication { target });
                }
                Err(err) => {
                    tracing::warn!(
                        remote = %self.target,
                        attempt = attempt + 1,
                        error = %err,
                        "connection attempt failed",
                    );
                    last_reason = err.to_string();
                }
            }
        }
        self.state = SessionState::Disconnected;
        Err(SessionError::Connection {
            target: self.target.to_string(),
            reason: last_reason,
        })
    }

    /// Runs the argument vector as a single non-interactive remote
    /// invocation under `timeout`.
    ///
    /// On deadline expiry the child is killed, the output carries
    /// `timed_out = true`, and the session degrades to `Disconnected`
    /// for lazy re-establishment — a timed-out call is a completed
    /// call, not an error.
    ///
    /// # Errors
    ///
    /// Transport failures (the ssh client's own exit code 255) and
    /// spawn failures. Remote non-zero exit codes are not errors.
    pub async fn execute(
        &mut self,
        argv: &ArgumentVector,
        timeout: Duration,
    ) -> Result<RemoteOutput, SessionError> {
        if self.state != SessionState::Ready {
            self.ensure_ready().await?;
        }

        let remote_command = shell_words::join(argv.as_slice());
        let args = self.ssh_args(&remote_command);
        tracing::debug!(remote = %self.target, command = %argv, "executing remote command");

        let start = Instant::now();
        let raw = self
            .runner
            .run("ssh", &args, timeout)
            .await
            .map_err(SessionError::Spawn)?;
        let duration = start.elapsed();

        if raw.timed_out {
            tracing::warn!(
                remote = %self.target,
                elapsed_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                "remote command hit its deadline; killed",
            );
            self.state = SessionState::Disconnected;
            return Ok(RemoteOutput {
                exit_code: -1,
                stdout: String::new(),
                stderr: String::new(),
                duration,
                timed_out: true,
                truncated: false,
            });
        }

        let exit_code = raw.exit_code.unwrap_or(-1);
        // 255 is the ssh client's own failure code; anything else came
        // from the remote command and is reported faithfully.
        if exit_code == 255 {
            self.state = SessionState::Disconnected;
            let reason = first_line(&raw.stderr);
            if is_auth_rejection(&reason) {
                self.state = SessionState::Failed;
                return Err(SessionError::Authentication {
                    target: self.target.to_string(),
                });
            }
            return Err(SessionError::Connection {
                target: self.target.to_string(),
                reason,
            });
        }

        let (stdout, out_cut) = decode_capped(&raw.stdout);
        let (stderr, err_cut) = decode_capped(&raw.stderr);
        Ok(RemoteOutput {
            exit_code,
            stdout,
            stderr,
            duration,
            timed_out: false,
            truncated: out_cut || err_cut,
        })
    }

    /// Single connection attempt, no retry: used by `ensure_ready` and
    /// the health probe.
    async fn connect_once(&self) -> Result<(), SessionError> {
        let args = self.ssh_args("true");
        let raw = self
            .runner
            .run("ssh", &args, self.connect_timeout)
            .await
            .map_err(SessionError::Spawn)?;

        if raw.timed_out {
            return Err(SessionError::Connection {
                target: self.target.to_string(),
                reason: format!(
                    "connection attempt timed out after {}s",
                    self.connect_timeout.as_secs()
                ),
            });
        }
        match raw.exit_code {
            Some(0) => Ok(()),
            _ => {
                let reason = first_line(&raw.stderr);
                if is_auth_rejection(&reason) {
                    Err(SessionError::Authentication {
                        target: self.target.to_string(),
                    })
                } else {
                    Err(SessionError::Connection {
                        target: self.target.to_string(),
                        reason,
                    })
                }
            }
        }
    }

    /// Measures a single connection attempt for health-check tooling.
    pub async fn probe(&mut self) -> ProbeReport {
        let start = Instant::now();
        match self.connect_once().await {
            Ok(()) => ProbeReport {
                reachable: true,
                latency_ms: Some(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)),
                error: None,
            },
            Err(err) => ProbeReport {
                reachable: false,
                latency_ms: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Scoped teardown. The transport is per-invocation, so closing is
    /// a state reset; a failed session stays failed.
    pub fn close(&mut self) {
        if self.state != SessionState::Failed {
            self.state = SessionState::Disconnected;
        }
    }

    /// Full ssh client argument list for one remote invocation.
    fn ssh_args(&self, remote_command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "PasswordAuthentication=no".to_string(),
            "-o".to_string(),
            "PreferredAuthentications=publickey".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
        ];
        match &self.target.known_hosts {
            Some(path) => {
                args.push("-o".to_string());
                args.push(format!("UserKnownHostsFile={}", path.display()));
                args.push("-o".to_string());
                args.push("StrictHostKeyChecking=yes".to_string());
            }
            None => {
                args.push("-o".to_string());
                args.push("StrictHostKeyChecking=accept-new".to_string());
            }
        }
        args.push("-p".to_string());
        args.push(self.target.port.to_string());
        args.push("-i".to_string());
        args.push(self.target.key_path.display().to_string());
        args.push("-T".to_string());
        args.push(self.target.destination());
        args.push("--".to_string());
        args.push(remote_command.to_string());
        args
    }
}

/// First stderr line, lossily decoded, for terse error reasons.
fn first_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .lines()
        .next()
        .unwrap_or("")
        .to_string()
}

fn is_auth_rejection(stderr_line: &str) -> bool {
    stderr_line.contains("Permission denied")
        || stderr_line.contains("Too many authentication failures")
}

/// Lossy decode capped at [`MAX_CAPTURE_BYTES`]; reports whether
/// anything was cut.
fn decode_capped(bytes: &[u8]) -> (String, bool) {
    let truncated = bytes.len() > MAX_CAPTURE_BYTES;
    let end = bytes.len().min(MAX_CAPTURE_BYTES);
    (String::from_utf8_lossy(&bytes[..end]).into_owned(), truncated)
}
