//! MCP tool implementations for the remex diagnostics server.
//!
//! Exposes read-only tools via the `rmcp` `#[tool]` macro:
//!   - `ping`
//!   - `server_status`
//!   - `probe_connection`
//!   - `list_commands`
//!   - `execute_command`
//!   - `check_service`
//!   - `check_disk`
//!   - `check_memory`
//!   - `check_path_size`
//!   - `system_overview`
//!
//! **Security constraint**: no tool accepts a raw command string, and
//! every parameter — no matter which tool supplied it — goes through
//! the core's sanitizer. There is no mutating tool.

use std::collections::BTreeMap;
use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::ServerInfo,
    tool, tool_handler, tool_router, ServerHandler,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use remex_core::{CommandCategory, CommandDefinition, ExecutionResult, ValidationRule};

use crate::state::AppState;

// ===================================================================
// Input structs
// ===================================================================

/// Input parameters for the `ping` tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PingInput {
    /// Optional message to echo back (default: "ping").
    pub message: Option<String>,
}

/// Input parameters for the `list_commands` tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListCommandsInput {
    /// Filter by category: system, disk, network, process, service, docker.
    pub category: Option<String>,
}

/// Input parameters for the `execute_command` tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteCommandInput {
    /// Name of the allowlisted command to execute (e.g. "disk_usage").
    pub command_name: String,
    /// Parameter values for commands that declare them
    /// (e.g. {"path": "/var/log"}).
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// Input parameters for the `check_service` tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CheckServiceInput {
    /// Name of the systemd service to check (e.g. "nginx", "docker").
    pub service_name: String,
}

/// Input parameters for the `check_path_size` tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CheckPathSizeInput {
    /// Path to check disk usage for (e.g. "/var/log", "/home").
    pub path: String,
}

// ===================================================================
// Output structs
// ===================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PingOutput {
    pub status: String,
    pub message: String,
    pub server: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStatusOutput {
    pub server: String,
    pub version: String,
    pub remote: String,
    pub session_state: String,
    pub available_commands: usize,
    pub categories: Vec<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterInfo {
    pub description: String,
    pub required: bool,
    pub rule: ValidationRule,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, ParameterInfo>,
}

impl From<&CommandDefinition> for CommandInfo {
    fn from(def: &CommandDefinition) -> Self {
        Self {
            name: def.name.clone(),
            description: def.description.clone(),
            category: def.category.to_string(),
            parameters: def
                .parameters
                .iter()
                .map(|(name, spec)| {
                    (
                        name.clone(),
                        ParameterInfo {
                            description: spec.description.clone(),
                            required: spec.required,
                            rule: spec.rule.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandListOutput {
    pub count: usize,
    pub commands: Vec<CommandInfo>,
}

/// Agent-facing execution record. The rendered argument vector is
/// included for audit; the raw session internals are not.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    pub success: bool,
    pub command: String,
    pub argv: Vec<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub truncated: bool,
}

impl From<ExecutionResult> for CommandOutput {
    fn from(result: ExecutionResult) -> Self {
        Self {
            success: result.success(),
            command: result.command_name.clone(),
            argv: result.argv.as_slice().to_vec(),
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
            duration_ms: result.duration_ms,
            timed_out: result.timed_out,
            truncated: result.truncated,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemOverviewOutput {
    pub success: bool,
    pub system: BTreeMap<String, String>,
}

// ===================================================================
// RemexTools — the MCP server handler
// ===================================================================

/// MCP server handler exposing the read-only diagnostic tools.
///
/// Holds a shared reference to [`AppState`] for registry lookups and
/// command execution.
#[derive(Clone)]
pub struct RemexTools {
    state: Arc<AppState>,
    tool_router: ToolRouter<Self>,
}

impl std::fmt::Debug for RemexTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemexTools")
            .field("state", &"<AppState>")
            .finish()
    }
}

impl RemexTools {
    /// Create a new `RemexTools` with the given application state.
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    /// Run one allowlisted command and serialize the outcome.
    async fn run_and_format(
        &self,
        command_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<String, String> {
        let result = self
            .state
            .executor()
            .run(command_name, parameters)
            .await
            .map_err(|e| e.to_string())?;
        let output = CommandOutput::from(result);
        serde_json::to_string_pretty(&output).map_err(|e| format!("serialization error: {e}"))
    }
}

// -------------------------------------------------------------------
// Tool implementations
// -------------------------------------------------------------------

#[tool_router]
impl RemexTools {
    /// Liveness check: echoes the optional message back. Costs no
    /// network I/O — useful before attempting remote commands.
    #[tool(description = "Test if the diagnostics server is responding. \
        Returns 'pong' plus any message you send.")]
    async fn ping(&self, params: Parameters<PingInput>) -> Result<String, String> {
        let output = PingOutput {
            status: "pong".to_string(),
            message: params.0.message.unwrap_or_else(|| "ping".to_string()),
            server: "remex".to_string(),
        };
        serde_json::to_string_pretty(&output).map_err(|e| format!("serialization error: {e}"))
    }

    /// Server and session status: configured remote, session state,
    /// registry size, and valid categories.
    #[tool(description = "Get the status of the diagnostics server and \
        its SSH session to the remote host.")]
    async fn server_status(&self) -> Result<String, String> {
        let output = ServerStatusOutput {
            server: "remex".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            remote: self.state.remote().to_string(),
            session_state: self.state.executor().session_state().await.to_string(),
            available_commands: self.state.registry().len(),
            categories: CommandCategory::ALL
                .iter()
                .map(|c| c.to_string())
                .collect(),
            started_at: self.state.started_at(),
        };
        serde_json::to_string_pretty(&output).map_err(|e| format!("serialization error: {e}"))
    }

    /// One connection attempt with measured latency; never retries.
    #[tool(description = "Probe SSH connectivity to the remote host. \
        Returns reachability, latency, and the failure reason if any.")]
    async fn probe_connection(&self) -> Result<String, String> {
        let report = self.state.executor().probe().await;
        serde_json::to_string_pretty(&report).map_err(|e| format!("serialization error: {e}"))
    }

    /// Discoverability: what the allowlist permits, with parameter
    /// contracts the agent can follow.
    #[tool(description = "List the allowlisted diagnostic commands, \
        optionally filtered by category. Use this before execute_command.")]
    async fn list_commands(&self, params: Parameters<ListCommandsInput>) -> Result<String, String> {
        let category = match &params.0.category {
            Some(raw) => Some(raw.parse::<CommandCategory>()?),
            None => None,
        };
        let commands: Vec<CommandInfo> = self
            .state
            .registry()
            .list(category)
            .map(CommandInfo::from)
            .collect();
        let output = CommandListOutput {
            count: commands.len(),
            commands,
        };
        serde_json::to_string_pretty(&output).map_err(|e| format!("serialization error: {e}"))
    }

    /// The single execution entry point: allowlisted name plus
    /// parameter values. Anything else is refused before any I/O.
    #[tool(description = "Execute an allowlisted command on the remote \
        host. Only pre-approved read-only commands can run; use \
        list_commands to see them and their parameters.")]
    async fn execute_command(
        &self,
        params: Parameters<ExecuteCommandInput>,
    ) -> Result<String, String> {
        let input = params.0;
        self.run_and_format(&input.command_name, &input.parameters)
            .await
    }

    /// Shortcut for `execute_command` with `service_status`.
    #[tool(description = "Check the status of a systemd service on the \
        remote host (e.g. nginx, docker, ssh).")]
    async fn check_service(&self, params: Parameters<CheckServiceInput>) -> Result<String, String> {
        let mut parameters = BTreeMap::new();
        parameters.insert("service_name".to_string(), params.0.service_name);
        self.run_and_format("service_status", &parameters).await
    }

    /// Shortcut for `execute_command` with `disk_usage`.
    #[tool(description = "Check disk usage for all mounted filesystems \
        on the remote host.")]
    async fn check_disk(&self) -> Result<String, String> {
        self.run_and_format("disk_usage", &BTreeMap::new()).await
    }

    /// Shortcut for `execute_command` with `memory_usage`.
    #[tool(description = "Check RAM and swap usage on the remote host.")]
    async fn check_memory(&self) -> Result<String, String> {
        self.run_and_format("memory_usage", &BTreeMap::new()).await
    }

    /// Shortcut for `execute_command` with `disk_usage_path`.
    #[tool(description = "Check disk usage for a specific path on the \
        remote host.")]
    async fn check_path_size(
        &self,
        params: Parameters<CheckPathSizeInput>,
    ) -> Result<String, String> {
        let mut parameters = BTreeMap::new();
        parameters.insert("path".to_string(), params.0.path);
        self.run_and_format("disk_usage_path", &parameters).await
    }

    /// Hostname, uptime, memory, and disk in one call — a quick
    /// health check without four round trips through the agent loop.
    #[tool(description = "Get a quick overview of the remote system: \
        hostname, uptime, memory, and disk usage in a single call.")]
    async fn system_overview(&self) -> Result<String, String> {
        let mut system = BTreeMap::new();
        for command in ["hostname", "uptime", "memory_usage", "disk_usage"] {
            let entry = match self.state.executor().run(command, &BTreeMap::new()).await {
                Ok(result) if result.success() => result.stdout.trim().to_string(),
                Ok(result) => format!(
                    "exit code {}{}",
                    result.exit_code,
                    if result.timed_out { " (timed out)" } else { "" },
                ),
                Err(err) => format!("error: {err}"),
            };
            system.insert(command.to_string(), entry);
        }
        let output = SystemOverviewOutput {
            success: true,
            system,
        };
        serde_json::to_string_pretty(&output).map_err(|e| format!("serialization error: {e}"))
    }
}

// -------------------------------------------------------------------
// ServerHandler implementation (via tool_handler macro)
// -------------------------------------------------------------------

#[tool_handler]
impl ServerHandler for RemexTools {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "remex — read-only remote diagnostics over SSH. \
                 Use list_commands to discover the allowlist, then \
                 execute_command to run one; everything else is refused."
                    .into(),
            ),
            ..Default::default()
        }
    }
}
