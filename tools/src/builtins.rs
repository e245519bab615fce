//! Built-in tools: `read_file`, `write_file`, `run_command`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::process::{ChildGuard, set_new_session};
use crate::{
    ApprovalPolicy, RiskLevel, ToolCtx, ToolDescriptor, ToolError, ToolExecutor, ToolFut,
    ToolRegistry, parse_args,
};

pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const RUN_COMMAND: &str = "run_command";

/// Commands that never modify state when run without shell operators.
const READ_ONLY_COMMANDS: &[&str] = &[
    "ls", "pwd", "cat", "head", "tail", "wc", "echo", "whoami", "date", "which", "file", "stat",
    "tree", "du", "df", "uname",
];
const READ_ONLY_GIT_SUBCOMMANDS: &[&str] = &["status", "log", "diff", "show", "branch", "blame"];

/// Register every built-in tool.
pub fn register_builtins(registry: &mut ToolRegistry) -> Result<(), ToolError> {
    registry.register(read_file_tool()?)?;
    registry.register(write_file_tool()?)?;
    registry.register(run_command_tool()?)?;
    Ok(())
}

#[must_use]
fn resolve_path(ctx: &ToolCtx, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        ctx.working_dir.join(path)
    }
}

// ============================================================================
// read_file
// ============================================================================

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
    /// 1-indexed first line.
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

struct ReadFileTool;

impl ToolExecutor for ReadFileTool {
    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ReadFileArgs = parse_args(&args)?;
            let path = resolve_path(ctx, &typed.path);
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| ToolError::failed(READ_FILE, format!("{}: {e}", path.display())))?;

            if typed.offset.is_none() && typed.limit.is_none() {
                return Ok(content);
            }
            let start = typed.offset.unwrap_or(1).saturating_sub(1);
            let lines = content.lines().skip(start);
            let selected: Vec<&str> = match typed.limit {
                Some(limit) => lines.take(limit).collect(),
                None => lines.collect(),
            };
            Ok(selected.join("\n"))
        })
    }
}

pub fn read_file_tool() -> Result<ToolDescriptor, ToolError> {
    ToolDescriptor::new(
        READ_FILE,
        "Read a text file. Optional 1-indexed `offset` and `limit` select a line range.",
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, absolute or relative to the working directory." },
                "offset": { "type": "integer", "minimum": 1 },
                "limit": { "type": "integer", "minimum": 1 }
            },
            "required": ["path"]
        }),
        Arc::new(ReadFileTool),
    )
    .with_schema_validation()
}

// ============================================================================
// write_file
// ============================================================================

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

struct WriteFileTool;

impl ToolExecutor for WriteFileTool {
    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: WriteFileArgs = parse_args(&args)?;
            let path = resolve_path(ctx, &typed.path);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ToolError::failed(WRITE_FILE, format!("{}: {e}", parent.display()))
                })?;
            }
            tokio::fs::write(&path, typed.content.as_bytes())
                .await
                .map_err(|e| ToolError::failed(WRITE_FILE, format!("{}: {e}", path.display())))?;
            Ok(format!(
                "Wrote {} bytes to {}",
                typed.content.len(),
                path.display()
            ))
        })
    }
}

pub fn write_file_tool() -> Result<ToolDescriptor, ToolError> {
    Ok(ToolDescriptor::new(
        WRITE_FILE,
        "Create or overwrite a file with the given content.",
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        }),
        Arc::new(WriteFileTool),
    )
    .with_schema_validation()?
    .requires_approval(true)
    .file_mutating())
}

// ============================================================================
// run_command
// ============================================================================

#[derive(Debug, Deserialize)]
struct RunCommandArgs {
    command: String,
}

/// True for a single read-only command with no shell operators.
#[must_use]
pub fn is_read_only_command(command: &str) -> bool {
    let command = command.trim();
    if command.is_empty()
        || command
            .chars()
            .any(|c| matches!(c, ';' | '|' | '&' | '>' | '<' | '$' | '`' | '\n'))
    {
        return false;
    }
    let mut words = command.split_whitespace();
    match words.next() {
        Some("git") => words
            .next()
            .is_some_and(|sub| READ_ONLY_GIT_SUBCOMMANDS.contains(&sub)),
        Some(program) => READ_ONLY_COMMANDS.contains(&program),
        None => false,
    }
}

struct RunCommandTool;

impl ToolExecutor for RunCommandTool {
    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: RunCommandArgs = parse_args(&args)?;
            if typed.command.trim().is_empty() {
                return Err(ToolError::BadArgs {
                    message: "command must not be empty".to_string(),
                });
            }

            let mut command = Command::new("sh");
            command
                .arg("-c")
                .arg(&typed.command)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .current_dir(&ctx.working_dir);
            set_new_session(&mut command);

            let mut child = command
                .spawn()
                .map_err(|e| ToolError::failed(RUN_COMMAND, e.to_string()))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| ToolError::failed(RUN_COMMAND, "Failed to capture stdout"))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| ToolError::failed(RUN_COMMAND, "Failed to capture stderr"))?;
            let mut guard = ChildGuard::new(child);
            tracing::debug!(call_id = %ctx.tool_call_id, command = %typed.command, "spawned command");

            let stdout_task = tokio::spawn(read_stream(stdout));
            let stderr_task = tokio::spawn(read_stream(stderr));

            let Some(child) = guard.child_mut() else {
                return Err(ToolError::failed(RUN_COMMAND, "child already released"));
            };
            let status = tokio::select! {
                biased;
                // The guard kills the process group as it drops on return.
                () = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
                status = child.wait() => {
                    status.map_err(|e| ToolError::failed(RUN_COMMAND, e.to_string()))?
                }
            };
            guard.disarm();

            let stdout_content = stdout_task.await.unwrap_or_default();
            let stderr_content = stderr_task.await.unwrap_or_default();

            let mut output = stdout_content;
            if !stderr_content.trim().is_empty() {
                if !output.is_empty() {
                    output.push_str("\n\n");
                }
                output.push_str("[stderr]\n");
                output.push_str(&stderr_content);
            }

            if !status.success() {
                let exit_code = status.code().unwrap_or(-1);
                let message = if output.trim().is_empty() {
                    format!("exit code {exit_code}")
                } else {
                    format!("exit code {exit_code}\n\n{output}")
                };
                return Err(ToolError::failed(RUN_COMMAND, message));
            }
            Ok(output)
        })
    }
}

pub fn run_command_tool() -> Result<ToolDescriptor, ToolError> {
    Ok(ToolDescriptor::new(
        RUN_COMMAND,
        "Run a shell command in the working directory.",
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute." }
            },
            "required": ["command"]
        }),
        Arc::new(RunCommandTool),
    )
    .with_schema_validation()?
    .with_approval(ApprovalPolicy::predicate(|args| {
        args.get("command")
            .and_then(Value::as_str)
            .is_none_or(|command| !is_read_only_command(command))
    }))
    .with_risk(RiskLevel::High))
}

async fn read_stream<R: AsyncRead + Unpin + Send + 'static>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(err) = reader.read_to_end(&mut buf).await {
        tracing::warn!(%err, bytes = buf.len(), "command output read failed");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
