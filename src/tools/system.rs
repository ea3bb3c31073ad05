//! Apps, URLs, files and the shell.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::process::Command;
use tracing::debug;
use voxagent_core::PermissionTier;

use super::{Tool, ToolError, string_arg};

/// Relative paths are taken from the current directory.
fn resolve(path: &str) -> Result<PathBuf, ToolError> {
    if path.is_empty() {
        return Err(ToolError::InvalidArgument("path must not be empty".into()));
    }
    let path = Path::new(path);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn path_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": description },
        },
        "required": ["path"],
    })
}

/// Runs `command` to completion, failing on a non-zero exit status. The
/// child is killed if the returned future is dropped.
async fn run(mut command: Command) -> Result<std::process::Output, ToolError> {
    debug!(?command, "Running command");
    let output = command
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolError::Process(format!(
            "command exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(output)
}

/// Opens `target` with the platform's default handler.
fn open_command(target: &str) -> Command {
    #[cfg(target_os = "macos")]
    {
        let mut command = Command::new("open");
        command.arg(target);
        command
    }
    #[cfg(target_os = "windows")]
    {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]).arg(target);
        command
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        let mut command = Command::new("xdg-open");
        command.arg(target);
        command
    }
}

pub struct OpenAppTool;

#[async_trait]
impl Tool for OpenAppTool {
    fn name(&self) -> &str {
        "open_app"
    }

    fn description(&self) -> &str {
        "Open an application by name"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Application name" },
            },
            "required": ["name"],
        })
    }

    fn permission_tier(&self) -> PermissionTier {
        PermissionTier::System
    }

    async fn execute(&self, args: Value) -> Result<Option<Value>, ToolError> {
        let name = string_arg(&args, "name")?;
        if name.trim().is_empty() {
            return Err(ToolError::InvalidArgument("name must not be empty".into()));
        }

        #[cfg(target_os = "macos")]
        let command = {
            let mut command = Command::new("open");
            command.arg("-a").arg(name);
            command
        };
        #[cfg(not(target_os = "macos"))]
        let command = open_command(name);

        run(command).await?;
        Ok(None)
    }
}

pub struct OpenUrlTool;

#[async_trait]
impl Tool for OpenUrlTool {
    fn name(&self) -> &str {
        "open_url"
    }

    fn description(&self) -> &str {
        "Open a URL in the default browser"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The URL to open" },
            },
            "required": ["url"],
        })
    }

    fn permission_tier(&self) -> PermissionTier {
        PermissionTier::System
    }

    async fn execute(&self, args: Value) -> Result<Option<Value>, ToolError> {
        let url = string_arg(&args, "url")?;
        if !(url.contains("://") || url.starts_with("mailto:")) {
            return Err(ToolError::InvalidArgument(format!("not a URL: {}", url)));
        }
        run(open_command(url)).await?;
        Ok(None)
    }
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file"
    }

    fn parameters(&self) -> Value {
        path_schema("Path of the file")
    }

    fn permission_tier(&self) -> PermissionTier {
        PermissionTier::System
    }

    async fn execute(&self, args: Value) -> Result<Option<Value>, ToolError> {
        let path = resolve(string_arg(&args, "path")?)?;
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Some(Value::String(content)))
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text to a file, creating parent directories as needed"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path of the file" },
                "content": { "type": "string", "description": "Text to write" },
            },
            "required": ["path", "content"],
        })
    }

    fn permission_tier(&self) -> PermissionTier {
        PermissionTier::System
    }

    async fn execute(&self, args: Value) -> Result<Option<Value>, ToolError> {
        let path = resolve(string_arg(&args, "path")?)?;
        let content = string_arg(&args, "content")?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(None)
    }
}

pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory"
    }

    fn parameters(&self) -> Value {
        path_schema("Path of the directory")
    }

    fn permission_tier(&self) -> PermissionTier {
        PermissionTier::System
    }

    async fn execute(&self, args: Value) -> Result<Option<Value>, ToolError> {
        let path = resolve(string_arg(&args, "path")?)?;
        let mut entries = tokio::fs::read_dir(&path).await?;

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let kind = if entry.file_type().await?.is_dir() {
                "directory"
            } else {
                "file"
            };
            items.push((entry.file_name().to_string_lossy().into_owned(), kind));
        }
        items.sort();

        let items = items
            .into_iter()
            .map(|(name, kind)| json!({ "name": name, "type": kind }))
            .collect();
        Ok(Some(Value::Array(items)))
    }
}

/// Runs a command line through the platform shell.
pub struct RunShellTool;

#[async_trait]
impl Tool for RunShellTool {
    fn name(&self) -> &str {
        "run_shell"
    }

    fn description(&self) -> &str {
        "Run a shell command (dangerous, requires permission)"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The command to run" },
                "cwd": { "type": "string", "description": "Working directory (optional)" },
            },
            "required": ["command"],
        })
    }

    fn permission_tier(&self) -> PermissionTier {
        PermissionTier::Dangerous
    }

    async fn execute(&self, args: Value) -> Result<Option<Value>, ToolError> {
        let line = string_arg(&args, "command")?;

        #[cfg(target_os = "windows")]
        let mut command = {
            let mut command = Command::new("cmd");
            command.arg("/C").arg(line);
            command
        };
        #[cfg(not(target_os = "windows"))]
        let mut command = {
            let mut command = Command::new("sh");
            command.arg("-c").arg(line);
            command
        };

        if let Some(cwd) = args.get("cwd").and_then(Value::as_str) {
            command.current_dir(resolve(cwd)?);
        }

        let output = run(command).await?;
        Ok(Some(json!({
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        })))
    }
}
