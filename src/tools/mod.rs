//! Tools the chat model may call, and the registry that runs them.

mod basic;
mod desktop;
mod system;

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
pub use basic::{PasteTextTool, ReadClipboardTool, TypeTextTool};
pub use desktop::Desktop;
use futures_util::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
pub use system::{ListDirTool, OpenAppTool, OpenUrlTool, ReadFileTool, RunShellTool, WriteFileTool};
use thiserror::Error;
use tracing::{debug, info, warn};
use voxagent_core::{PermissionTier, ToolDefinition, ToolResult};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("clipboard error: {0}")]
    Clipboard(String),
    #[error("keyboard error: {0}")]
    Keyboard(String),
    #[error("{0}")]
    Process(String),
    #[error("the desktop thread is no longer running")]
    DesktopGone,
}

/// A local capability the chat model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique key in the registry.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments.
    fn parameters(&self) -> Value;

    fn permission_tier(&self) -> PermissionTier;

    /// Run the tool. `Ok(None)` means success with nothing to report.
    async fn execute(&self, args: Value) -> Result<Option<Value>, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameters(),
        }
    }
}

/// Name to tool mapping. Does no permission checks of its own.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `tool`, replacing any tool of the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_owned();
        if self.tools.write().insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "Tool already registered, overwriting");
        } else {
            debug!(tool = %name, "Tool registered");
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    /// Definitions of every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.read().values().map(|t| t.definition()).collect()
    }

    /// Runs a tool by name. Unknown names, tool errors and panics all come
    /// back as a failed [`ToolResult`].
    pub async fn execute(&self, name: &str, args: Value) -> ToolResult {
        let Some(tool) = self.get(name) else {
            warn!(tool = %name, "Tool not found");
            return ToolResult::failed(format!("tool \"{}\" not found", name));
        };

        match AssertUnwindSafe(tool.execute(args)).catch_unwind().await {
            Ok(Ok(data)) => {
                info!(tool = %name, "Tool succeeded");
                ToolResult::ok(data)
            }
            Ok(Err(e)) => {
                warn!(tool = %name, "Tool failed: {}", e);
                ToolResult::failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(tool = %name, "Tool panicked: {}", message);
                ToolResult::failed(message)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".to_owned()
    }
}

/// Registers every built-in tool.
pub fn register_builtin_tools(registry: &ToolRegistry, desktop: &Desktop, restore_clipboard: bool) {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(TypeTextTool::new(desktop.clone(), restore_clipboard)),
        Arc::new(PasteTextTool::new(desktop.clone())),
        Arc::new(ReadClipboardTool::new(desktop.clone())),
        Arc::new(OpenAppTool),
        Arc::new(OpenUrlTool),
        Arc::new(ReadFileTool),
        Arc::new(WriteFileTool),
        Arc::new(ListDirTool),
        Arc::new(RunShellTool),
    ];
    for tool in tools {
        registry.register(tool);
    }
    info!(count = registry.definitions().len(), "Built-in tools registered");
}

/// Reads a required string argument.
fn string_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArgument(format!("{} must be a string", key)))
}
