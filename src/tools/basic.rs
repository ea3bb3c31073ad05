//! Text entry and clipboard tools.

use async_trait::async_trait;
use serde_json::{Value, json};
use voxagent_core::PermissionTier;

use super::{Desktop, Tool, ToolError, string_arg};

fn text_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "text": { "type": "string", "description": description },
        },
        "required": ["text"],
    })
}

/// Types text at the caret by pasting it, optionally restoring the
/// clipboard afterwards.
pub struct TypeTextTool {
    desktop: Desktop,
    restore_clipboard: bool,
}

impl TypeTextTool {
    pub fn new(desktop: Desktop, restore_clipboard: bool) -> Self {
        Self {
            desktop,
            restore_clipboard,
        }
    }
}

#[async_trait]
impl Tool for TypeTextTool {
    fn name(&self) -> &str {
        "type_text"
    }

    fn description(&self) -> &str {
        "Type text at the current cursor position"
    }

    fn parameters(&self) -> Value {
        text_schema("The text to type")
    }

    fn permission_tier(&self) -> PermissionTier {
        PermissionTier::Basic
    }

    async fn execute(&self, args: Value) -> Result<Option<Value>, ToolError> {
        let text = string_arg(&args, "text")?;
        self.desktop.paste(text, self.restore_clipboard).await?;
        Ok(None)
    }
}

/// Copies text to the clipboard and pastes it, leaving it on the clipboard.
pub struct PasteTextTool {
    desktop: Desktop,
}

impl PasteTextTool {
    pub fn new(desktop: Desktop) -> Self {
        Self { desktop }
    }
}

#[async_trait]
impl Tool for PasteTextTool {
    fn name(&self) -> &str {
        "paste_text"
    }

    fn description(&self) -> &str {
        "Copy text to the clipboard and paste it"
    }

    fn parameters(&self) -> Value {
        text_schema("The text to paste")
    }

    fn permission_tier(&self) -> PermissionTier {
        PermissionTier::Basic
    }

    async fn execute(&self, args: Value) -> Result<Option<Value>, ToolError> {
        let text = string_arg(&args, "text")?;
        self.desktop.paste(text, false).await?;
        Ok(None)
    }
}

pub struct ReadClipboardTool {
    desktop: Desktop,
}

impl ReadClipboardTool {
    pub fn new(desktop: Desktop) -> Self {
        Self { desktop }
    }
}

#[async_trait]
impl Tool for ReadClipboardTool {
    fn name(&self) -> &str {
        "read_clipboard"
    }

    fn description(&self) -> &str {
        "Read the text on the clipboard"
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn permission_tier(&self) -> PermissionTier {
        PermissionTier::Basic
    }

    async fn execute(&self, _args: Value) -> Result<Option<Value>, ToolError> {
        let text = self.desktop.read_text().await?;
        Ok(Some(Value::String(text)))
    }
}
