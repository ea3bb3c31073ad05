//! Tool call and permission types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How much trust a tool needs before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionTier {
    /// Text entry and clipboard
    Basic,
    /// Apps, URLs and files
    System,
    /// Arbitrary shell execution
    Dangerous,
}

impl fmt::Display for PermissionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PermissionTier::Basic => "basic",
            PermissionTier::System => "system",
            PermissionTier::Dangerous => "dangerous",
        })
    }
}

/// Which permission tiers may run without confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    pub basic: bool,
    pub system: bool,
    pub dangerous: bool,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            basic: true,
            system: true,
            dangerous: false,
        }
    }
}

impl PermissionConfig {
    pub fn allows(&self, tier: PermissionTier) -> bool {
        match tier {
            PermissionTier::Basic => self.basic,
            PermissionTier::System => self.system,
            PermissionTier::Dangerous => self.dangerous,
        }
    }
}

/// What a tool advertises to the chat model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the accepted arguments
    pub parameters: Value,
}

/// A model's request to run a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_permissions_deny_dangerous() {
        let permissions = PermissionConfig::default();
        assert!(permissions.allows(PermissionTier::Basic));
        assert!(permissions.allows(PermissionTier::System));
        assert!(!permissions.allows(PermissionTier::Dangerous));
    }

    #[test]
    fn test_tool_result_omits_empty_fields() {
        let json = serde_json::to_string(&ToolResult::ok(None)).unwrap();
        assert_eq!(json, r#"{"success":true}"#);

        let json = serde_json::to_string(&ToolResult::failed("boom")).unwrap();
        assert_eq!(json, r#"{"success":false,"error":"boom"}"#);
    }
}
