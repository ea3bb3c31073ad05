//! Core types and configuration for voxagent.
//!
//! This crate provides platform-agnostic types that are shared by the
//! capture, model and orchestration layers.

mod config;
mod intent;
mod message;
mod state;
mod tool;

pub use config::{ChatProvider, Config, ConfigManager};
pub use intent::{Intent, IntentKind};
pub use message::{ChatMessage, ChatResponse, Role};
pub use state::{SessionState, TriggerMode};
pub use tool::{PermissionConfig, PermissionTier, ToolCall, ToolDefinition, ToolResult};

/// Application name
pub const APP_NAME: &str = "voxagent";

/// Pretty application name for display
pub const APP_NAME_PRETTY: &str = "Voxagent";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";
