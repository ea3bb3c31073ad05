// Re-export from sub-crates
pub use voxagent_audio::{AudioClip, Capture, CaptureError, MicRecorder};
pub use voxagent_core::{
    APP_NAME, APP_NAME_PRETTY, ChatProvider, Config, ConfigManager, DEFAULT_LOG_LEVEL, SessionState, TriggerMode,
};
pub use voxagent_models::{
    AnthropicClient, AnthropicConfig, ChatError, ChatModel, OpenAIClient, OpenAIConfig,
    TranscribeError, Transcriber,
};

// App-specific modules
mod color;
pub mod config_ext;
pub mod event;
pub mod hotkey;
pub mod icon;
pub mod intent;
pub mod notify;
pub mod session;
pub mod tools;

// Version from this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
