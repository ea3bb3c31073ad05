//! Configuration management for voxagent.
//!
//! This module provides core configuration that doesn't depend on
//! platform-specific UI libraries. The hotkey is kept as a string and parsed
//! by the application.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{APP_NAME, PermissionConfig};

/// Which vendor answers chat requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatProvider {
    #[default]
    Openai,
    Anthropic,
}

/// Core configuration structure for the application.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// OpenAI API key, used for transcription and OpenAI chat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_key: Option<String>,

    /// Anthropic API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_key: Option<String>,

    /// Vendor used for command and agent requests
    #[serde(default, skip_serializing_if = "is_default_provider")]
    pub chat_provider: ChatProvider,

    /// Chat model name, vendor default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_model: Option<String>,

    /// Model to use for transcriptions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcribe_model: Option<String>,

    /// Preferred language for transcription (ISO 639-1 code)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Hotkey configuration (stored as string, parsed by app)
    /// Format: "modifier+modifier+key" e.g., "ctrl+shift+space"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotkey: Option<String>,

    /// Hold longer than this (ms) to dictate
    #[serde(default = "default_press_ms", skip_serializing_if = "is_default_press_ms")]
    pub long_press_ms: u64,

    /// A second press within this window (ms) selects agent mode
    #[serde(default = "default_press_ms", skip_serializing_if = "is_default_press_ms")]
    pub double_press_ms: u64,

    /// Discard recordings under this duration (in seconds)
    #[serde(
        default = "default_discard_duration",
        skip_serializing_if = "is_default_discard_duration"
    )]
    pub discard_duration: f32,

    /// Command and agent recordings stop on their own after this many seconds
    #[serde(
        default = "default_max_recording_secs",
        skip_serializing_if = "is_default_max_recording_secs"
    )]
    pub max_recording_secs: u64,

    /// Timeout for transcription and chat requests (in seconds)
    #[serde(
        default = "default_request_timeout_secs",
        skip_serializing_if = "is_default_request_timeout_secs"
    )]
    pub request_timeout_secs: u64,

    /// A single tool call is abandoned after this many seconds
    #[serde(
        default = "default_tool_timeout_secs",
        skip_serializing_if = "is_default_tool_timeout_secs"
    )]
    pub tool_timeout_secs: u64,

    /// Ask the chat model when no intent rule matches
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub llm_intent_fallback: bool,

    /// Restore the clipboard contents after typing text
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub restore_clipboard: bool,

    /// Tool permission tiers allowed to run
    #[serde(default, skip_serializing_if = "is_default_permissions")]
    pub permissions: PermissionConfig,
}

fn default_true() -> bool {
    true
}

fn is_true(v: &bool) -> bool {
    *v
}

fn is_default_provider(v: &ChatProvider) -> bool {
    *v == ChatProvider::default()
}

fn default_press_ms() -> u64 {
    300
}

fn is_default_press_ms(v: &u64) -> bool {
    *v == default_press_ms()
}

fn default_discard_duration() -> f32 {
    0.3
}

fn is_default_discard_duration(v: &f32) -> bool {
    (*v - default_discard_duration()).abs() < f32::EPSILON
}

fn default_max_recording_secs() -> u64 {
    15
}

fn is_default_max_recording_secs(v: &u64) -> bool {
    *v == default_max_recording_secs()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn is_default_request_timeout_secs(v: &u64) -> bool {
    *v == default_request_timeout_secs()
}

fn default_tool_timeout_secs() -> u64 {
    60
}

fn is_default_tool_timeout_secs(v: &u64) -> bool {
    *v == default_tool_timeout_secs()
}

fn is_default_permissions(v: &PermissionConfig) -> bool {
    *v == PermissionConfig::default()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_key: None,
            anthropic_key: None,
            chat_provider: ChatProvider::default(),
            chat_model: None,
            transcribe_model: None,
            language: None,
            hotkey: None,
            long_press_ms: default_press_ms(),
            double_press_ms: default_press_ms(),
            discard_duration: default_discard_duration(),
            max_recording_secs: default_max_recording_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            llm_intent_fallback: true,
            restore_clipboard: true,
            permissions: PermissionConfig::default(),
        }
    }
}

impl Config {
    /// Get the OpenAI API key
    pub fn key_openai(&self) -> Option<&str> {
        self.openai_key.as_deref()
    }

    /// Get the Anthropic API key
    pub fn key_anthropic(&self) -> Option<&str> {
        self.anthropic_key.as_deref()
    }

    /// Key for whichever vendor is configured for chat
    pub fn chat_key(&self) -> Option<&str> {
        match self.chat_provider {
            ChatProvider::Openai => self.key_openai(),
            ChatProvider::Anthropic => self.key_anthropic(),
        }
    }

    /// Get the preferred language
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn long_press(&self) -> Duration {
        Duration::from_millis(self.long_press_ms)
    }

    pub fn double_press(&self) -> Duration {
        Duration::from_millis(self.double_press_ms)
    }

    /// Get the discard duration as a Duration
    pub fn discard_duration(&self) -> Duration {
        Duration::from_secs_f32(self.discard_duration.max(0.0))
    }

    pub fn max_recording(&self) -> Duration {
        Duration::from_secs(self.max_recording_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Manages loading and saving configuration files.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager with the default configuration directory.
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Creates a new ConfigManager with a specified configuration directory.
    pub fn with_config_dir<P: AsRef<std::path::Path>>(dir: P) -> Self {
        let config_path = dir.as_ref().join(format!("{}.toml", APP_NAME));
        Self { config_path }
    }

    /// Returns the default path to the configuration file.
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to retrieve configuration directory")?;
        Ok(config_dir.join(APP_NAME).join(format!("{}.toml", APP_NAME)))
    }

    /// Loads the configuration from the config file or returns default.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config file at {:?}", self.config_path))?;

        let config: Config = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file at {:?}", self.config_path))?;

        if config.key_openai().is_none() {
            warn!(
                "OpenAI API key is not set. Transcriptions will not work without it. \
                 Copy the config path via the tray icon to set the key."
            );
        }
        if config.chat_key().is_none() {
            warn!(
                provider = ?config.chat_provider,
                "No API key for the chat provider. Command and agent modes will fail."
            );
        }

        Ok(config)
    }

    /// Saves the configuration to the config file.
    pub fn save(&self, config: &Config) -> Result<()> {
        let config_dir = self
            .config_path
            .parent()
            .with_context(|| format!("Failed to get parent directory of {:?}", self.config_path))?;

        fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config directory at {:?}", config_dir))?;

        let serialized =
            toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, serialized)
            .with_context(|| format!("Failed to write config file at {:?}", self.config_path))?;

        Ok(())
    }

    /// Returns the path to the configuration file.
    pub fn config_path(&self) -> &std::path::Path {
        &self.config_path
    }
}
