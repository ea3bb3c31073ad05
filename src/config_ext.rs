//! App-specific configuration extensions.
//!
//! This module provides hotkey support on top of the core Config.

use std::str::FromStr;

use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use tracing::warn;

use crate::Config;
use crate::hotkey::Thresholds;

/// Default hotkey: Cmd+Shift+Space on macOS, Ctrl+Shift+Space elsewhere
pub fn default_hotkey() -> HotKey {
    #[cfg(target_os = "macos")]
    let modifier = Modifiers::META;
    #[cfg(not(target_os = "macos"))]
    let modifier = Modifiers::CONTROL;

    HotKey::new(Some(modifier | Modifiers::SHIFT), Code::Space)
}

/// Extension trait for Config to handle hotkeys.
pub trait ConfigExt {
    /// Get the hotkey, parsing from config or using default.
    fn hotkey(&self) -> HotKey;

    /// Gesture timing for the hotkey.
    fn thresholds(&self) -> Thresholds;
}

impl ConfigExt for Config {
    fn hotkey(&self) -> HotKey {
        let Some(spec) = self.hotkey.as_deref() else {
            return default_hotkey();
        };
        match HotKey::from_str(spec) {
            Ok(hotkey) => hotkey,
            Err(e) => {
                warn!(hotkey = spec, "Invalid hotkey in config, using default: {}", e);
                default_hotkey()
            }
        }
    }

    fn thresholds(&self) -> Thresholds {
        Thresholds {
            long_press: self.long_press(),
            double_press: self.double_press(),
        }
    }
}
