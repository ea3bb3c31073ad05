//! Intent classification results.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Dictation,
    Command,
}

/// Whether an utterance should be typed out or acted upon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "type")]
    pub kind: IntentKind,
    /// In `0.0..=1.0`
    pub confidence: f32,
}

impl Intent {
    pub fn new(kind: IntentKind, confidence: f32) -> Self {
        Self {
            kind,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn dictation(confidence: f32) -> Self {
        Self::new(IntentKind::Dictation, confidence)
    }

    pub fn command(confidence: f32) -> Self {
        Self::new(IntentKind::Command, confidence)
    }

    pub fn is_command(&self) -> bool {
        self.kind == IntentKind::Command
    }
}
