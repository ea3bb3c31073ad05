//! Trigger modes and the observable session state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a hotkey gesture asked for the utterance to be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Long press: insert the transcript verbatim
    Dictation,
    /// Single short press: let the intent resolver decide
    Command,
    /// Double press: always hand the transcript to the model
    Agent,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Dictation => "dictation",
            TriggerMode::Command => "command",
            TriggerMode::Agent => "agent",
        }
    }

    /// Dictation capture ends on key release; the other modes end on an
    /// explicit stop or the recording limit.
    pub fn is_self_terminating(&self) -> bool {
        !matches!(self, TriggerMode::Dictation)
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single externally observable state of the session orchestrator.
///
/// Exactly one variant is active at a time. Presentation layers receive every
/// transition in order and should match on it exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Recording {
        mode: TriggerMode,
        elapsed_ms: u64,
    },
    Transcribing {
        mode: TriggerMode,
    },
    Thinking {
        transcript: String,
    },
    Executing {
        tool_name: String,
        step_index: usize,
        total_steps: usize,
    },
    Done {
        result_summary: String,
    },
    Error {
        message: String,
    },
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl SessionState {
    /// Short tag name, handy for logging and tooltips.
    pub fn tag(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Recording { .. } => "recording",
            SessionState::Transcribing { .. } => "transcribing",
            SessionState::Thinking { .. } => "thinking",
            SessionState::Executing { .. } => "executing",
            SessionState::Done { .. } => "done",
            SessionState::Error { .. } => "error",
        }
    }

    /// Done and error are followed by an automatic return to idle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done { .. } | SessionState::Error { .. })
    }

    /// Whether a new gesture may start a session from this state.
    pub fn accepts_trigger(&self) -> bool {
        matches!(self, SessionState::Idle) || self.is_terminal()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Recording { mode, elapsed_ms } => {
                write!(f, "Recording ({mode}) {:.1}s", *elapsed_ms as f64 / 1000.0)
            }
            SessionState::Transcribing { mode } => write!(f, "Transcribing ({mode})"),
            SessionState::Thinking { transcript } => write!(f, "Thinking: {transcript}"),
            SessionState::Executing {
                tool_name,
                step_index,
                total_steps,
            } => write!(f, "Running {tool_name} ({step_index}/{total_steps})"),
            SessionState::Done { result_summary } => write!(f, "Done: {result_summary}"),
            SessionState::Error { message } => write!(f, "Error: {message}"),
        }
    }
}
