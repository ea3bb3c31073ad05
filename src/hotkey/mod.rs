//! Hotkey gesture recognition.
//!
//! [`GestureMachine`] is the pure recognizer; [`HotkeyTrigger`] drives it with
//! real edges and tokio timers and fans the results out to listeners.

mod gesture;
mod trigger;

pub use gesture::{GestureMachine, HotkeyState, Step, Thresholds, TimerId};
pub use trigger::{HotkeyTrigger, ReleaseListener, TriggerListener};
use voxagent_core::TriggerMode;

/// What a completed (or completing) gesture produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    /// A gesture selected a mode. Emitted once per gesture.
    Trigger(TriggerMode),
    /// The long press that started dictation has ended.
    Release,
}
