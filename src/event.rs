//! Application events for the tao event loop.

use voxagent_core::SessionState;

/// Events sent from the runtime to the tao event loop.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// The session moved to a new state
    StateChanged(SessionState),
}
