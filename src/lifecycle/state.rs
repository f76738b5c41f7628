//! Endpoint lifecycle states.

use std::fmt;

/// Where an endpoint is in its `init → start → stop → destroy` cycle.
///
/// Transitions only move forward, except that a `Stopped` endpoint may be
/// started again and a `Paused` endpoint may be resumed. `Destroyed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed from configuration, nothing allocated.
    New,
    /// Initialized; the listen socket is bound if the bind policy asked for it.
    Initialized,
    /// Bound, with acceptors running.
    Running,
    /// Bound, acceptors halted.
    Paused,
    /// Acceptors halted and the listen socket released.
    Stopped,
    /// Backend resources released. Terminal.
    Destroyed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::New => write!(f, "NEW"),
            LifecycleState::Initialized => write!(f, "INITIALIZED"),
            LifecycleState::Running => write!(f, "RUNNING"),
            LifecycleState::Paused => write!(f, "PAUSED"),
            LifecycleState::Stopped => write!(f, "STOPPED"),
            LifecycleState::Destroyed => write!(f, "DESTROYED"),
        }
    }
}
