//! When the listen socket gets bound.

/// Lifecycle phase asking whether to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Start,
}

/// Decides whether the listen socket is created at `init` or deferred to
/// `start`.
///
/// With `bind_on_init` the socket is held from `init` until `destroy`, and a
/// server-level stop only pauses accepting. Without it the socket lives
/// between `start` and `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindPolicy {
    bind_on_init: bool,
}

impl BindPolicy {
    pub const fn new(bind_on_init: bool) -> Self {
        Self { bind_on_init }
    }

    pub fn bind_on_init(&self) -> bool {
        self.bind_on_init
    }

    /// Whether `phase` should create the listen socket, given whether one is
    /// already bound.
    pub fn should_bind_now(&self, phase: Phase, bound: bool) -> bool {
        if bound {
            return false;
        }
        match phase {
            Phase::Init => self.bind_on_init,
            Phase::Start => true,
        }
    }

    /// Whether a server-level stop releases the socket, as opposed to only
    /// halting the acceptors.
    pub fn releases_on_stop(&self) -> bool {
        !self.bind_on_init
    }
}

impl Default for BindPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}
