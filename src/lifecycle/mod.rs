//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! State (state.rs):
//!     New → Initialized → Running ⇄ Paused → Stopped → Destroyed
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → main stops connectors → destroy → exit
//! ```

pub mod signals;
pub mod state;

pub use state::LifecycleState;
