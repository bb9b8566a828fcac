//! Daemon internals: the recovery state machine, the in-memory protection
//! state, and the watch/schedule loop. Exposed as a library so the
//! integration tests can drive evaluation cycles directly.

pub mod recovery;
pub mod state;
pub mod watch;
