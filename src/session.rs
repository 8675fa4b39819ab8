//! Session lifecycle shared by both ends of a transfer

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::{debug, warn};

use crate::wire::Sentinel;

/// Where a transfer session is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    /// Sending (producer) or awaiting (consumer) the config frame
    Config,
    Streaming,
    /// A terminating control frame was sent or received
    Draining(Sentinel),
    Closed,
}

impl SessionState {
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, target),
            (Connecting, Config)
                | (Config, Streaming)
                | (Streaming, Draining(_))
                | (Draining(_), Closed)
                // Any I/O failure closes the session on the spot
                | (Connecting | Config | Streaming, Closed)
        )
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Connecting => "Connecting",
            Self::Config => "Config",
            Self::Streaming => "Streaming",
            Self::Draining(_) => "Draining",
            Self::Closed => "Closed",
        }
    }
}

/// Tracks one session's state and logs its transitions
#[derive(Debug)]
pub struct Session {
    role: &'static str,
    state: SessionState,
}

impl Session {
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn advance(&mut self, next: SessionState) {
        if self.state.can_transition_to(&next) {
            debug!(role = self.role, from = self.state.name(), to = next.name(), "Session transition");
        } else {
            warn!(role = self.role, from = self.state.name(), to = next.name(), "Unexpected session transition");
        }
        self.state = next;
    }

    /// Move to `Closed` unless already there
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            self.advance(SessionState::Closed);
        }
    }
}

/// Cooperative cancellation, honored only at frame and batch boundaries
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
