//! Status and redraw notifications for whatever is watching the session (a UI, or just the log).
//!
//! Notifications are fire-and-forget: if nobody is listening, or the listener
//! has fallen behind, the event is dropped rather than stalling the sender.

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::wire::Sentinel;

#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Configured { interval_ms: u64, mode: String },
    BatchQueued { name: String, samples: usize },
    BatchDropped { name: String },
    /// Sent after every processed sample, the cue to redraw
    SampleProcessed { name: String, index: usize, total: usize },
    BatchFinished { name: String, samples: usize },
    /// `None` when the session ended without a control frame (error or stop)
    SessionClosed { terminator: Option<Sentinel> },
}

#[derive(Debug, Clone, Default)]
pub struct Monitor {
    sender: Option<Sender<StatusEvent>>,
}

impl Monitor {
    /// A monitor and the receiving end of its events, buffering at most `capacity` of them
    pub fn channel(capacity: usize) -> (Self, Receiver<StatusEvent>) {
        let (sender, receiver) = bounded(capacity);
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn notify(&self, event: StatusEvent) {
        if let Some(sender) = &self.sender {
            // We don't care if this errors
            let _ = sender.try_send(event);
        }
    }
}
