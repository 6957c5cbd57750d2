//! Session observers - pub/sub for external collaborators
//!
//! The session pushes events as they happen: audio, display and progress
//! collaborators subscribe instead of polling session state every frame.

use crate::distribution::ContextKey;
use crate::record::TrialRecord;

/// Event emitted by a running session.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// Countdown before a block started.
    CountdownStarted { block: usize },
    /// A block began running trials.
    BlockStarted { block: usize, bundles: usize },
    /// A bundle's distribution was installed.
    BundleStarted {
        block: usize,
        bundle: usize,
        key: ContextKey,
        familiar: bool,
        length: usize,
    },
    /// The target was hit.
    Hit {
        alive_ms: u64,
        score_delta: u64,
        score: u64,
    },
    /// A trial finished and its record was queued for output.
    TrialCompleted(Box<TrialRecord>),
    /// Mandatory rest between blocks.
    RestStarted { completed_block: usize, score: u64 },
    /// Audio toggled by the participant.
    AudioToggled { enabled: bool },
    /// Cancelled; the in-flight trial was dropped.
    Cancelled { completed_trials: usize },
    /// All blocks done.
    Finished { trials: usize, score: u64 },
}

/// Observer that receives session events
pub trait SessionObserver: Send + Sync {
    /// Called when a session event occurs
    fn on_event(&self, event: &SessionEvent);
}

/// Function-based observer for simple cases
pub struct FnObserver<F: Fn(&SessionEvent) + Send + Sync>(pub F);

impl<F: Fn(&SessionEvent) + Send + Sync> SessionObserver for FnObserver<F> {
    fn on_event(&self, event: &SessionEvent) {
        (self.0)(event);
    }
}

/// Channel-based observer - sends events to a channel
pub struct ChannelObserver {
    sender: std::sync::mpsc::Sender<SessionEvent>,
}

impl ChannelObserver {
    pub fn new(sender: std::sync::mpsc::Sender<SessionEvent>) -> Self {
        Self { sender }
    }
}

impl SessionObserver for ChannelObserver {
    fn on_event(&self, event: &SessionEvent) {
        let _ = self.sender.send(event.clone());
    }
}
