use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// "The session is ready to publish."
///
/// Shared between the session task (single writer) and the heartbeat task (reader). Readers
/// may observe a transition one cycle late; they never observe a torn or stale-forever value.
#[derive(Debug, Clone, Default)]
pub struct ReadinessFlag(Arc<AtomicBool>);

impl ReadinessFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Only session transitions write the flag.
    pub(super) fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }
}
