use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop signal shared by the service, the scan pass and the
/// scheduler.
///
/// Uses an AtomicBool internally. Clone is cheap and shares state. Raising is
/// one-way for the lifetime of a run; a new run gets a fresh signal.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    raised: Arc<AtomicBool>,
}

impl StopSignal {
    /// Create a new stop signal (not raised).
    pub fn new() -> Self {
        Self {
            raised: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check whether a stop has been requested.
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Request a stop.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }
}
