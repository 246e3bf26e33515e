use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Shared admission and lifecycle flags.
///
/// Read by the ingress session path and the relay ticker, mutated by the
/// bootstrap and the control API. Each flag is an independent atomic; no flag
/// is ever read-modify-written together with another, so no lock is needed.
#[derive(Debug, Default)]
pub struct RelayState {
    ready: AtomicBool,
    listener_running: AtomicBool,
    listener_paused: AtomicBool,
    sender_paused: AtomicBool,
    scanning: AtomicBool,
    timer_interval_ms: AtomicU64,
}

impl RelayState {
    pub fn new(timer_interval_ms: u64) -> Self {
        Self {
            timer_interval_ms: AtomicU64::new(timer_interval_ms),
            ..Self::default()
        }
    }

    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn listener_running(&self) -> bool {
        self.listener_running.load(Ordering::SeqCst)
    }

    pub fn set_listener_running(&self, running: bool) {
        self.listener_running.store(running, Ordering::SeqCst);
    }

    pub fn listener_paused(&self) -> bool {
        self.listener_paused.load(Ordering::SeqCst)
    }

    pub fn sender_paused(&self) -> bool {
        self.sender_paused.load(Ordering::SeqCst)
    }

    pub fn scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn set_scanning(&self, scanning: bool) {
        self.scanning.store(scanning, Ordering::SeqCst);
    }

    /// Pause or resume ingress. Returns whether the value changed, so the
    /// caller only logs actual transitions.
    pub fn pause_listener(&self, paused: bool) -> bool {
        self.listener_paused.swap(paused, Ordering::SeqCst) != paused
    }

    /// Pause or resume the dispatcher. Returns whether the value changed.
    pub fn pause_sender(&self, paused: bool) -> bool {
        self.sender_paused.swap(paused, Ordering::SeqCst) != paused
    }

    pub fn timer_interval_ms(&self) -> u64 {
        self.timer_interval_ms.load(Ordering::SeqCst)
    }

    /// Timed (parking) mode is active; `0` means direct mode.
    pub fn timer_enabled(&self) -> bool {
        self.timer_interval_ms() > 0
    }
}
