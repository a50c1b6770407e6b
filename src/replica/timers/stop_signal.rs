use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flips the shared flag when dropped.
pub(super) struct Stopper {
    stop_signal: Arc<AtomicBool>,
}

#[derive(Clone)]
pub(super) struct StopCheck {
    stop_signal: Arc<AtomicBool>,
}

impl Drop for Stopper {
    fn drop(&mut self) {
        self.stop_signal.store(true, Ordering::Release);
    }
}

impl StopCheck {
    pub(super) fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::Acquire)
    }
}

pub(super) fn new() -> (Stopper, StopCheck) {
    let stop_signal = Arc::new(AtomicBool::new(false));

    let stopper = Stopper {
        stop_signal: stop_signal.clone(),
    };
    let stop_check = StopCheck { stop_signal };

    (stopper, stop_check)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_stops() {
        let (stopper, check) = new();
        let check2 = check.clone();
        assert!(!check.should_stop());
        drop(stopper);
        assert!(check.should_stop());
        assert!(check2.should_stop());
    }
}
