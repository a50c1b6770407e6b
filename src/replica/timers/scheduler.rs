use crate::replica::timers::stop_signal;
use tokio::time::{Duration, Instant};

/// What a timer is for. The replica decides what to do based on its role when it fires.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Follower/candidate election timeout.
    Election,
    /// Leader heartbeat tick. Also drives read and transfer expiry.
    Heartbeat,
}

/// A timer firing. `epoch` is the role epoch at scheduling time; the replica discards events from
/// an epoch it has since left.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimerEvent {
    pub epoch: u64,
    pub kind: TimerKind,
}

/// Dropping the handle cancels the timer.
pub struct TimerHandle {
    _stopper: Option<stop_signal::Stopper>,
}

/// Held by whoever fires the timer. Check it right before delivering the event.
#[derive(Clone)]
pub struct TimerCancellation {
    stop_check: stop_signal::StopCheck,
}

impl TimerHandle {
    pub fn new() -> (TimerHandle, TimerCancellation) {
        let (stopper, stop_check) = stop_signal::new();
        (
            TimerHandle {
                _stopper: Some(stopper),
            },
            TimerCancellation { stop_check },
        )
    }

    /// A handle that cancels nothing. For schedulers that rely on epochs alone.
    pub fn detached() -> TimerHandle {
        TimerHandle { _stopper: None }
    }
}

impl TimerCancellation {
    pub fn is_cancelled(&self) -> bool {
        self.stop_check.should_stop()
    }
}

/// Time source and timer service for a replica. Production uses tokio tasks; the simulation uses
/// virtual time.
pub trait Scheduler: Send {
    fn now(&self) -> Instant;

    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle;
}
