use crate::replica::{
    MemberId, OutboundRequest, RaftTransport, ReplyFromPeer, Scheduler, TimerCancellation, TimerEvent, TimerHandle,
};
use rand::rngs::StdRng;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{Duration, Instant};

pub(super) enum Action {
    Timer {
        member: MemberId,
        incarnation: u64,
        event: TimerEvent,
        cancellation: TimerCancellation,
    },
    Deliver {
        from: MemberId,
        from_incarnation: u64,
        outbound: OutboundRequest,
    },
    Reply {
        to: MemberId,
        incarnation: u64,
        reply: ReplyFromPeer,
    },
}

pub(super) struct Scheduled {
    pub(super) at: Instant,
    seq: u64,
    pub(super) action: Action,
}

// Min-heap on (at, seq). Ties resolve in scheduling order, which keeps runs reproducible.
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

/// Virtual clock plus everything that is due to happen. Time only moves when the cluster pops an
/// event.
pub(super) struct EventQueue {
    now: Instant,
    seq: u64,
    events: BinaryHeap<Scheduled>,
    rng: StdRng,
    min_delay: Duration,
    max_delay: Duration,
}

pub(super) type SharedQueue = Arc<Mutex<EventQueue>>;

pub(super) fn lock(queue: &Mutex<EventQueue>) -> MutexGuard<'_, EventQueue> {
    // A panicking test thread must not hide the original failure behind a poison error.
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventQueue {
    pub(super) fn new(rng: StdRng, min_delay: Duration, max_delay: Duration) -> Self {
        EventQueue {
            now: Instant::now(),
            seq: 0,
            events: BinaryHeap::new(),
            rng,
            min_delay,
            max_delay: std::cmp::max(min_delay, max_delay),
        }
    }

    pub(super) fn now(&self) -> Instant {
        self.now
    }

    pub(super) fn advance_to(&mut self, at: Instant) {
        if at > self.now {
            self.now = at;
        }
    }

    pub(super) fn push(&mut self, delay: Duration, action: Action) {
        self.seq += 1;
        self.events.push(Scheduled {
            at: self.now + delay,
            seq: self.seq,
            action,
        });
    }

    pub(super) fn network_delay(&mut self) -> Duration {
        if self.min_delay == self.max_delay {
            return self.min_delay;
        }
        self.rng.gen_range(self.min_delay..=self.max_delay)
    }

    /// Pops the next event if it's due at or before `limit`, moving the clock to it.
    pub(super) fn pop_until(&mut self, limit: Instant) -> Option<Action> {
        match self.events.peek() {
            Some(next) if next.at <= limit => {}
            _ => return None,
        }
        let next = self.events.pop()?;
        self.advance_to(next.at);
        Some(next.action)
    }
}

/// Timers for one incarnation of a simulated member.
pub(super) struct SimScheduler {
    pub(super) member: MemberId,
    pub(super) incarnation: u64,
    pub(super) queue: SharedQueue,
}

impl Scheduler for SimScheduler {
    fn now(&self) -> Instant {
        lock(&self.queue).now()
    }

    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
        let (handle, cancellation) = TimerHandle::new();
        lock(&self.queue).push(
            delay,
            Action::Timer {
                member: self.member.clone(),
                incarnation: self.incarnation,
                event,
                cancellation,
            },
        );

        handle
    }
}

pub(super) struct SimTransport {
    pub(super) member: MemberId,
    pub(super) incarnation: u64,
    pub(super) queue: SharedQueue,
}

impl RaftTransport for SimTransport {
    fn send(&mut self, outbound: OutboundRequest) {
        let mut queue = lock(&self.queue);
        let delay = queue.network_delay();
        queue.push(
            delay,
            Action::Deliver {
                from: self.member.clone(),
                from_incarnation: self.incarnation,
                outbound,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::TimerKind;
    use rand::SeedableRng;

    fn queue() -> EventQueue {
        EventQueue::new(
            StdRng::seed_from_u64(7),
            Duration::from_millis(1),
            Duration::from_millis(1),
        )
    }

    fn timer(epoch: u64) -> Action {
        let (_handle, cancellation) = TimerHandle::new();
        Action::Timer {
            member: MemberId::new("a"),
            incarnation: 0,
            event: TimerEvent {
                epoch,
                kind: TimerKind::Election,
            },
            cancellation,
        }
    }

    fn epoch_of(action: Action) -> u64 {
        match action {
            Action::Timer { event, .. } => event.epoch,
            _ => panic!("Expected timer"),
        }
    }

    #[test]
    fn pops_in_time_then_scheduling_order() {
        let mut queue = queue();
        let start = queue.now();
        queue.push(Duration::from_millis(20), timer(1));
        queue.push(Duration::from_millis(10), timer(2));
        queue.push(Duration::from_millis(10), timer(3));

        let limit = start + Duration::from_secs(1);
        assert_eq!(epoch_of(queue.pop_until(limit).unwrap()), 2);
        assert_eq!(epoch_of(queue.pop_until(limit).unwrap()), 3);
        assert_eq!(queue.now(), start + Duration::from_millis(10));
        assert_eq!(epoch_of(queue.pop_until(limit).unwrap()), 1);
        assert!(queue.pop_until(limit).is_none());
    }

    #[test]
    fn clock_stops_at_limit() {
        let mut queue = queue();
        let start = queue.now();
        queue.push(Duration::from_millis(50), timer(1));

        assert!(queue.pop_until(start + Duration::from_millis(49)).is_none());
        assert_eq!(queue.now(), start);
    }
}
