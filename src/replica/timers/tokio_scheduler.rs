use crate::actor::WeakActorClient;
use crate::replica::timers::time::{Clock, RealClock};
use crate::replica::timers::{Scheduler, TimerCancellation, TimerEvent, TimerHandle};
use tokio::time::{Duration, Instant};

/// Scheduler for replicas running inside the actor. Each timer is its own tokio task that posts
/// the event back to the actor's queue, unless its handle was dropped in the meantime.
pub(crate) struct TokioScheduler<C: Clock = RealClock> {
    clock: C,
    actor_client: WeakActorClient,
}

struct TimerTask<C: Clock> {
    clock: C,
    actor_client: WeakActorClient,
    cancellation: TimerCancellation,
    deadline: Instant,
    event: TimerEvent,
}

impl TokioScheduler {
    pub(crate) fn new(actor_client: WeakActorClient) -> Self {
        Self::with_clock(actor_client, RealClock)
    }
}

impl<C: Clock> TokioScheduler<C> {
    pub(crate) fn with_clock(actor_client: WeakActorClient, clock: C) -> Self {
        TokioScheduler { clock, actor_client }
    }
}

impl<C: Clock> Scheduler for TokioScheduler<C> {
    fn now(&self) -> Instant {
        self.clock.now()
    }

    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
        let (handle, cancellation) = TimerHandle::new();
        let task = TimerTask {
            clock: self.clock.clone(),
            actor_client: self.actor_client.clone(),
            cancellation,
            deadline: self.clock.now() + delay,
            event,
        };
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock> TimerTask<C> {
    async fn run(mut self) {
        self.clock.sleep_until(self.deadline).await;

        // The handle has dropped, which means the replica moved on (new role, reset timeout).
        // Exit without notifying.
        if self.cancellation.is_cancelled() {
            return;
        }
        self.actor_client.timer(self.event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::timers::test_utils::TestUtilActor;
    use crate::replica::timers::time;
    use crate::replica::TimerKind;

    fn election_event(epoch: u64) -> TimerEvent {
        TimerEvent {
            epoch,
            kind: TimerKind::Election,
        }
    }

    #[tokio::test]
    async fn timer_fires_at_deadline() {
        // -- setup --
        let timeout = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, mut mock_clock_controller) = time::mocked_clock();
        let mut scheduler = TokioScheduler::with_clock(strong_actor_client.weak(), mock_clock);

        // -- execute & verify --
        let _handle = scheduler.schedule(timeout, election_event(3));
        actor.assert_no_event().await;

        let one_ns = Duration::from_nanos(1);
        mock_clock_controller.advance(timeout - one_ns);
        actor.assert_no_event().await;

        mock_clock_controller.advance(one_ns);
        actor.assert_timer_event(election_event(3)).await;
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn dropped_handle_cancels_timer() {
        // -- setup --
        let timeout = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, mut mock_clock_controller) = time::mocked_clock();
        let mut scheduler = TokioScheduler::with_clock(strong_actor_client.weak(), mock_clock);

        // -- execute --
        let handle = scheduler.schedule(timeout, election_event(1));
        drop(handle);

        // -- verify --
        mock_clock_controller.advance(timeout * 2);
        actor.assert_no_event().await;
    }

    /// Re-arming a timeout is drop-then-schedule. Only the newest one may fire.
    #[tokio::test]
    async fn rearmed_timer_replaces_previous() {
        // -- setup --
        let timeout = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, mut mock_clock_controller) = time::mocked_clock();
        let mut scheduler = TokioScheduler::with_clock(strong_actor_client.weak(), mock_clock);

        // -- execute --
        let mut handle = scheduler.schedule(timeout, election_event(1));
        for epoch in 2..=5 {
            mock_clock_controller.advance(timeout / 2);
            handle = scheduler.schedule(timeout, election_event(epoch));
        }
        actor.assert_no_event().await;

        // -- verify --
        mock_clock_controller.advance(timeout);
        actor.assert_timer_event(election_event(5)).await;
        actor.assert_no_event().await;
        drop(handle);
    }

    #[tokio::test]
    async fn timer_is_silent_after_actor_exit() {
        let timeout = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let weak = strong_actor_client.weak();
        let (mock_clock, mut mock_clock_controller) = time::mocked_clock();
        let mut scheduler = TokioScheduler::with_clock(weak, mock_clock);

        let _handle = scheduler.schedule(timeout, election_event(1));
        drop(strong_actor_client);
        drop(rx);

        // Implicit assertion: no panic
        mock_clock_controller.advance(timeout);
        tokio::task::yield_now().await;
    }
}
